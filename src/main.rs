//! probe-gdbserver - Main Entry Point

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use probe_gdbserver::{
    config::{Args, LoggingConfig},
    debugger::{ProbeDiscovery, ProbeTarget},
    Config, GdbServer, SessionDispatcher, SessionSettings,
};

fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Handle special flags first
    if args.generate_config {
        let config = Config::default();
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.list_probes {
        let probes = ProbeDiscovery::list_probes();
        if probes.is_empty() {
            println!("No debug probes found");
        }
        for probe in probes {
            println!("{}", probe);
        }
        return Ok(());
    }

    let mut config = Config::load(args.config.as_ref()).context("Failed to load configuration")?;

    // Command line wins over the file
    config.merge_args(&args);

    if args.validate_config {
        config.validate()?;
        println!("Configuration is valid");
        return Ok(());
    }

    if args.show_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging)?;

    info!("Starting probe-gdbserver v{}", env!("CARGO_PKG_VERSION"));
    debug!("Command line args: {:?}", args);

    config.validate().map_err(|e| {
        error!("Configuration validation failed: {}", e);
        e
    })?;

    let chip = config.chip_profile()?;
    info!("Target chip: {} (probe-rs target {})", chip.name, chip.probe_rs_name);

    let target = ProbeTarget::attach(&config.debugger, &chip)
        .with_context(|| format!("Failed to attach to {}", chip.probe_rs_name))?;

    let dispatcher = SessionDispatcher::new(target, chip, SessionSettings::from_config(&config));
    let server = GdbServer::bind(&config.server, dispatcher)?;
    server.run().context("GDB server failed")?;

    info!("probe-gdbserver stopped");
    Ok(())
}

/// Initialize logging system
fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if let Some(log_file) = &logging.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .with_context(|| format!("Cannot open log file {}", log_file.display()))?;

        subscriber.with_writer(file).init();

        println!("Logging to file: {}", log_file.display());
    } else {
        subscriber.with_writer(std::io::stderr).init();
    }

    debug!("Logging initialized with level: {}", logging.level);
    Ok(())
}
