//! Configuration management for the GDB server

use crate::debugger::ChipProfile;
use crate::error::{Result, ServerError};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "probe-gdbserver")]
#[command(about = "A GDB remote serial protocol server for ARM Cortex-M targets")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "PROBE_GDBSERVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the GDB listener to
    #[arg(long)]
    pub listen_address: Option<String>,

    /// TCP port for GDB connections
    #[arg(short, long, env = "PROBE_GDBSERVER_PORT")]
    pub port: Option<u16>,

    /// Keep serving new clients after a client disconnects
    #[arg(short, long)]
    pub multi: bool,

    /// Do not reset the target when a client connects
    #[arg(long)]
    pub no_reset: bool,

    /// Enable semihosting support at startup
    #[arg(long)]
    pub semihosting: bool,

    /// Chip profile name (see the [chips] table)
    #[arg(long)]
    pub chip: Option<String>,

    /// Serial number of the debug probe to use
    #[arg(long)]
    pub serial: Option<String>,

    /// Probe speed in kHz
    #[arg(long)]
    pub speed: Option<u32>,

    /// Hold the target in reset while attaching
    #[arg(long)]
    pub connect_under_reset: bool,

    /// Log level (error, warn, info, debug, trace), overrides [logging]
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// List connected debug probes and exit
    #[arg(long)]
    pub list_probes: bool,

    /// Generate default configuration file
    #[arg(long)]
    pub generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,

    /// Show current configuration and exit
    #[arg(long)]
    pub show_config: bool,
}

/// Main configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub debugger: DebuggerConfig,
    pub session: SessionConfig,
    pub semihosting: SemihostingConfig,
    pub chips: HashMap<String, ChipConfig>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            debugger: DebuggerConfig::default(),
            session: SessionConfig::default(),
            semihosting: SemihostingConfig::default(),
            chips: Self::default_chips(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ServerError::InvalidConfig(format!("Failed to read config file: {}", e))
            })?;
            let mut config: Config = toml::from_str(&content)
                .map_err(|e| ServerError::InvalidConfig(format!("Invalid TOML syntax: {}", e)))?;
            // Built-in profiles stay available unless the file overrides them by name.
            for (name, chip) in Self::default_chips() {
                config.chips.entry(name).or_insert(chip);
            }
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Merge command line arguments into configuration
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(address) = &args.listen_address {
            self.server.listen_address = address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if args.multi {
            self.server.persistent = true;
        }
        if args.no_reset {
            self.debugger.reset_on_connect = false;
        }
        if args.semihosting {
            self.semihosting.enabled = true;
        }
        if let Some(chip) = &args.chip {
            self.debugger.chip = chip.clone();
        }
        if let Some(serial) = &args.serial {
            self.debugger.probe_serial = Some(serial.clone());
        }
        if let Some(speed) = args.speed {
            self.debugger.speed_khz = speed;
        }
        if args.connect_under_reset {
            self.debugger.connect_under_reset = true;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ServerError::InvalidConfig("server.port must be > 0".to_string()));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(ServerError::InvalidConfig(
                "server.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.server.max_send_attempts == Some(0) {
            return Err(ServerError::InvalidConfig(
                "server.max_send_attempts must be > 0 when set".to_string(),
            ));
        }
        if self.session.packet_size < 0x100 {
            return Err(ServerError::InvalidConfig(
                "session.packet_size must be at least 0x100".to_string(),
            ));
        }
        if self.session.max_transfer_size == 0 || self.session.max_transfer_size % 4 != 0 {
            return Err(ServerError::InvalidConfig(
                "session.max_transfer_size must be a non-zero multiple of 4".to_string(),
            ));
        }
        if self.debugger.speed_khz == 0 {
            return Err(ServerError::InvalidConfig("debugger.speed_khz must be > 0".to_string()));
        }
        if !self.chips.contains_key(&self.debugger.chip) {
            return Err(ServerError::InvalidConfig(format!(
                "debugger.chip '{}' has no [chips] entry",
                self.debugger.chip
            )));
        }
        for (name, chip) in &self.chips {
            chip.validate().map_err(|reason| {
                ServerError::InvalidConfig(format!("chips.{}: {}", name, reason))
            })?;
        }
        Ok(())
    }

    /// Generate TOML configuration string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ServerError::InvalidConfig(format!("Failed to serialize config: {}", e)))
    }

    /// Build the geometry profile of the selected chip
    pub fn chip_profile(&self) -> Result<ChipProfile> {
        let chip = self.chips.get(&self.debugger.chip).ok_or_else(|| {
            ServerError::InvalidConfig(format!("Unknown chip '{}'", self.debugger.chip))
        })?;
        Ok(ChipProfile::from_config(&self.debugger.chip, chip))
    }

    /// Get default chip profiles
    fn default_chips() -> HashMap<String, ChipConfig> {
        let mut chips = HashMap::new();

        chips.insert("stm32f103c8".to_string(), ChipConfig {
            probe_rs_name: "STM32F103C8".to_string(),
            flash_base: 0x0800_0000,
            flash_size: 0x1_0000,   // 64KB
            sectors: vec![SectorConfig { start: 0x0800_0000, size: 0x400 }],
            sram_base: 0x2000_0000,
            sram_size: 0x5000,      // 20KB
            bootrom_base: 0x1fff_f000,
            bootrom_size: 0x800,
        });

        chips.insert("stm32f407vg".to_string(), ChipConfig {
            probe_rs_name: "STM32F407VGTx".to_string(),
            flash_base: 0x0800_0000,
            flash_size: 0x10_0000,  // 1MB
            sectors: vec![
                SectorConfig { start: 0x0800_0000, size: 0x4000 },
                SectorConfig { start: 0x0801_0000, size: 0x1_0000 },
                SectorConfig { start: 0x0802_0000, size: 0x2_0000 },
            ],
            sram_base: 0x2000_0000,
            sram_size: 0x2_0000,    // 128KB
            bootrom_base: 0x1fff_0000,
            bootrom_size: 0x7800,
        });

        chips.insert("stm32f746zg".to_string(), ChipConfig {
            probe_rs_name: "STM32F746ZGTx".to_string(),
            flash_base: 0x0800_0000,
            flash_size: 0x10_0000,  // 1MB
            sectors: vec![
                SectorConfig { start: 0x0800_0000, size: 0x8000 },
                SectorConfig { start: 0x0802_0000, size: 0x2_0000 },
                SectorConfig { start: 0x0804_0000, size: 0x4_0000 },
            ],
            sram_base: 0x2000_0000,
            sram_size: 0x5_0000,    // 320KB
            bootrom_base: 0x1ff0_0000,
            bootrom_size: 0xedc0,
        });

        chips
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub port: u16,
    pub persistent: bool,
    pub poll_interval_ms: u64,
    /// `None` retries unacknowledged packets until the connection drops.
    pub max_send_attempts: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 4242,
            persistent: false,
            poll_interval_ms: 100,
            max_send_attempts: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DebuggerConfig {
    pub chip: String,
    pub probe_serial: Option<String>,
    pub speed_khz: u32,
    pub connect_under_reset: bool,
    pub reset_on_connect: bool,
    pub halt_timeout_ms: u64,
    pub verify_flash: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            chip: "stm32f103c8".to_string(),
            probe_serial: None,
            speed_khz: 4000,
            connect_under_reset: false,
            reset_on_connect: true,
            halt_timeout_ms: 500,
            verify_flash: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub packet_size: usize,
    pub max_transfer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size: 0x3fff,
            max_transfer_size: 0x1800,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SemihostingConfig {
    pub enabled: bool,
}

/// Flash and RAM geometry of one chip family
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipConfig {
    pub probe_rs_name: String,
    pub flash_base: u32,
    pub flash_size: u32,
    pub sram_base: u32,
    pub sram_size: u32,
    pub bootrom_base: u32,
    pub bootrom_size: u32,
    /// Erase granularity. Each entry applies from `start` up to the next entry.
    pub sectors: Vec<SectorConfig>,
}

impl ChipConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.flash_size == 0 {
            return Err("flash_size must be > 0".to_string());
        }
        let flash_end = self.flash_base as u64 + self.flash_size as u64;
        let first = self.sectors.first().ok_or("sectors must not be empty")?;
        if first.start != self.flash_base {
            return Err("first sector must start at flash_base".to_string());
        }
        for pair in self.sectors.windows(2) {
            if pair[1].start <= pair[0].start {
                return Err("sectors must be sorted by start address".to_string());
            }
        }
        for sector in &self.sectors {
            if sector.size == 0 {
                return Err(format!("sector at 0x{:08x} has zero size", sector.start));
            }
            if sector.start as u64 >= flash_end {
                return Err(format!("sector at 0x{:08x} lies outside flash", sector.start));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct SectorConfig {
    pub start: u32,
    pub size: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}
