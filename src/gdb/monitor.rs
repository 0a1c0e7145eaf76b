//! `monitor` commands forwarded through `qRcmd`

/// A parsed monitor command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorVerb {
    Resume,
    Halt,
    Reset,
    JtagReset,
    Semihosting(bool),
    Unknown(String),
}

impl MonitorVerb {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let argument = words.next();

        match (verb, argument) {
            ("resume", None) => MonitorVerb::Resume,
            ("halt", None) => MonitorVerb::Halt,
            ("reset", None) => MonitorVerb::Reset,
            ("jtag_reset", None) => MonitorVerb::JtagReset,
            ("semihosting", Some("enable")) => MonitorVerb::Semihosting(true),
            ("semihosting", Some("disable")) => MonitorVerb::Semihosting(false),
            _ => MonitorVerb::Unknown(line.trim().to_string()),
        }
    }
}

const VERBS: &str = "resume, halt, reset, jtag_reset, semihosting enable|disable";

/// Console text returned for a command the server does not know
pub fn unknown_reply(line: &str) -> String {
    format!("Unknown monitor command '{}'. Supported: {}\n", line, VERBS)
}
