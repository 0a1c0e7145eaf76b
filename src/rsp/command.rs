//! Decoding of received packets into commands

use super::codec::{self, decode_hex, decode_u32_le, parse_hex_u32};
use thiserror::Error;

/// A packet that names a known command but carries unusable arguments
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed packet: {0}")]
pub struct MalformedPacket(pub String);

/// `Z`/`z` sub-type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Software,
    Hardware,
    WriteWatch,
    ReadWatch,
    AccessWatch,
}

impl BreakpointKind {
    fn from_digit(digit: u8) -> Option<Self> {
        match digit {
            b'0' => Some(BreakpointKind::Software),
            b'1' => Some(BreakpointKind::Hardware),
            b'2' => Some(BreakpointKind::WriteWatch),
            b'3' => Some(BreakpointKind::ReadWatch),
            b'4' => Some(BreakpointKind::AccessWatch),
            _ => None,
        }
    }
}

/// One decoded request from the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadRegisters,
    /// Raw register file bytes, target byte order
    WriteRegisters(Vec<u8>),
    ReadRegister(u32),
    WriteRegister { index: u32, value: u32 },
    ReadMemory { address: u32, length: u32 },
    WriteMemory { address: u32, data: Vec<u8> },
    Continue(Option<u32>),
    Step(Option<u32>),
    HaltReason,
    Restart,
    ExtendedMode,
    InsertBreakpoint { kind: BreakpointKind, address: u32, length: u32 },
    RemoveBreakpoint { kind: BreakpointKind, address: u32, length: u32 },
    FlashErase { address: u32, length: u32 },
    /// Data is already unescaped
    FlashWrite { address: u32, data: Vec<u8> },
    FlashDone,
    Supported,
    ReadXfer { object: String, annex: String, offset: u32, length: u32 },
    MonitorCommand(String),
    Attached,
    CurrentThread,
    ThreadInfoFirst,
    ThreadInfoNext,
    SetThread,
    ThreadAlive,
    Detach,
    Kill,
    VKill,
    /// Anything the server answers with an empty packet
    Unsupported,
}

fn malformed(packet: &[u8]) -> MalformedPacket {
    MalformedPacket(String::from_utf8_lossy(packet).into_owned())
}

/// `<hex>,<hex>`
fn parse_pair(body: &[u8]) -> Option<(u32, u32)> {
    let mut parts = body.splitn(2, |b| *b == b',');
    let first = parse_hex_u32(parts.next()?)?;
    let second = parse_hex_u32(parts.next()?)?;
    Some((first, second))
}

/// Optional resume address of `c` / `s`
fn parse_resume_address(body: &[u8]) -> Option<Option<u32>> {
    if body.is_empty() {
        Some(None)
    } else {
        parse_hex_u32(body).map(Some)
    }
}

fn split_once(body: &[u8], separator: u8) -> Option<(&[u8], &[u8])> {
    let at = body.iter().position(|b| *b == separator)?;
    Some((&body[..at], &body[at + 1..]))
}

impl Command {
    /// Decode a checksum-verified packet payload.
    ///
    /// Packets the server does not implement decode to
    /// [`Command::Unsupported`]; only malformed arguments of known packets
    /// are errors.
    pub fn parse(packet: &[u8]) -> Result<Command, MalformedPacket> {
        let Some((&opcode, body)) = packet.split_first() else {
            return Ok(Command::Unsupported);
        };
        let bad = || malformed(packet);

        let command = match opcode {
            b'g' => Command::ReadRegisters,
            b'G' => Command::WriteRegisters(decode_hex(body).ok_or_else(bad)?),
            b'p' => Command::ReadRegister(parse_hex_u32(body).ok_or_else(bad)?),
            b'P' => {
                let (index, value) = split_once(body, b'=').ok_or_else(bad)?;
                Command::WriteRegister {
                    index: parse_hex_u32(index).ok_or_else(bad)?,
                    value: decode_u32_le(value).ok_or_else(bad)?,
                }
            }
            b'm' => {
                let (address, length) = parse_pair(body).ok_or_else(bad)?;
                Command::ReadMemory { address, length }
            }
            b'M' => {
                let (range, hex) = split_once(body, b':').ok_or_else(bad)?;
                let (address, length) = parse_pair(range).ok_or_else(bad)?;
                let data = decode_hex(hex).ok_or_else(bad)?;
                if data.len() != length as usize {
                    return Err(bad());
                }
                Command::WriteMemory { address, data }
            }
            b'c' => Command::Continue(parse_resume_address(body).ok_or_else(bad)?),
            b's' => Command::Step(parse_resume_address(body).ok_or_else(bad)?),
            b'?' => Command::HaltReason,
            b'R' => Command::Restart,
            b'!' => Command::ExtendedMode,
            b'Z' | b'z' => {
                let (&kind, rest) = body.split_first().ok_or_else(bad)?;
                let kind = BreakpointKind::from_digit(kind).ok_or_else(bad)?;
                let (address, length) = rest
                    .strip_prefix(b",")
                    .and_then(|args| {
                        // Conditions and commands after ';' are ignored.
                        let args = args.split(|b| *b == b';').next().unwrap_or(args);
                        parse_pair(args)
                    })
                    .ok_or_else(bad)?;
                if opcode == b'Z' {
                    Command::InsertBreakpoint { kind, address, length }
                } else {
                    Command::RemoveBreakpoint { kind, address, length }
                }
            }
            b'H' => Command::SetThread,
            b'T' => Command::ThreadAlive,
            b'D' => Command::Detach,
            b'k' => Command::Kill,
            b'q' => Self::parse_query(body).ok_or_else(bad)?,
            b'v' => Self::parse_v(body).ok_or_else(bad)?,
            _ => Command::Unsupported,
        };
        Ok(command)
    }

    /// `q` packets; `None` for malformed arguments.
    fn parse_query(body: &[u8]) -> Option<Command> {
        let command = if body.starts_with(b"Supported") {
            Command::Supported
        } else if let Some(args) = body.strip_prefix(b"Xfer:") {
            let mut fields = args.splitn(4, |b| *b == b':');
            let object = fields.next()?;
            if fields.next()? != b"read" {
                return Some(Command::Unsupported);
            }
            let annex = fields.next()?;
            let (offset, length) = parse_pair(fields.next()?)?;
            Command::ReadXfer {
                object: String::from_utf8_lossy(object).into_owned(),
                annex: String::from_utf8_lossy(annex).into_owned(),
                offset,
                length,
            }
        } else if let Some(hex) = body.strip_prefix(b"Rcmd,") {
            let text = codec::decode_hex(hex)?;
            Command::MonitorCommand(String::from_utf8_lossy(&text).into_owned())
        } else {
            match body {
                b"Attached" => Command::Attached,
                b"C" => Command::CurrentThread,
                b"fThreadInfo" => Command::ThreadInfoFirst,
                b"sThreadInfo" => Command::ThreadInfoNext,
                _ if body.starts_with(b"Attached:") => Command::Attached,
                _ => Command::Unsupported,
            }
        };
        Some(command)
    }

    /// `v` packets; `None` for malformed arguments.
    fn parse_v(body: &[u8]) -> Option<Command> {
        let command = if let Some(args) = body.strip_prefix(b"FlashErase:") {
            let (address, length) = parse_pair(args)?;
            Command::FlashErase { address, length }
        } else if let Some(args) = body.strip_prefix(b"FlashWrite:") {
            let (address, data) = split_once(args, b':')?;
            Command::FlashWrite {
                address: parse_hex_u32(address)?,
                data: codec::unescape_binary(data),
            }
        } else if body == b"FlashDone" {
            Command::FlashDone
        } else if body == b"Kill" || body.starts_with(b"Kill;") {
            Command::VKill
        } else {
            Command::Unsupported
        };
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(packet: &str) -> Command {
        Command::parse(packet.as_bytes()).unwrap()
    }

    #[test]
    fn test_memory_commands() {
        assert_eq!(
            parse("m20000000,4"),
            Command::ReadMemory { address: 0x2000_0000, length: 4 }
        );
        assert_eq!(
            parse("M20000001,2:beef"),
            Command::WriteMemory { address: 0x2000_0001, data: vec![0xbe, 0xef] }
        );
        assert!(Command::parse(b"M20000000,4:beef").is_err());
        assert!(Command::parse(b"m20000000").is_err());
        assert!(Command::parse(b"mxyz,4").is_err());
    }

    #[test]
    fn test_register_commands() {
        assert_eq!(parse("g"), Command::ReadRegisters);
        assert_eq!(
            parse("G0100000002000000"),
            Command::WriteRegisters(vec![1, 0, 0, 0, 2, 0, 0, 0])
        );
        assert_eq!(parse("p19"), Command::ReadRegister(0x19));
        assert_eq!(
            parse("Pf=35010008"),
            Command::WriteRegister { index: 15, value: 0x0800_0135 }
        );
        assert!(Command::parse(b"Pf").is_err());
        assert!(Command::parse(b"Pf=3501").is_err());
    }

    #[test]
    fn test_execution_commands() {
        assert_eq!(parse("c"), Command::Continue(None));
        assert_eq!(parse("c08000134"), Command::Continue(Some(0x0800_0134)));
        assert_eq!(parse("s"), Command::Step(None));
        assert_eq!(parse("?"), Command::HaltReason);
        assert_eq!(parse("R00"), Command::Restart);
        assert_eq!(parse("!"), Command::ExtendedMode);
    }

    #[test]
    fn test_breakpoint_commands() {
        assert_eq!(
            parse("Z0,08000000,2"),
            Command::InsertBreakpoint {
                kind: BreakpointKind::Software,
                address: 0x0800_0000,
                length: 2
            }
        );
        assert_eq!(
            parse("z2,20000010,4"),
            Command::RemoveBreakpoint {
                kind: BreakpointKind::WriteWatch,
                address: 0x2000_0010,
                length: 4
            }
        );
        assert_eq!(
            parse("Z1,08000102,2;X1,0f"),
            Command::InsertBreakpoint {
                kind: BreakpointKind::Hardware,
                address: 0x0800_0102,
                length: 2
            }
        );
        assert!(Command::parse(b"Z9,08000000,2").is_err());
        assert!(Command::parse(b"Z1").is_err());
    }

    #[test]
    fn test_flash_commands() {
        assert_eq!(
            parse("vFlashErase:08000000,400"),
            Command::FlashErase { address: 0x0800_0000, length: 0x400 }
        );
        let mut packet = b"vFlashWrite:08000000:".to_vec();
        packet.extend_from_slice(&[0x01, 0x7d, 0x03, 0x7d, 0x5d, b':']);
        assert_eq!(
            Command::parse(&packet).unwrap(),
            Command::FlashWrite {
                address: 0x0800_0000,
                data: vec![0x01, b'#', 0x7d, b':']
            }
        );
        assert_eq!(parse("vFlashDone"), Command::FlashDone);
        assert!(Command::parse(b"vFlashErase:08000000").is_err());
    }

    #[test]
    fn test_queries() {
        assert_eq!(parse("qSupported:multiprocess+;swbreak+"), Command::Supported);
        assert_eq!(
            parse("qXfer:features:read:target.xml:0,fff"),
            Command::ReadXfer {
                object: "features".to_string(),
                annex: "target.xml".to_string(),
                offset: 0,
                length: 0xfff
            }
        );
        assert_eq!(
            parse("qXfer:memory-map:read::200,100"),
            Command::ReadXfer {
                object: "memory-map".to_string(),
                annex: String::new(),
                offset: 0x200,
                length: 0x100
            }
        );
        assert_eq!(parse("qXfer:features:write:target.xml:0,1"), Command::Unsupported);
        assert_eq!(parse("qRcmd,7265736574"), Command::MonitorCommand("reset".to_string()));
        assert_eq!(parse("qAttached"), Command::Attached);
        assert_eq!(parse("qC"), Command::CurrentThread);
        assert_eq!(parse("qfThreadInfo"), Command::ThreadInfoFirst);
        assert_eq!(parse("qsThreadInfo"), Command::ThreadInfoNext);
        assert_eq!(parse("qTStatus"), Command::Unsupported);
        assert!(Command::parse(b"qRcmd,7g").is_err());
    }

    #[test]
    fn test_session_commands() {
        assert_eq!(parse("Hg0"), Command::SetThread);
        assert_eq!(parse("T1"), Command::ThreadAlive);
        assert_eq!(parse("D"), Command::Detach);
        assert_eq!(parse("k"), Command::Kill);
        assert_eq!(parse("vKill;1"), Command::VKill);
        assert_eq!(parse("vCont?"), Command::Unsupported);
        assert_eq!(parse("vMustReplyEmpty"), Command::Unsupported);
        assert_eq!(parse("X20000000,0:"), Command::Unsupported);
        assert_eq!(parse(""), Command::Unsupported);
    }
}
