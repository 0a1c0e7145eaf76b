//! End-to-end tests: a GDB client speaking RSP over loopback TCP to the
//! server, which drives a simulated Cortex-M core.

use probe_gdbserver::config::{Config, ServerConfig};
use probe_gdbserver::debugger::breakpoints::{FP_COMP0, FP_CTRL};
use probe_gdbserver::debugger::{
    ChipProfile, CoreIdentity, CoreRegister, FlashDriver, HalfWord, Target, TargetStatus,
};
use probe_gdbserver::error::TargetError;
use probe_gdbserver::rsp::codec;
use probe_gdbserver::{GdbServer, ServerError, SessionDispatcher, SessionSettings};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Cortex-M3 with four FPB comparators that only halts when asked to
#[derive(Default)]
struct SimTarget {
    running: bool,
    registers: HashMap<CoreRegister, u32>,
    memory: HashMap<u32, u8>,
    debug_regs: HashMap<u32, u32>,
    flash_writes: Vec<(u32, usize)>,
    resets: u32,
    released: bool,
}

impl SimTarget {
    fn load(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *byte);
        }
    }

    fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| self.memory.get(&(address + i)).copied().unwrap_or(0))
            .collect()
    }
}

impl Target for SimTarget {
    fn core_identity(&mut self) -> Result<CoreIdentity, TargetError> {
        Ok(CoreIdentity::CortexM3)
    }

    fn status(&mut self) -> Result<TargetStatus, TargetError> {
        Ok(if self.running {
            TargetStatus::Running
        } else {
            TargetStatus::Halted
        })
    }

    fn halt(&mut self) -> Result<(), TargetError> {
        self.running = false;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        self.running = true;
        Ok(())
    }

    fn step(&mut self) -> Result<(), TargetError> {
        let pc = self.registers.get(&CoreRegister::PC).copied().unwrap_or(0);
        self.registers.insert(CoreRegister::PC, pc + 2);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        self.resets += 1;
        self.running = false;
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<(), TargetError> {
        self.reset()
    }

    fn read_register(&mut self, reg: CoreRegister) -> Result<u32, TargetError> {
        Ok(self.registers.get(&reg).copied().unwrap_or(0))
    }

    fn write_register(&mut self, reg: CoreRegister, value: u32) -> Result<(), TargetError> {
        self.registers.insert(reg, value);
        Ok(())
    }

    fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError> {
        if address % 4 != 0 || len % 4 != 0 {
            return Err(TargetError::Probe("unaligned word access".to_string()));
        }
        Ok(self.peek(address, len))
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        if address % 4 != 0 || data.len() % 4 != 0 {
            return Err(TargetError::Probe("unaligned word access".to_string()));
        }
        self.load(address, data);
        Ok(())
    }

    fn read_memory_u8(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError> {
        Ok(self.peek(address, len))
    }

    fn write_memory_u8(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        self.load(address, data);
        Ok(())
    }

    fn read_debug_word(&mut self, address: u32) -> Result<u32, TargetError> {
        if address == FP_CTRL {
            // NUM_CODE = 4
            return Ok(0x41);
        }
        Ok(self.debug_regs.get(&address).copied().unwrap_or(0))
    }

    fn write_debug_word(&mut self, address: u32, value: u32) -> Result<(), TargetError> {
        self.debug_regs.insert(address, value);
        Ok(())
    }

    fn release(&mut self) -> Result<(), TargetError> {
        self.released = true;
        self.running = true;
        Ok(())
    }
}

impl FlashDriver for SimTarget {
    fn erase_page(&mut self, address: u32) -> Result<(), TargetError> {
        let page = vec![0xff; 0x400];
        self.load(address, &page);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        self.flash_writes.push((address, data.len()));
        self.load(address, data);
        Ok(())
    }
}

fn start_server(target: SimTarget) -> (SocketAddr, JoinHandle<SessionDispatcher<SimTarget>>) {
    let config = Config::default();
    let chip = ChipProfile::from_config("stm32f103c8", &config.chips["stm32f103c8"]);
    let settings = SessionSettings {
        poll_interval: Duration::from_millis(5),
        ..SessionSettings::from_config(&config)
    };
    let server_config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };

    let dispatcher = SessionDispatcher::new(target, chip, settings);
    let server = GdbServer::bind(&server_config, dispatcher).unwrap();
    let address = server.local_addr().unwrap();
    let handle = thread::spawn(move || server.run().unwrap());
    (address, handle)
}

/// Minimal debugger side of the protocol
struct Client {
    stream: TcpStream,
}

impl Client {
    fn connect(address: SocketAddr) -> Self {
        let stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        Self { stream }
    }

    fn byte(&mut self) -> u8 {
        let mut buf = [0u8];
        self.stream.read_exact(&mut buf).unwrap();
        buf[0]
    }

    /// Send a packet and wait for its acknowledgement.
    fn send(&mut self, payload: &[u8]) {
        self.stream.write_all(&codec::frame(payload)).unwrap();
        assert_eq!(self.byte(), b'+');
    }

    /// Read one framed reply exactly as it appeared on the wire, and ACK it.
    fn raw_reply(&mut self) -> Vec<u8> {
        let mut frame = vec![self.byte()];
        assert_eq!(frame[0], b'$');
        loop {
            let byte = self.byte();
            frame.push(byte);
            if byte == b'#' {
                break;
            }
        }
        frame.push(self.byte());
        frame.push(self.byte());
        self.stream.write_all(b"+").unwrap();
        frame
    }

    fn reply(&mut self) -> Vec<u8> {
        let frame = self.raw_reply();
        frame[1..frame.len() - 3].to_vec()
    }

    fn request(&mut self, payload: &[u8]) -> String {
        self.send(payload);
        String::from_utf8_lossy(&self.reply()).into_owned()
    }
}

#[test]
fn test_memory_read_over_tcp() {
    let mut target = SimTarget::default();
    target.load(0x2000_0000, &[0x78, 0x56, 0x34, 0x12]);
    let (address, server) = start_server(target);

    let mut client = Client::connect(address);
    let reply = client.request(b"m20000000,4");
    assert_eq!(reply.len(), 8);
    assert_eq!(reply, "78563412");
    drop(client);

    let session = server.join().unwrap();
    assert!(session.target().released);
    assert!(!session.is_attached());
}

#[test]
fn test_breakpoint_insertion_reply_is_exact() {
    let (address, server) = start_server(SimTarget::default());

    let mut client = Client::connect(address);
    client.send(b"Z0,08000000,2");
    assert_eq!(client.raw_reply(), b"$OK#9a");
    drop(client);

    let session = server.join().unwrap();
    let live: Vec<_> = session
        .allocator()
        .breakpoints()
        .iter()
        .filter(|bp| !bp.is_free())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].address, 0x0800_0000);
    assert_eq!(live[0].halves, HalfWord::LOW);
    assert_eq!(session.target().debug_regs[&FP_COMP0], 0x4800_0001);
}

#[test]
fn test_flash_download() {
    let (address, server) = start_server(SimTarget::default());
    let image: Vec<u8> = (0..0x400u32).map(|i| (i * 7) as u8).collect();

    let mut client = Client::connect(address);
    assert_eq!(client.request(b"vFlashErase:08000000,400"), "OK");
    let mut write = b"vFlashWrite:08000000:".to_vec();
    write.extend_from_slice(&codec::escape_binary(&image));
    assert_eq!(client.request(&write), "OK");
    assert_eq!(client.request(b"vFlashDone"), "OK");
    drop(client);

    let session = server.join().unwrap();
    assert_eq!(session.target().flash_writes, vec![(0x0800_0000, 0x400)]);
    assert_eq!(session.target().peek(0x0800_0000, 0x400), image);
    assert!(session.staging().is_empty());
}

#[test]
fn test_interrupt_while_running() {
    let (address, server) = start_server(SimTarget::default());

    let mut client = Client::connect(address);
    client.send(b"c");
    thread::sleep(Duration::from_millis(50));
    client.stream.write_all(&[0x03]).unwrap();
    assert_eq!(client.reply(), b"S05");
    assert_eq!(client.request(b"?"), "S05");
    drop(client);

    let session = server.join().unwrap();
    // Released after the client left.
    assert!(session.target().released);
}

#[test]
fn test_persistent_mode_serves_next_client() {
    let (address, server) = start_server(SimTarget::default());

    let mut first = Client::connect(address);
    assert_eq!(first.request(b"!"), "OK");
    assert_eq!(first.request(b"M20000000,4:efbeadde"), "OK");
    drop(first);

    let mut second = Client::connect(address);
    assert_eq!(second.request(b"qAttached"), "1");
    assert_eq!(second.request(b"m20000000,4"), "efbeadde");
    second.send(b"vKill");
    assert_eq!(second.reply(), b"OK");
    drop(second);

    let session = server.join().unwrap();
    // One reset per connection.
    assert_eq!(session.target().resets, 2);
    assert!(session.target().released);
}

#[test]
fn test_registers_and_step() {
    let mut target = SimTarget::default();
    target.registers.insert(CoreRegister::PC, 0x0800_0100);
    let (address, server) = start_server(target);

    let mut client = Client::connect(address);
    assert_eq!(client.request(b"pf"), "00010008");
    assert_eq!(client.request(b"s"), "S05");
    assert_eq!(client.request(b"pf"), "02010008");
    assert_eq!(client.request(b"p11"), "E00");
    drop(client);

    server.join().unwrap();
}

#[test]
fn test_config_file_round_trip() {
    let config = Config::default();
    let toml = config.to_toml().unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    let path = file.path().to_path_buf();

    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded.server.port, config.server.port);
    assert_eq!(loaded.chips.len(), config.chips.len());
    assert_eq!(loaded.chip_profile().unwrap().page_size(0x0800_0000), 0x400);
}

#[test]
fn test_config_rejects_unknown_chip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[debugger]\nchip = \"nrf52840\"").unwrap();
    let path = file.path().to_path_buf();

    let result = Config::load(Some(&path));
    assert!(matches!(result, Err(ServerError::InvalidConfig(_))));
}
