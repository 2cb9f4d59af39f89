//! Integration tests for `Session` against a fake `Transport`, covering
//! the round-trip scenarios a real target's ROM/stub would produce.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use esp_bootloader_link::clock::Clock;
use esp_bootloader_link::command::{Command, CommandResponse, CommandResponseValue, CommandType};
use esp_bootloader_link::error::{Error, Result};
use esp_bootloader_link::session::{ConnectArgs, Session};
use esp_bootloader_link::targets::TargetKind;
use esp_bootloader_link::transport::Transport;

struct FakeClock {
    remaining: u32,
}

impl Clock for FakeClock {
    fn start_timer(&mut self, ms: u32) {
        self.remaining = ms;
    }
    fn remaining_time(&self) -> u32 {
        self.remaining
    }
    fn delay_ms(&mut self, ms: u32) {
        self.remaining = self.remaining.saturating_sub(ms);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self { remaining: 10_000 }
    }
}

fn u32_response(value: u32) -> CommandResponse {
    CommandResponse {
        direction: 1,
        command: 0,
        value: CommandResponseValue::ValueU32(value),
        error: 0,
        status: 0,
    }
}

fn vector_response(bytes: Vec<u8>) -> CommandResponse {
    CommandResponse {
        direction: 1,
        command: 0,
        value: CommandResponseValue::Vector(bytes),
        error: 0,
        status: 0,
    }
}

/// Shared recorder a test keeps a handle to after the `FakeTransport` that
/// writes into it has already been moved into a `Session`.
#[derive(Default)]
struct Recorder {
    read_reg: HashMap<u32, u32>,
    sent: Vec<CommandType>,
    read_flash_rom_calls: Vec<(u32, u32)>,
    flash_md5: Option<u128>,
}

struct FakeTransport {
    recorder: Rc<RefCell<Recorder>>,
}

impl FakeTransport {
    fn new() -> (Self, Rc<RefCell<Recorder>>) {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        (Self { recorder: recorder.clone() }, recorder)
    }

    fn with_magic(magic: u32) -> (Self, Rc<RefCell<Recorder>>) {
        let (transport, recorder) = Self::new();
        recorder.borrow_mut().read_reg.insert(0x4000_1000, magic);
        (transport, recorder)
    }
}

impl Transport for FakeTransport {
    fn command(&mut self, command: &Command<'_>, _clock: &mut dyn Clock) -> Result<CommandResponse> {
        let mut recorder = self.recorder.borrow_mut();
        recorder.sent.push(command.command_type());
        match command {
            Command::GetSecurityInfo => Err(Error::Fail),
            Command::ReadReg { address } => {
                let value = recorder.read_reg.get(address).copied().unwrap_or(0);
                Ok(u32_response(value))
            }
            Command::FlashMd5 { .. } => {
                let digest = recorder.flash_md5.unwrap_or(0);
                Ok(CommandResponse {
                    direction: 1,
                    command: 0,
                    value: CommandResponseValue::ValueU128(digest),
                    error: 0,
                    status: 0,
                })
            }
            Command::ReadFlashRom { offset, size } => {
                recorder.read_flash_rom_calls.push((*offset, *size));
                Ok(vector_response(vec![0xAB; *size as usize]))
            }
            Command::ReadFlash { size, .. } => Ok(vector_response(vec![0xCD; *size as usize])),
            // WriteReg, SpiAttach/SpiSetParams, flash/mem begin-data-end,
            // ChangeBaudrate, erase, and Sync all just need a generic ack;
            // the wildcard also satisfies `Command`'s `#[non_exhaustive]`.
            _ => Ok(u32_response(0)),
        }
    }

    fn sync(&mut self, _sync_timeout_ms: u32, _trials: u32, _clock: &mut dyn Clock) -> Result<()> {
        self.recorder.borrow_mut().sent.push(CommandType::Sync);
        Ok(())
    }
}

fn session_for(target_magic: u32) -> (Session<FakeTransport, FakeClock>, Rc<RefCell<Recorder>>, TargetKind) {
    let (transport, recorder) = FakeTransport::with_magic(target_magic);
    let mut session = Session::new(transport, FakeClock::default());
    let target = session.connect(ConnectArgs::default()).unwrap();
    (session, recorder, target)
}

#[test]
fn connect_syncs_detects_by_magic_and_attaches_spi() {
    let (session, recorder, target) = session_for(0x00f0_1d83);
    assert_eq!(target, TargetKind::Esp32);
    assert_eq!(session.target(), Some(TargetKind::Esp32));
    assert!(!session.stub_running());
    assert!(recorder.borrow().sent.contains(&CommandType::SpiAttach));
}

#[test]
fn connect_falls_back_to_esp32p4_date_register_when_no_magic_matches() {
    let (transport, recorder) = FakeTransport::new();
    recorder.borrow_mut().read_reg.insert(0x4000_1000, 0xFFFF_FFFF);
    recorder.borrow_mut().read_reg.insert(0x500d_0000, 0x0220_7202);
    let mut session = Session::new(transport, FakeClock::default());
    let target = session.connect(ConnectArgs::default()).unwrap();
    assert_eq!(target, TargetKind::Esp32P4);
}

#[test]
fn flash_start_write_finish_round_trips_through_the_transport() {
    let (mut session, recorder, _) = session_for(0x00f0_1d83);
    session.flash_start(0, 8, 1024).unwrap();
    session.flash_write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    session.flash_finish(false).unwrap();
    assert!(recorder.borrow().sent.contains(&CommandType::FlashData));
}

#[test]
fn flash_verify_matches_a_correctly_computed_local_digest() {
    let (mut session, recorder, _) = session_for(0x00f0_1d83);
    session.flash_start(0, 4, 1024).unwrap();
    session.flash_write(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

    let digest = md5_of(&[0xDE, 0xAD, 0xBE, 0xEF]);
    recorder.borrow_mut().flash_md5 = Some(u128::from_str_radix(&digest, 16).unwrap());
    session.flash_verify().unwrap();
}

#[test]
fn flash_verify_known_md5_rejects_a_mismatched_digest() {
    let (mut session, _, _) = session_for(0x00f0_1d83);
    let result = session.flash_verify_known_md5(0, 4, "00000000000000000000000000000000");
    match result {
        Err(Error::InvalidMd5 { .. }) => {}
        other => panic!("expected InvalidMd5, got {other:?}"),
    }
}

#[test]
fn rom_flash_read_issues_a_single_aligned_read_covering_the_whole_span() {
    let (mut session, recorder, _) = session_for(0x00f0_1d83);
    let mut dst = [0u8; 40];
    session.flash_read(&mut dst, 0x10020, 40).unwrap();

    let calls = recorder.borrow().read_flash_rom_calls.clone();
    assert_eq!(calls, vec![(0x10000, 72)]);
}

#[test]
fn esp32c2_scales_baud_rate_when_the_crystal_is_26mhz() {
    let (transport, recorder) = FakeTransport::with_magic(0x6f51_306f);
    // UART_CLK_DIV_REG chosen so est_freq = 115200 * raw / 1_000_000 <= 33.
    recorder.borrow_mut().read_reg.insert(0x6000_0014, 225);
    let mut session = Session::new(transport, FakeClock::default());
    session.connect(ConnectArgs::default()).unwrap();

    session.change_transmission_rate(230_400).unwrap();
    assert!(recorder.borrow().sent.contains(&CommandType::ChangeBaudrate));
}

#[test]
fn mem_start_write_finish_round_trips_for_a_ram_load() {
    let (mut session, _, _) = session_for(0x00f0_1d83);
    session.mem_start(0x4008_0000, 8, 0x1800).unwrap();
    session.mem_write(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    session.mem_finish(0x4008_0000).unwrap();
}

#[test]
fn read_mac_assembles_big_endian_efuse_words() {
    let (transport, recorder) = FakeTransport::with_magic(0x00f0_1d83);
    let profile = esp_bootloader_link::targets::profile(TargetKind::Esp32);
    let base = profile.efuse_base + profile.mac_efuse_offset.unwrap();
    recorder.borrow_mut().read_reg.insert(base, 0x1122_3344);
    recorder.borrow_mut().read_reg.insert(base + 4, 0x0000_aabb);
    let mut session = Session::new(transport, FakeClock::default());
    session.connect(ConnectArgs::default()).unwrap();

    let mac = session.read_mac().unwrap();
    assert_eq!(mac, [0xbb, 0xaa, 0x11, 0x22, 0x33, 0x44]);
}

fn md5_of(data: &[u8]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
