//! SPI slave binding: 3-byte preamble, toggle-bit flow control, IDLE/READY
//! handshake (§4.5.3), grounded in `protocol_spi.c`. The ROM's SPI slave
//! responder cannot carry response data back over this binding — commands
//! whose response is more than the fixed status word (`ReadFlash`,
//! `FlashMd5`, `GetSecurityInfo`, ...) are rejected before anything is
//! sent, per the vendor library's `send_cmd` precondition
//! (`resp_data != NULL` is unsupported "by the ROM for the SPI
//! interface" — a binding limitation, not a choice this crate makes).

extern crate alloc;

use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable, bytes_of};

use super::Transport;
use crate::clock::Clock;
use crate::command::{Command, CommandResponse, CommandType, parse_response};
use crate::error::{Error, Result};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TransactionCmd {
    WrBuf = 0x01,
    RdBuf = 0x02,
    WrDma = 0x03,
    RdDma = 0x04,
    #[allow(dead_code)]
    SegDone = 0x05,
    #[allow(dead_code)]
    EnQpi = 0x06,
    WrDone = 0x07,
    Cmd8 = 0x08,
    #[allow(dead_code)]
    Cmd9 = 0x09,
    #[allow(dead_code)]
    CmdA = 0x0A,
    #[allow(dead_code)]
    ExQpi = 0xDD,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlaveRegister {
    #[allow(dead_code)]
    Ver = 0,
    #[allow(dead_code)]
    RxSta = 4,
    TxSta = 8,
    Cmd = 12,
}

const SLAVE_STA_TOGGLE_BIT: u8 = 0x01;
const SLAVE_STA_INIT_BIT: u8 = 0x01 << 1;
const SLAVE_STA_BUF_LENGTH_POS: u8 = 2;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlaveCmd {
    Idle = 0xAA,
    Ready = 0xA5,
    #[allow(dead_code)]
    Reboot = 0xFE,
    #[allow(dead_code)]
    CommReinit = 0x5A,
    #[allow(dead_code)]
    Done = 0x55,
}

#[derive(Copy, Clone, Zeroable, Pod)]
#[repr(C, packed)]
struct TransactionPreamble {
    cmd: u8,
    addr: u8,
    dummy: u8,
}

fn preamble(cmd: TransactionCmd, addr: u8) -> [u8; 3] {
    bytes_of(&TransactionPreamble { cmd: cmd as u8, addr, dummy: 0 })
        .try_into()
        .unwrap()
}

/// One raw SPI bus transaction: assert chip-select, write `tx`, then read
/// `rx.len()` bytes, then deassert. Host-supplied; this crate never
/// touches the bus directly.
pub trait SpiChannel {
    fn transact(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()>;
}

/// Returns `true` for commands whose response cannot be carried back over
/// the fixed-size SPI status word.
fn carries_response_data(command_type: CommandType) -> bool {
    matches!(
        command_type,
        CommandType::ReadFlash
            | CommandType::ReadFlashRom
            | CommandType::FlashMd5
            | CommandType::GetSecurityInfo
    )
}

pub struct SpiTransport<C> {
    channel: C,
    toggle_shadow: Option<bool>,
}

impl<C: SpiChannel> SpiTransport<C> {
    pub fn new(channel: C) -> Self {
        Self { channel, toggle_shadow: None }
    }

    fn read_register(&mut self, reg: SlaveRegister) -> Result<u8> {
        let tx = preamble(TransactionCmd::RdBuf, reg as u8);
        let mut rx = [0u8; 1];
        self.channel.transact(&tx, &mut rx)?;
        Ok(rx[0])
    }

    fn write_register(&mut self, reg: SlaveRegister, value: u8) -> Result<()> {
        let tx = preamble(TransactionCmd::WrBuf, reg as u8);
        let mut combined = Vec::from(tx);
        combined.push(value);
        let mut discard = [0u8; 0];
        self.channel.transact(&combined, &mut discard)
    }

    /// Polls `CMD` for `IDLE`, announces `READY`, and waits for the
    /// target to echo it back (`loader_initialize_conn`).
    pub fn initialize(&mut self, trials: u32, clock: &mut dyn Clock) -> Result<()> {
        let mut attempts = 0;
        loop {
            if self.read_register(SlaveRegister::Cmd)? == SlaveCmd::Idle as u8 {
                break;
            }
            attempts += 1;
            if attempts >= trials || clock.remaining_time() == 0 {
                return Err(Error::Timeout);
            }
            clock.delay_ms(100);
        }

        self.write_register(SlaveRegister::Cmd, SlaveCmd::Ready as u8)?;

        loop {
            if self.read_register(SlaveRegister::Cmd)? == SlaveCmd::Ready as u8 {
                return Ok(());
            }
            if clock.remaining_time() == 0 {
                return Err(Error::Timeout);
            }
            clock.delay_ms(10);
        }
    }

    /// Tracks the target's toggle bit across calls, returning the
    /// currently-advertised response buffer length once a new toggle is
    /// observed (`handle_slave_state`).
    fn poll_response_ready(&mut self, clock: &mut dyn Clock) -> Result<u8> {
        loop {
            let status = self.read_register(SlaveRegister::TxSta)?;
            if status & SLAVE_STA_INIT_BIT == 0 {
                return Err(Error::InvalidResponse("target left init state".into()));
            }
            let toggle = status & SLAVE_STA_TOGGLE_BIT != 0;
            let buf_len = status >> SLAVE_STA_BUF_LENGTH_POS;

            match self.toggle_shadow {
                Some(shadow) if shadow == toggle => {
                    if clock.remaining_time() == 0 {
                        return Err(Error::Timeout);
                    }
                    clock.delay_ms(1);
                }
                _ => {
                    self.toggle_shadow = Some(toggle);
                    return Ok(buf_len);
                }
            }
        }
    }
}

impl<C: SpiChannel> Transport for SpiTransport<C> {
    fn command(&mut self, command: &Command<'_>, clock: &mut dyn Clock) -> Result<CommandResponse> {
        if carries_response_data(command.command_type()) {
            return Err(Error::UnsupportedFunc(
                "commands with response data are not supported by the ROM over the SPI interface",
            ));
        }

        let mut body = Vec::new();
        command.write(&mut body).map_err(|_| Error::Fail)?;

        let tx = preamble(TransactionCmd::WrDma, 0);
        let mut combined = Vec::from(tx);
        combined.extend_from_slice(&body);
        let mut discard = [0u8; 0];
        self.channel.transact(&combined, &mut discard)?;

        let done = preamble(TransactionCmd::WrDone, 0);
        self.channel.transact(&done, &mut discard)?;

        let buf_len = self.poll_response_ready(clock)?;
        let mut response = alloc::vec![0u8; buf_len as usize];
        let rd = preamble(TransactionCmd::RdDma, 0);
        self.channel.transact(&rd, &mut response)?;

        let terminate = preamble(TransactionCmd::Cmd8, 0);
        self.channel.transact(&terminate, &mut discard)?;

        parse_response(&response)
    }

    /// SPI slave handshake is IDLE/READY, not SYNC (§4.5.3); `trials`
    /// bounds the IDLE poll, `sync_timeout_ms` arms the deadline both
    /// phases of [`Self::initialize`] share.
    fn sync(&mut self, sync_timeout_ms: u32, trials: u32, clock: &mut dyn Clock) -> Result<()> {
        clock.start_timer(sync_timeout_ms);
        self.initialize(trials, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carrying_commands_are_rejected_before_any_transaction() {
        struct PanicChannel;
        impl SpiChannel for PanicChannel {
            fn transact(&mut self, _tx: &[u8], _rx: &mut [u8]) -> Result<()> {
                panic!("should never be called");
            }
        }
        struct FakeClock;
        impl Clock for FakeClock {
            fn start_timer(&mut self, _ms: u32) {}
            fn remaining_time(&self) -> u32 {
                1000
            }
            fn delay_ms(&mut self, _ms: u32) {}
        }

        let mut transport = SpiTransport::new(PanicChannel);
        let result = transport.command(
            &Command::FlashMd5 { offset: 0, size: 0 },
            &mut FakeClock,
        );
        assert_eq!(
            result,
            Err(Error::UnsupportedFunc(
                "commands with response data are not supported by the ROM over the SPI interface"
            ))
        );
    }
}
