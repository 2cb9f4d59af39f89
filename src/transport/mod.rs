//! The `Transport` capability trait (§6.1) and its three bindings: serial
//! (SLIP), SDIO (SIP), and SPI slave (preamble + toggle-bit). A
//! [`Session`](crate::session::Session) is generic over `Transport` and
//! never branches on which binding it's talking to; framing differences
//! live entirely inside each submodule.
//!
//! Host I/O — opening a serial port, driving reset/boot strap pins,
//! performing SDIO CMD52/53 or SPI-bus transactions — is supplied by the
//! caller. This crate models only the framing layered on top of those
//! bytes.

pub mod sdio;
pub mod serial;
pub mod spi;

use crate::clock::Clock;
use crate::command::{Command, CommandResponse};
use crate::error::Result;

/// A binding capable of carrying one command/response exchange of the
/// vendor bootloader protocol. `command` is the crate's only way to talk
/// to a target; the three implementations in this module differ only in
/// how they frame the bytes `Command::write` produces.
pub trait Transport {
    /// Sends `command` and returns its parsed response, bounded by the
    /// single deadline `clock` carries (§6.2 — no nested per-retry
    /// timeouts).
    fn command(&mut self, command: &Command<'_>, clock: &mut dyn Clock) -> Result<CommandResponse>;

    /// Sends a raw, already-framed byte sequence with no response
    /// expected, used only for the handful of writes that aren't a
    /// `Command` (stub upload's raw data blocks piggyback on
    /// `Transport::command`'s framing instead; this exists for
    /// bindings that need an explicit "fire and forget" primitive, e.g.
    /// a reset pulse carried in-band). Default implementation is a no-op.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Performs whatever handshake this binding needs before the session
    /// can issue ordinary commands (§4.5): serial retries SYNC up to
    /// `trials` times, `sync_timeout_ms` apart, draining the ROM's eight
    /// response frames on success; SPI polls the slave's IDLE/READY
    /// handshake; SDIO's card-level handshake happens before the
    /// `SdioChannel` is handed to this crate, so its override is a no-op.
    fn sync(&mut self, sync_timeout_ms: u32, trials: u32, clock: &mut dyn Clock) -> Result<()>;

    /// Called before every RAM load while a stub is already running
    /// (§9 "SDIO MEM_* overlap"): the SDIO binding must re-enter the ROM
    /// bootloader and reinitialise its link before a second RAM load,
    /// since the running stub cannot itself accept a new one over SDIO.
    /// Serial and SPI carry no such restriction, so their override stays
    /// the default no-op.
    fn prepare_ram_load(&mut self, _clock: &mut dyn Clock) -> Result<()> {
        Ok(())
    }
}
