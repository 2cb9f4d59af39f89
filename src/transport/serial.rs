//! Serial/USB-CDC binding: SLIP framing over a byte stream (§4.5.1),
//! grounded in the host crate's `Connection::command`/`read_response`
//! loop, expressed here over [`embedded_io`] instead of a concrete serial
//! port type so any host-supplied byte stream works.

extern crate alloc;

use alloc::vec::Vec;

use embedded_io::{Read, Write};

use super::Transport;
use crate::clock::Clock;
use crate::command::{Command, CommandResponse, parse_response};
use crate::error::{Error, Result};
use crate::slip::decoder::{SlipDecoder, SlipError};
use crate::slip::encoder::SlipEncoder;

/// How long the transport sleeps between non-blocking read attempts while
/// waiting for a frame. The caller's `Clock` still owns the overall
/// deadline; this just bounds how often we poll.
const POLL_INTERVAL_MS: u32 = 1;

/// SLIP-over-serial transport. `P` is any byte stream the host opens —
/// typically a UART or USB-CDC port — whose `read` is non-blocking
/// (`Ok(0)` when no bytes are ready yet rather than blocking the thread).
pub struct SerialTransport<P> {
    port: P,
    decoder: SlipDecoder,
}

impl<P> SerialTransport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            decoder: SlipDecoder::new(),
        }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

impl<P: Read + Write> Transport for SerialTransport<P> {
    fn command(&mut self, command: &Command<'_>, clock: &mut dyn Clock) -> Result<CommandResponse> {
        let mut frame = Vec::new();
        let mut encoder = SlipEncoder::new(&mut frame).map_err(|_| Error::Fail)?;
        command.write(&mut encoder).map_err(|_| Error::Fail)?;
        encoder.finish().map_err(|_| Error::Fail)?;

        self.port.write_all(&frame).map_err(|_| Error::Fail)?;
        self.port.flush().map_err(|_| Error::Fail)?;

        let mut payload = Vec::new();
        loop {
            match self.decoder.decode(&mut self.port, &mut payload) {
                Ok(_) => break,
                Err(SlipError::EndOfStream) => {
                    if clock.remaining_time() == 0 {
                        return Err(Error::Timeout);
                    }
                    clock.delay_ms(POLL_INTERVAL_MS);
                }
                Err(SlipError::FramingError) => {
                    return Err(Error::InvalidResponse("SLIP framing error".into()));
                }
                Err(SlipError::OversizedPacket) => {
                    return Err(Error::InvalidResponse("response exceeded buffer".into()));
                }
                Err(SlipError::ReadError(_)) | Err(SlipError::WriteError(_)) => {
                    return Err(Error::Fail);
                }
            }
        }

        parse_response(&payload)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush().map_err(|_| Error::Fail)
    }

    /// Retries SYNC up to `trials` times, `100 ms` apart, each attempt
    /// bounded by `sync_timeout_ms`. On the first frame that decodes, the
    /// remaining seven SYNC acks the ROM sends are drained before
    /// returning (§4.2: "the loader must consume all eight before
    /// continuing").
    fn sync(&mut self, sync_timeout_ms: u32, trials: u32, clock: &mut dyn Clock) -> Result<()> {
        for attempt in 0..trials.max(1) {
            clock.start_timer(sync_timeout_ms);
            match self.command(&Command::Sync, clock) {
                Ok(_) => {
                    for _ in 0..crate::command::SYNC_RESPONSE_COUNT - 1 {
                        if self.read_one_frame(clock).is_err() {
                            break;
                        }
                    }
                    return Ok(());
                }
                Err(Error::Timeout) if attempt + 1 < trials.max(1) => {
                    log::warn!("SYNC attempt {} of {} timed out, retrying", attempt + 1, trials.max(1));
                    clock.delay_ms(100);
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::Timeout)
    }
}

impl<P: Read + Write> SerialTransport<P> {
    /// Reads and discards one SLIP frame, used only to drain the extra
    /// SYNC acks after the first has already been parsed.
    fn read_one_frame(&mut self, clock: &mut dyn Clock) -> Result<()> {
        let mut payload = Vec::new();
        loop {
            match self.decoder.decode(&mut self.port, &mut payload) {
                Ok(_) => return Ok(()),
                Err(SlipError::EndOfStream) => {
                    if clock.remaining_time() == 0 {
                        return Err(Error::Timeout);
                    }
                    clock.delay_ms(POLL_INTERVAL_MS);
                }
                Err(_) => return Err(Error::Fail),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::collections::VecDeque;

    use super::*;
    use crate::clock::Clock;

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

    struct LoopbackPort {
        to_read: VecDeque<u8>,
        written: Vec<u8>,
    }

    impl embedded_io::ErrorType for LoopbackPort {
        type Error = core::convert::Infallible;
    }

    impl Read for LoopbackPort {
        fn read(&mut self, buf: &mut [u8]) -> core::result::Result<usize, Self::Error> {
            let mut n = 0;
            while n < buf.len() {
                match self.to_read.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
    }

    impl Write for LoopbackPort {
        fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, Self::Error> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> core::result::Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn sync_round_trips_through_slip_framing() {
        let mut response = alloc::vec![1u8, 0x08, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut framed = alloc::vec![0xC0];
        framed.append(&mut response);
        framed.push(0xC0);

        let port = LoopbackPort {
            to_read: framed.into(),
            written: Vec::new(),
        };
        let mut transport = SerialTransport::new(port);
        let mut clock = FakeClock { remaining: 100 };

        let response = transport.command(&Command::Sync, &mut clock).unwrap();
        assert_eq!(response.command, 0x08);
        assert_eq!(transport.port.written.first(), Some(&0xC0));
    }

    #[test]
    fn times_out_when_no_frame_arrives() {
        let port = LoopbackPort {
            to_read: VecDeque::new(),
            written: Vec::new(),
        };
        let mut transport = SerialTransport::new(port);
        let mut clock = FakeClock { remaining: 2 };

        let result = transport.command(&Command::Sync, &mut clock);
        assert_eq!(result, Err(Error::Timeout));
    }
}
