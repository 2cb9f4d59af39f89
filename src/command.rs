//! Command codec (§4.2): typed builders for every ROM/stub command, an
//! 8-byte header shared by all of them, little-endian packed bodies, and
//! the XOR checksum used by DATA commands.

extern crate alloc;

use alloc::vec::Vec;

use bytemuck::{Pod, Zeroable, bytes_of};
use embedded_io::Write;
use strum::Display;

use crate::error::Error;

/// Wire opcodes for every command the session issues. Values are bit-exact
/// with the vendor ROM/stub bootloader protocol.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandType {
    FlashBegin = 0x02,
    FlashData = 0x03,
    FlashEnd = 0x04,
    MemBegin = 0x05,
    MemEnd = 0x06,
    MemData = 0x07,
    Sync = 0x08,
    WriteReg = 0x09,
    ReadReg = 0x0A,
    SpiSetParams = 0x0B,
    SpiAttach = 0x0D,
    /// ROM-only, 64-byte-aligned flash read. Much slower than the stub's
    /// [`CommandType::ReadFlash`].
    ReadFlashRom = 0x0E,
    ChangeBaudrate = 0x0F,
    FlashMd5 = 0x13,
    GetSecurityInfo = 0x14,
    /// Stub-only.
    EraseFlash = 0xD0,
    /// Stub-only.
    EraseRegion = 0xD1,
    /// Stub-only streaming read with per-packet ack and MD5 trailer.
    ReadFlash = 0xD2,
    /// Not a wire opcode; the bit-banged SPI register sequence that reads
    /// the flash ID (§4.4) is logged and timed under this pseudo-command.
    FlashDetect,
}

/// The fixed 36-byte SYNC payload: `07 07 12 20` followed by 32×`0x55`.
pub const SYNC_FRAME: [u8; 36] = [
    0x07, 0x07, 0x12, 0x20, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55,
    0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55, 0x55,
    0x55, 0x55, 0x55, 0x55,
];

/// The SYNC response sequence that must be fully drained before continuing.
pub const SYNC_RESPONSE_COUNT: usize = 8;

const CHECKSUM_INIT: u8 = 0xEF;

/// XOR checksum over `data`, seeded with `CHECKSUM_INIT`. Used only for
/// `FLASH_DATA`/`MEM_DATA` bodies; every other command sends a zero
/// checksum field.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(CHECKSUM_INIT, |acc, byte| acc ^ byte)
}

/// SPI pin configuration sent by `SPI_ATTACH`, recovered from eFuse
/// (§4.4) or hardcoded to zero on chips with fixed pins.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpiAttachParams {
    pub clk: u8,
    pub q: u8,
    pub d: u8,
    pub hd: u8,
    pub cs: u8,
}

impl SpiAttachParams {
    /// The all-zero configuration used for secure-download mode and for
    /// chips with fixed SPI pins.
    pub const ZERO: Self = Self {
        clk: 0,
        q: 0,
        d: 0,
        hd: 0,
        cs: 0,
    };

    /// Encodes the pin packing word. The ROM variant appends a trailing
    /// all-zero word; the stub variant omits it (§9 design note on
    /// stub-vs-ROM command shape).
    pub fn encode(&self, stub_running: bool) -> Vec<u8> {
        let packed = (u32::from(self.hd) << 24)
            | (u32::from(self.cs) << 18)
            | (u32::from(self.d) << 12)
            | (u32::from(self.q) << 6)
            | u32::from(self.clk);
        let mut out = Vec::from(packed.to_le_bytes());
        if !stub_running {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out
    }
}

/// Flash geometry sent by `SPI_SET_PARAMS`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpiSetParams {
    pub fl_id: u32,
    pub total_size: u32,
    pub block_size: u32,
    pub sector_size: u32,
    pub page_size: u32,
    pub status_mask: u32,
}

impl SpiSetParams {
    /// Builds the parameter set from a detected flash size, using the
    /// conventional 64 KiB block / 4 KiB sector / 256 B page geometry.
    pub fn new(total_size: u32) -> Self {
        Self {
            fl_id: 0,
            total_size,
            block_size: 64 * 1024,
            sector_size: 4 * 1024,
            page_size: 256,
            status_mask: 0xFFFF,
        }
    }

    pub fn encode(&self) -> [u8; 24] {
        #[derive(Zeroable, Pod, Copy, Clone)]
        #[repr(C)]
        struct Encoded {
            fl_id: u32,
            total_size: u32,
            block_size: u32,
            sector_size: u32,
            page_size: u32,
            status_mask: u32,
        }
        let encoded = Encoded {
            fl_id: self.fl_id,
            total_size: self.total_size,
            block_size: self.block_size,
            sector_size: self.sector_size,
            page_size: self.page_size,
            status_mask: self.status_mask,
        };
        bytes_of(&encoded).try_into().unwrap()
    }
}

/// Every command the session can issue, carrying its own body fields.
/// Mode (stub vs. ROM) is threaded explicitly through variants like
/// `SpiAttach`/`ReadFlash` rather than dispatched on a flag at the call
/// site (§9 design note).
#[derive(Copy, Clone, Debug)]
#[non_exhaustive]
pub enum Command<'a> {
    FlashBegin {
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
        supports_encryption: bool,
    },
    FlashData {
        data: &'a [u8],
        pad_to: usize,
        pad_byte: u8,
        sequence: u32,
    },
    FlashEnd {
        reboot: bool,
    },
    MemBegin {
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
    },
    MemData {
        data: &'a [u8],
        pad_to: usize,
        pad_byte: u8,
        sequence: u32,
    },
    MemEnd {
        no_entry: bool,
        entry: u32,
    },
    Sync,
    WriteReg {
        address: u32,
        value: u32,
        mask: Option<u32>,
    },
    ReadReg {
        address: u32,
    },
    SpiSetParams {
        spi_params: SpiSetParams,
    },
    SpiAttach {
        spi_params: SpiAttachParams,
        stub_running: bool,
    },
    ChangeBaudrate {
        new_baud: u32,
        prior_baud: u32,
    },
    FlashMd5 {
        offset: u32,
        size: u32,
    },
    EraseFlash,
    EraseRegion {
        offset: u32,
        size: u32,
    },
    ReadFlash {
        offset: u32,
        size: u32,
        block_size: u32,
        max_in_flight: u32,
    },
    ReadFlashRom {
        offset: u32,
        size: u32,
    },
    GetSecurityInfo,
}

impl Command<'_> {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FlashBegin { .. } => CommandType::FlashBegin,
            Command::FlashData { .. } => CommandType::FlashData,
            Command::FlashEnd { .. } => CommandType::FlashEnd,
            Command::MemBegin { .. } => CommandType::MemBegin,
            Command::MemData { .. } => CommandType::MemData,
            Command::MemEnd { .. } => CommandType::MemEnd,
            Command::Sync => CommandType::Sync,
            Command::WriteReg { .. } => CommandType::WriteReg,
            Command::ReadReg { .. } => CommandType::ReadReg,
            Command::SpiSetParams { .. } => CommandType::SpiSetParams,
            Command::SpiAttach { .. } => CommandType::SpiAttach,
            Command::ChangeBaudrate { .. } => CommandType::ChangeBaudrate,
            Command::FlashMd5 { .. } => CommandType::FlashMd5,
            Command::EraseFlash => CommandType::EraseFlash,
            Command::EraseRegion { .. } => CommandType::EraseRegion,
            Command::ReadFlash { .. } => CommandType::ReadFlash,
            Command::ReadFlashRom { .. } => CommandType::ReadFlashRom,
            Command::GetSecurityInfo => CommandType::GetSecurityInfo,
        }
    }

    /// Serialises the 8-byte header and body to `writer`, little-endian,
    /// unpadded.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), W::Error> {
        // direction = 0 (host to target), then the opcode.
        writer.write_all(&[0, self.command_type() as u8])?;
        match *self {
            Command::FlashBegin {
                size,
                blocks,
                block_size,
                offset,
                supports_encryption,
            } => begin_command(writer, size, blocks, block_size, offset, supports_encryption)?,
            Command::FlashData {
                data,
                pad_to,
                pad_byte,
                sequence,
            } => data_command(writer, data, pad_to, pad_byte, sequence)?,
            Command::FlashEnd { reboot } => write_basic(writer, &[u8::from(!reboot)])?,
            Command::MemBegin {
                size,
                blocks,
                block_size,
                offset,
            } => begin_command(writer, size, blocks, block_size, offset, false)?,
            Command::MemData {
                data,
                pad_to,
                pad_byte,
                sequence,
            } => data_command(writer, data, pad_to, pad_byte, sequence)?,
            Command::MemEnd { no_entry, entry } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct EntryParams {
                    no_entry: u32,
                    entry: u32,
                }
                let params = EntryParams {
                    no_entry: u32::from(no_entry),
                    entry,
                };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::Sync => write_basic(writer, &SYNC_FRAME)?,
            Command::WriteReg {
                address,
                value,
                mask,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct WriteRegParams {
                    address: u32,
                    value: u32,
                    mask: u32,
                    delay_us: u32,
                }
                let params = WriteRegParams {
                    address,
                    value,
                    mask: mask.unwrap_or(0xFFFF_FFFF),
                    delay_us: 0,
                };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::ReadReg { address } => write_basic(writer, &address.to_le_bytes())?,
            Command::SpiSetParams { spi_params } => write_basic(writer, &spi_params.encode())?,
            Command::SpiAttach {
                spi_params,
                stub_running,
            } => write_basic(writer, &spi_params.encode(stub_running))?,
            Command::ChangeBaudrate {
                new_baud,
                prior_baud,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct BaudParams {
                    new_baud: u32,
                    prior_baud: u32,
                }
                let params = BaudParams {
                    new_baud,
                    prior_baud,
                };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::FlashMd5 { offset, size } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct Md5Params {
                    offset: u32,
                    size: u32,
                    reserved0: u32,
                    reserved1: u32,
                }
                let params = Md5Params {
                    offset,
                    size,
                    reserved0: 0,
                    reserved1: 0,
                };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::EraseFlash => write_basic(writer, &[])?,
            Command::EraseRegion { offset, size } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct EraseRegionParams {
                    offset: u32,
                    size: u32,
                }
                let params = EraseRegionParams { offset, size };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::ReadFlash {
                offset,
                size,
                block_size,
                max_in_flight,
            } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct ReadFlashParams {
                    offset: u32,
                    size: u32,
                    block_size: u32,
                    max_in_flight: u32,
                }
                let params = ReadFlashParams {
                    offset,
                    size,
                    block_size,
                    max_in_flight,
                };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::ReadFlashRom { offset, size } => {
                #[derive(Zeroable, Pod, Copy, Clone)]
                #[repr(C)]
                struct ReadFlashRomParams {
                    offset: u32,
                    size: u32,
                }
                let params = ReadFlashRomParams { offset, size };
                write_basic(writer, bytes_of(&params))?;
            }
            Command::GetSecurityInfo => write_basic(writer, &[])?,
        }
        Ok(())
    }
}

fn write_basic<W: Write>(mut writer: W, data: &[u8]) -> Result<(), W::Error> {
    writer.write_all(&(data.len() as u16).to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

fn begin_command<W: Write>(
    writer: W,
    size: u32,
    blocks: u32,
    block_size: u32,
    offset: u32,
    supports_encryption: bool,
) -> Result<(), W::Error> {
    #[derive(Zeroable, Pod, Copy, Clone)]
    #[repr(C)]
    struct BeginParams {
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
        encrypted: u32,
    }
    let params = BeginParams {
        size,
        blocks,
        block_size,
        offset,
        encrypted: 0,
    };
    let bytes = bytes_of(&params);
    let data = if supports_encryption {
        bytes
    } else {
        &bytes[..bytes.len() - 4]
    };
    write_basic(writer, data)
}

fn data_command<W: Write>(
    mut writer: W,
    block_data: &[u8],
    pad_to: usize,
    pad_byte: u8,
    sequence: u32,
) -> Result<(), W::Error> {
    #[derive(Zeroable, Pod, Copy, Clone)]
    #[repr(C)]
    struct BlockParams {
        size: u32,
        sequence: u32,
        dummy1: u32,
        dummy2: u32,
    }

    let pad_length = pad_to.saturating_sub(block_data.len());
    let params = BlockParams {
        size: (block_data.len() + pad_length) as u32,
        sequence,
        dummy1: 0,
        dummy2: 0,
    };

    let check = block_data
        .iter()
        .chain(core::iter::repeat(&pad_byte).take(pad_length))
        .fold(CHECKSUM_INIT, |acc, byte| acc ^ byte);

    let total_length = core::mem::size_of::<BlockParams>() + block_data.len() + pad_length;
    writer.write_all(&(total_length as u16).to_le_bytes())?;
    writer.write_all(&u32::from(check).to_le_bytes())?;
    writer.write_all(bytes_of(&params))?;
    writer.write_all(block_data)?;
    for _ in 0..pad_length {
        writer.write_all(&[pad_byte])?;
    }
    Ok(())
}

/// The decoded value carried by a command response, shaped by its length
/// (§6.4: ROM responses are 10/12 bytes with a `u32` value, stub MD5
/// responses are 44 bytes of ASCII hex, stub raw-MD5 responses are 26
/// bytes of raw digest, everything else is a variable-length vector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResponseValue {
    ValueU32(u32),
    ValueU128(u128),
    Vector(Vec<u8>),
}

impl TryFrom<CommandResponseValue> for u32 {
    type Error = Error;

    fn try_from(value: CommandResponseValue) -> Result<Self, Self::Error> {
        match value {
            CommandResponseValue::ValueU32(v) => Ok(v),
            _ => Err(Error::InvalidResponse("expected u32 response value".into())),
        }
    }
}

impl TryFrom<CommandResponseValue> for u128 {
    type Error = Error;

    fn try_from(value: CommandResponseValue) -> Result<Self, Self::Error> {
        match value {
            CommandResponseValue::ValueU128(v) => Ok(v),
            _ => Err(Error::InvalidResponse("expected u128 response value".into())),
        }
    }
}

/// A parsed command response (the decoded body of one SLIP frame or SIP/
/// SPI transaction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub direction: u8,
    pub command: u8,
    pub value: CommandResponseValue,
    /// `0` on success; a nonzero value (possibly accompanied by `status`)
    /// indicates the target rejected the command.
    pub error: u8,
    pub status: u8,
}

/// Parses a raw (already SLIP/SIP/SPI-deframed) response buffer.
///
/// Response shapes, by total length:
/// - `10` or `12` bytes: ROM-style `{direction, command, size, value:u32,
///   [error, status] | [status, error]}`.
/// - `44` bytes: stub MD5 response, trailing 32 bytes are an ASCII hex
///   digest.
/// - `26` bytes: stub raw-MD5 response, trailing 16 bytes are a raw
///   digest.
/// - anything else with at least an 8-byte header: a variable-length
///   vector payload, header stripped.
pub fn parse_response(bytes: &[u8]) -> Result<CommandResponse, Error> {
    if bytes.len() < 8 {
        return Err(Error::InvalidResponse("response shorter than header".into()));
    }
    let direction = bytes[0];
    let command = bytes[1];
    let status_len = if bytes.len() == 10 || bytes.len() == 26 { 2 } else { 4 };

    let value = match bytes.len() {
        10 | 12 => {
            let raw = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
            CommandResponseValue::ValueU32(raw)
        }
        44 => {
            let hex = core::str::from_utf8(&bytes[8..40])
                .map_err(|_| Error::InvalidResponse("MD5 response is not valid UTF-8".into()))?;
            let value = u128::from_str_radix(hex, 16)
                .map_err(|_| Error::InvalidResponse("MD5 response is not valid hex".into()))?;
            CommandResponseValue::ValueU128(value)
        }
        26 => {
            let digest: [u8; 16] = bytes[8..24].try_into().unwrap();
            CommandResponseValue::ValueU128(u128::from_be_bytes(digest))
        }
        _ => CommandResponseValue::Vector(bytes[8..].to_vec()),
    };

    let tail = &bytes[bytes.len() - status_len..];
    let (error, status) = if status_len == 2 {
        (tail[0], tail[1])
    } else {
        (tail[2], tail[3])
    };

    Ok(CommandResponse {
        direction,
        command,
        value,
        error,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Checksum law (§8): `checksum(empty) = 0xEF`.
    #[test]
    fn checksum_of_empty_is_init_value() {
        assert_eq!(checksum(&[]), 0xEF);
    }

    #[test]
    fn checksum_xors_bytes() {
        assert_eq!(checksum(&[0x01]), 0xEF ^ 0x01);
        assert_eq!(checksum(&[0x01, 0x02]), 0xEF ^ 0x01 ^ 0x02);
    }

    #[test]
    fn sync_frame_is_fixed_pattern() {
        assert_eq!(SYNC_FRAME.len(), 36);
        assert_eq!(&SYNC_FRAME[..4], &[0x07, 0x07, 0x12, 0x20]);
        assert!(SYNC_FRAME[4..].iter().all(|&b| b == 0x55));
    }

    #[test]
    fn flash_begin_truncates_encrypted_word_without_support() {
        let mut buf = Vec::new();
        let cmd = Command::FlashBegin {
            size: 4096,
            blocks: 1,
            block_size: 1024,
            offset: 0x1000,
            supports_encryption: false,
        };
        cmd.write(&mut buf).unwrap();
        // header(2) + len(2) + checksum(4) + 16 bytes body (no encrypted word)
        assert_eq!(buf.len(), 2 + 2 + 4 + 16);
    }

    #[test]
    fn flash_begin_keeps_encrypted_word_with_support() {
        let mut buf = Vec::new();
        let cmd = Command::FlashBegin {
            size: 4096,
            blocks: 1,
            block_size: 1024,
            offset: 0x1000,
            supports_encryption: true,
        };
        cmd.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 2 + 2 + 4 + 20);
    }

    #[test]
    fn spi_attach_encode_omits_trailing_word_for_stub() {
        let params = SpiAttachParams {
            clk: 1,
            q: 2,
            d: 3,
            hd: 4,
            cs: 5,
        };
        assert_eq!(params.encode(true).len(), 4);
        assert_eq!(params.encode(false).len(), 8);
    }

    #[test]
    fn parse_response_rom_u32() {
        let mut bytes = alloc::vec![1u8, 0x0A, 0, 0];
        bytes.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        bytes.extend_from_slice(&[0, 0]);
        let parsed = parse_response(&bytes).unwrap();
        assert_eq!(parsed.direction, 1);
        assert_eq!(parsed.command, 0x0A);
        assert_eq!(parsed.value, CommandResponseValue::ValueU32(0xDEAD_BEEF));
        assert_eq!(parsed.error, 0);
        assert_eq!(parsed.status, 0);
    }

    #[test]
    fn parse_response_too_short_is_invalid() {
        assert!(parse_response(&[0u8; 4]).is_err());
    }
}
