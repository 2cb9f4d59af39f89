//! The library's single closed error kind.

extern crate alloc;

#[cfg(feature = "std")]
use miette::Diagnostic;
use thiserror::Error;

/// All errors produced by this crate.
///
/// The taxonomy is intentionally flat: internal failure categories
/// (transport failure, framing error, protocol status byte, semantic
/// precondition) all collapse into one of these variants. Where the
/// underlying cause is a ROM/stub status byte or a bad framing detail, the
/// `InvalidResponse` variant carries a diagnostic string describing it —
/// see [`status_description`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[cfg_attr(feature = "std", derive(Diagnostic))]
#[non_exhaustive]
pub enum Error {
    /// The operation completed without a target-reported failure, but the
    /// caller-visible effect was still unsuccessful (generic ROM/stub
    /// `COMMAND_FAILED`, or no more specific variant applies).
    #[error("Operation failed")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::fail)))]
    Fail,

    /// The session deadline elapsed before the transport produced the
    /// expected bytes.
    #[error("Timed out waiting for a response")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::timeout)))]
    Timeout,

    /// A flash region or RAM load falls outside the target's addressable
    /// size.
    #[error("Image size {0} exceeds the available region of {1} bytes")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::image_size)))]
    ImageSize(u32, u32),

    /// A verified MD5 digest did not match the expected value.
    #[error("MD5 mismatch: expected {expected}, got {actual}")]
    #[cfg_attr(
        feature = "std",
        diagnostic(
            code(esp_bootloader_link::invalid_md5),
            help("The flashed image may be corrupt; retry the write")
        )
    )]
    InvalidMd5 {
        /// Hex-encoded digest the caller expected.
        expected: alloc::string::String,
        /// Hex-encoded digest the target reported.
        actual: alloc::string::String,
    },

    /// A precondition checked before issuing any I/O was violated:
    /// misaligned offset/size, oversize block, or an otherwise malformed
    /// argument.
    #[error("Invalid parameter: {0}")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::invalid_param)))]
    InvalidParam(&'static str),

    /// `connect_secure_download_mode` or an explicit chip hint does not
    /// match what the target actually reports.
    #[error("Invalid target: {0}")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::invalid_target)))]
    InvalidTarget(alloc::string::String),

    /// Chip detection completed but matched no known `TargetProfile`.
    #[error("Unsupported or unrecognised chip")]
    #[cfg_attr(
        feature = "std",
        diagnostic(
            code(esp_bootloader_link::unsupported_chip),
            help("The magic value or chip id read from the target did not match any known profile")
        )
    )]
    UnsupportedChip,

    /// The requested operation is not legal for this target or in the
    /// session's current mode (e.g. ESP8266 baud change, a stub-only
    /// operation without a running stub).
    #[error("Operation not supported in the current mode: {0}")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::unsupported_func)))]
    UnsupportedFunc(&'static str),

    /// A response was malformed (bad SLIP escape, truncated frame, wrong
    /// direction/opcode) or the target returned a protocol-level status
    /// byte. `status_description` decodes the latter.
    #[error("Invalid response: {0}")]
    #[cfg_attr(feature = "std", diagnostic(code(esp_bootloader_link::invalid_response)))]
    InvalidResponse(alloc::string::String),
}

/// Maps a ROM or stub status byte (the byte following a command response's
/// `direction`/`command`/`size`/`value` fields) to a human-readable
/// description, for inclusion in [`Error::InvalidResponse`].
///
/// Values and meanings are taken from the vendor bootloader's status-byte
/// table; codes `0xC0..=0xC9, 0xFF` are stub-only.
pub fn status_description(code: u8) -> &'static str {
    match code {
        0x00 => "success",
        0x05 => "invalid command",
        0x06 => "command failed",
        0x07 => "invalid CRC",
        0x08 => "flash write error",
        0x09 => "flash read error",
        0x0A => "read length error",
        0x0B => "deflate error",
        0xC0 => "stub: bad data length",
        0xC1 => "stub: bad data checksum",
        0xC2 => "stub: bad block size",
        0xC3 => "stub: invalid command",
        0xC4 => "stub: failed SPI operation",
        0xC5 => "stub: failed SPI unlock",
        0xC6 => "stub: not in flash mode",
        0xC7 => "stub: inflate error",
        0xC8 => "stub: not enough data",
        0xC9 => "stub: too much data",
        0xFF => "stub: command not implemented",
        _ => "unknown status code",
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_description_known_codes() {
        assert_eq!(status_description(0x06), "command failed");
        assert_eq!(status_description(0xC3), "stub: invalid command");
        assert_eq!(status_description(0xFF), "stub: command not implemented");
    }

    #[test]
    fn status_description_unknown_code() {
        assert_eq!(status_description(0x42), "unknown status code");
    }
}
