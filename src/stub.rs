//! Embedded per-chip stub images and the RAM-upload handshake (§4.7),
//! following the host crate's TOML+base64 resource pattern
//! (`flasher/stubs.rs`).
//!
//! The bundled `resources/stubs/*.toml` payloads are placeholders, not
//! genuine Espressif stub firmware — see the comment in each file. A
//! caller targeting real hardware must substitute actual stub images
//! (e.g. `esptool`'s) before `connect_with_stub` is used against a
//! device.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::targets::TargetKind;

/// The fixed four-byte ASCII handshake a running stub writes back over
/// the SLIP channel once it's alive, before any command is sent.
pub const STUB_HANDSHAKE: &[u8; 4] = b"OHAI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubImage {
    entry: u32,
    text: String,
    text_start: u32,
    data: String,
    data_start: u32,
}

macro_rules! stub_resource {
    ($name:literal) => {
        include_str!(concat!("../resources/stubs/", $name, ".toml"))
    };
}

impl StubImage {
    /// Looks up the bundled stub for `chip`, or `None` for chips this
    /// crate carries no stub resource for (ESP8266, which the host
    /// crate's own stub table also omits).
    pub fn for_chip(chip: TargetKind) -> Option<Result<StubImage>> {
        let raw = match chip {
            TargetKind::Esp8266 => return None,
            TargetKind::Esp32 => stub_resource!("esp32"),
            TargetKind::Esp32S2 => stub_resource!("esp32s2"),
            TargetKind::Esp32C3 => stub_resource!("esp32c3"),
            TargetKind::Esp32S3 => stub_resource!("esp32s3"),
            TargetKind::Esp32C2 => stub_resource!("esp32c2"),
            TargetKind::Esp32C5 => stub_resource!("esp32c5"),
            TargetKind::Esp32H2 => stub_resource!("esp32h2"),
            TargetKind::Esp32C6 => stub_resource!("esp32c6"),
            TargetKind::Esp32P4 => stub_resource!("esp32p4"),
        };
        Some(toml::from_str(raw).map_err(|_| Error::Fail))
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Decodes the text (code) segment, returning its load address and
    /// bytes.
    pub fn text(&self) -> Result<(u32, Vec<u8>)> {
        let bytes = BASE64.decode(&self.text).map_err(|_| Error::Fail)?;
        Ok((self.text_start, bytes))
    }

    /// Decodes the data segment, returning its load address and bytes.
    pub fn data(&self) -> Result<(u32, Vec<u8>)> {
        let bytes = BASE64.decode(&self.data).map_err(|_| Error::Fail)?;
        Ok((self.data_start, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chip_but_esp8266_has_a_bundled_stub() {
        assert!(StubImage::for_chip(TargetKind::Esp8266).is_none());
        for chip in [
            TargetKind::Esp32,
            TargetKind::Esp32S2,
            TargetKind::Esp32C3,
            TargetKind::Esp32S3,
            TargetKind::Esp32C2,
            TargetKind::Esp32C5,
            TargetKind::Esp32H2,
            TargetKind::Esp32C6,
            TargetKind::Esp32P4,
        ] {
            let stub = StubImage::for_chip(chip).unwrap().unwrap();
            assert!(stub.text().is_ok());
            assert!(stub.data().is_ok());
        }
    }

    #[test]
    fn stub_handshake_is_four_ascii_bytes() {
        assert_eq!(STUB_HANDSHAKE, b"OHAI");
    }
}
