//! Chip identification and per-target register/eFuse layout (§3, §4.3,
//! §4.4). Each submodule carries one chip family's [`TargetProfile`]; this
//! module holds the shared types, the profile table, and the pure
//! (no-I/O) decode functions that turn register values already read by a
//! [`Session`](crate::session::Session) into chip identity, a MAC address,
//! or a recovered SPI pin configuration.

mod esp32;
mod esp32c2;
mod esp32c3;
mod esp32c5;
mod esp32c6;
mod esp32h2;
mod esp32p4;
mod esp32s2;
mod esp32s3;
mod esp8266;

use strum::Display;

use crate::command::SpiAttachParams;

/// The ten chip families the vendor bootloader protocol identifies.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TargetKind {
    Esp8266,
    Esp32,
    Esp32S2,
    Esp32C3,
    Esp32S3,
    Esp32C2,
    Esp32C5,
    Esp32H2,
    Esp32C6,
    Esp32P4,
}

/// SPI peripheral register offsets from a chip's `SPI_REG_BASE` (§4.4),
/// used to bit-bang the `RDSR`/flash-ID sequence before a stub is running.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpiRegisters {
    pub base: u32,
    pub cmd_offset: u32,
    pub usr_offset: u32,
    pub usr1_offset: u32,
    pub usr2_offset: u32,
    pub w0_offset: u32,
    pub mosi_dlen_offset: Option<u32>,
    pub miso_dlen_offset: Option<u32>,
}

/// Which eFuse pin-recovery algorithm applies to this chip's SPI_ATTACH
/// configuration word (§4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpiPinRecovery {
    /// ESP32: eFuse words 3 and 5, per-field pin extraction with GPIO
    /// 30/31 remap and collision detection.
    Esp32Efuse,
    /// ESP32-S2/-C3/-S3/-P4: eFuse words 18 and 19 packed directly into
    /// the 30-bit SPI_ATTACH word.
    Esp32xxEfuse,
    /// Newer chips with fixed SPI pins; always reports the all-zero
    /// configuration.
    Fixed,
    /// ESP8266 never issues SPI_ATTACH.
    NotApplicable,
}

/// SLCHOST register window identifying an SDIO-capable target, used to
/// confirm the SDIO transport is attached to the chip it expects before
/// any SIP traffic is exchanged.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SdioLayout {
    pub date_register: u32,
    pub expected_date_value: u32,
}

/// `CHIP_ID_NONE`: ESP8266 predates the `GET_SECURITY_INFO`/chip-id scheme.
pub const CHIP_ID_NONE: u8 = 0xFF;

/// Every static fact this crate knows about one chip family: the values
/// used to recognise it, and the register/eFuse layout its operations
/// read from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TargetProfile {
    pub kind: TargetKind,
    /// The numeric chip id carried in a stub `GET_SECURITY_INFO` response,
    /// or [`CHIP_ID_NONE`] for ESP8266.
    pub chip_id: u8,
    /// Values the magic register at `0x4000_1000` reads as on this chip.
    /// Empty for ESP32-P4, which is identified by its SPI peripheral date
    /// register instead (see [`ESP32P4_SPI_DATE_REG`]).
    pub magic_values: &'static [u32],
    pub spi_registers: SpiRegisters,
    pub efuse_base: u32,
    /// Offset of the two eFuse words the MAC address is packed into.
    /// `None` for ESP8266, which this crate does not support MAC reads
    /// for (§4.8 precondition).
    pub mac_efuse_offset: Option<u32>,
    pub encryption_in_begin_flash_cmd: bool,
    pub spi_pin_recovery: SpiPinRecovery,
    pub sdio: Option<SdioLayout>,
}

/// The ROM magic register every chip but ESP32-P4 is identified through.
pub const CHIP_DETECT_MAGIC_REG_ADDR: u32 = 0x4000_1000;

/// ESP32-P4's SPI peripheral date register, read as a fallback when no
/// magic value matched (§4.3).
pub const ESP32P4_SPI_DATE_REG: u32 = 0x500d_0000;
pub const ESP32P4_SPI_DATE_REG_MASK: u32 = 0x07FF_FFFF;
pub const ESP32P4_SPI_DATE_REG_VALUE: u32 = 0x0220_7202;

/// All ten profiles, in the order the vendor library's `esp_target[]` table
/// declares them.
pub const PROFILES: [TargetProfile; 10] = [
    esp8266::PROFILE,
    esp32::PROFILE,
    esp32s2::PROFILE,
    esp32c3::PROFILE,
    esp32s3::PROFILE,
    esp32c2::PROFILE,
    esp32c5::PROFILE,
    esp32h2::PROFILE,
    esp32c6::PROFILE,
    esp32p4::PROFILE,
];

/// Looks up a profile by [`TargetKind`].
pub fn profile(kind: TargetKind) -> &'static TargetProfile {
    PROFILES
        .iter()
        .find(|p| p.kind == kind)
        .expect("every TargetKind has a profile")
}

/// Matches a magic-register value against every profile's magic value
/// list (§4.3). Does not consider ESP32-P4, which has none.
pub fn detect_by_magic(magic_value: u32) -> Option<TargetKind> {
    PROFILES
        .iter()
        .find(|p| p.magic_values.contains(&magic_value))
        .map(|p| p.kind)
}

/// Confirms the ESP32-P4 SPI date-register fallback reading (§4.3):
/// `value & MASK == EXPECTED`.
pub fn is_esp32p4_spi_date_register(value: u32) -> bool {
    (value & ESP32P4_SPI_DATE_REG_MASK) == ESP32P4_SPI_DATE_REG_VALUE
}

/// Reverse lookup from a stub `GET_SECURITY_INFO` chip id (§4.3).
pub fn target_from_chip_id(chip_id: u8) -> Option<TargetKind> {
    PROFILES.iter().find(|p| p.chip_id == chip_id).map(|p| p.kind)
}

/// Assembles a MAC address from the two little-endian eFuse words at a
/// chip's `mac_efuse_offset` (§4.8 `read_mac`), byte order per
/// `loader_read_mac`.
pub fn assemble_mac(part1: u32, part2: u32) -> [u8; 6] {
    [
        ((part2 >> 8) & 0xff) as u8,
        (part2 & 0xff) as u8,
        ((part1 >> 24) & 0xff) as u8,
        ((part1 >> 16) & 0xff) as u8,
        ((part1 >> 8) & 0xff) as u8,
        (part1 & 0xff) as u8,
    ]
}

/// `num >= 30` maps to `GPIO32`/`GPIO33`; every other eFuse-encoded pin
/// number addresses its own GPIO directly. Used only by the ESP32
/// pin-recovery algorithm.
fn adjust_pin_number(num: u8) -> u8 {
    if num >= 30 { num + 2 } else { num }
}

/// ESP32 SPI pin recovery: eFuse words 5 and 3, with pin remap and
/// collision detection (`spi_config_esp32`). Returns the all-zero
/// configuration on an unfused or ambiguous encoding.
pub fn spi_config_esp32(efuse_word_5: u32, efuse_word_3: u32) -> SpiAttachParams {
    let pins = efuse_word_5 & 0xf_ffff;
    if pins == 0 || pins == 0xf_ffff {
        return SpiAttachParams::ZERO;
    }

    let clk = adjust_pin_number((pins & 0x1f) as u8);
    let q = adjust_pin_number(((pins >> 5) & 0x1f) as u8);
    let d = adjust_pin_number(((pins >> 10) & 0x1f) as u8);
    let cs = adjust_pin_number(((pins >> 15) & 0x1f) as u8);
    let hd = adjust_pin_number(((efuse_word_3 >> 4) & 0x1f) as u8);

    // Preserved verbatim from the vendor source, including the redundant
    // `q == d` clause appearing twice.
    if clk == cs || clk == d || clk == q || q == cs || q == d || q == d {
        return SpiAttachParams::ZERO;
    }

    SpiAttachParams { clk, q, d, hd, cs }
}

/// ESP32-S2/-C3/-S3/-P4 SPI pin recovery: eFuse words 18 and 19 packed
/// directly into a 30-bit SPI_ATTACH word (`spi_config_esp32xx`). Returns
/// the all-zero configuration on an unfused or ambiguous encoding.
pub fn spi_config_esp32xx(efuse_word_18: u32, efuse_word_19: u32) -> SpiAttachParams {
    let pins = ((efuse_word_18 >> 16) | ((efuse_word_19 & 0xf_ffff) << 16)) & 0x3fff_ffff;
    if pins == 0 || pins == 0xffff_ffff {
        return SpiAttachParams::ZERO;
    }
    SpiAttachParams {
        clk: (pins & 0x3f) as u8,
        q: ((pins >> 6) & 0x3f) as u8,
        d: ((pins >> 12) & 0x3f) as u8,
        cs: ((pins >> 18) & 0x3f) as u8,
        hd: ((pins >> 24) & 0x3f) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_each_chip_by_its_first_magic_value() {
        assert_eq!(detect_by_magic(0xfff0_c101), Some(TargetKind::Esp8266));
        assert_eq!(detect_by_magic(0x00f0_1d83), Some(TargetKind::Esp32));
        assert_eq!(detect_by_magic(0x6921_506f), Some(TargetKind::Esp32C3));
        assert_eq!(detect_by_magic(0x2ce0_806f), Some(TargetKind::Esp32C6));
        assert_eq!(detect_by_magic(0xffff_ffff), None);
    }

    #[test]
    fn esp32p4_has_no_magic_values_and_uses_the_date_register() {
        assert!(profile(TargetKind::Esp32P4).magic_values.is_empty());
        assert!(is_esp32p4_spi_date_register(0x0220_7202));
        assert!(is_esp32p4_spi_date_register(0xf220_7202));
        assert!(!is_esp32p4_spi_date_register(0x0220_7203));
    }

    #[test]
    fn chip_id_round_trips_through_every_profile() {
        assert_eq!(target_from_chip_id(0), Some(TargetKind::Esp32));
        assert_eq!(target_from_chip_id(18), Some(TargetKind::Esp32P4));
        assert_eq!(target_from_chip_id(CHIP_ID_NONE), Some(TargetKind::Esp8266));
        assert_eq!(target_from_chip_id(200), None);
    }

    #[test]
    fn assemble_mac_matches_loader_read_mac_byte_order() {
        let mac = assemble_mac(0x1122_3344, 0x0000_aabb);
        assert_eq!(mac, [0xbb, 0xaa, 0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn spi_config_esp32_rejects_all_zero_and_all_one_encodings() {
        assert_eq!(spi_config_esp32(0, 0), SpiAttachParams::ZERO);
        assert_eq!(spi_config_esp32(0xf_ffff, 0), SpiAttachParams::ZERO);
    }

    #[test]
    fn spi_config_esp32_rejects_colliding_pins() {
        // clk = q = 6 after remap collide.
        let word5 = 6 | (6 << 5);
        assert_eq!(spi_config_esp32(word5, 0), SpiAttachParams::ZERO);
    }

    #[test]
    fn spi_config_esp32_remaps_pins_30_and_31() {
        // clk=30 -> 32, q=1, d=2, cs=3, hd from word3 bits[8:4]=4
        let word5 = 30 | (1 << 5) | (2 << 10) | (3 << 15);
        let word3 = 4 << 4;
        let params = spi_config_esp32(word5, word3);
        assert_eq!(params.clk, 32);
        assert_eq!(params.q, 1);
        assert_eq!(params.d, 2);
        assert_eq!(params.cs, 3);
        assert_eq!(params.hd, 4);
    }

    #[test]
    fn spi_config_esp32xx_rejects_all_zero_and_all_one_encodings() {
        assert_eq!(spi_config_esp32xx(0, 0), SpiAttachParams::ZERO);
        assert_eq!(spi_config_esp32xx(0xffff_ffff, 0xffff_ffff), SpiAttachParams::ZERO);
    }

    #[test]
    fn sdio_layout_present_only_on_esp32_and_esp32c6() {
        assert!(profile(TargetKind::Esp32).sdio.is_some());
        assert!(profile(TargetKind::Esp32C6).sdio.is_some());
        assert!(profile(TargetKind::Esp32S3).sdio.is_none());
    }
}
