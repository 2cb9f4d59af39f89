//! ESP32-S2: first chip to require `encrypted` in `FLASH_BEGIN` and to use
//! the eFuse-word-18/19 SPI pin-recovery scheme. A 20-byte
//! `GET_SECURITY_INFO` response (no `eco_version` field) always identifies
//! this chip (§4.3.1).

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x3f40_2000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32S2,
    chip_id: 2,
    magic_values: &[0x0000_07c6],
    spi_registers: SpiRegisters {
        base: SPI_REG_BASE,
        cmd_offset: 0x00,
        usr_offset: 0x18,
        usr1_offset: 0x1c,
        usr2_offset: 0x20,
        w0_offset: 0x58,
        mosi_dlen_offset: Some(0x24),
        miso_dlen_offset: Some(0x28),
    },
    efuse_base: 0x3f41_a000,
    mac_efuse_offset: Some(0x44),
    encryption_in_begin_flash_cmd: true,
    spi_pin_recovery: SpiPinRecovery::Esp32xxEfuse,
    sdio: None as Option<SdioLayout>,
};
