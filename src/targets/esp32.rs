//! ESP32: the oldest chip with SPI_ATTACH support, using the word-3/word-5
//! eFuse pin-recovery algorithm, and one of the two SDIO-capable chips.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x3ff4_2000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32,
    chip_id: 0,
    magic_values: &[0x00f0_1d83],
    spi_registers: SpiRegisters {
        base: SPI_REG_BASE,
        cmd_offset: 0x00,
        usr_offset: 0x1c,
        usr1_offset: 0x20,
        usr2_offset: 0x24,
        w0_offset: 0x80,
        mosi_dlen_offset: Some(0x28),
        miso_dlen_offset: Some(0x2c),
    },
    efuse_base: 0x3ff5_a000,
    mac_efuse_offset: Some(0x04),
    encryption_in_begin_flash_cmd: false,
    spi_pin_recovery: SpiPinRecovery::Esp32Efuse,
    sdio: Some(SdioLayout {
        date_register: 0x178,
        expected_date_value: 0x1602_2500,
    }),
};
