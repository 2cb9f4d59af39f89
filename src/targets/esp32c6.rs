//! ESP32-C6: fixed SPI pins; the second of the two SDIO-capable chips.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x6000_3000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32C6,
    chip_id: 13,
    magic_values: &[0x2ce0_806f],
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
    efuse_base: 0x600b_0800,
    mac_efuse_offset: Some(0x44),
    encryption_in_begin_flash_cmd: true,
    spi_pin_recovery: SpiPinRecovery::Fixed,
    sdio: Some(SdioLayout {
        date_register: 0x178,
        expected_date_value: 0x2106_0700,
    }),
};
