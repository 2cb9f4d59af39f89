//! ESP32-H2: fixed SPI pins.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x6000_3000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32H2,
    chip_id: 16,
    magic_values: &[0xd7b7_3e80],
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
    sdio: None as Option<SdioLayout>,
};
