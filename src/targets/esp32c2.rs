//! ESP32-C2: fixed SPI pins — `spi_config_unsupported` always reports the
//! all-zero configuration, even though this chip shares the `ESP32xx`
//! register layout with chips that do recover pins from eFuse.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x6000_2000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32C2,
    chip_id: 12,
    magic_values: &[0x6f51_306f, 0x7c41_a06f],
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
    efuse_base: 0x6000_8800,
    mac_efuse_offset: Some(0x40),
    encryption_in_begin_flash_cmd: true,
    spi_pin_recovery: SpiPinRecovery::Fixed,
    sdio: None as Option<SdioLayout>,
};
