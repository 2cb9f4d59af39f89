//! ESP32-P4: no magic register values of its own (identified via its SPI
//! peripheral date register instead, see [`super::is_esp32p4_spi_date_register`]),
//! but otherwise uses the `ESP32xx` eFuse pin-recovery scheme.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x5008_d000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32P4,
    chip_id: 18,
    magic_values: &[],
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
    efuse_base: 0x5012_d000,
    mac_efuse_offset: Some(0x44),
    encryption_in_begin_flash_cmd: true,
    spi_pin_recovery: SpiPinRecovery::Esp32xxEfuse,
    sdio: None as Option<SdioLayout>,
};
