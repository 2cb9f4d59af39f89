//! ESP32-C3: shares the `ESP32xx` SPI register layout and the word-18/19
//! eFuse pin-recovery scheme with the other RISC-V chips.

use super::{SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x6000_2000;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp32C3,
    chip_id: 5,
    magic_values: &[0x6921_506f, 0x1b31_506f, 0x4881_606f, 0x4361_606f],
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
    mac_efuse_offset: Some(0x44),
    encryption_in_begin_flash_cmd: true,
    spi_pin_recovery: SpiPinRecovery::Esp32xxEfuse,
    sdio: None as Option<SdioLayout>,
};
