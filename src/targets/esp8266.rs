//! ESP8266: predates `GET_SECURITY_INFO` and the eFuse-based SPI pin
//! scheme. No SPI_ATTACH, no MAC-via-eFuse, no SDIO.

use super::{CHIP_ID_NONE, SdioLayout, SpiPinRecovery, SpiRegisters, TargetKind, TargetProfile};

const SPI_REG_BASE: u32 = 0x6000_0200;

pub(super) const PROFILE: TargetProfile = TargetProfile {
    kind: TargetKind::Esp8266,
    chip_id: CHIP_ID_NONE,
    magic_values: &[0xfff0_c101],
    spi_registers: SpiRegisters {
        base: SPI_REG_BASE,
        cmd_offset: 0x00,
        usr_offset: 0x1c,
        usr1_offset: 0x20,
        usr2_offset: 0x24,
        w0_offset: 0x40,
        mosi_dlen_offset: None,
        miso_dlen_offset: None,
    },
    efuse_base: 0,
    mac_efuse_offset: None,
    encryption_in_begin_flash_cmd: false,
    spi_pin_recovery: SpiPinRecovery::NotApplicable,
    sdio: None as Option<SdioLayout>,
};
