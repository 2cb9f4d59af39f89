//! `GET_SECURITY_INFO` response decoding (§3, §4.3.1), grounded in
//! `esp_loader_get_security_info` and the `get_security_info_response_data_t`
//! wire layout.

use crate::error::{Error, Result};
use crate::targets::{TargetKind, target_from_chip_id};

const FLAG_SECURE_BOOT_EN: u32 = 1 << 0;
const FLAG_SECURE_BOOT_AGGRESSIVE_REVOKE: u32 = 1 << 1;
const FLAG_SECURE_DOWNLOAD_ENABLE: u32 = 1 << 2;
const FLAG_SECURE_BOOT_KEY_REVOKE0: u32 = 1 << 3;
const FLAG_SECURE_BOOT_KEY_REVOKE1: u32 = 1 << 4;
const FLAG_SECURE_BOOT_KEY_REVOKE2: u32 = 1 << 5;
const FLAG_SOFT_DIS_JTAG: u32 = 1 << 6;
const FLAG_HARD_DIS_JTAG: u32 = 1 << 7;
const FLAG_DIS_USB: u32 = 1 << 8;
const FLAG_DIS_DOWNLOAD_DCACHE: u32 = 1 << 9;
const FLAG_DIS_DOWNLOAD_ICACHE: u32 = 1 << 10;

/// Full response body length: `flags:u32, flash_crypt_cnt:u8,
/// key_purposes:[u8;7], chip_id:u32, eco_version:u32`.
const FULL_BODY_LEN: usize = 20;
/// ESP32-S2's response omits the trailing `chip_id`/`eco_version` fields.
const SHORT_BODY_LEN: usize = 12;

/// Decoded `GET_SECURITY_INFO` response (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityInfo {
    pub target_chip: Option<TargetKind>,
    pub eco_version: u32,
    pub secure_boot_enabled: bool,
    pub secure_boot_aggressive_revoke_enabled: bool,
    pub secure_download_mode_enabled: bool,
    pub secure_boot_revoked_keys: [bool; 3],
    pub jtag_software_disabled: bool,
    pub jtag_hardware_disabled: bool,
    pub usb_disabled: bool,
    pub dcache_in_uart_download_disabled: bool,
    pub icache_in_uart_download_disabled: bool,
    /// Derived from an odd popcount over the 7 `key_purposes` bytes
    /// (`esp_loader_get_security_info`'s bit-by-bit `byte_popcnt` loop;
    /// equivalent to, and implemented here as, `count_ones() % 2 != 0`).
    pub flash_encryption_enabled: bool,
}

/// Decodes the response body (the `Vector` payload of a
/// `GET_SECURITY_INFO` [`CommandResponse`](crate::command::CommandResponse)).
pub fn decode(body: &[u8]) -> Result<SecurityInfo> {
    if body.len() != FULL_BODY_LEN && body.len() != SHORT_BODY_LEN {
        return Err(Error::InvalidResponse("unexpected GET_SECURITY_INFO response length".into()));
    }

    let flags = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let key_purposes = &body[5..12];

    let (target_chip, eco_version) = if body.len() == FULL_BODY_LEN {
        let chip_id = u32::from_le_bytes(body[12..16].try_into().unwrap());
        let eco_version = u32::from_le_bytes(body[16..20].try_into().unwrap());
        let chip = if chip_id <= u32::from(u8::MAX) {
            target_from_chip_id(chip_id as u8)
        } else {
            None
        };
        (chip, eco_version)
    } else {
        (Some(TargetKind::Esp32S2), 0)
    };

    let flash_encryption_enabled = key_purposes
        .iter()
        .fold(0u32, |acc, byte| acc + byte.count_ones())
        % 2
        != 0;

    Ok(SecurityInfo {
        target_chip,
        eco_version,
        secure_boot_enabled: flags & FLAG_SECURE_BOOT_EN != 0,
        secure_boot_aggressive_revoke_enabled: flags & FLAG_SECURE_BOOT_AGGRESSIVE_REVOKE != 0,
        secure_download_mode_enabled: flags & FLAG_SECURE_DOWNLOAD_ENABLE != 0,
        secure_boot_revoked_keys: [
            flags & FLAG_SECURE_BOOT_KEY_REVOKE0 != 0,
            flags & FLAG_SECURE_BOOT_KEY_REVOKE1 != 0,
            flags & FLAG_SECURE_BOOT_KEY_REVOKE2 != 0,
        ],
        jtag_software_disabled: flags & FLAG_SOFT_DIS_JTAG != 0,
        jtag_hardware_disabled: flags & FLAG_HARD_DIS_JTAG != 0,
        usb_disabled: flags & FLAG_DIS_USB != 0,
        dcache_in_uart_download_disabled: flags & FLAG_DIS_DOWNLOAD_DCACHE != 0,
        icache_in_uart_download_disabled: flags & FLAG_DIS_DOWNLOAD_ICACHE != 0,
        flash_encryption_enabled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    extern crate alloc;

    fn body(flags: u32, key_purposes: [u8; 7], chip_id: Option<(u32, u32)>) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.push(0); // flash_crypt_cnt, unused by this crate
        buf.extend_from_slice(&key_purposes);
        if let Some((chip_id, eco_version)) = chip_id {
            buf.extend_from_slice(&chip_id.to_le_bytes());
            buf.extend_from_slice(&eco_version.to_le_bytes());
        }
        buf
    }

    #[test]
    fn short_response_always_identifies_esp32s2() {
        let info = decode(&body(0, [0; 7], None)).unwrap();
        assert_eq!(info.target_chip, Some(TargetKind::Esp32S2));
        assert_eq!(info.eco_version, 0);
    }

    #[test]
    fn full_response_decodes_chip_id_and_eco_version() {
        let info = decode(&body(0, [0; 7], Some((5, 2)))).unwrap();
        assert_eq!(info.target_chip, Some(TargetKind::Esp32C3));
        assert_eq!(info.eco_version, 2);
    }

    #[test]
    fn decodes_every_flag_bit() {
        let info = decode(&body(0x7FF, [0; 7], Some((0, 0)))).unwrap();
        assert!(info.secure_boot_enabled);
        assert!(info.secure_boot_aggressive_revoke_enabled);
        assert!(info.secure_download_mode_enabled);
        assert_eq!(info.secure_boot_revoked_keys, [true, true, true]);
        assert!(info.jtag_software_disabled);
        assert!(info.jtag_hardware_disabled);
        assert!(info.usb_disabled);
        assert!(info.dcache_in_uart_download_disabled);
        assert!(info.icache_in_uart_download_disabled);
    }

    #[test]
    fn flash_encryption_enabled_follows_odd_popcount_of_key_purposes() {
        // 1 set bit total: odd -> enabled.
        let odd = decode(&body(0, [1, 0, 0, 0, 0, 0, 0], Some((0, 0)))).unwrap();
        assert!(odd.flash_encryption_enabled);

        // 2 set bits total: even -> disabled.
        let even = decode(&body(0, [1, 1, 0, 0, 0, 0, 0], Some((0, 0)))).unwrap();
        assert!(!even.flash_encryption_enabled);
    }

    #[test]
    fn rejects_unexpected_lengths() {
        assert!(decode(&[0u8; 5]).is_err());
    }
}
