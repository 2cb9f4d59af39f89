//! The `Session` state machine (§4.6, §4.8): connect / stub handover,
//! flash and RAM programming, MAC/register/baud-rate/reset, grounded in
//! `esp_loader.c`'s public entry points with file-scope globals
//! (`s_target`, `s_reg`, `s_sequence_number`, ...) re-architected as
//! fields of a `Session` value (§9 design note).

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use md5::{Digest, Md5};

use crate::clock::{
    Clock, DEFAULT_TIMEOUT_MS, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS, MD5_TIMEOUT_PER_MB_MS,
    RAM_LOAD_TIMEOUT_PER_MB_MS, SHORT_TIMEOUT_MS, timeout_per_mb,
};
use crate::command::{Command, CommandResponse, CommandResponseValue, SpiAttachParams, SpiSetParams};
use crate::error::{Error, Result, status_description};
use crate::security::{self, SecurityInfo};
#[cfg(feature = "std")]
use crate::stub::StubImage;
use crate::targets::{self, CHIP_DETECT_MAGIC_REG_ADDR, SpiPinRecovery, TargetKind, TargetProfile};
use crate::transport::Transport;

/// `esp_loader_connect_args_t` (§2.3 ambient): connection timing knobs
/// passed explicitly by the caller rather than read from persisted state.
#[derive(Copy, Clone, Debug)]
pub struct ConnectArgs {
    pub sync_timeout_ms: u32,
    pub trials: u32,
}

impl Default for ConnectArgs {
    /// `ESP_LOADER_CONNECT_DEFAULT`.
    fn default() -> Self {
        Self {
            sync_timeout_ms: 100,
            trials: 10,
        }
    }
}

const ROM_FLASH_BLOCK_SIZE: u32 = 1024;
const FLASH_SECTOR_SIZE: u32 = 4096;
const RAM_BLOCK_SIZE: u32 = 0x1800;
const DEFAULT_FLASH_SIZE: u32 = 2 * 1024 * 1024;
/// Not present in the filtered vendor source (a Kconfig default outside
/// the retrieved file set); 3 matches the upstream project's documented
/// default.
const WRITE_BLOCK_RETRIES: u32 = 3;
/// Stub-only streaming read window (`esp_loader_flash_read`'s hardcoded
/// 256-byte buffer).
const STUB_READ_BLOCK_SIZE: u32 = 256;

const UART_CLK_DIV_REG: u32 = 0x6000_0014;
const UART_CLK_DIV_REG_MASK: u32 = 0xF_FFFF;
const INITIAL_UART_BAUDRATE: u32 = 115_200;
const ESP32C2_CRYSTAL_26MHZ: u32 = 26;
const ESP32C2_CRYSTAL_40MHZ: u32 = 40;
const CRYSTAL_FREQ_THRESHOLD: u32 = 33;

const SPI_USR_CMD: u32 = 1 << 31;
const SPI_USR_MISO: u32 = 1 << 28;
const SPI_USR_MOSI: u32 = 1 << 27;
const SPI_CMD_USR: u32 = 1 << 18;
const SPI_CMD_LEN_SHIFT: u32 = 28;
const SPI_FLASH_READ_ID: u8 = 0x9F;

/// `id -> size` lookup used by [`Session::flash_detect_size`], taken
/// verbatim from `esp_loader_flash_detect_size`'s table (the comment
/// there notes manufacturers don't follow a single rule for this byte;
/// these constants were themselves lifted from `esptool`).
const FLASH_SIZE_TABLE: &[(u8, u32)] = &[
    (0x12, 256 * 1024),
    (0x13, 512 * 1024),
    (0x14, 1024 * 1024),
    (0x15, 2 * 1024 * 1024),
    (0x16, 4 * 1024 * 1024),
    (0x17, 8 * 1024 * 1024),
    (0x18, 16 * 1024 * 1024),
    (0x19, 32 * 1024 * 1024),
    (0x1A, 64 * 1024 * 1024),
    (0x1B, 128 * 1024 * 1024),
    (0x1C, 256 * 1024 * 1024),
    (0x20, 64 * 1024 * 1024),
    (0x21, 128 * 1024 * 1024),
    (0x22, 256 * 1024 * 1024),
    (0x32, 256 * 1024),
    (0x33, 512 * 1024),
    (0x34, 1024 * 1024),
    (0x35, 2 * 1024 * 1024),
    (0x36, 4 * 1024 * 1024),
    (0x37, 8 * 1024 * 1024),
    (0x38, 16 * 1024 * 1024),
    (0x39, 32 * 1024 * 1024),
    (0x3A, 64 * 1024 * 1024),
];

/// Running MD5 state over a flash write stream, tracked between
/// `flash_start` and `flash_finish`/`flash_verify` (§3 `Session state`).
struct Md5Stream {
    hasher: Md5,
    address: u32,
    size: u32,
}

/// The loader's state machine: one `Session` drives one target over one
/// `Transport`, using `Clock` to bound every exchange with a single
/// deadline (§5). Generic over both so the same state machine runs over
/// serial, SDIO, or SPI without branching on which is in use.
pub struct Session<T, C> {
    transport: T,
    clock: C,
    target: Option<TargetKind>,
    profile: Option<&'static TargetProfile>,
    stub_running: bool,
    flash_size: u32,
    flash_block_size: u32,
    sequence_number: u32,
    md5: Option<Md5Stream>,
}

impl<T: Transport, C: Clock> Session<T, C> {
    pub fn new(transport: T, clock: C) -> Self {
        Self {
            transport,
            clock,
            target: None,
            profile: None,
            stub_running: false,
            flash_size: 0,
            flash_block_size: ROM_FLASH_BLOCK_SIZE,
            sequence_number: 0,
            md5: None,
        }
    }

    pub fn target(&self) -> Option<TargetKind> {
        self.target
    }

    pub fn stub_running(&self) -> bool {
        self.stub_running
    }

    pub fn flash_size(&self) -> u32 {
        self.flash_size
    }

    fn command(&mut self, command: &Command<'_>) -> Result<CommandResponse> {
        log::trace!("dispatching {:?}", command.command_type());
        let response = self.transport.command(command, &mut self.clock)?;
        if response.error != 0 {
            return Err(Error::InvalidResponse(format!(
                "target rejected command 0x{:02x}: {}",
                response.command,
                status_description(response.status)
            )));
        }
        Ok(response)
    }

    fn profile(&self) -> Result<&'static TargetProfile> {
        self.profile.ok_or(Error::Fail)
    }

    // ---- connect ------------------------------------------------------

    /// `esp_loader_connect`: handshake, detect chip, attach SPI flash
    /// (or the ESP8266 FLASH_BEGIN(0,0,0,0) workaround).
    pub fn connect(&mut self, args: ConnectArgs) -> Result<TargetKind> {
        self.transport.sync(args.sync_timeout_ms, args.trials, &mut self.clock)?;

        let target = self.detect_chip()?;
        log::debug!("connected to {target}");
        self.target = Some(target);
        self.profile = Some(targets::profile(target));
        self.stub_running = false;
        self.flash_size = 0;

        self.attach_flash_or_rom_workaround(target)?;
        Ok(target)
    }

    /// `esp_loader_connect_with_stub`: `connect`, then upload and hand
    /// off to the stub. Rejects ESP32-C5/-P4, which carry no stub.
    #[cfg(feature = "std")]
    pub fn connect_with_stub(&mut self, args: ConnectArgs) -> Result<TargetKind> {
        let target = self.connect(args)?;
        if matches!(target, TargetKind::Esp32C5 | TargetKind::Esp32P4) {
            return Err(Error::UnsupportedChip);
        }
        self.run_stub()?;
        Ok(target)
    }

    /// `esp_loader_connect_secure_download_mode`: the caller already
    /// knows `flash_size`/`target` because secure download mode only
    /// answers a locked command subset; chip-detect is skipped entirely.
    pub fn connect_secure_download_mode(
        &mut self,
        args: ConnectArgs,
        flash_size: u32,
        target: TargetKind,
    ) -> Result<()> {
        self.flash_size = flash_size;
        self.target = Some(target);
        self.profile = Some(targets::profile(target));
        self.stub_running = false;

        self.transport.sync(args.sync_timeout_ms, args.trials, &mut self.clock)?;

        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        if target == TargetKind::Esp8266 {
            self.command(&Command::FlashBegin {
                size: 0,
                blocks: 0,
                block_size: 0,
                offset: 0,
                supports_encryption: false,
            })?;
        } else {
            self.command(&Command::SpiAttach {
                spi_params: SpiAttachParams::ZERO,
                stub_running: false,
            })?;
        }
        Ok(())
    }

    fn detect_chip(&mut self) -> Result<TargetKind> {
        self.clock.start_timer(SHORT_TIMEOUT_MS);
        if let Ok(response) = self.command(&Command::GetSecurityInfo) {
            if let CommandResponseValue::Vector(body) = response.value {
                if let Ok(info) = security::decode(&body) {
                    if let Some(chip) = info.target_chip {
                        return Ok(chip);
                    }
                }
            }
        }

        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        let magic = self.read_register(CHIP_DETECT_MAGIC_REG_ADDR)?;
        if let Some(chip) = targets::detect_by_magic(magic) {
            return Ok(chip);
        }

        let date_reg = self.read_register(targets::ESP32P4_SPI_DATE_REG)?;
        if targets::is_esp32p4_spi_date_register(date_reg) {
            return Ok(TargetKind::Esp32P4);
        }

        Err(Error::UnsupportedChip)
    }

    fn attach_flash_or_rom_workaround(&mut self, target: TargetKind) -> Result<()> {
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        if target == TargetKind::Esp8266 {
            self.command(&Command::FlashBegin {
                size: 0,
                blocks: 0,
                block_size: 0,
                offset: 0,
                supports_encryption: false,
            })?;
            return Ok(());
        }

        let spi_params = self.read_spi_config(target)?;
        self.command(&Command::SpiAttach {
            spi_params,
            stub_running: false,
        })?;
        Ok(())
    }

    /// Recovers the SPI pin configuration for `SPI_ATTACH` per the
    /// target's [`SpiPinRecovery`] algorithm (§4.4).
    fn read_spi_config(&mut self, target: TargetKind) -> Result<SpiAttachParams> {
        let profile = targets::profile(target);
        match profile.spi_pin_recovery {
            SpiPinRecovery::Fixed | SpiPinRecovery::NotApplicable => Ok(SpiAttachParams::ZERO),
            SpiPinRecovery::Esp32Efuse => {
                let word_3 = self.read_register(efuse_word_addr(profile.efuse_base, 3))?;
                let word_5 = self.read_register(efuse_word_addr(profile.efuse_base, 5))?;
                Ok(targets::spi_config_esp32(word_5, word_3))
            }
            SpiPinRecovery::Esp32xxEfuse => {
                let word_18 = self.read_register(efuse_word_addr(profile.efuse_base, 18))?;
                let word_19 = self.read_register(efuse_word_addr(profile.efuse_base, 19))?;
                Ok(targets::spi_config_esp32xx(word_18, word_19))
            }
        }
    }

    // ---- stub upload ----------------------------------------------------

    /// Uploads the embedded stub's segments to RAM and hands control to
    /// it (§4.7). Confirmed by the stub's `OHAI` handshake, left for the
    /// caller's transport to observe (over serial this arrives as an
    /// ordinary SLIP frame ahead of the next command's response).
    #[cfg(feature = "std")]
    fn run_stub(&mut self) -> Result<()> {
        let target = self.target.ok_or(Error::Fail)?;
        let stub = StubImage::for_chip(target).ok_or(Error::UnsupportedChip)??;

        let (text_start, text) = stub.text()?;
        self.mem_start(text_start, text.len() as u32, RAM_BLOCK_SIZE)?;
        for chunk in text.chunks(RAM_BLOCK_SIZE as usize) {
            self.mem_write(chunk)?;
        }

        let (data_start, data) = stub.data()?;
        if !data.is_empty() {
            self.mem_start(data_start, data.len() as u32, RAM_BLOCK_SIZE)?;
            for chunk in data.chunks(RAM_BLOCK_SIZE as usize) {
                self.mem_write(chunk)?;
            }
        }

        self.mem_finish(stub.entry())?;
        self.stub_running = true;
        self.flash_size = 0;
        log::debug!("stub running");
        Ok(())
    }

    // ---- mem_* ----------------------------------------------------------

    pub fn mem_start(&mut self, offset: u32, size: u32, block_size: u32) -> Result<()> {
        #[cfg(feature = "std")]
        if self.stub_running {
            if let Some(target) = self.target {
                if let Some(Ok(stub)) = StubImage::for_chip(target) {
                    self.reject_stub_overlap(&stub, offset, size)?;
                }
            }
        }

        if self.stub_running {
            self.transport.prepare_ram_load(&mut self.clock)?;
        }

        let blocks = div_round_up(size, block_size);
        self.clock.start_timer(timeout_per_mb(size, RAM_LOAD_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
        self.command(&Command::MemBegin {
            size,
            blocks,
            block_size,
            offset,
        })?;
        self.sequence_number = 0;
        Ok(())
    }

    #[cfg(feature = "std")]
    fn reject_stub_overlap(&self, stub: &StubImage, offset: u32, size: u32) -> Result<()> {
        let load_start = offset;
        let load_end = offset.saturating_add(size);
        for (seg_start, seg_len) in [stub.text()?, stub.data()?] {
            let seg_end = seg_start.saturating_add(seg_len.len() as u32);
            if load_start < seg_end && load_end > seg_start {
                return Err(Error::InvalidParam(
                    "load address overlaps the running stub's RAM segments",
                ));
            }
        }
        Ok(())
    }

    pub fn mem_write(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("mem_write: {} bytes at sequence {}", payload.len(), self.sequence_number);
        let mut attempt = 0;
        loop {
            self.clock.start_timer(timeout_per_mb(payload.len() as u32, RAM_LOAD_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
            let sequence = self.sequence_number;
            let result = self.command(&Command::MemData {
                data: payload,
                pad_to: payload.len(),
                pad_byte: 0,
                sequence,
            });
            attempt += 1;
            match result {
                Ok(_) => {
                    self.sequence_number += 1;
                    return Ok(());
                }
                Err(err) if attempt < WRITE_BLOCK_RETRIES => {
                    log::warn!("mem_write attempt {attempt} failed ({err}), retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn mem_finish(&mut self, entry: u32) -> Result<()> {
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::MemEnd {
            no_entry: entry == 0,
            entry,
        })?;
        Ok(())
    }

    // ---- flash_* ----------------------------------------------------------

    /// `init_flash_params`: detects the flash size once (falling back to
    /// [`DEFAULT_FLASH_SIZE`] on failure, exactly like the ROM does), then
    /// always re-sends `SPI_SET_PARAMS` with the now-known geometry —
    /// the vendor loader repeats this on every `flash_start`/erase call
    /// rather than caching whether it already ran.
    fn ensure_flash_size(&mut self) -> Result<()> {
        if self.flash_size == 0 {
            self.flash_size = self.flash_detect_size().unwrap_or(DEFAULT_FLASH_SIZE);
        }

        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::SpiSetParams {
            spi_params: SpiSetParams::new(self.flash_size),
        })?;
        Ok(())
    }

    /// `esp_loader_flash_start`: computes the ROM-bug-compatible erase
    /// size (§4.9), issues FLASH_BEGIN, and resets the MD5/sequence
    /// streaming state.
    pub fn flash_start(&mut self, offset: u32, image_size: u32, block_size: u32) -> Result<()> {
        if offset % 4 != 0 || image_size % 4 != 0 {
            return Err(Error::InvalidParam("offset and image_size must be 4-byte aligned"));
        }

        self.ensure_flash_size()?;
        if offset.saturating_add(image_size) > self.flash_size {
            return Err(Error::ImageSize(image_size, self.flash_size));
        }

        self.flash_block_size = block_size;
        self.md5 = Some(Md5Stream {
            hasher: Md5::new(),
            address: offset,
            size: image_size,
        });

        let target = self.target.ok_or(Error::Fail)?;
        let profile = self.profile()?;
        let encryption_in_cmd = profile.encryption_in_begin_flash_cmd && !self.stub_running;
        let erase_size = calc_erase_size(target, self.stub_running, offset, image_size);
        let blocks = div_round_up(image_size, block_size);

        self.clock.start_timer(timeout_per_mb(erase_size, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
        self.command(&Command::FlashBegin {
            size: erase_size,
            blocks,
            block_size,
            offset,
            supports_encryption: encryption_in_cmd,
        })?;
        self.sequence_number = 0;
        Ok(())
    }

    /// `esp_loader_flash_write`: pads to the block size with `0xFF`,
    /// folds the padded block into the running MD5, retries transport
    /// failures up to [`WRITE_BLOCK_RETRIES`] times.
    pub fn flash_write(&mut self, payload: &[u8]) -> Result<()> {
        log::trace!("flash_write: {} bytes at sequence {}", payload.len(), self.sequence_number);
        if payload.len() as u32 > self.flash_block_size {
            return Err(Error::InvalidParam("payload exceeds the block size given to flash_start"));
        }

        if let Some(md5) = &mut self.md5 {
            let aligned = pad_round_up(payload.len(), 4);
            md5.hasher.update(payload);
            if aligned > payload.len() {
                md5.hasher.update(&vec![0u8; aligned - payload.len()]);
            }
        }

        let mut attempt = 0;
        loop {
            self.clock.start_timer(DEFAULT_TIMEOUT_MS);
            let sequence = self.sequence_number;
            let result = self.command(&Command::FlashData {
                data: payload,
                pad_to: self.flash_block_size as usize,
                pad_byte: 0xFF,
                sequence,
            });
            attempt += 1;
            match result {
                Ok(_) => {
                    self.sequence_number += 1;
                    return Ok(());
                }
                Err(err) if attempt < WRITE_BLOCK_RETRIES => {
                    log::warn!("flash_write attempt {attempt} failed ({err}), retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// `esp_loader_flash_finish`.
    pub fn flash_finish(&mut self, reboot: bool) -> Result<()> {
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::FlashEnd { reboot })?;
        Ok(())
    }

    /// `esp_loader_flash_erase`: stub path erases the whole detected
    /// flash size directly; ROM path emulates it through `flash_start`
    /// over the full size (the ROM has no standalone erase-all command).
    pub fn flash_erase(&mut self) -> Result<()> {
        if self.stub_running {
            self.ensure_flash_size()?;
            self.clock.start_timer(timeout_per_mb(self.flash_size, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
            self.command(&Command::EraseFlash)?;
        } else {
            let flash_size = self.flash_detect_size()?;
            self.flash_start(0, flash_size, ROM_FLASH_BLOCK_SIZE)?;
        }
        Ok(())
    }

    /// `esp_loader_flash_erase_region`.
    pub fn flash_erase_region(&mut self, offset: u32, size: u32) -> Result<()> {
        if offset % FLASH_SECTOR_SIZE != 0 || size % FLASH_SECTOR_SIZE != 0 {
            return Err(Error::InvalidParam("offset and size must be flash-sector aligned"));
        }

        if self.stub_running {
            self.ensure_flash_size()?;
            self.clock.start_timer(timeout_per_mb(size, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
            self.command(&Command::EraseRegion { offset, size })?;
        } else {
            let flash_size = self.flash_detect_size()?;
            if offset.saturating_add(size) > flash_size {
                return Err(Error::ImageSize(offset + size, flash_size));
            }
            self.flash_start(offset, size, ROM_FLASH_BLOCK_SIZE)?;
        }
        Ok(())
    }

    /// `esp_loader_flash_read`. Stub path issues a single stub READ_FLASH
    /// request sized exactly to `length`; the per-packet ack/MD5-trailer
    /// handshake the vendor ROM performs at the raw-byte level is an
    /// internal concern of a concrete `Transport::command`
    /// implementation here, not something this state machine drives
    /// directly — it only needs the final bytes back in one response.
    /// ROM path keeps the head/tail-trimmed 64-byte-aligned read, but
    /// issues it as a single appropriately-sized `READ_FLASH_ROM` rather
    /// than a fixed-64-byte chunk loop, since this crate's command codec
    /// (unlike the vendor ROM command) carries an explicit `size` field.
    pub fn flash_read(&mut self, dst: &mut [u8], address: u32, length: u32) -> Result<()> {
        self.ensure_flash_size()?;
        if address.saturating_add(length) >= self.flash_size {
            return Err(Error::ImageSize(length, self.flash_size));
        }
        if dst.len() < length as usize {
            return Err(Error::InvalidParam("destination buffer shorter than length"));
        }

        if self.stub_running {
            self.clock.start_timer(timeout_per_mb(length, MD5_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
            let response = self.command(&Command::ReadFlash {
                offset: address,
                size: length,
                block_size: STUB_READ_BLOCK_SIZE,
                max_in_flight: 1,
            })?;
            let bytes = as_vector(response.value)?;
            if bytes.len() < length as usize {
                return Err(Error::InvalidResponse("stub flash read returned fewer bytes than requested".into()));
            }
            dst[..length as usize].copy_from_slice(&bytes[..length as usize]);
        } else {
            const ROM_READ_ALIGN: u32 = 64;
            let seek_back = address % ROM_READ_ALIGN;
            let aligned_address = address - seek_back;
            let read_size = length + seek_back;

            self.clock.start_timer(DEFAULT_TIMEOUT_MS);
            let response = self.command(&Command::ReadFlashRom {
                offset: aligned_address,
                size: read_size,
            })?;
            let bytes = as_vector(response.value)?;
            if bytes.len() < read_size as usize {
                return Err(Error::InvalidResponse("ROM flash read returned fewer bytes than requested".into()));
            }
            dst[..length as usize]
                .copy_from_slice(&bytes[seek_back as usize..seek_back as usize + length as usize]);
        }
        Ok(())
    }

    /// `esp_loader_flash_detect_size`: bit-bangs a `READ_ID` (`0x9F`)
    /// against the flash over the SPI register window, then looks up the
    /// size byte in [`FLASH_SIZE_TABLE`].
    pub fn flash_detect_size(&mut self) -> Result<u32> {
        let flash_id = self.spi_flash_command(SPI_FLASH_READ_ID, &[], 24)?;
        let size_id = ((flash_id >> 16) & 0xFF) as u8;
        FLASH_SIZE_TABLE
            .iter()
            .find(|&&(id, _)| id == size_id)
            .map(|&(_, size)| size)
            .ok_or(Error::UnsupportedChip)
    }

    fn spi_flash_command(&mut self, cmd: u8, tx: &[u8], rx_bits: u32) -> Result<u32> {
        let profile = self.profile()?;
        let regs = profile.spi_registers;
        let target = self.target.ok_or(Error::Fail)?;

        let old_usr = self.read_register(regs.base + regs.usr_offset)?;
        let old_usr2 = self.read_register(regs.base + regs.usr2_offset)?;

        if target == TargetKind::Esp8266 {
            let mosi_mask = tx.len() as u32 * 8;
            let mosi_mask = if mosi_mask == 0 { 0 } else { mosi_mask - 1 };
            let miso_mask = if rx_bits == 0 { 0 } else { rx_bits - 1 };
            self.write_register(regs.base + regs.usr1_offset, (miso_mask << 8) | (mosi_mask << 17))?;
        } else {
            if let Some(mosi_dlen) = regs.mosi_dlen_offset {
                if !tx.is_empty() {
                    self.write_register(regs.base + mosi_dlen, tx.len() as u32 * 8 - 1)?;
                }
            }
            if let Some(miso_dlen) = regs.miso_dlen_offset {
                if rx_bits > 0 {
                    self.write_register(regs.base + miso_dlen, rx_bits - 1)?;
                }
            }
        }

        let mut usr_reg = SPI_USR_CMD;
        if rx_bits > 0 {
            usr_reg |= SPI_USR_MISO;
        }
        if !tx.is_empty() {
            usr_reg |= SPI_USR_MOSI;
        }
        let usr2 = (7u32 << SPI_CMD_LEN_SHIFT) | u32::from(cmd);

        self.write_register(regs.base + regs.usr_offset, usr_reg)?;
        self.write_register(regs.base + regs.usr2_offset, usr2)?;

        if tx.is_empty() {
            self.write_register(regs.base + regs.w0_offset, 0)?;
        } else {
            let mut addr = regs.base + regs.w0_offset;
            for chunk in tx.chunks(4) {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.write_register(addr, u32::from_le_bytes(word))?;
                addr += 4;
            }
        }

        self.write_register(regs.base + regs.cmd_offset, SPI_CMD_USR)?;

        let mut trials = 10;
        loop {
            let cmd_reg = self.read_register(regs.base + regs.cmd_offset)?;
            if cmd_reg & SPI_CMD_USR == 0 {
                break;
            }
            trials -= 1;
            if trials == 0 {
                return Err(Error::Timeout);
            }
        }

        let result = self.read_register(regs.base + regs.w0_offset)?;

        self.write_register(regs.base + regs.usr_offset, old_usr)?;
        self.write_register(regs.base + regs.usr2_offset, old_usr2)?;

        Ok(result)
    }

    /// `esp_loader_flash_verify_known_md5`. The stub returns a raw
    /// 16-byte digest; this crate always hex-encodes it locally before
    /// comparing against the caller's hex string, so both paths compare
    /// as text.
    pub fn flash_verify_known_md5(&mut self, address: u32, size: u32, expected_hex: &str) -> Result<()> {
        self.ensure_flash_size()?;
        if address.saturating_add(size) > self.flash_size {
            return Err(Error::ImageSize(size, self.flash_size));
        }

        self.clock.start_timer(timeout_per_mb(size, MD5_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS));
        let response = self.command(&Command::FlashMd5 { offset: address, size })?;
        let actual_hex = match response.value {
            CommandResponseValue::ValueU128(digest) => format!("{digest:032x}"),
            _ => return Err(Error::InvalidResponse("FLASH_MD5 response was not a digest".into())),
        };

        if !actual_hex.eq_ignore_ascii_case(expected_hex) {
            return Err(Error::InvalidMd5 {
                expected: String::from(expected_hex),
                actual: actual_hex,
            });
        }
        Ok(())
    }

    /// `esp_loader_flash_verify`: finalises the local MD5 tracked since
    /// `flash_start` and compares it against the target's digest for the
    /// same `(address, size)`.
    pub fn flash_verify(&mut self) -> Result<()> {
        let md5 = self.md5.take().ok_or(Error::Fail)?;
        let digest = md5.hasher.finalize();
        let expected_hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        self.flash_verify_known_md5(md5.address, md5.size, &expected_hex)
    }

    // ---- misc operations ----------------------------------------------------

    /// `esp_loader_read_mac`. ESP8266 carries no `mac_efuse_offset`.
    pub fn read_mac(&mut self) -> Result<[u8; 6]> {
        let profile = self.profile()?;
        let offset = profile.mac_efuse_offset.ok_or(Error::UnsupportedFunc("ESP8266 has no MAC eFuse words"))?;
        let base = profile.efuse_base + offset;
        let part1 = self.read_register(base)?;
        let part2 = self.read_register(base + 4)?;
        Ok(targets::assemble_mac(part1, part2))
    }

    pub fn read_register(&mut self, address: u32) -> Result<u32> {
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        let response = self.command(&Command::ReadReg { address })?;
        response.value.try_into()
    }

    pub fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::WriteReg {
            address,
            value,
            mask: None,
        })?;
        Ok(())
    }

    /// `esp_loader_get_security_info`.
    pub fn get_security_info(&mut self) -> Result<SecurityInfo> {
        self.clock.start_timer(SHORT_TIMEOUT_MS);
        let response = self.command(&Command::GetSecurityInfo)?;
        let body = as_vector(response.value)?;
        security::decode(&body)
    }

    /// `esp_loader_change_transmission_rate`: not available once a stub
    /// is running (use [`Self::change_transmission_rate_stub`] instead),
    /// nor on ESP8266. Applies the ESP32-C2 crystal-frequency quirk
    /// (§9 open question: the `rate * 40 / 26` expression is preserved
    /// exactly, integer division included).
    pub fn change_transmission_rate(&mut self, new_baud: u32) -> Result<()> {
        let target = self.target.ok_or(Error::Fail)?;
        if target == TargetKind::Esp8266 || self.stub_running {
            return Err(Error::UnsupportedFunc("baud change requires ROM mode on a non-ESP8266 target"));
        }

        let new_baud = if target == TargetKind::Esp32C2 {
            let crystal = self.esp32c2_crystal_frequency_mhz()?;
            if crystal == ESP32C2_CRYSTAL_26MHZ {
                new_baud * ESP32C2_CRYSTAL_40MHZ / ESP32C2_CRYSTAL_26MHZ
            } else {
                new_baud
            }
        } else {
            new_baud
        };

        log::debug!("changing baud rate to {new_baud}");
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::ChangeBaudrate {
            new_baud,
            prior_baud: 0,
        })?;
        Ok(())
    }

    fn esp32c2_crystal_frequency_mhz(&mut self) -> Result<u32> {
        let raw = self.read_register(UART_CLK_DIV_REG)? & UART_CLK_DIV_REG_MASK;
        let estimated = (INITIAL_UART_BAUDRATE * raw) / 1_000_000;
        Ok(if estimated > CRYSTAL_FREQ_THRESHOLD {
            ESP32C2_CRYSTAL_40MHZ
        } else {
            ESP32C2_CRYSTAL_26MHZ
        })
    }

    /// `esp_loader_change_transmission_rate_stub`: requires a running
    /// stub and sleeps 25 ms after the ack so the stub is ready to
    /// receive at the new rate before the next command.
    pub fn change_transmission_rate_stub(&mut self, old_baud: u32, new_baud: u32) -> Result<()> {
        let target = self.target.ok_or(Error::Fail)?;
        if target == TargetKind::Esp8266 || !self.stub_running {
            return Err(Error::UnsupportedFunc("stub baud change requires a running stub on a non-ESP8266 target"));
        }

        log::debug!("changing stub baud rate from {old_baud} to {new_baud}");
        self.clock.start_timer(DEFAULT_TIMEOUT_MS);
        self.command(&Command::ChangeBaudrate {
            new_baud,
            prior_baud: old_baud,
        })?;
        self.clock.delay_ms(25);
        Ok(())
    }

    /// `esp_loader_reset_target`/transport equivalent: no wire command,
    /// the Transport is simply asked to pulse reset; the session drops
    /// back to its pre-connect bookkeeping.
    pub fn reset_target(&mut self) -> Result<()> {
        self.transport.flush()?;
        self.target = None;
        self.profile = None;
        self.stub_running = false;
        self.flash_size = 0;
        self.sequence_number = 0;
        self.md5 = None;
        Ok(())
    }
}

fn efuse_word_addr(efuse_base: u32, n: u32) -> u32 {
    efuse_base + n * 4
}

fn div_round_up(value: u32, granularity: u32) -> u32 {
    if granularity == 0 {
        return 0;
    }
    (value + granularity - 1) / granularity
}

fn pad_round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn as_vector(value: CommandResponseValue) -> Result<Vec<u8>> {
    match value {
        CommandResponseValue::Vector(bytes) => Ok(bytes),
        _ => Err(Error::InvalidResponse("expected a variable-length response".into())),
    }
}

/// `calc_erase_size` (§4.9): the ESP8266 ROM bug compatibility formula.
/// Every other chip, and every stub path (the bug is ROM-only), reports
/// `image_size` unchanged.
fn calc_erase_size(target: TargetKind, stub_running: bool, offset: u32, image_size: u32) -> u32 {
    if target != TargetKind::Esp8266 || stub_running {
        return image_size;
    }

    const SECTOR_SIZE: u32 = 4096;
    const SECTORS_PER_BLOCK: u32 = 16;

    let num_sectors = div_round_up(image_size, SECTOR_SIZE);
    let start_sector = offset / SECTOR_SIZE;
    let head_sectors = SECTORS_PER_BLOCK - (start_sector % SECTORS_PER_BLOCK);

    if num_sectors <= head_sectors {
        div_round_up(num_sectors + 1, 2) * SECTOR_SIZE
    } else {
        (num_sectors - head_sectors) * SECTOR_SIZE
    }
}
