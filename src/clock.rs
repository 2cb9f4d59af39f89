//! Monotonic time and sleep, supplied by the host platform.

/// Timing contract the [`Session`](crate::session::Session) uses to bound
/// every transport exchange with a single deadline instead of nested
/// composite timeouts.
///
/// Implementations must be monotonic; `remaining_time` saturates at zero
/// rather than wrapping or going negative.
pub trait Clock {
    /// Arms a deadline `ms` milliseconds from now, replacing any previous
    /// deadline.
    fn start_timer(&mut self, ms: u32);

    /// Milliseconds remaining until the armed deadline, saturating at 0.
    fn remaining_time(&self) -> u32;

    /// Blocks the calling thread for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Default command timeout, per the timing budget table.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;
/// Timeout for short handshakes (SYNC frames, slave-ready polling).
pub const SHORT_TIMEOUT_MS: u32 = 100;
/// Baseline timeout for flash operations before per-size scaling applies.
pub const FLASH_TIMEOUT_MS: u32 = 3000;

/// Erase throughput budget: at least 10 seconds per MiB, floored at
/// [`FLASH_TIMEOUT_MS`].
pub const ERASE_TIMEOUT_PER_MB_MS: u32 = 10_000;
/// MD5 throughput budget: at least 8 seconds per MiB.
pub const MD5_TIMEOUT_PER_MB_MS: u32 = 8_000;
/// RAM load throughput budget. Deliberately generous — RAM stub uploads
/// must survive slow targets without spurious timeouts.
pub const RAM_LOAD_TIMEOUT_PER_MB_MS: u32 = 2_000_000;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Computes `max(per_mb_ms * size / MiB, floor_ms)`, used for every
/// size-scaled timeout in the timing budget table (§4.10).
pub fn timeout_per_mb(size: u32, per_mb_ms: u32, floor_ms: u32) -> u32 {
    let scaled = (size as u64 * per_mb_ms as u64) / BYTES_PER_MIB;
    scaled.max(floor_ms as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_transfer_uses_floor() {
        assert_eq!(timeout_per_mb(1024, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS), FLASH_TIMEOUT_MS);
    }

    #[test]
    fn large_transfer_scales() {
        let four_mib = 4 * 1024 * 1024;
        assert_eq!(timeout_per_mb(four_mib, ERASE_TIMEOUT_PER_MB_MS, FLASH_TIMEOUT_MS), 40_000);
    }
}
