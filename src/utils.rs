use nix::time::{clock_gettime, ClockId};
use tracing::error;

const NS_PER_SEC: u64 = 1_000_000_000;

/// CLOCK_BOOTTIME in nanoseconds, 0 if the clock cannot be read
pub fn boot_time_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_BOOTTIME) {
        Ok(ts) => ts.tv_sec() as u64 * NS_PER_SEC + ts.tv_nsec() as u64,
        Err(e) => {
            error!("clock_gettime(CLOCK_BOOTTIME): {}", e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_time_is_monotonic() {
        let a = boot_time_ns();
        let b = boot_time_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
