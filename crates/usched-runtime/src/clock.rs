//! Monotonic time source (§3 "now", §6 `arrival_ts`/`dispatch_ts` unit).
//!
//! All slot timestamps are nanoseconds since an arbitrary process-local
//! epoch, not wall-clock time, so `Instant` is the right primitive: it
//! never runs backward and doesn't pay for a syscall on platforms with a
//! vDSO-backed clock.

use std::sync::OnceLock;
use std::time::Instant;
use usched_core::traits::PlatformTime;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

#[derive(Debug, Default)]
pub struct MonotonicClock;

impl PlatformTime for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        epoch().elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_monotonic() {
        let clock = MonotonicClock;
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }
}
