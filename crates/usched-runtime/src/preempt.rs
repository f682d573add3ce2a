//! Preemption transports (§4.5): posted-IPI, cooperative yield ("concord"),
//! and the no-preemption baseline, all behind the shared `PreemptTransport`
//! trait so the dispatcher's preempt-check path (§4.3 step 3) is identical
//! across all three.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use usched_core::constants::MAX_WORKERS;
use usched_core::error::DispatchResult;
use usched_core::traits::PreemptTransport;

pub mod signal;

/// Hardware posted-IPI analogue: `SIGURG` delivered to the worker's pthread
/// (§4.5(a)).
pub struct PostedIpiTransport {
    signal: libc::c_int,
}

impl PostedIpiTransport {
    pub fn new(signal: libc::c_int) -> Self {
        Self { signal }
    }
}

impl Default for PostedIpiTransport {
    fn default() -> Self {
        Self::new(signal::DEFAULT_PREEMPT_SIGNAL)
    }
}

impl PreemptTransport for PostedIpiTransport {
    // Deadline bookkeeping lives in the dispatcher's own
    // `PreemptCheckEntry` array; this transport only has to know how to
    // actually interrupt a worker.
    fn arm(&self, _worker: usize, _dispatch_ts: u64) {}
    fn disarm(&self, _worker: usize) {}

    fn fire(&self, worker: usize) {
        signal::fire(worker);
    }

    fn install_for_worker(&self, worker: usize) -> DispatchResult<()> {
        signal::install_for_worker(worker, self.signal)
    }
}

/// Compiler-assisted cooperative yield points ("concord", §4.5(b)): the
/// dispatcher sets a per-worker flag instead of sending a signal; handler
/// code observes it at inserted yield checks.
pub struct CooperativeYieldTransport {
    preempt_now: [AtomicBool; MAX_WORKERS],
}

impl CooperativeYieldTransport {
    pub fn new() -> Self {
        Self { preempt_now: std::array::from_fn(|_| AtomicBool::new(false)) }
    }

    /// Called from a handler's inserted yield check (§4.5(b)). Returns
    /// true, and clears the flag, iff the worker should switch back now.
    /// Suppressed while the calling thread holds a [`LockGuard`].
    #[inline]
    pub fn should_yield(&self, worker: usize) -> bool {
        if in_critical_section() {
            return false;
        }
        self.preempt_now[worker].swap(false, Ordering::AcqRel)
    }
}

impl Default for CooperativeYieldTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PreemptTransport for CooperativeYieldTransport {
    fn arm(&self, _worker: usize, _dispatch_ts: u64) {}

    fn disarm(&self, worker: usize) {
        self.preempt_now[worker].store(false, Ordering::Release);
    }

    fn fire(&self, worker: usize) {
        self.preempt_now[worker].store(true, Ordering::Release);
    }

    fn install_for_worker(&self, _worker: usize) -> DispatchResult<()> {
        Ok(())
    }

    fn poll_preempt(&self, worker: usize) -> bool {
        self.should_yield(worker)
    }
}

/// No-preemption baseline (§4.5, S1/S2): `arm`/`fire` are no-ops and every
/// handler runs to completion, producing head-of-line blocking under a
/// mixed short/long workload.
#[derive(Default)]
pub struct NoneTransport;

impl PreemptTransport for NoneTransport {
    fn arm(&self, _worker: usize, _dispatch_ts: u64) {}
    fn disarm(&self, _worker: usize) {}
    fn fire(&self, _worker: usize) {}
    fn install_for_worker(&self, _worker: usize) -> DispatchResult<()> {
        Ok(())
    }
}

thread_local! {
    static LOCK_COUNTER: Cell<u32> = const { Cell::new(0) };
}

/// Reentrancy guard around critical sections the cooperative-yield
/// transport must not interrupt (§5 "locking discipline"; §9 supplemented
/// feature `concord_lock_counter`). Nested guards are safe: the yield check
/// only fires once the outermost guard drops.
pub struct LockGuard;

impl LockGuard {
    pub fn acquire() -> Self {
        LOCK_COUNTER.with(|c| c.set(c.get() + 1));
        LockGuard
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        LOCK_COUNTER.with(|c| c.set(c.get() - 1));
    }
}

#[inline]
pub fn in_critical_section() -> bool {
    LOCK_COUNTER.with(|c| c.get() != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooperative_yield_round_trip() {
        let t = CooperativeYieldTransport::new();
        assert!(!t.should_yield(0));
        t.fire(0);
        assert!(t.should_yield(0));
        assert!(!t.should_yield(0));
    }

    #[test]
    fn lock_guard_suppresses_yield() {
        let t = CooperativeYieldTransport::new();
        t.fire(0);
        let guard = LockGuard::acquire();
        assert!(in_critical_section());
        assert!(!t.should_yield(0));
        drop(guard);
        assert!(!in_critical_section());
        assert!(t.should_yield(0));
    }

    #[test]
    fn nested_lock_guards_only_release_at_outermost() {
        let outer = LockGuard::acquire();
        let inner = LockGuard::acquire();
        drop(inner);
        assert!(in_critical_section());
        drop(outer);
        assert!(!in_critical_section());
    }

    #[test]
    fn none_transport_is_inert() {
        let t = NoneTransport;
        t.arm(0, 123);
        t.fire(0);
        t.disarm(0);
        assert!(t.install_for_worker(0).is_ok());
    }
}
