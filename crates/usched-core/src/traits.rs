//! Seams between the platform-agnostic core and `usched-runtime`'s
//! platform-specific implementations (§9 Design Notes).

use crate::error::DispatchResult;

/// Stack memory for continuations: mmap'd regions with a trailing guard
/// page, recycled via `madvise(MADV_DONTNEED)` rather than unmapped.
pub trait PlatformMemory: Send + Sync {
    fn reserve_region(&self, size: usize) -> DispatchResult<*mut u8>;
    fn release_region(&self, base: *mut u8, size: usize) -> DispatchResult<()>;
    fn protect_rw(&self, base: *mut u8, size: usize) -> DispatchResult<()>;
    fn protect_none(&self, base: *mut u8, size: usize) -> DispatchResult<()>;
    fn advise_dontneed(&self, base: *mut u8, size: usize) -> DispatchResult<()>;
}

/// A way to interrupt a worker mid-handler (§4.5, §9 "PreemptTransport
/// trait abstraction"). `NONE` implements this as a pair of no-ops, so the
/// dispatcher's preempt-check path is identical across all three
/// transports.
pub trait PreemptTransport: Send + Sync {
    /// Arm the preemption deadline for `worker` at `dispatch_ts` (the time
    /// the task now running on it was dispatched). The transport decides
    /// internally when/whether to actually interrupt.
    fn arm(&self, worker: usize, dispatch_ts: u64);

    /// Disarm without firing (task finished or was reaped before its
    /// deadline).
    fn disarm(&self, worker: usize);

    /// Force-interrupt `worker` now. For `POSTED_IPI` this sends SIGURG to
    /// the worker's pthread; for `COOPERATIVE_YIELD` this sets the
    /// worker's `preempt_now` flag; for `NONE` this is a no-op.
    fn fire(&self, worker: usize);

    /// One-time setup (signal handler installation, etc.), called once
    /// per worker before it starts serving requests.
    fn install_for_worker(&self, worker: usize) -> DispatchResult<()>;

    /// Polled variant of preemption, used at explicit yield points inserted
    /// into handler code (§4.5(b) "concord"). `POSTED_IPI` and `NONE` have
    /// no use for this — the former interrupts asynchronously, the latter
    /// never — so the default always reports "not requested".
    fn poll_preempt(&self, _worker: usize) -> bool {
        false
    }
}

/// Architecture-specific continuation context switch (§4.1, §9).
pub trait ArchContext: Send + Sync {
    /// Prepare a fresh continuation's saved registers so that switching
    /// into it begins execution at `entry_fn(entry_arg)` on `stack_top`.
    fn init_context(&self, regs: *mut u8, stack_top: *mut u8, entry_fn: usize, entry_arg: usize);

    /// Callee-saved-only switch, used for voluntary yields.
    ///
    /// # Safety
    /// Both register areas must be valid, aligned, and not concurrently
    /// accessed.
    unsafe fn switch_voluntary(&self, old_regs: *mut u8, new_regs: *mut u8);

    /// Full-register restore, used to resume a continuation that was
    /// forcibly preempted via signal.
    ///
    /// # Safety
    /// `regs` must hold a valid full register snapshot captured by the
    /// signal handler.
    unsafe fn switch_forced(&self, regs: *mut u8);
}

/// Platform time source, kept behind a trait so tests can substitute a
/// deterministic clock.
pub trait PlatformTime: Send + Sync {
    fn now_ns(&self) -> u64;
}
