//! Continuation metadata: the saved-register blocks a stackful
//! continuation needs to be context-switched into and out of (§3
//! "Continuation", §4.1, §9 "suspendable-task primitive").
//!
//! Field layout is `repr(C, align(64))` with documented byte offsets
//! because the arch-specific context-switch assembly in `usched-runtime`
//! indexes into `voluntary_regs`/`forced_regs` by raw offset rather than
//! going through Rust field access.
//!
//! ```text
//! ContinuationMetadata (0x00 - 0x17F, 384 bytes):
//!   0x00  state          (AtomicU8)
//!   0x04  worker_id      (AtomicU32)
//!   0x08  request_id     (AtomicU32)
//!   0x0C  continuation_id (AtomicU32)
//!   0x10  entry_fn       (AtomicU64)
//!   0x18  entry_arg      (AtomicU64)
//!   0x20  resume_mode    (AtomicU8)
//!   0x21  _reserved      (31 bytes, pads to next cache line)
//!   0x40  voluntary_regs (VoluntarySavedRegs, 64 bytes)
//!   0x80  forced_regs    (ForcedSavedRegs, 256 bytes)
//! ```

use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Which saved-register area a preempted continuation should be resumed
/// from (§4.5): a cooperative yield is just another callee-saved switch
/// point, indistinguishable from the initial bootstrap, while a posted-IPI
/// preempt captured a full register snapshot mid-instruction and must be
/// resumed through the heavier path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResumeMode {
    Voluntary = 0,
    Forced = 1,
}

impl ResumeMode {
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => ResumeMode::Voluntary,
            _ => ResumeMode::Forced,
        }
    }
}

/// Lifecycle of a continuation slot (distinct from the request/response
/// slot flags in `state.rs`: those describe the JBSQ cell, this describes
/// the stackful execution context behind it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContinuationState {
    /// In the free pool, not backing any request.
    Free = 0,
    /// Initialized, not yet switched into for the first time.
    Ready = 1,
    /// Currently executing on some worker.
    Running = 2,
    /// Context-switched away mid-handler by a preemption transport.
    Preempted = 3,
    /// Handler returned; awaiting reap by the owning worker.
    Finished = 4,
}

impl ContinuationState {
    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => ContinuationState::Free,
            1 => ContinuationState::Ready,
            2 => ContinuationState::Running,
            3 => ContinuationState::Preempted,
            _ => ContinuationState::Finished,
        }
    }
}

/// Callee-saved registers for a voluntary (yield) switch: SysV AMD64 ABI
/// callee-saved set plus the resume `rip`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VoluntarySavedRegs {
    pub rsp: u64,
    pub rip: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl Default for VoluntarySavedRegs {
    fn default() -> Self {
        Self { rsp: 0, rip: 0, rbx: 0, rbp: 0, r12: 0, r13: 0, r14: 0, r15: 0 }
    }
}

/// Full general-purpose register snapshot captured by the posted-IPI
/// signal handler for a forced preemption. Shaped to match what
/// `ucontext_t`/`mcontext_t` exposes on x86_64 Linux.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ForcedSavedRegs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u64,
    pub ss: u64,
    pub fpu_state_ptr: u64,
    _padding: [u64; 11],
}

impl Default for ForcedSavedRegs {
    fn default() -> Self {
        Self {
            rax: 0,
            rbx: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rbp: 0,
            rsp: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0,
            cs: 0,
            ss: 0,
            fpu_state_ptr: 0,
            _padding: [0; 11],
        }
    }
}

#[repr(C, align(64))]
pub struct ContinuationMetadata {
    state: AtomicU8,
    _pad0: [u8; 3],
    worker_id: AtomicU32,
    request_id: AtomicU32,
    continuation_id: AtomicU32,
    entry_fn: AtomicU64,
    entry_arg: AtomicU64,
    resume_mode: AtomicU8,
    _reserved: [u8; 31],
    pub voluntary_regs: VoluntarySavedRegs,
    pub forced_regs: ForcedSavedRegs,
}

impl ContinuationMetadata {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ContinuationState::Free as u8),
            _pad0: [0; 3],
            worker_id: AtomicU32::new(u32::MAX),
            request_id: AtomicU32::new(u32::MAX),
            continuation_id: AtomicU32::new(u32::MAX),
            entry_fn: AtomicU64::new(0),
            entry_arg: AtomicU64::new(0),
            resume_mode: AtomicU8::new(ResumeMode::Voluntary as u8),
            _reserved: [0; 31],
            voluntary_regs: VoluntarySavedRegs::default(),
            forced_regs: ForcedSavedRegs::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> ContinuationState {
        ContinuationState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: ContinuationState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn worker_id(&self) -> u32 {
        self.worker_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_worker_id(&self, id: u32) {
        self.worker_id.store(id, Ordering::Relaxed);
    }

    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_request_id(&self, id: u32) {
        self.request_id.store(id, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_entry(&self, entry_fn: usize, entry_arg: usize) {
        self.entry_fn.store(entry_fn as u64, Ordering::Relaxed);
        self.entry_arg.store(entry_arg as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn entry_fn(&self) -> usize {
        self.entry_fn.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn entry_arg(&self) -> usize {
        self.entry_arg.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn resume_mode(&self) -> ResumeMode {
        ResumeMode::from_u8(self.resume_mode.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_resume_mode(&self, mode: ResumeMode) {
        self.resume_mode.store(mode as u8, Ordering::Relaxed);
    }
}

impl Default for ContinuationMetadata {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(core::mem::size_of::<VoluntarySavedRegs>() == 64);
    assert!(core::mem::size_of::<ForcedSavedRegs>() == 256);
    assert!(core::mem::align_of::<ContinuationMetadata>() == 64);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metadata_is_free() {
        let meta = ContinuationMetadata::new();
        assert_eq!(meta.state(), ContinuationState::Free);
        assert_eq!(meta.worker_id(), u32::MAX);
    }

    #[test]
    fn state_transitions_round_trip() {
        let meta = ContinuationMetadata::new();
        meta.set_state(ContinuationState::Ready);
        assert_eq!(meta.state(), ContinuationState::Ready);
        meta.set_state(ContinuationState::Running);
        assert_eq!(meta.state(), ContinuationState::Running);
        meta.set_state(ContinuationState::Finished);
        assert_eq!(meta.state(), ContinuationState::Finished);
    }

    #[test]
    fn entry_fields_round_trip() {
        let meta = ContinuationMetadata::new();
        meta.set_entry(0x1000, 0x2000);
        assert_eq!(meta.entry_fn(), 0x1000);
        assert_eq!(meta.entry_arg(), 0x2000);
    }

    #[test]
    fn register_offsets_match_assembly_expectations() {
        let meta = ContinuationMetadata::new();
        let base = &meta as *const _ as usize;
        let voluntary = &meta.voluntary_regs as *const _ as usize;
        let forced = &meta.forced_regs as *const _ as usize;
        assert_eq!(voluntary - base, 0x40);
        assert_eq!(forced - base, 0x80);
    }
}
