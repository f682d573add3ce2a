//! Posted-IPI preemption transport on x86_64 Linux/BSD: a `SIGURG` sent to
//! the worker's pthread via `pthread_kill`, caught by a `SA_SIGINFO`
//! handler that captures the interrupted `ucontext_t`'s registers into the
//! continuation's `ForcedSavedRegs`, then rewrites the `ucontext_t` so that
//! `sigreturn` resumes inside the worker's own `context_switch_voluntary`
//! call (§4.5(a): "the real analogue of the ISR swapping contexts before
//! returning").
//!
//! The rewrite works without a dedicated trampoline symbol: the worker's
//! resume point (saved as `VoluntarySavedRegs` when it switched into the
//! continuation) already points at the `ret` immediately following that
//! switch's register-load sequence. Pointing `ucontext_t`'s rip/rsp and
//! callee-saved registers at that same saved state makes `sigreturn` land
//! exactly where a normal voluntary switch-back would have, and the `ret`
//! there returns control to the worker's main loop.

use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use usched_core::constants::MAX_WORKERS;
use usched_core::continuation::ContinuationState;
use usched_core::error::{DispatchResult, WorkerError};

/// Default realtime signal standing in for the hardware posted-IPI vector
/// (§4.5(a), §6 `PREEMPT_VECTOR`).
pub const DEFAULT_PREEMPT_SIGNAL: libc::c_int = libc::SIGURG;

struct WorkerSignalSlot {
    pthread: AtomicU64,
    installed: AtomicU8,
}

impl WorkerSignalSlot {
    const fn new() -> Self {
        Self { pthread: AtomicU64::new(0), installed: AtomicU8::new(0) }
    }
}

static WORKER_THREADS: [WorkerSignalSlot; MAX_WORKERS] = {
    const INIT: WorkerSignalSlot = WorkerSignalSlot::new();
    [INIT; MAX_WORKERS]
};

static PREEMPT_SIGNAL: AtomicI32 = AtomicI32::new(DEFAULT_PREEMPT_SIGNAL);

/// Record the calling thread's pthread id as worker `worker_id`'s
/// `pthread_kill` target, and install the process-wide `SIGURG` handler
/// (idempotent — later calls just reinstall the same handler).
pub fn install_for_worker(worker_id: usize, signal: libc::c_int) -> DispatchResult<()> {
    if worker_id >= MAX_WORKERS {
        return Err(WorkerError::SignalSetupFailed.into());
    }

    PREEMPT_SIGNAL.store(signal, Ordering::Relaxed);

    let tid = unsafe { libc::pthread_self() };
    WORKER_THREADS[worker_id].pthread.store(tid as u64, Ordering::Release);
    WORKER_THREADS[worker_id].installed.store(1, Ordering::Release);

    install_handler(signal)
}

fn install_handler(signal: libc::c_int) -> DispatchResult<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handle_preempt_signal as usize;
        sa.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(signal, &sa, std::ptr::null_mut()) != 0 {
            return Err(WorkerError::SignalSetupFailed.into());
        }
    }
    Ok(())
}

/// Send the preempt signal to worker `worker_id`'s registered pthread.
pub fn fire(worker_id: usize) {
    if worker_id >= MAX_WORKERS {
        return;
    }
    if WORKER_THREADS[worker_id].installed.load(Ordering::Acquire) == 0 {
        return;
    }
    let tid = WORKER_THREADS[worker_id].pthread.load(Ordering::Acquire) as libc::pthread_t;
    let signal = PREEMPT_SIGNAL.load(Ordering::Relaxed);
    unsafe {
        libc::pthread_kill(tid, signal);
    }
}

extern "C" fn handle_preempt_signal(_signum: libc::c_int, _info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    use crate::tls;

    if !tls::is_running_continuation() {
        // Landed between the handler finishing and the worker reaping the
        // slot; nothing live to preempt (§7 "protocol violation... logged
        // and continue" — here there isn't even a violation, just a lost
        // race against disarm, so no log is warranted).
        return;
    }

    let meta_ptr = tls::current_continuation_metadata();
    if meta_ptr.is_null() {
        return;
    }
    let meta = unsafe { &*meta_ptr };

    if meta.state() != ContinuationState::Running {
        return;
    }

    let ucontext = unsafe { &mut *(ctx as *mut libc::ucontext_t) };
    let gregs = &mut ucontext.uc_mcontext.gregs;

    {
        let forced = &mut meta.forced_regs as *const _ as *mut usched_core::continuation::ForcedSavedRegs;
        let forced = unsafe { &mut *forced };
        forced.rax = gregs[libc::REG_RAX as usize] as u64;
        forced.rbx = gregs[libc::REG_RBX as usize] as u64;
        forced.rcx = gregs[libc::REG_RCX as usize] as u64;
        forced.rdx = gregs[libc::REG_RDX as usize] as u64;
        forced.rsi = gregs[libc::REG_RSI as usize] as u64;
        forced.rdi = gregs[libc::REG_RDI as usize] as u64;
        forced.rbp = gregs[libc::REG_RBP as usize] as u64;
        forced.rsp = gregs[libc::REG_RSP as usize] as u64;
        forced.r8 = gregs[libc::REG_R8 as usize] as u64;
        forced.r9 = gregs[libc::REG_R9 as usize] as u64;
        forced.r10 = gregs[libc::REG_R10 as usize] as u64;
        forced.r11 = gregs[libc::REG_R11 as usize] as u64;
        forced.r12 = gregs[libc::REG_R12 as usize] as u64;
        forced.r13 = gregs[libc::REG_R13 as usize] as u64;
        forced.r14 = gregs[libc::REG_R14 as usize] as u64;
        forced.r15 = gregs[libc::REG_R15 as usize] as u64;
        forced.rip = gregs[libc::REG_RIP as usize] as u64;
        forced.rflags = gregs[libc::REG_EFL as usize] as u64;
    }

    meta.set_resume_mode(usched_core::continuation::ResumeMode::Forced);
    meta.set_state(ContinuationState::Preempted);

    let worker_id = tls::worker_id();
    let resume = unsafe { &*crate::worker::worker_resume_regs(worker_id) };

    gregs[libc::REG_RSP as usize] = resume.rsp as i64;
    gregs[libc::REG_RBX as usize] = resume.rbx as i64;
    gregs[libc::REG_RBP as usize] = resume.rbp as i64;
    gregs[libc::REG_R12 as usize] = resume.r12 as i64;
    gregs[libc::REG_R13 as usize] = resume.r13 as i64;
    gregs[libc::REG_R14 as usize] = resume.r14 as i64;
    gregs[libc::REG_R15 as usize] = resume.r15 as i64;
    gregs[libc::REG_RIP as usize] = resume.rip as i64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_for_worker_rejects_out_of_range() {
        assert!(install_for_worker(MAX_WORKERS, DEFAULT_PREEMPT_SIGNAL).is_err());
    }

    #[test]
    fn fire_on_unregistered_worker_is_a_harmless_noop() {
        fire(MAX_WORKERS - 1);
    }
}
