//! x86_64 context switching for continuations.
//!
//! Hand-written per the System V AMD64 ABI: a voluntary switch only saves
//! the callee-saved registers (the caller-saved ones are already dead
//! across a call boundary), while a forced switch restores every
//! general-purpose register because the signal handler captured state
//! mid-instruction, not at a call boundary.

use std::arch::naked_asm;
use usched_core::continuation::{ForcedSavedRegs, VoluntarySavedRegs};

/// Set up a freshly-allocated continuation so that switching into it for
/// the first time begins execution at `entry_fn(entry_arg)` on
/// `stack_top`.
///
/// # Safety
/// `regs` must point to valid `VoluntarySavedRegs` storage; `stack_top`
/// must be the highest address of a stack this continuation owns
/// exclusively.
#[inline]
pub unsafe fn init_context(
    regs: *mut VoluntarySavedRegs,
    stack_top: *mut u8,
    entry_fn: usize,
    entry_arg: usize,
) {
    let sp = stack_top as usize;
    // 16-byte align per SysV AMD64 ABI, then -8 to account for the
    // "return address" a `call` would have pushed.
    let aligned_sp = (sp & !0xF) - 8;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = continuation_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry_fn as u64;
    regs.r13 = entry_arg as u64;
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Calls the entry function with its argument, then falls through to
/// cleanup. Never returns to its caller in the normal sense — control
/// only leaves via `continuation_finished`'s context switch.
#[unsafe(naked)]
pub unsafe extern "C" fn continuation_entry_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "call {cleanup}",
        "ud2",
        cleanup = sym continuation_finished,
    );
}

/// Save callee-saved registers to `old_regs`, load from `new_regs`, jump.
/// Returns only when some other continuation switches back into
/// `old_regs`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch_voluntary(
    _old_regs: *mut VoluntarySavedRegs,
    _new_regs: *const VoluntarySavedRegs,
) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "1:",
        "ret",
    );
}

/// Restore a full register snapshot captured by the SIGURG handler on a
/// forced preemption and resume there. Never returns.
#[unsafe(naked)]
pub unsafe extern "C" fn context_restore_forced(_regs: *const ForcedSavedRegs) {
    naked_asm!(
        "mov rax, [rdi + 0x00]",
        "mov rbx, [rdi + 0x08]",
        "mov rcx, [rdi + 0x10]",
        "mov rdx, [rdi + 0x18]",
        "mov rsi, [rdi + 0x20]",
        "mov rbp, [rdi + 0x30]",
        "mov rsp, [rdi + 0x38]",
        "mov r8,  [rdi + 0x40]",
        "mov r9,  [rdi + 0x48]",
        "mov r10, [rdi + 0x50]",
        "mov r11, [rdi + 0x58]",
        "mov r12, [rdi + 0x60]",
        "mov r13, [rdi + 0x68]",
        "mov r14, [rdi + 0x70]",
        "mov r15, [rdi + 0x78]",
        "push qword ptr [rdi + 0x80]",
        "push qword ptr [rdi + 0x88]",
        "mov rdi, [rdi + 0x28]",
        "popfq",
        "ret",
    );
}

/// Save the caller's (worker main-loop) context into `old_regs`, then
/// restore a full register snapshot from `new_regs` and jump into it —
/// used to resume a continuation that was forcibly preempted earlier
/// (§4.4 step 3 "If CONTEXT, resume the saved continuation directly").
/// Returns only when some other continuation switches back into
/// `old_regs` via `context_switch_voluntary`.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch_to_forced(
    _old_regs: *mut VoluntarySavedRegs,
    _new_regs: *const ForcedSavedRegs,
) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rax, [rsi + 0x00]",
        "mov rbx, [rsi + 0x08]",
        "mov rcx, [rsi + 0x10]",
        "mov rdx, [rsi + 0x18]",
        "mov rbp, [rsi + 0x30]",
        "mov rsp, [rsi + 0x38]",
        "mov r8,  [rsi + 0x40]",
        "mov r9,  [rsi + 0x48]",
        "mov r10, [rsi + 0x50]",
        "mov r11, [rsi + 0x58]",
        "mov r12, [rsi + 0x60]",
        "mov r13, [rsi + 0x68]",
        "mov r14, [rsi + 0x70]",
        "mov r15, [rsi + 0x78]",
        "push qword ptr [rsi + 0x80]",
        "push qword ptr [rsi + 0x88]",
        "mov rdi, [rsi + 0x28]",
        "mov rsi, [rsi + 0x20]",
        "popfq",
        "ret",
        "1:",
        "ret",
    );
}

/// Entered from the trampoline once the handler returns. Marks the
/// continuation finished and switches back to the worker's own context,
/// which reaps it (§4.4 step 6).
extern "C" fn continuation_finished() {
    use crate::tls;

    let meta_ptr = tls::current_continuation_metadata();
    let worker_id = tls::worker_id();

    if meta_ptr.is_null() {
        // No continuation context to return to; nothing sane to do but
        // park this OS thread so it doesn't spin a live core.
        loop {
            std::hint::spin_loop();
        }
    }

    let meta = unsafe { &*meta_ptr };
    meta.set_state(usched_core::continuation::ContinuationState::Finished);

    let continuation_regs = unsafe { &meta.voluntary_regs as *const _ as *mut VoluntarySavedRegs };
    let worker_regs = crate::worker::worker_resume_regs(worker_id);

    unsafe {
        context_switch_voluntary(continuation_regs, worker_regs);
    }

    unreachable!("continuation_finished resumed after switching back to the worker");
}
