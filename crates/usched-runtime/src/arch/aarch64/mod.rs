//! aarch64 context switching — not yet implemented.
//!
//! The dispatcher/worker split and JBSQ slot protocol are
//! architecture-independent; only this module would need an AArch64
//! calling-convention-specific `naked_asm!` body (x19-x28, fp, lr, sp) to
//! bring the crate up on that target.

use usched_core::continuation::{ForcedSavedRegs, VoluntarySavedRegs};

pub unsafe fn init_context(
    _regs: *mut VoluntarySavedRegs,
    _stack_top: *mut u8,
    _entry_fn: usize,
    _entry_arg: usize,
) {
    unimplemented!("aarch64 continuation context switch not yet implemented")
}

pub unsafe extern "C" fn context_switch_voluntary(
    _old_regs: *mut VoluntarySavedRegs,
    _new_regs: *const VoluntarySavedRegs,
) {
    unimplemented!("aarch64 continuation context switch not yet implemented")
}

pub unsafe extern "C" fn context_restore_forced(_regs: *const ForcedSavedRegs) {
    unimplemented!("aarch64 forced preemption restore not yet implemented")
}

pub unsafe extern "C" fn context_switch_to_forced(
    _old_regs: *mut VoluntarySavedRegs,
    _new_regs: *const ForcedSavedRegs,
) {
    unimplemented!("aarch64 forced preemption restore not yet implemented")
}
