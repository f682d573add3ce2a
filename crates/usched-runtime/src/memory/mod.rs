//! Stack memory region for continuation slots.
//!
//! Platform-specific implementations handle the actual mmap/mprotect calls;
//! this module owns the slot-address arithmetic shared by all of them.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    }
}

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use usched_core::constants::GUARD_SIZE;

/// A single mmap'd region holding `max_slots` stacks, each
/// `stack_size + GUARD_SIZE` bytes, with the trailing page of every slot
/// left `PROT_NONE` so stack overflow raises SIGSEGV instead of silently
/// corrupting the next slot.
pub struct StackRegion {
    base: AtomicPtr<u8>,
    total_size: usize,
    slot_size: usize,
    stack_size: usize,
    max_slots: usize,
    initialized: AtomicBool,
}

impl StackRegion {
    pub const fn new() -> Self {
        Self {
            base: AtomicPtr::new(ptr::null_mut()),
            total_size: 0,
            slot_size: 0,
            stack_size: 0,
            max_slots: 0,
            initialized: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[inline]
    pub fn slot_base(&self, slot_id: u32) -> *mut u8 {
        debug_assert!((slot_id as usize) < self.max_slots);
        unsafe { self.base().add(slot_id as usize * self.slot_size) }
    }

    /// Highest address of the usable stack (stack grows down from here).
    #[inline]
    pub fn stack_top(&self, slot_id: u32) -> *mut u8 {
        unsafe { self.slot_base(slot_id).add(self.stack_size) }
    }

    #[inline]
    pub fn stack_bottom(&self, slot_id: u32) -> *mut u8 {
        self.slot_base(slot_id)
    }
}

impl Default for StackRegion {
    fn default() -> Self {
        Self::new()
    }
}

pub const fn slot_size_for(stack_size: usize) -> usize {
    stack_size + GUARD_SIZE
}
