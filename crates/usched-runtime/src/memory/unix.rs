//! Unix continuation stack allocation via mmap/mprotect/madvise.

use super::{slot_size_for, StackRegion};
use std::sync::atomic::Ordering;
use usched_core::error::{DispatchResult, MemoryError};

/// High address hint so the region doesn't collide with the heap or other
/// mmap'd regions; the kernel is free to place it elsewhere.
const REGION_START_HINT: usize = 0x7000_0000_0000;

impl StackRegion {
    /// Reserve virtual address space for `max_slots` continuation stacks,
    /// each `stack_size` bytes plus a trailing guard page. The whole region
    /// starts `PROT_NONE`; callers `activate_slot` before first use.
    pub fn init(&mut self, max_slots: usize, stack_size: usize) -> DispatchResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(MemoryError::AlreadyInitialized.into());
        }

        let slot_size = slot_size_for(stack_size);
        let total_size = max_slots
            .checked_mul(slot_size)
            .ok_or(MemoryError::TooManySlots)?;

        let base = unsafe {
            libc::mmap(
                REGION_START_HINT as *mut libc::c_void,
                total_size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        self.base.store(base as *mut u8, Ordering::Release);
        self.total_size = total_size;
        self.slot_size = slot_size;
        self.stack_size = stack_size;
        self.max_slots = max_slots;
        self.initialized.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Make a slot's stack pages readable/writable. The trailing guard
    /// page is left `PROT_NONE`.
    pub fn activate_slot(&self, slot_id: u32) -> DispatchResult<()> {
        if !self.is_initialized() {
            return Err(MemoryError::AllocationFailed.into());
        }
        if slot_id as usize >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let base = self.slot_base(slot_id);
        let ret = unsafe {
            libc::mprotect(base as *mut libc::c_void, self.stack_size, libc::PROT_READ | libc::PROT_WRITE)
        };
        if ret != 0 {
            return Err(MemoryError::ProtectionFailed.into());
        }
        Ok(())
    }

    /// Release the physical pages backing a finished slot without
    /// unmapping it, so the virtual address is immediately reusable.
    pub fn deactivate_slot(&self, slot_id: u32) -> DispatchResult<()> {
        if !self.is_initialized() {
            return Err(MemoryError::AllocationFailed.into());
        }
        if slot_id as usize >= self.max_slots {
            return Err(MemoryError::InvalidSlot.into());
        }

        let base = self.slot_base(slot_id);
        let ret = unsafe { libc::madvise(base as *mut libc::c_void, self.stack_size, libc::MADV_DONTNEED) };
        if ret != 0 {
            return Err(MemoryError::AdviseFailed.into());
        }
        Ok(())
    }

    pub fn release(&mut self) -> DispatchResult<()> {
        if !self.is_initialized() {
            return Ok(());
        }

        let base = self.base();
        if !base.is_null() {
            let ret = unsafe { libc::munmap(base as *mut libc::c_void, self.total_size) };
            if ret != 0 {
                return Err(MemoryError::AllocationFailed.into());
            }
        }

        self.base.store(std::ptr::null_mut(), Ordering::Release);
        self.total_size = 0;
        self.max_slots = 0;
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_activate_deactivate_release_round_trip() {
        let mut region = StackRegion::new();
        region.init(4, 64 * 1024).unwrap();
        assert!(region.is_initialized());

        region.activate_slot(0).unwrap();
        region.activate_slot(3).unwrap();

        unsafe {
            let top = region.stack_top(0);
            let probe = top.sub(8);
            probe.write_bytes(0xAB, 8);
            assert_eq!(*probe, 0xAB);
        }

        region.deactivate_slot(0).unwrap();
        region.release().unwrap();
        assert!(!region.is_initialized());
    }

    #[test]
    fn invalid_slot_id_rejected() {
        let mut region = StackRegion::new();
        region.init(2, 64 * 1024).unwrap();
        assert!(region.activate_slot(5).is_err());
    }
}
