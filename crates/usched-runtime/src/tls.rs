//! Thread-local context for the OS thread backing one worker.

use std::cell::Cell;
use usched_core::continuation::ContinuationMetadata;

thread_local! {
    static WORKER_ID: Cell<usize> = const { Cell::new(usize::MAX) };
    static CURRENT_CONTINUATION: Cell<u32> = const { Cell::new(u32::MAX) };
    static CONTINUATION_META: Cell<*mut ContinuationMetadata> = const { Cell::new(std::ptr::null_mut()) };
}

#[inline]
pub fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(id));
    usched_core::kprint::set_worker_id(id as u32);
}

#[inline]
pub fn worker_id() -> usize {
    WORKER_ID.with(|cell| cell.get())
}

#[inline]
pub fn try_worker_id() -> Option<usize> {
    let id = WORKER_ID.with(|cell| cell.get());
    if id == usize::MAX {
        None
    } else {
        Some(id)
    }
}

/// Record which continuation is about to run on this worker, and a raw
/// pointer to its metadata for the arch-specific trampoline to reach
/// without threading it through every call frame.
#[inline]
pub fn set_current_continuation(id: u32, meta: *mut ContinuationMetadata) {
    CURRENT_CONTINUATION.with(|cell| cell.set(id));
    CONTINUATION_META.with(|cell| cell.set(meta));
    usched_core::kprint::set_request_id(id);
}

#[inline]
pub fn clear_current_continuation() {
    CURRENT_CONTINUATION.with(|cell| cell.set(u32::MAX));
    CONTINUATION_META.with(|cell| cell.set(std::ptr::null_mut()));
    usched_core::kprint::clear_request_id();
}

#[inline]
pub fn current_continuation_id() -> u32 {
    CURRENT_CONTINUATION.with(|cell| cell.get())
}

#[inline]
pub fn current_continuation_metadata() -> *mut ContinuationMetadata {
    CONTINUATION_META.with(|cell| cell.get())
}

#[inline]
pub fn is_running_continuation() -> bool {
    CURRENT_CONTINUATION.with(|cell| cell.get() != u32::MAX)
}
