//! JBSQ request/response slot cells (§3, §4.1).
//!
//! Each cell is cache-line-aligned and padded to a full line so that a
//! worker polling its own slot never shares a line with a neighbour's slot,
//! the same false-sharing concern the host family's `GVThreadMetadata`
//! documents for its own per-worker `WorkerState` array.

use crate::constants::{CACHE_LINE_SIZE, HANDLE_NONE};
use crate::state::{RequestFlag, ResponseFlag, TaskCategory};
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Dispatcher->worker cell. Dispatcher writes `flag`; worker reads it with
/// acquire and, on claiming, never mutates the request side again until the
/// dispatcher recycles it.
#[repr(C, align(64))]
pub struct RequestSlotCell {
    pub flag: AtomicU8,
    pub type_id: AtomicU8,
    pub category: AtomicU8,
    _pad0: u8,
    pub continuation_id: AtomicU32,
    pub request_id: AtomicU32,
    pub arrival_ts: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - 20],
}

impl RequestSlotCell {
    pub const fn new() -> Self {
        Self {
            flag: AtomicU8::new(RequestFlag::Inactive as u8),
            type_id: AtomicU8::new(0),
            category: AtomicU8::new(TaskCategory::Packet as u8),
            _pad0: 0,
            continuation_id: AtomicU32::new(HANDLE_NONE),
            request_id: AtomicU32::new(HANDLE_NONE),
            arrival_ts: AtomicU64::new(0),
            _pad: [0; CACHE_LINE_SIZE - 20],
        }
    }

    #[inline]
    pub fn flag(&self) -> RequestFlag {
        RequestFlag::from_u8(self.flag.load(Ordering::Acquire))
    }

    /// Publish a fresh task into this cell: `INACTIVE|PROCESSED -> READY`.
    #[inline]
    pub fn publish(&self, continuation_id: u32, request_id: u32, type_id: u8, category: TaskCategory, arrival_ts: u64) {
        self.type_id.store(type_id, Ordering::Relaxed);
        self.category.store(category as u8, Ordering::Relaxed);
        self.continuation_id.store(continuation_id, Ordering::Relaxed);
        self.request_id.store(request_id, Ordering::Relaxed);
        self.arrival_ts.store(arrival_ts, Ordering::Relaxed);
        self.flag.store(RequestFlag::Ready as u8, Ordering::Release);
    }

    #[inline]
    pub fn mark_done(&self) {
        self.flag.store(RequestFlag::Done as u8, Ordering::Release);
    }

    /// Recycle the cell for reuse; called by the dispatcher after reaping
    /// the matching response (§4.1: `INACTIVE <- PROCESSED`).
    #[inline]
    pub fn recycle(&self) {
        self.flag.store(RequestFlag::Inactive as u8, Ordering::Release);
    }

    #[inline]
    pub fn read(&self) -> (u32, u32, u8, TaskCategory, u64) {
        (
            self.continuation_id.load(Ordering::Relaxed),
            self.request_id.load(Ordering::Relaxed),
            self.type_id.load(Ordering::Relaxed),
            TaskCategory::from_u8(self.category.load(Ordering::Relaxed)),
            self.arrival_ts.load(Ordering::Relaxed),
        )
    }
}

impl Default for RequestSlotCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker->dispatcher cell. Worker writes `flag`; dispatcher reads it with
/// acquire and, after reaping, hands the cell back via the paired
/// `RequestSlotCell::recycle`.
#[repr(C, align(64))]
pub struct ResponseSlotCell {
    pub flag: AtomicU8,
    pub type_id: AtomicU8,
    pub category: AtomicU8,
    _pad0: u8,
    pub continuation_id: AtomicU32,
    pub request_id: AtomicU32,
    pub arrival_ts: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - 20],
}

impl ResponseSlotCell {
    pub const fn new() -> Self {
        Self {
            flag: AtomicU8::new(ResponseFlag::Processed as u8),
            type_id: AtomicU8::new(0),
            category: AtomicU8::new(TaskCategory::Packet as u8),
            _pad0: 0,
            continuation_id: AtomicU32::new(HANDLE_NONE),
            request_id: AtomicU32::new(HANDLE_NONE),
            arrival_ts: AtomicU64::new(0),
            _pad: [0; CACHE_LINE_SIZE - 20],
        }
    }

    #[inline]
    pub fn flag(&self) -> ResponseFlag {
        ResponseFlag::from_u8(self.flag.load(Ordering::Acquire))
    }

    /// Worker claims the slot: `-> RUNNING`.
    #[inline]
    pub fn mark_running(&self, continuation_id: u32, request_id: u32, type_id: u8, category: TaskCategory, arrival_ts: u64) {
        self.type_id.store(type_id, Ordering::Relaxed);
        self.category.store(category as u8, Ordering::Relaxed);
        self.continuation_id.store(continuation_id, Ordering::Relaxed);
        self.request_id.store(request_id, Ordering::Relaxed);
        self.arrival_ts.store(arrival_ts, Ordering::Relaxed);
        self.flag.store(ResponseFlag::Running as u8, Ordering::Release);
    }

    /// Worker publishes the outcome of the handler (§4.4 step 6).
    #[inline]
    pub fn publish_outcome(&self, outcome: ResponseFlag) {
        debug_assert!(matches!(outcome, ResponseFlag::Finished | ResponseFlag::Preempted));
        self.flag.store(outcome as u8, Ordering::Release);
    }

    /// Dispatcher reaps a terminal outcome and releases the cell.
    #[inline]
    pub fn recycle(&self) {
        self.flag.store(ResponseFlag::Processed as u8, Ordering::Release);
    }

    #[inline]
    pub fn read(&self) -> (u32, u32, u8, TaskCategory, u64) {
        (
            self.continuation_id.load(Ordering::Relaxed),
            self.request_id.load(Ordering::Relaxed),
            self.type_id.load(Ordering::Relaxed),
            TaskCategory::from_u8(self.category.load(Ordering::Relaxed)),
            self.arrival_ts.load(Ordering::Relaxed),
        )
    }
}

impl Default for ResponseSlotCell {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(core::mem::size_of::<RequestSlotCell>() == CACHE_LINE_SIZE);
    assert!(core::mem::align_of::<RequestSlotCell>() == CACHE_LINE_SIZE);
    assert!(core::mem::size_of::<ResponseSlotCell>() == CACHE_LINE_SIZE);
    assert!(core::mem::align_of::<ResponseSlotCell>() == CACHE_LINE_SIZE);
};

/// Advance a JBSQ ring index (§9 "Open question — J>2"): XOR for J=2,
/// no-op for J=1. Deliberately does not generalize to arbitrary J.
#[inline]
pub const fn advance_ring_index(idx: usize, jbsq_len: usize) -> usize {
    if jbsq_len == 2 {
        idx ^ 1
    } else {
        0
    }
}

/// Dispatcher-private per-worker bookkeeping (§3 "Worker dispatch state").
/// Not shared, not atomic: only the dispatcher thread ever touches it.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerDispatchState {
    pub next_push: usize,
    pub next_pop: usize,
    pub occupancy: usize,
}

impl WorkerDispatchState {
    pub const fn new() -> Self {
        Self { next_push: 0, next_pop: 0, occupancy: 0 }
    }
}

/// Dispatcher-private per-worker armed/deadline record (§3 "Preempt-check
/// entry"). The worker writes `armed`/`dispatch_ts` at slot-claim time
/// (§4.4 step 2) via a release store on its own cell only; the dispatcher
/// reads with acquire and clears at preempt-issue or reap time. See
/// DESIGN.md for why this keeps the single-writer-per-field discipline.
#[repr(C, align(64))]
pub struct PreemptCheckEntry {
    armed: AtomicU8,
    dispatch_ts: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - 9],
}

impl PreemptCheckEntry {
    pub const fn new() -> Self {
        Self {
            armed: AtomicU8::new(0),
            dispatch_ts: AtomicU64::new(0),
            _pad: [0; CACHE_LINE_SIZE - 9],
        }
    }

    #[inline]
    pub fn arm(&self, dispatch_ts: u64) {
        self.dispatch_ts.store(dispatch_ts, Ordering::Relaxed);
        self.armed.store(1, Ordering::Release);
    }

    #[inline]
    pub fn disarm(&self) {
        self.armed.store(0, Ordering::Release);
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire) != 0
    }

    #[inline]
    pub fn dispatch_ts(&self) -> u64 {
        self.dispatch_ts.load(Ordering::Relaxed)
    }
}

impl Default for PreemptCheckEntry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_slot_lifecycle() {
        let cell = RequestSlotCell::new();
        assert_eq!(cell.flag(), RequestFlag::Inactive);
        cell.publish(3, 9, 1, TaskCategory::Packet, 1000);
        assert_eq!(cell.flag(), RequestFlag::Ready);
        let (cid, rid, ty, cat, ts) = cell.read();
        assert_eq!((cid, rid, ty, cat, ts), (3, 9, 1, TaskCategory::Packet, 1000));
        cell.mark_done();
        assert_eq!(cell.flag(), RequestFlag::Done);
        cell.recycle();
        assert_eq!(cell.flag(), RequestFlag::Inactive);
    }

    #[test]
    fn response_slot_lifecycle() {
        let cell = ResponseSlotCell::new();
        assert_eq!(cell.flag(), ResponseFlag::Processed);
        cell.mark_running(3, 9, 1, TaskCategory::Packet, 1000);
        assert_eq!(cell.flag(), ResponseFlag::Running);
        cell.publish_outcome(ResponseFlag::Preempted);
        assert_eq!(cell.flag(), ResponseFlag::Preempted);
        cell.recycle();
        assert_eq!(cell.flag(), ResponseFlag::Processed);
    }

    #[test]
    fn advance_index_matches_jbsq_constraint() {
        assert_eq!(advance_ring_index(0, 1), 0);
        assert_eq!(advance_ring_index(0, 2), 1);
        assert_eq!(advance_ring_index(1, 2), 0);
    }

    #[test]
    fn preempt_check_entry_arm_disarm() {
        let entry = PreemptCheckEntry::new();
        assert!(!entry.is_armed());
        entry.arm(42);
        assert!(entry.is_armed());
        assert_eq!(entry.dispatch_ts(), 42);
        entry.disarm();
        assert!(!entry.is_armed());
    }
}
