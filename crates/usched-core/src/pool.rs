//! Fixed-size handle pool with LIFO free-stack reuse.
//!
//! Backs both the request pool and the continuation pool (§3, §9 "arena /
//! index-handle modeling"): a flat `Vec<Slot>` is allocated once at startup
//! and handles index into it, so no allocation happens on the request path.

use crate::error::{DispatchError, DispatchResult};
use crate::id::{ContinuationId, RequestId};
use crate::spinlock::SpinLock;
use core::sync::atomic::{AtomicU32, Ordering};

/// A handle that can serve as a pool index, with a reserved "none" value.
pub trait PoolHandle: Copy {
    fn from_raw(raw: u32) -> Self;
    fn raw(self) -> u32;
    fn is_none(self) -> bool;
}

impl PoolHandle for RequestId {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        RequestId::new(raw)
    }
    #[inline]
    fn raw(self) -> u32 {
        self.as_u32()
    }
    #[inline]
    fn is_none(self) -> bool {
        RequestId::is_none(self)
    }
}

impl PoolHandle for ContinuationId {
    #[inline]
    fn from_raw(raw: u32) -> Self {
        ContinuationId::new(raw)
    }
    #[inline]
    fn raw(self) -> u32 {
        self.as_u32()
    }
    #[inline]
    fn is_none(self) -> bool {
        ContinuationId::is_none(self)
    }
}

/// Allocator over a fixed-capacity range of handles `0..max_slots`.
///
/// Prefers reusing recently-freed handles (LIFO) for cache locality, falling
/// back to monotonically-increasing fresh handles until the pool is
/// exhausted.
pub struct FixedPool<H> {
    free_stack: SpinLock<Vec<u32>>,
    next_fresh: AtomicU32,
    max_slots: u32,
    allocated_count: AtomicU32,
    _marker: core::marker::PhantomData<H>,
}

impl<H: PoolHandle> FixedPool<H> {
    pub fn new(max_slots: usize) -> Self {
        Self {
            free_stack: SpinLock::new(Vec::with_capacity(max_slots)),
            next_fresh: AtomicU32::new(0),
            max_slots: max_slots as u32,
            allocated_count: AtomicU32::new(0),
            _marker: core::marker::PhantomData,
        }
    }

    pub fn allocate(&self) -> DispatchResult<H> {
        {
            let mut free = self.free_stack.lock();
            if let Some(raw) = free.pop() {
                self.allocated_count.fetch_add(1, Ordering::Relaxed);
                return Ok(H::from_raw(raw));
            }
        }

        loop {
            let current = self.next_fresh.load(Ordering::Acquire);
            if current >= self.max_slots {
                return Err(DispatchError::PoolExhausted);
            }
            match self.next_fresh.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.allocated_count.fetch_add(1, Ordering::Relaxed);
                    return Ok(H::from_raw(current));
                }
                Err(_) => continue,
            }
        }
    }

    pub fn release(&self, handle: H) {
        if handle.is_none() {
            return;
        }
        let mut free = self.free_stack.lock();
        free.push(handle.raw());
        self.allocated_count.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn release_batch(&self, handles: &[H]) {
        if handles.is_empty() {
            return;
        }
        let mut free = self.free_stack.lock();
        let mut released = 0u32;
        for h in handles {
            if !h.is_none() {
                free.push(h.raw());
                released += 1;
            }
        }
        self.allocated_count.fetch_sub(released, Ordering::Relaxed);
    }

    #[inline]
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    #[inline]
    pub fn fresh_remaining(&self) -> u32 {
        let next = self.next_fresh.load(Ordering::Relaxed);
        self.max_slots.saturating_sub(next)
    }

    pub fn free_stack_size(&self) -> usize {
        self.free_stack.lock().len()
    }

    #[inline]
    pub fn is_valid(&self, handle: H) -> bool {
        !handle.is_none() && handle.raw() < self.max_slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_sequential() {
        let pool: FixedPool<RequestId> = FixedPool::new(100);
        let id1 = pool.allocate().unwrap();
        let id2 = pool.allocate().unwrap();
        let id3 = pool.allocate().unwrap();
        assert_eq!(id1.as_u32(), 0);
        assert_eq!(id2.as_u32(), 1);
        assert_eq!(id3.as_u32(), 2);
        assert_eq!(pool.allocated_count(), 3);
    }

    #[test]
    fn allocate_release_reuse() {
        let pool: FixedPool<RequestId> = FixedPool::new(100);
        let id1 = pool.allocate().unwrap();
        let _id2 = pool.allocate().unwrap();
        pool.release(id1);
        assert_eq!(pool.allocated_count(), 1);
        let id3 = pool.allocate().unwrap();
        assert_eq!(id3, id1);
        assert_eq!(pool.allocated_count(), 2);
    }

    #[test]
    fn allocate_exhaustion() {
        let pool: FixedPool<ContinuationId> = FixedPool::new(3);
        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();
        assert!(matches!(pool.allocate(), Err(DispatchError::PoolExhausted)));
    }

    #[test]
    fn release_batch_returns_all() {
        let pool: FixedPool<RequestId> = FixedPool::new(100);
        let ids: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();
        assert_eq!(pool.allocated_count(), 10);
        pool.release_batch(&ids);
        assert_eq!(pool.allocated_count(), 0);
        assert_eq!(pool.free_stack_size(), 10);
    }

    #[test]
    fn concurrent_allocation_yields_unique_handles() {
        use std::sync::Arc;
        use std::thread;

        let pool = Arc::new(FixedPool::<RequestId>::new(10_000));
        let mut handles = vec![];
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                (0..1000).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<RequestId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        assert_eq!(all.len(), 4000);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
