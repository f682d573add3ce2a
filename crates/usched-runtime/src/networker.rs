//! Ingress handoff between the networker and the dispatcher (§6).
//!
//! The NIC driver and UDP parsing that would sit on the networker side are
//! out of scope (§1 external collaborators); this models only the handoff
//! contract itself: a fixed-size batch array plus a `cnt`/`free_cnt`
//! handshake.

use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use usched_core::constants::DEFAULT_INGRESS_BATCH;
use usched_core::id::RequestId;

use crate::dispatcher::Shared;
use crate::handlers::Request;

/// One drained batch of freshly-arrived requests.
pub struct IngressBatch {
    pub reqs: Vec<RequestId>,
    pub types: Vec<u8>,
}

/// Producer = networker, consumer = dispatcher (§5 "shared mutable state").
/// `cnt` is the single handshake field: the networker waits for `cnt == 0`
/// before writing a new batch; the dispatcher waits for `cnt != 0` before
/// draining, then sets it back to 0 once consumed (§6).
pub struct IngressChannel {
    capacity: usize,
    reqs: Vec<AtomicU32>,
    types: Vec<AtomicU8>,
    cnt: AtomicUsize,
    freed: Vec<AtomicU32>,
    free_cnt: AtomicUsize,
}

impl IngressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            reqs: (0..capacity).map(|_| AtomicU32::new(RequestId::NONE.as_u32())).collect(),
            types: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            cnt: AtomicUsize::new(0),
            freed: (0..capacity).map(|_| AtomicU32::new(RequestId::NONE.as_u32())).collect(),
            free_cnt: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Networker side: true once the dispatcher has drained the previous
    /// batch and the handoff array is free to refill.
    #[inline]
    pub fn ready_for_producer(&self) -> bool {
        self.cnt.load(Ordering::Acquire) == 0
    }

    /// Networker: publish up to `capacity` new request handles with a
    /// release store on `cnt` (§4.3 step 4 reads this with acquire).
    pub fn publish(&self, batch: &[(RequestId, u8)]) {
        let n = batch.len().min(self.capacity);
        for (i, (req, ty)) in batch.iter().take(n).enumerate() {
            self.reqs[i].store(req.as_u32(), Ordering::Relaxed);
            self.types[i].store(*ty, Ordering::Relaxed);
        }
        self.cnt.store(n, Ordering::Release);
    }

    /// Networker: collect previously-returned handles to recycle into its
    /// own free list.
    pub fn take_freed(&self) -> Vec<RequestId> {
        let n = self.free_cnt.swap(0, Ordering::Acquire);
        (0..n).map(|i| RequestId::new(self.freed[i].load(Ordering::Relaxed))).collect()
    }

    /// Dispatcher: drain the current batch, if any, and reopen the channel
    /// for the networker.
    pub fn drain(&self) -> IngressBatch {
        let n = self.cnt.load(Ordering::Acquire);
        let mut reqs = Vec::with_capacity(n);
        let mut types = Vec::with_capacity(n);
        for i in 0..n {
            reqs.push(RequestId::new(self.reqs[i].load(Ordering::Relaxed)));
            types.push(self.types[i].load(Ordering::Relaxed));
        }
        self.cnt.store(0, Ordering::Release);
        IngressBatch { reqs, types }
    }

    /// Dispatcher: hand a batch of freed request handles back to the
    /// networker's free list (§6 `free_cnt`).
    pub fn return_freed(&self, handles: &[RequestId]) {
        let n = handles.len().min(self.capacity);
        for (i, h) in handles.iter().take(n).enumerate() {
            self.freed[i].store(h.as_u32(), Ordering::Relaxed);
        }
        self.free_cnt.store(n, Ordering::Release);
    }
}

impl Default for IngressChannel {
    fn default() -> Self {
        Self::new(DEFAULT_INGRESS_BATCH)
    }
}

/// Converts inbound requests (arriving on `rx` from any number of producer
/// threads, e.g. `Runtime::submit`) into allocated request handles and
/// publishes them through the [`IngressChannel`] handoff (§6). Stands in for
/// the NIC rx ring / UDP parsing that would sit here in a real deployment
/// (§1 external collaborators, out of scope).
pub struct Networker {
    rx: Receiver<Request>,
}

impl Networker {
    pub fn new(rx: Receiver<Request>) -> Self {
        Self { rx }
    }

    /// Runs until `shared.shutdown` is set and `rx` has disconnected. Polls
    /// on a short timeout rather than blocking indefinitely so it notices
    /// shutdown promptly even with no inbound traffic.
    pub fn run(&self, shared: &Shared) {
        let mut pending: Vec<(RequestId, u8)> = Vec::with_capacity(shared.ingress.capacity());

        loop {
            match self.rx.recv_timeout(Duration::from_millis(1)) {
                Ok(req) => {
                    let type_id = req.request_type.as_index() as u8;
                    match shared.request_pool.allocate() {
                        Ok(id) => {
                            *shared.requests[id.as_usize()].write().unwrap() = Some(req);
                            pending.push((id, type_id));
                        }
                        Err(_) => {
                            usched_core::kwarn!("request pool exhausted, dropping inbound request");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    if pending.is_empty() && shared.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                }
            }

            if !pending.is_empty() && shared.ingress.ready_for_producer() {
                shared.ingress.publish(&pending);
                pending.clear();
            }

            let freed = shared.ingress.take_freed();
            if !freed.is_empty() {
                shared.request_pool.release_batch(&freed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_drain_round_trip() {
        let chan = IngressChannel::new(8);
        assert!(chan.ready_for_producer());

        let batch = vec![(RequestId::new(3), 1u8), (RequestId::new(4), 2u8)];
        chan.publish(&batch);
        assert!(!chan.ready_for_producer());

        let drained = chan.drain();
        assert_eq!(drained.reqs, vec![RequestId::new(3), RequestId::new(4)]);
        assert_eq!(drained.types, vec![1, 2]);
        assert!(chan.ready_for_producer());
    }

    #[test]
    fn freed_handles_round_trip() {
        let chan = IngressChannel::new(8);
        chan.return_freed(&[RequestId::new(1), RequestId::new(2)]);
        let freed = chan.take_freed();
        assert_eq!(freed, vec![RequestId::new(1), RequestId::new(2)]);
        assert!(chan.take_freed().is_empty());
    }

    #[test]
    fn publish_truncates_to_capacity() {
        let chan = IngressChannel::new(2);
        let batch: Vec<_> = (0..5).map(|i| (RequestId::new(i), 0u8)).collect();
        chan.publish(&batch);
        let drained = chan.drain();
        assert_eq!(drained.reqs.len(), 2);
    }
}
