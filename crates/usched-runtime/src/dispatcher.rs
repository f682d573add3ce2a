//! Central dispatcher (§4.3): the single thread that assigns work to
//! workers, checks preemption deadlines, and reaps finished/preempted
//! continuations. Everything it owns privately (the idle-worker list, the
//! per-type task queues, the per-worker push/pop cursors) is touched by no
//! other thread, so none of it needs to be atomic — only [`Shared`], which
//! crosses into the worker and networker threads, does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use usched_core::constants::MAX_JBSQ_LEN;
use usched_core::continuation::{ContinuationMetadata, ContinuationState};
use usched_core::error::DispatchResult;
use usched_core::idle_list::IdleWorkerList;
use usched_core::pool::FixedPool;
use usched_core::slot::{PreemptCheckEntry, RequestSlotCell, ResponseSlotCell, WorkerDispatchState};
use usched_core::state::{ResponseFlag, ScheduleMethod, TaskCategory};
use usched_core::task_queue::{Task, TaskQueues};
use usched_core::traits::{PlatformTime, PreemptTransport};
use usched_core::{ContinuationId, RequestId};

use crate::clock::MonotonicClock;
use crate::config::DispatcherConfig;
use crate::handlers::{KvStore, Request, Response};
use crate::networker::IngressChannel;

/// State shared between the dispatcher thread, every worker thread, and the
/// networker thread. Wrapped in `Arc` so each thread gets its own handle;
/// every field here is internally synchronized (atomics, `RwLock`, or —
/// for the fixed pools — their own spinlock) because more than one thread
/// touches it.
pub struct Shared {
    pub config: DispatcherConfig,
    pub request_slots: Vec<[RequestSlotCell; MAX_JBSQ_LEN]>,
    pub response_slots: Vec<[ResponseSlotCell; MAX_JBSQ_LEN]>,
    pub preempt_check: Vec<PreemptCheckEntry>,
    pub continuations: Vec<ContinuationMetadata>,
    pub stacks: crate::memory::StackRegion,
    pub requests: Vec<RwLock<Option<Request>>>,
    pub responses: Vec<RwLock<Option<Response>>>,
    pub kv: KvStore,
    pub transport: Box<dyn PreemptTransport>,
    pub request_pool: FixedPool<RequestId>,
    pub continuation_pool: FixedPool<ContinuationId>,
    pub ingress: IngressChannel,
    pub clock: MonotonicClock,
    pub shutdown: AtomicBool,
}

impl Shared {
    pub fn new(config: DispatcherConfig, transport: Box<dyn PreemptTransport>) -> DispatchResult<Arc<Self>> {
        let num_workers = config.num_workers;
        let jbsq_len = config.jbsq_len;

        let mut stacks = crate::memory::StackRegion::new();
        stacks.init(config.max_continuations, config.stack_size)?;

        let shared = Self {
            request_slots: (0..num_workers)
                .map(|_| std::array::from_fn(|_| RequestSlotCell::new()))
                .collect(),
            response_slots: (0..num_workers)
                .map(|_| std::array::from_fn(|_| ResponseSlotCell::new()))
                .collect(),
            preempt_check: (0..num_workers).map(|_| PreemptCheckEntry::new()).collect(),
            continuations: (0..config.max_continuations).map(|_| ContinuationMetadata::new()).collect(),
            stacks,
            requests: (0..config.max_requests).map(|_| RwLock::new(None)).collect(),
            responses: (0..config.max_requests).map(|_| RwLock::new(None)).collect(),
            kv: KvStore::new(),
            transport,
            request_pool: FixedPool::new(config.max_requests),
            continuation_pool: FixedPool::new(config.max_continuations),
            ingress: IngressChannel::new(usched_core::constants::DEFAULT_INGRESS_BATCH),
            clock: MonotonicClock,
            shutdown: AtomicBool::new(false),
            config,
        };

        let _ = jbsq_len; // validated by DispatcherConfig::validate before this is called
        Ok(Arc::new(shared))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clock_now(&self) -> u64 {
        self.clock.now_ns()
    }
}

/// The dispatcher's own private bookkeeping: one entry per worker for the
/// JBSQ ring cursors, plus the idle-worker list and per-type task queues
/// (§4.2, §4.3). None of this is shared with any other thread.
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker_state: Vec<WorkerDispatchState>,
    idle: IdleWorkerList,
    queues: TaskQueues,
}

impl Dispatcher {
    pub fn new(shared: Arc<Shared>) -> Self {
        let num_workers = shared.config.num_workers;
        let queues = TaskQueues::new(usched_core::RequestType::COUNT, shared.config.slo_ns.clone());
        Self {
            worker_state: vec![WorkerDispatchState::new(); num_workers],
            idle: IdleWorkerList::new(num_workers),
            queues,
            shared,
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// One iteration of the main loop (§4.3, steps 1-6). Runs until
    /// `Shared::request_shutdown` is observed.
    pub fn run(&mut self) {
        while !self.shared.shutdown.load(Ordering::Acquire) {
            self.tick();
        }
    }

    pub fn tick(&mut self) {
        let now = self.shared.clock_now();
        let mut epoch_slack = self.shared.config.time_slice;

        for worker in 0..self.shared.config.num_workers {
            self.handle_worker(worker, now, &mut epoch_slack);
        }

        self.handle_networker(now);
        self.dispatch_requests(now);
        self.dispatch_local_work(now, epoch_slack);
    }

    /// Step 3: check `worker`'s preempt deadline and fire if overdue, then
    /// reap a finished or preempted response from its oldest outstanding
    /// JBSQ cell. If the worker isn't overdue, narrows `epoch_slack` to the
    /// time remaining before it would become overdue, so step 6 never eats
    /// into another worker's preempt deadline.
    fn handle_worker(&mut self, worker: usize, now: u64, epoch_slack: &mut Duration) {
        if self.shared.preempt_check[worker].is_armed() {
            let dispatch_ts = self.shared.preempt_check[worker].dispatch_ts();
            let slice_ns = self.shared.config.time_slice.as_nanos() as u64;
            let elapsed = now.saturating_sub(dispatch_ts);
            if elapsed > slice_ns {
                self.shared.transport.fire(worker);
                self.shared.preempt_check[worker].disarm();
            } else {
                let remaining = Duration::from_nanos(slice_ns.saturating_sub(elapsed));
                *epoch_slack = (*epoch_slack).min(remaining);
            }
        }

        let jbsq_len = self.shared.config.jbsq_len;
        let pop = self.worker_state[worker].next_pop;
        let response = &self.shared.response_slots[worker][pop];

        match response.flag() {
            ResponseFlag::Finished => {
                let (continuation_id, request_id, _type_id, _category, _ts) = response.read();
                self.reap_finished(continuation_id, request_id);
                response.recycle();
                self.shared.request_slots[worker][pop].recycle();
                self.advance_pop(worker, jbsq_len);
            }
            ResponseFlag::Preempted => {
                let (continuation_id, request_id, type_id, _category, arrival_ts) = response.read();
                response.recycle();
                self.shared.request_slots[worker][pop].recycle();
                self.advance_pop(worker, jbsq_len);
                self.queues.enqueue_tail(Task {
                    continuation_id: ContinuationId::new(continuation_id),
                    request_id: RequestId::new(request_id),
                    type_id,
                    category: TaskCategory::Context,
                    arrival_ts,
                });
            }
            ResponseFlag::Processed | ResponseFlag::Running => {}
        }
    }

    fn advance_pop(&mut self, worker: usize, jbsq_len: usize) {
        let state = &mut self.worker_state[worker];
        state.next_pop = usched_core::advance_ring_index(state.next_pop, jbsq_len);
        state.occupancy = state.occupancy.saturating_sub(1);
        if state.occupancy < jbsq_len {
            self.idle.push(worker);
        }
    }

    fn reap_finished(&mut self, continuation_id: u32, request_id: u32) {
        self.shared.continuations[continuation_id as usize].set_state(ContinuationState::Free);
        *self.shared.requests[request_id as usize].write().unwrap() = None;
        *self.shared.responses[request_id as usize].write().unwrap() = None;
        self.shared.continuation_pool.release(ContinuationId::new(continuation_id));
        self.shared.request_pool.release(RequestId::new(request_id));
        self.shared.ingress.return_freed(&[RequestId::new(request_id)]);
    }

    /// Step 4: drain freshly-arrived requests from the networker, allocate
    /// a continuation for each, and enqueue a PACKET task.
    fn handle_networker(&mut self, now: u64) {
        let batch = self.shared.ingress.drain();
        for (request_id, type_id) in batch.reqs.into_iter().zip(batch.types) {
            let continuation_id = match self.shared.continuation_pool.allocate() {
                Ok(id) => id,
                Err(_) => {
                    usched_core::kwarn!("continuation pool exhausted, dropping request {}", request_id);
                    self.shared.request_pool.release(request_id);
                    continue;
                }
            };

            let meta = &self.shared.continuations[continuation_id.as_usize()];
            meta.set_state(ContinuationState::Ready);
            meta.set_worker_id(u32::MAX);
            meta.set_request_id(request_id.as_u32());

            self.queues.enqueue_tail(Task {
                continuation_id,
                request_id,
                type_id,
                category: TaskCategory::Packet,
                arrival_ts: now,
            });
        }
    }

    /// Fallback idle-worker selection for when [`IdleWorkerList`] is empty
    /// but some worker still has room below `jbsq_len`: the worker with the
    /// lowest positive occupancy, lowest index breaking ties.
    fn min_occupancy_worker(&self, jbsq_len: usize) -> Option<usize> {
        self.worker_state
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupancy > 0 && s.occupancy < jbsq_len)
            .min_by_key(|(_, s)| s.occupancy)
            .map(|(i, _)| i)
    }

    /// Step 5: hand queued tasks to idle workers, SLO-weighted across
    /// types, filling each worker's JBSQ pipeline up to `jbsq_len` before
    /// moving to the next. Prefers a worker at occupancy 0 (from the idle
    /// list); when none is idle, falls back to the worker with the least
    /// occupancy still under `jbsq_len` so a burst of arrivals spreads
    /// across workers instead of piling onto whichever one the idle list
    /// happened to return last.
    fn dispatch_requests(&mut self, now: u64) {
        let jbsq_len = self.shared.config.jbsq_len;
        loop {
            let worker = match self.idle.lowest() {
                Some(worker) => worker,
                None => match self.min_occupancy_worker(jbsq_len) {
                    Some(worker) => worker,
                    None => break,
                },
            };

            let Some(task) = self.queues.select_and_dequeue(now) else { break };

            let state = &mut self.worker_state[worker];
            let slot = state.next_push;
            state.next_push = usched_core::advance_ring_index(slot, jbsq_len);
            state.occupancy += 1;
            let occupancy = state.occupancy;

            self.shared.request_slots[worker][slot].publish(
                task.continuation_id.as_u32(),
                task.request_id.as_u32(),
                task.type_id,
                task.category,
                task.arrival_ts,
            );

            if occupancy == 1 {
                self.idle.remove(worker);
            }
        }
    }

    /// Step 6 (optional, §4.3): the dispatcher itself can absorb a single
    /// PACKET task within its own slack budget rather than leaving it
    /// queued, trading a little dispatcher latency for lower tail latency
    /// on a lightly-loaded system. Gated on `epoch_slack` — the time to the
    /// nearest worker's preempt deadline, narrowed across every armed
    /// worker in this tick's `handle_worker` calls — so absorbing work here
    /// never risks starving another worker's preempt check. The handler
    /// itself runs synchronously, not as a full continuation, since it can
    /// never be preempted anyway (see DESIGN.md), and is bounded to finish
    /// within `epoch_slack` so it can't stall the dispatcher past the
    /// deadline it was budgeted against.
    fn dispatch_local_work(&mut self, now: u64, epoch_slack: Duration) {
        if epoch_slack <= self.shared.config.dispatcher_work_threshold {
            return;
        }
        if self.shared.config.schedule_method == ScheduleMethod::None {
            // Nothing ever preempts under SCHEDULE=NONE, so there is no
            // preempt deadline to protect and no reason to blur the
            // head-of-line-blocking baseline this mode exists to measure.
            return;
        }
        if !self.idle.is_empty() {
            // There is spare worker capacity; let the normal path take it
            // next tick instead of doing it inline.
            return;
        }

        let Some(task) = (0..usched_core::RequestType::COUNT)
            .find_map(|type_id| self.queues.queue_mut(type_id).dequeue_of_category(TaskCategory::Packet))
        else {
            return;
        };

        let deadline = Instant::now() + epoch_slack;
        let request_id = task.request_id.as_u32() as usize;
        let (outcome, reply) = {
            let req = self.shared.requests[request_id].read().unwrap();
            match req.as_ref() {
                Some(r) => (crate::handlers::handle_bounded(&self.shared.kv, r, deadline), r.reply.clone()),
                None => return,
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                usched_core::kwarn!("dispatcher-local handler error: {}", e);
                Response { value: None, ok: false }
            }
        };
        if let Some(reply) = reply {
            let _ = reply.send(response.clone());
        }
        *self.shared.responses[request_id].write().unwrap() = Some(response);

        self.reap_finished(task.continuation_id.as_u32(), task.request_id.as_u32());
        let _ = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::preempt::NoneTransport;

    fn test_shared() -> Arc<Shared> {
        let config = DispatcherConfig::new()
            .num_workers(2)
            .max_requests(16)
            .max_continuations(16)
            .stack_size(64 * 1024);
        Shared::new(config, Box::new(NoneTransport)).unwrap()
    }

    #[test]
    fn networker_step_allocates_and_enqueues() {
        let shared = test_shared();
        let mut dispatcher = Dispatcher::new(Arc::clone(&shared));

        let id = shared.request_pool.allocate().unwrap();
        *shared.requests[id.as_usize()].write().unwrap() = Some(Request {
            request_type: usched_core::RequestType::Get,
            key: b"k".to_vec(),
            value: vec![],
            busy_iters: 0,
            reply: None,
        });
        shared.ingress.publish(&[(id, 0)]);

        dispatcher.handle_networker(1000);
        assert_eq!(dispatcher.queues.total_len(), 1);
    }

    #[test]
    fn dispatch_requests_fills_idle_worker() {
        let shared = test_shared();
        let mut dispatcher = Dispatcher::new(Arc::clone(&shared));

        dispatcher.queues.enqueue_tail(Task {
            continuation_id: ContinuationId::new(0),
            request_id: RequestId::new(0),
            type_id: 0,
            category: TaskCategory::Packet,
            arrival_ts: 0,
        });

        dispatcher.dispatch_requests(100);
        assert_eq!(shared.request_slots[0][0].flag(), usched_core::RequestFlag::Ready);
    }

    #[test]
    fn reap_finished_releases_both_pools() {
        let shared = test_shared();
        let mut dispatcher = Dispatcher::new(Arc::clone(&shared));

        let rid = shared.request_pool.allocate().unwrap();
        let cid = shared.continuation_pool.allocate().unwrap();
        dispatcher.reap_finished(cid.as_u32(), rid.as_u32());

        assert_eq!(shared.continuations[cid.as_usize()].state(), ContinuationState::Free);
    }
}
