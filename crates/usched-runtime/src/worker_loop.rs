//! Worker main loop (§4.4): claim a slot, bootstrap or resume its
//! continuation, run the handler, and report the outcome.

use std::cell::RefCell;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use usched_core::continuation::{ContinuationState, ResumeMode};
use usched_core::state::{RequestFlag, ResponseFlag, TaskCategory};

use crate::arch::current_arch as arch;
use crate::dispatcher::Shared;
use crate::handlers::{self, Response};
use crate::tls;

thread_local! {
    /// Set once when the worker thread starts; read by `continuation_entry`
    /// to reach the handler table without threading `Arc<Shared>` through
    /// the raw `entry_fn(entry_arg)` calling convention (§3 "Continuation").
    static WORKER_SHARED: RefCell<Option<Arc<Shared>>> = const { RefCell::new(None) };
}

/// Drive one worker OS thread forever, claiming JBSQ slots as they go
/// `READY` until shutdown is requested (§4.4).
pub fn run(shared: Arc<Shared>, worker_id: usize) {
    WORKER_SHARED.with(|cell| *cell.borrow_mut() = Some(Arc::clone(&shared)));

    if let Err(e) = shared.transport.install_for_worker(worker_id) {
        usched_core::kerror!("preempt transport install failed: {}", e);
        return;
    }

    let jbsq_len = shared.config.jbsq_len;
    let mut active: usize = 0;

    loop {
        let request_cell = &shared.request_slots[worker_id][active];

        let mut spins: u32 = 0;
        while request_cell.flag() != RequestFlag::Ready {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            spins = spins.wrapping_add(1);
            if spins > shared.config.idle_spins {
                std::thread::park_timeout(shared.config.park_timeout);
            } else {
                std::hint::spin_loop();
            }
        }

        let (continuation_id, request_id, type_id, category, _arrival_ts) = request_cell.read();
        let response_cell = &shared.response_slots[worker_id][active];
        let now = shared.clock_now();
        response_cell.mark_running(continuation_id, request_id, type_id, category, now);
        shared.preempt_check[worker_id].arm(now);

        let meta = &shared.continuations[continuation_id as usize];
        meta.set_state(ContinuationState::Running);
        meta.set_worker_id(worker_id as u32);

        tls::set_current_continuation(continuation_id, meta as *const _ as *mut _);
        run_continuation(worker_id, continuation_id, category);
        tls::clear_current_continuation();

        shared.preempt_check[worker_id].disarm();

        let outcome = match meta.state() {
            ContinuationState::Finished => ResponseFlag::Finished,
            ContinuationState::Preempted => ResponseFlag::Preempted,
            other => {
                usched_core::kwarn!("continuation left loop in unexpected state {:?}", other);
                ResponseFlag::Finished
            }
        };
        response_cell.publish_outcome(outcome);
        request_cell.mark_done();

        active = usched_core::advance_ring_index(active, jbsq_len);
    }
}

/// Switch into (or back into) a continuation and return once it has
/// either finished or been preempted. `category` picks which saved-register
/// area to resume from (§4.4 step 3).
fn run_continuation(worker_id: usize, continuation_id: u32, category: TaskCategory) {
    let shared_ptr = WORKER_SHARED.with(|cell| {
        let guard = cell.borrow();
        Arc::as_ptr(guard.as_ref().expect("worker shared context not installed"))
    });
    let shared = unsafe { &*shared_ptr };

    let meta = &shared.continuations[continuation_id as usize];
    let worker_regs = crate::worker::worker_resume_regs(worker_id);

    match category {
        TaskCategory::Packet => {
            debug_assert_eq!(meta.state(), ContinuationState::Running);
            shared.stacks.activate_slot(continuation_id).unwrap_or_else(|e| {
                usched_core::kerror!("failed to activate continuation stack: {}", e);
            });
            let stack_top = shared.stacks.stack_top(continuation_id);
            meta.set_entry(continuation_entry as usize, continuation_id as usize);
            let continuation_regs =
                &meta.voluntary_regs as *const usched_core::continuation::VoluntarySavedRegs as *mut _;
            unsafe {
                arch::init_context(continuation_regs, stack_top, meta.entry_fn(), meta.entry_arg());
                arch::context_switch_voluntary(worker_regs, &meta.voluntary_regs as *const _);
            }
        }
        TaskCategory::Context => match meta.resume_mode() {
            ResumeMode::Voluntary => unsafe {
                arch::context_switch_voluntary(worker_regs, &meta.voluntary_regs as *const _);
            },
            ResumeMode::Forced => unsafe {
                arch::context_switch_to_forced(worker_regs, &meta.forced_regs as *const _);
            },
        },
    }
}

/// The continuation's entry point (§3 "entry_fn/entry_arg"), matching the
/// `extern "C" fn(usize)` shape `continuation_entry_trampoline` calls via
/// `mov rdi, r13 / call r12`. Runs the request handler to completion and
/// stashes its outcome where the worker picks it up after the switch back.
extern "C" fn continuation_entry(continuation_id: usize) {
    let shared = WORKER_SHARED
        .with(|cell| cell.borrow().clone())
        .expect("worker shared context not installed");

    let meta = &shared.continuations[continuation_id];
    let request_id = meta.request_id() as usize;

    let outcome = {
        let req = shared.requests[request_id].read().unwrap();
        match req.as_ref() {
            Some(r) if shared.config.schedule_method == usched_core::ScheduleMethod::CooperativeYield => {
                handlers::handle_cooperative(&shared.kv, r, || cooperative_yield_point(&shared, meta))
            }
            Some(r) => handlers::handle(&shared.kv, r),
            None => {
                usched_core::kerror!("running continuation has no request payload");
                return;
            }
        }
    };

    let response = match outcome {
        Ok(r) => r,
        Err(e) => {
            usched_core::kwarn!("handler error: {}", e);
            Response { value: None, ok: false }
        }
    };

    let reply = shared.requests[request_id].read().unwrap().as_ref().and_then(|r| r.reply.clone());
    if let Some(reply) = reply {
        let _ = reply.send(response.clone());
    }
    *shared.responses[request_id].write().unwrap() = Some(response);
}

/// Called between chunks of a cooperative handler's synthetic CPU cost
/// (§4.5(b)). If the dispatcher has asked this worker to yield, this
/// performs the actual context switch back to the worker's main loop and
/// only returns once some later tick switches back in — at which point
/// `run_continuation`'s caller sees this call return exactly as if it had
/// never suspended.
fn cooperative_yield_point(shared: &Shared, meta: &usched_core::ContinuationMetadata) {
    let worker_id = tls::worker_id();
    if !shared.transport.poll_preempt(worker_id) {
        return;
    }
    meta.set_state(ContinuationState::Preempted);
    meta.set_resume_mode(ResumeMode::Voluntary);
    let worker_regs = crate::worker::worker_resume_regs(worker_id);
    let continuation_regs =
        &meta.voluntary_regs as *const usched_core::continuation::VoluntarySavedRegs as *mut _;
    unsafe {
        arch::context_switch_voluntary(continuation_regs, worker_regs as *const _);
    }
    meta.set_state(ContinuationState::Running);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_shared_defaults_to_none() {
        WORKER_SHARED.with(|cell| assert!(cell.borrow().is_none()));
    }
}
