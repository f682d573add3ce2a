//! Worker OS thread pool and per-worker resume contexts.
//!
//! Each worker OS thread has its own "home" execution context — the point
//! its main loop is at when it switches into a continuation. That context
//! is what a continuation voluntarily yields or finishes back into, so it
//! lives in a fixed-size array indexed by worker id rather than on any
//! particular stack frame.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use usched_core::constants::MAX_WORKERS;
use usched_core::continuation::VoluntarySavedRegs;

struct ResumeSlot(UnsafeCell<VoluntarySavedRegs>);

// Safety: slot `i` is only ever touched by worker thread `i`.
unsafe impl Sync for ResumeSlot {}

struct ResumeContexts {
    slots: [ResumeSlot; MAX_WORKERS],
}

impl ResumeContexts {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ResumeSlot(UnsafeCell::new(VoluntarySavedRegs::default()))),
        }
    }
}

static RESUME_CONTEXTS: OnceLock<ResumeContexts> = OnceLock::new();

fn resume_contexts() -> &'static ResumeContexts {
    RESUME_CONTEXTS.get_or_init(ResumeContexts::new)
}

/// Pointer to worker `worker_id`'s own resume context. Valid for the
/// lifetime of the process; only that worker's OS thread may dereference
/// it mutably.
#[inline]
pub fn worker_resume_regs(worker_id: usize) -> *mut VoluntarySavedRegs {
    debug_assert!(worker_id < MAX_WORKERS);
    resume_contexts().slots[worker_id].0.get()
}

/// A pool of worker OS threads, each running the same loop function with
/// its own index.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    num_workers: usize,
    shutdown: AtomicBool,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        Self {
            handles: Vec::with_capacity(num_workers),
            num_workers,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Spawn `num_workers` OS threads, each invoking `worker_fn(worker_id)`.
    /// Best-effort pins thread `i` to CPU `i` (§5: affinity is advisory,
    /// failures are logged and ignored).
    pub fn start<F>(&mut self, worker_fn: F)
    where
        F: Fn(usize) + Send + Sync + Clone + 'static,
    {
        for i in 0..self.num_workers {
            let worker_fn = worker_fn.clone();
            let handle = thread::Builder::new()
                .name(format!("usched-worker-{}", i))
                .spawn(move || {
                    crate::tls::set_worker_id(i);
                    set_affinity_best_effort(i);
                    worker_fn(i);
                })
                .expect("failed to spawn worker thread");
            self.handles.push(handle);
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }
}

#[cfg(unix)]
fn set_affinity_best_effort(cpu: usize) {
    use nix::sched::{sched_setaffinity, CpuSet};
    use nix::unistd::Pid;

    let mut set = CpuSet::new();
    if set.set(cpu).is_err() {
        return;
    }
    if sched_setaffinity(Pid::from_raw(0), &set).is_err() {
        usched_core::kwarn!("sched_setaffinity failed for worker cpu {}", cpu);
    }
}

#[cfg(not(unix))]
fn set_affinity_best_effort(_cpu: usize) {}
