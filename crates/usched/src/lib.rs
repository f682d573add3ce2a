//! # usched
//!
//! Userspace request scheduler aimed at microsecond-scale dataplane
//! services: a single dispatcher thread hands incoming requests to a small
//! pool of worker threads over bounded per-worker JBSQ rings, preempting
//! long-running handlers so short requests don't queue behind them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use usched::{DispatcherConfig, Request, RequestType, Runtime};
//!
//! let mut runtime = Runtime::new(DispatcherConfig::new());
//!
//! let request = Request {
//!     request_type: RequestType::Put,
//!     key: b"k".to_vec(),
//!     value: b"v".to_vec(),
//!     busy_iters: 0,
//!     reply: None,
//! };
//! let response = runtime.submit_blocking(request).unwrap();
//! assert!(response.ok);
//!
//! runtime.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Caller threads                        │
//! │                    Runtime::submit[_blocking]                │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ mpsc::Sender<Request>
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Networker                           │
//! │        allocates request handles, publishes IngressChannel   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Dispatcher                           │
//! │   per-type SLO-weighted queues, JBSQ assignment, preempt      │
//! │   deadline checks, reaping finished/preempted continuations   │
//! └──────────────────────────────────────────────────────────────┘
//!                               │ JBSQ request/response rings
//!                  ┌────────────┼────────────┐
//!                  ▼            ▼            ▼
//!             ┌─────────┐ ┌─────────┐  ┌─────────┐
//!             │ Worker  │ │ Worker  │  │ Worker  │
//!             └─────────┘ └─────────┘  └─────────┘
//! ```

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use usched_core::state::ScheduleMethod;
use usched_core::traits::PreemptTransport;
use usched_runtime::dispatcher::{Dispatcher, Shared};
use usched_runtime::networker::Networker;
use usched_runtime::preempt::{CooperativeYieldTransport, NoneTransport, PostedIpiTransport};
use usched_runtime::worker::WorkerPool;

pub use usched_core::error::{DispatchError, DispatchResult};
pub use usched_core::state::{RequestType, ScheduleMethod};
pub use usched_runtime::config::DispatcherConfig;
pub use usched_runtime::handlers::{KvStore, Request, Response};

/// Runtime handle owning the dispatcher thread, the worker pool, and the
/// networker thread. Dropping it (or calling [`Runtime::shutdown`]) tears
/// all three down.
pub struct Runtime {
    shared: Arc<Shared>,
    tx: Sender<Request>,
    dispatcher_handle: Option<JoinHandle<()>>,
    networker_handle: Option<JoinHandle<()>>,
    workers: Option<WorkerPool>,
    started: AtomicBool,
}

impl Runtime {
    /// Build and start a runtime: spawns the dispatcher thread, the
    /// networker thread, and `config.num_workers` worker threads.
    pub fn new(config: DispatcherConfig) -> Self {
        config.validate().expect("invalid dispatcher configuration");

        usched_core::kprint::init();
        if config.debug_logging {
            usched_core::kprint::set_log_level(usched_core::kprint::LogLevel::Debug);
        }

        let transport: Box<dyn PreemptTransport> = match config.schedule_method {
            ScheduleMethod::PostedIpi => Box::new(PostedIpiTransport::default()),
            ScheduleMethod::CooperativeYield => Box::new(CooperativeYieldTransport::new()),
            ScheduleMethod::None => Box::new(NoneTransport),
        };

        let shared = Shared::new(config, transport).expect("failed to initialize runtime state");
        let (tx, rx) = mpsc::channel();

        let dispatcher_shared = Arc::clone(&shared);
        let dispatcher_handle = thread::Builder::new()
            .name("usched-dispatcher".to_string())
            .spawn(move || Dispatcher::new(dispatcher_shared).run())
            .expect("failed to spawn dispatcher thread");

        let networker_shared = Arc::clone(&shared);
        let networker_handle = thread::Builder::new()
            .name("usched-networker".to_string())
            .spawn(move || Networker::new(rx).run(&networker_shared))
            .expect("failed to spawn networker thread");

        let mut workers = WorkerPool::new(shared.config.num_workers);
        let worker_shared = Arc::clone(&shared);
        workers.start(move |worker_id| {
            usched_runtime::worker_loop::run(Arc::clone(&worker_shared), worker_id)
        });

        Self {
            shared,
            tx,
            dispatcher_handle: Some(dispatcher_handle),
            networker_handle: Some(networker_handle),
            workers: Some(workers),
            started: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Submit a request without waiting for its response. `request.reply`
    /// is sent as given — set it yourself if you want a completion signal
    /// without blocking on it here.
    pub fn submit(&self, request: Request) -> Result<(), SubmitError> {
        self.tx.send(request).map_err(|_| SubmitError::Shutdown)
    }

    /// Submit a request and block the calling thread until its response is
    /// ready. Overwrites `request.reply` with an internal completion
    /// channel.
    pub fn submit_blocking(&self, mut request: Request) -> Result<Response, SubmitError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        request.reply = Some(reply_tx);
        self.submit(request)?;
        reply_rx.recv().map_err(|_| SubmitError::Shutdown)
    }

    /// Stop accepting new work and tear down the dispatcher, networker, and
    /// worker threads. Safe to call more than once; safe to skip and let
    /// `Drop` do it.
    pub fn shutdown(&mut self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.shared.request_shutdown();

        if let Some(handle) = self.dispatcher_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.networker_handle.take() {
            let _ = handle.join();
        }
        if let Some(workers) = self.workers.take() {
            workers.request_shutdown();
            workers.join();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Failure to hand a request to a [`Runtime`] that has stopped accepting
/// work (shutting down, or already shut down).
#[derive(Debug)]
pub enum SubmitError {
    Shutdown,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Shutdown => write!(f, "runtime is shutting down or already shut down"),
        }
    }
}

impl std::error::Error for SubmitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trip() {
        let mut runtime = Runtime::new(
            DispatcherConfig::new()
                .num_workers(2)
                .max_requests(64)
                .max_continuations(64)
                .schedule_method(ScheduleMethod::None),
        );

        let put = Request {
            request_type: RequestType::Put,
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            busy_iters: 0,
            reply: None,
        };
        let resp = runtime.submit_blocking(put).unwrap();
        assert!(resp.ok);

        let get = Request {
            request_type: RequestType::Get,
            key: b"k".to_vec(),
            value: vec![],
            busy_iters: 0,
            reply: None,
        };
        let resp = runtime.submit_blocking(get).unwrap();
        assert_eq!(resp.value, Some(b"v".to_vec()));

        runtime.shutdown();
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let mut runtime = Runtime::new(
            DispatcherConfig::new()
                .num_workers(1)
                .max_requests(8)
                .max_continuations(8)
                .schedule_method(ScheduleMethod::None),
        );
        runtime.shutdown();

        let req = Request {
            request_type: RequestType::Get,
            key: b"k".to_vec(),
            value: vec![],
            busy_iters: 0,
            reply: None,
        };
        assert!(runtime.submit(req).is_err());
    }
}
