//! Error types for the dispatcher/worker runtime (§7 error handling design).
//!
//! §7 distinguishes three kinds: transient resource exhaustion (retryable),
//! protocol violations in the slot state machine (logged and the offending
//! slot dropped), and context-switch/memory failures (fatal, abort the
//! worker). `DispatchError` covers all three plus handler-level errors that
//! are reported back to the caller as a response, not propagated.

use core::fmt;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A fixed-size pool (request or continuation) has no free slots. The
    /// caller should apply backpressure; the system stays up.
    PoolExhausted,

    /// A JBSQ slot was observed in a flag combination the state machine
    /// does not allow (§4.1). Non-fatal: the slot is recycled and the
    /// event is logged, but the request is lost.
    ProtocolViolation(&'static str),

    /// Dispatcher or worker addressed a worker index outside the
    /// configured range.
    WorkerNotFound(usize),

    /// The scheduler was asked to do something before `Runtime::start` or
    /// after `Runtime::shutdown`.
    NotInitialized,
    AlreadyInitialized,

    /// Stack, guard-page or register-save failures: always fatal (§7).
    MemoryError(MemoryError),

    /// Worker thread lifecycle failures.
    WorkerError(WorkerError),

    /// errno from a platform call that doesn't fit the categories above.
    PlatformError(i32),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::PoolExhausted => write!(f, "no slots available in fixed-size pool"),
            DispatchError::ProtocolViolation(ctx) => write!(f, "slot protocol violation: {}", ctx),
            DispatchError::WorkerNotFound(idx) => write!(f, "worker {} not found", idx),
            DispatchError::NotInitialized => write!(f, "runtime not initialized"),
            DispatchError::AlreadyInitialized => write!(f, "runtime already initialized"),
            DispatchError::MemoryError(e) => write!(f, "memory error: {}", e),
            DispatchError::WorkerError(e) => write!(f, "worker error: {}", e),
            DispatchError::PlatformError(code) => write!(f, "platform error: {}", code),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Stack/guard-page/register-save failures. Always fatal per §7: the
/// worker that hit one aborts rather than trying to continue with a
/// possibly-corrupt continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    AllocationFailed,
    ProtectionFailed,
    AdviseFailed,
    AlreadyInitialized,
    TooManySlots,
    InvalidSlot,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "stack mmap failed"),
            MemoryError::ProtectionFailed => write!(f, "guard page mprotect failed"),
            MemoryError::AdviseFailed => write!(f, "madvise(MADV_DONTNEED) failed"),
            MemoryError::AlreadyInitialized => write!(f, "memory region already initialized"),
            MemoryError::TooManySlots => write!(f, "too many continuation slots requested"),
            MemoryError::InvalidSlot => write!(f, "invalid continuation slot id"),
        }
    }
}

impl From<MemoryError> for DispatchError {
    fn from(e: MemoryError) -> Self {
        DispatchError::MemoryError(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    SpawnFailed,
    Panicked,
    AffinityFailed,
    SignalSetupFailed,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            WorkerError::Panicked => write!(f, "worker thread panicked"),
            WorkerError::AffinityFailed => write!(f, "failed to set thread affinity"),
            WorkerError::SignalSetupFailed => write!(f, "SIGURG handler setup failed"),
        }
    }
}

impl From<WorkerError> for DispatchError {
    fn from(e: WorkerError) -> Self {
        DispatchError::WorkerError(e)
    }
}

/// Handler-level outcome: a request-type handler failed in a way that
/// should surface as a response, not propagate up and take the worker
/// down with it (§7 "handler-level warn-only errors").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The backend collaborator rejected the operation (e.g. key not
    /// found on a GET).
    BackendRejected(String),
    /// The request carried a type-id outside the registered handler table.
    UnknownRequestType(u8),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::BackendRejected(msg) => write!(f, "backend rejected request: {}", msg),
            HandlerError::UnknownRequestType(ty) => write!(f, "unknown request type {}", ty),
        }
    }
}

impl std::error::Error for HandlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = DispatchError::PoolExhausted;
        assert_eq!(format!("{}", e), "no slots available in fixed-size pool");

        let e = DispatchError::MemoryError(MemoryError::AllocationFailed);
        assert_eq!(format!("{}", e), "memory error: stack mmap failed");
    }

    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::TooManySlots;
        let dispatch_err: DispatchError = mem_err.into();
        assert!(matches!(dispatch_err, DispatchError::MemoryError(MemoryError::TooManySlots)));
    }

    #[test]
    fn test_handler_error_display() {
        let e = HandlerError::UnknownRequestType(9);
        assert_eq!(format!("{}", e), "unknown request type 9");
    }
}
