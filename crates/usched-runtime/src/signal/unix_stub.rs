//! Non-x86_64 unix stand-in: posted-IPI register capture is architecture
//! specific (see `arch/`), so this arm only keeps the install/fire
//! bookkeeping and leaves the handler body unimplemented.

use usched_core::constants::MAX_WORKERS;
use usched_core::error::{DispatchResult, WorkerError};

pub const DEFAULT_PREEMPT_SIGNAL: libc::c_int = libc::SIGURG;

pub fn install_for_worker(worker_id: usize, _signal: libc::c_int) -> DispatchResult<()> {
    if worker_id >= MAX_WORKERS {
        return Err(WorkerError::SignalSetupFailed.into());
    }
    unimplemented!("posted-IPI register capture not yet implemented for this architecture")
}

pub fn fire(_worker_id: usize) {
    unimplemented!("posted-IPI register capture not yet implemented for this architecture")
}
