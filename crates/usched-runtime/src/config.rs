//! Dispatcher configuration (§6 "Configuration").
//!
//! Compile-time-flavored defaults with runtime environment overrides — the
//! same two-tier approach the host config module uses, without its
//! build.rs-generated merge step: `from_env()` alone is enough once the
//! config lives behind env vars rather than a user-supplied source file.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Environment variables (runtime)
//! 2. Library defaults

use std::time::Duration;
use usched_core::env::env_get;
use usched_core::state::ScheduleMethod;

pub mod defaults {
    pub const NUM_WORKERS: usize = 4;
    pub const MAX_REQUESTS: usize = 1 << 16;
    pub const MAX_CONTINUATIONS: usize = 1 << 14;
    pub const TIME_SLICE_US: u64 = 5;
    pub const JBSQ_LEN: usize = 2;
    pub const STACK_SIZE: usize = 256 * 1024;
    pub const DEBUG_LOGGING: bool = false;
    pub const IDLE_SPINS: u32 = 1000;
    pub const PARK_TIMEOUT_MS: u64 = 1;
    pub const DEFAULT_SLO_NS: u64 = 50_000;
    /// `dispatcher_work_threshold` below which step 6 (§4.3) skips
    /// absorbing a packet on the dispatcher thread — the slack has to be
    /// worth the trip, not just nonzero.
    pub const DISPATCHER_WORK_THRESHOLD_NS: u64 = 1_000;
}

/// Runtime configuration for the dispatcher and its workers.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub num_workers: usize,
    pub max_requests: usize,
    pub max_continuations: usize,
    /// `TIME_SLICE_US` — target preemption threshold (§6).
    pub time_slice: Duration,
    /// `JBSQ_LEN` — per-worker request/response ring depth, 1 or 2.
    pub jbsq_len: usize,
    pub stack_size: usize,
    /// `SCHEDULE_METHOD` — which `PreemptTransport` to install.
    pub schedule_method: ScheduleMethod,
    pub debug_logging: bool,
    pub idle_spins: u32,
    pub park_timeout: Duration,
    /// Minimum `epoch_slack` (§4.3 step 6) worth absorbing a packet task on
    /// the dispatcher thread for. Below this, dispatcher-local work is
    /// skipped even if a worker is idle-starved and slack is nonzero.
    pub dispatcher_work_threshold: Duration,
    /// Per-request-type SLO (§4.2), indexed by `RequestType::as_index()`.
    pub slo_ns: Vec<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DispatcherConfig {
    /// Build from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `USCHED_NUM_WORKERS`
    /// - `USCHED_MAX_REQUESTS`
    /// - `USCHED_MAX_CONTINUATIONS`
    /// - `USCHED_TIME_SLICE_US`
    /// - `USCHED_JBSQ_LEN` (1 or 2)
    /// - `USCHED_STACK_SIZE`
    /// - `USCHED_SCHEDULE_METHOD` (`POSTED_IPI` | `COOPERATIVE_YIELD` | `NONE`)
    /// - `USCHED_DEBUG`
    /// - `USCHED_IDLE_SPINS`
    /// - `USCHED_PARK_TIMEOUT_MS`
    /// - `USCHED_DISPATCHER_WORK_THRESHOLD_NS`
    pub fn from_env() -> Self {
        let schedule_method = std::env::var("USCHED_SCHEDULE_METHOD")
            .ok()
            .and_then(|v| ScheduleMethod::parse(&v))
            .unwrap_or(ScheduleMethod::PostedIpi);

        Self {
            num_workers: env_get("USCHED_NUM_WORKERS", defaults::NUM_WORKERS),
            max_requests: env_get("USCHED_MAX_REQUESTS", defaults::MAX_REQUESTS),
            max_continuations: env_get("USCHED_MAX_CONTINUATIONS", defaults::MAX_CONTINUATIONS),
            time_slice: Duration::from_micros(env_get(
                "USCHED_TIME_SLICE_US",
                defaults::TIME_SLICE_US,
            )),
            jbsq_len: env_get("USCHED_JBSQ_LEN", defaults::JBSQ_LEN),
            stack_size: env_get("USCHED_STACK_SIZE", defaults::STACK_SIZE),
            schedule_method,
            debug_logging: env_get(
                "USCHED_DEBUG",
                if defaults::DEBUG_LOGGING { 1usize } else { 0 },
            ) != 0,
            idle_spins: env_get("USCHED_IDLE_SPINS", defaults::IDLE_SPINS as usize) as u32,
            park_timeout: Duration::from_millis(env_get(
                "USCHED_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            dispatcher_work_threshold: Duration::from_nanos(env_get(
                "USCHED_DISPATCHER_WORK_THRESHOLD_NS",
                defaults::DISPATCHER_WORK_THRESHOLD_NS,
            )),
            slo_ns: vec![defaults::DEFAULT_SLO_NS; usched_core::RequestType::COUNT],
        }
    }

    /// Explicit defaults, no env override. Useful for tests.
    pub fn new() -> Self {
        Self {
            num_workers: defaults::NUM_WORKERS,
            max_requests: defaults::MAX_REQUESTS,
            max_continuations: defaults::MAX_CONTINUATIONS,
            time_slice: Duration::from_micros(defaults::TIME_SLICE_US),
            jbsq_len: defaults::JBSQ_LEN,
            stack_size: defaults::STACK_SIZE,
            schedule_method: ScheduleMethod::PostedIpi,
            debug_logging: defaults::DEBUG_LOGGING,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            dispatcher_work_threshold: Duration::from_nanos(defaults::DISPATCHER_WORK_THRESHOLD_NS),
            slo_ns: vec![defaults::DEFAULT_SLO_NS; usched_core::RequestType::COUNT],
        }
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn max_requests(mut self, n: usize) -> Self {
        self.max_requests = n;
        self
    }

    pub fn max_continuations(mut self, n: usize) -> Self {
        self.max_continuations = n;
        self
    }

    pub fn time_slice(mut self, d: Duration) -> Self {
        self.time_slice = d;
        self
    }

    pub fn jbsq_len(mut self, len: usize) -> Self {
        self.jbsq_len = len;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn schedule_method(mut self, method: ScheduleMethod) -> Self {
        self.schedule_method = method;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn dispatcher_work_threshold(mut self, d: Duration) -> Self {
        self.dispatcher_work_threshold = d;
        self
    }

    pub fn slo_ns(mut self, slo: Vec<u64>) -> Self {
        self.slo_ns = slo;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers must be > 0"));
        }
        if self.num_workers > usched_core::constants::MAX_WORKERS {
            return Err(ConfigError::InvalidValue("num_workers exceeds MAX_WORKERS"));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidValue("max_requests must be > 0"));
        }
        if self.max_continuations == 0 {
            return Err(ConfigError::InvalidValue("max_continuations must be > 0"));
        }
        if self.jbsq_len != 1 && self.jbsq_len != 2 {
            return Err(ConfigError::InvalidValue("jbsq_len must be 1 or 2"));
        }
        if self.stack_size < 64 * 1024 {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        if self.slo_ns.len() != usched_core::RequestType::COUNT || self.slo_ns.iter().any(|&s| s == 0) {
            return Err(ConfigError::InvalidValue("slo_ns must have one positive entry per request type"));
        }
        Ok(())
    }

    pub fn print(&self) {
        eprintln!("usched dispatcher configuration:");
        eprintln!("  num_workers:         {}", self.num_workers);
        eprintln!("  max_requests:        {}", self.max_requests);
        eprintln!("  max_continuations:   {}", self.max_continuations);
        eprintln!("  time_slice:          {:?}", self.time_slice);
        eprintln!("  jbsq_len:            {}", self.jbsq_len);
        eprintln!("  stack_size:          {}", self.stack_size);
        eprintln!("  schedule_method:     {}", self.schedule_method);
        eprintln!("  debug_logging:       {}", self.debug_logging);
        eprintln!("  idle_spins:          {}", self.idle_spins);
        eprintln!("  park_timeout:        {:?}", self.park_timeout);
        eprintln!("  dispatcher_work_threshold: {:?}", self.dispatcher_work_threshold);
        eprintln!("  slo_ns:              {:?}", self.slo_ns);
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        let config = DispatcherConfig::from_env();
        assert!(config.num_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DispatcherConfig::new()
            .num_workers(8)
            .time_slice(Duration::from_micros(10))
            .schedule_method(ScheduleMethod::None);

        assert_eq!(config.num_workers, 8);
        assert_eq!(config.time_slice, Duration::from_micros(10));
        assert_eq!(config.schedule_method, ScheduleMethod::None);
    }

    #[test]
    fn test_validation() {
        let config = DispatcherConfig::new().num_workers(0);
        assert!(config.validate().is_err());

        let config = DispatcherConfig::new().jbsq_len(3);
        assert!(config.validate().is_err());
    }
}
