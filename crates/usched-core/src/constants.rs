//! Compile-time constants shared by dispatcher, worker and pool code.

/// Cache line size assumed for slot padding (x86_64/aarch64 common case).
pub const CACHE_LINE_SIZE: usize = 64;

/// Static upper bound on worker count (§6 `MAX_WORKERS`).
pub const MAX_WORKERS: usize = 64;

/// Maximum depth of a JBSQ ring. The spec constrains J to {1, 2}; see the
/// "J>2" open question in SPEC_FULL.md — the ring is always allocated at
/// this width and `DispatcherConfig::jbsq_len` selects how much of it is
/// live.
pub const MAX_JBSQ_LEN: usize = 2;

/// Number of distinct request types recognized by the tagged handler table
/// (§9 Design Notes: {Get, Put, Scan, Delete, Seek}).
pub const NUM_REQUEST_TYPES: usize = 5;

/// Sentinel for "no request"/"no continuation" (mirrors the GVThreadId
/// NONE-sentinel idiom).
pub const HANDLE_NONE: u32 = u32::MAX;

/// Default size of the ingress handoff array (`B` in §6).
pub const DEFAULT_INGRESS_BATCH: usize = 64;

/// Default request/continuation pool sizes.
pub const DEFAULT_MAX_REQUESTS: usize = 1 << 16;
pub const DEFAULT_MAX_CONTINUATIONS: usize = 1 << 14;

/// Default per-continuation stack size (usable region, excludes guard page).
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Guard page size appended to every continuation stack slot.
pub const GUARD_SIZE: usize = 4096;
