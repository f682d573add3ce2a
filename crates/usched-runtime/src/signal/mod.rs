//! Platform-specific signal plumbing backing the posted-IPI preemption
//! transport (§4.5(a)).

cfg_if::cfg_if! {
    if #[cfg(all(unix, target_arch = "x86_64"))] {
        mod unix;
        pub use self::unix::*;
    } else if #[cfg(unix)] {
        mod unix_stub;
        pub use unix_stub::*;
    } else {
        compile_error!("the posted-IPI preemption transport requires a unix target");
    }
}
