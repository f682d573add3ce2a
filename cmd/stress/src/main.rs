//! Stress test: many in-flight requests against a multi-worker JBSQ=2
//! runtime.
//!
//! Drives scenario S5: 4 workers, J=2, a uniform 10us service time, and a
//! closed-loop load generator that keeps a bounded number of requests
//! in flight rather than dumping the whole count in at once — this is what
//! keeps per-worker occupancy around the JBSQ depth instead of needing a
//! request/continuation pool sized for the entire run.
//!
//! This binary measures throughput and completion correctness only. The
//! occupancy-never-exceeds-2 and no-stall invariants S5 describes are
//! dispatcher-internal properties (`worker_state`, `IdleWorkerList` are
//! private to the crate) and are covered by the scheduler's own unit tests,
//! not observable from outside the crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use usched::{DispatcherConfig, Request, RequestType, Runtime, ScheduleMethod};

/// Max requests allowed in flight at once, i.e. submitted but not yet
/// completed. Comfortably above `num_workers * jbsq_len` so workers never
/// starve waiting on the load generator, but far below the total request
/// count so the request/continuation pools stay small.
const WINDOW: usize = 128;

fn main() {
    println!("=== usched Stress Test (S5: 4 workers, J=2, 10us uniform) ===\n");

    let num_requests: usize =
        std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(100_000);

    println!("Requests: {num_requests}");
    println!("Window:   {WINDOW} in flight\n");

    let iters_per_us = calibrate_iters_per_us();
    let busy_iters = (10.0 * iters_per_us) as u64;

    let runtime = Runtime::new(
        DispatcherConfig::new()
            .num_workers(4)
            .jbsq_len(2)
            .max_requests(WINDOW * 4)
            .max_continuations(WINDOW * 4)
            .schedule_method(ScheduleMethod::None),
    );

    let (tx, rx) = mpsc::channel();
    let inflight = Arc::new(AtomicU64::new(0));
    let completed = Arc::new(AtomicU64::new(0));

    let start = Instant::now();

    for i in 0..num_requests {
        while inflight.load(Ordering::Relaxed) as usize >= WINDOW {
            drain_available(&rx, &inflight, &completed);
            if inflight.load(Ordering::Relaxed) as usize >= WINDOW {
                std::thread::yield_now();
            }
        }

        inflight.fetch_add(1, Ordering::Relaxed);
        runtime
            .submit(Request {
                request_type: RequestType::Put,
                key: format!("stress-{i}").into_bytes(),
                value: b"v".to_vec(),
                busy_iters,
                reply: Some(tx.clone()),
            })
            .expect("runtime accepted request");

        if (i + 1) % 10_000 == 0 {
            print!("\rSubmitted: {}/{}", i + 1, num_requests);
        }
    }
    drop(tx);

    let submit_time = start.elapsed();
    println!("\n\nSubmit time: {:?}", submit_time);

    println!("Waiting for completion...");
    let wait_start = Instant::now();
    loop {
        let done = completed.load(Ordering::Relaxed) as usize;
        if done >= num_requests {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(_) => {
                completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) if wait_start.elapsed().as_secs() > 60 => {
                println!("Timeout! Only {done}/{num_requests} completed");
                break;
            }
            Err(_) => {}
        }
        if done > 0 && done % 10_000 == 0 {
            print!("\rCompleted: {done}/{num_requests}");
        }
    }

    let total_time = start.elapsed();
    let done = completed.load(Ordering::Relaxed);

    println!("\n\n=== Results ===");
    println!("Total requests: {num_requests}");
    println!("Completed:      {done}");
    println!("Submit time:    {:?}", submit_time);
    println!("Total time:     {:?}", total_time);
    println!(
        "Throughput:     {:.0} requests/sec",
        num_requests as f64 / total_time.as_secs_f64()
    );

    drop(runtime);
    println!("\n=== Stress Test Complete ===");
}

fn drain_available(
    rx: &mpsc::Receiver<usched::Response>,
    inflight: &Arc<AtomicU64>,
    completed: &Arc<AtomicU64>,
) {
    while rx.try_recv().is_ok() {
        inflight.fetch_sub(1, Ordering::Relaxed);
        completed.fetch_add(1, Ordering::Relaxed);
    }
}

fn calibrate_iters_per_us() -> f64 {
    let iters: u64 = 5_000_000;
    let start = Instant::now();
    let mut acc: u64 = 0;
    for i in 0..iters {
        acc = acc.wrapping_add(i).wrapping_mul(2654435761);
    }
    std::hint::black_box(acc);
    let elapsed = start.elapsed().as_micros().max(1) as f64;
    iters as f64 / elapsed
}
