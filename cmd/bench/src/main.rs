//! End-to-end scenario harness for the scheduler.
//!
//! Each scenario stands up its own `Runtime` with the configuration the
//! scenario calls for, drives it, and prints what it measured. None of this
//! asserts pass/fail — the thresholds here are latency-sensitive and
//! machine-dependent, so the numbers are for a human to read.

use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use usched::{DispatcherConfig, Request, RequestType, Response, Runtime, ScheduleMethod};

fn main() {
    println!("=== usched scenario benchmarks ===\n");

    let iters_per_us = calibrate_iters_per_us();
    println!("calibration: {:.1} busy-loop iterations/us on this machine\n", iters_per_us);

    let scenario = std::env::args().nth(1);
    match scenario.as_deref() {
        Some("s1") => s1_baseline(iters_per_us),
        Some("s2") => s2_head_of_line(iters_per_us),
        Some("s3") => s3_posted_ipi(iters_per_us),
        Some("s4") => s4_cooperative_yield(iters_per_us),
        Some("s6") => s6_slo_weighting(),
        Some(other) => eprintln!("unknown scenario: {other} (expected one of s1 s2 s3 s4 s6)"),
        None => {
            s1_baseline(iters_per_us);
            s2_head_of_line(iters_per_us);
            s3_posted_ipi(iters_per_us);
            s4_cooperative_yield(iters_per_us);
            s6_slo_weighting();
        }
    }

    println!("\n=== Benchmarks Complete ===");
}

/// Times the same wrapping-multiply loop `handlers::busy_spin` runs, so
/// `us_to_iters` can convert a desired service time into `busy_iters`
/// without needing to reach into the crate's private handler internals.
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

fn us_to_iters(us: u64, iters_per_us: f64) -> u64 {
    (us as f64 * iters_per_us) as u64
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let idx = (((sorted.len() - 1) as f64) * p).round() as usize;
    sorted[idx]
}

/// S1: one worker, J=1, no preemption, 1000 fixed 1us requests submitted
/// back to back. Expect every one to finish with `ok`, in submission order.
fn s1_baseline(iters_per_us: f64) {
    println!("Scenario S1: baseline (1 worker, J=1, no preempt)");
    println!("{}", "-".repeat(50));

    let mut runtime = Runtime::new(
        DispatcherConfig::new()
            .num_workers(1)
            .jbsq_len(1)
            .max_requests(4096)
            .max_continuations(4096)
            .schedule_method(ScheduleMethod::None),
    );

    let n = 1000;
    let busy_iters = us_to_iters(1, iters_per_us);
    let start = Instant::now();
    let mut finished_ok = 0usize;

    for i in 0..n {
        let req = Request {
            request_type: RequestType::Put,
            key: format!("s1-{i}").into_bytes(),
            value: b"v".to_vec(),
            busy_iters,
            reply: None,
        };
        let resp = runtime.submit_blocking(req).unwrap();
        if resp.ok {
            finished_ok += 1;
        }
    }

    let elapsed = start.elapsed();
    println!("  requests:     {n}");
    println!("  finished ok:  {finished_ok}");
    println!("  total time:   {:?}", elapsed);
    println!("  per request:  {:.1} us\n", elapsed.as_micros() as f64 / n as f64);

    runtime.shutdown();
}

/// Submits `n_short` 1us requests interleaved with `n_long` 100us requests
/// at saturating rate on a single worker and returns the per-request
/// latencies, bucketed by class.
fn run_mixed_latency(
    schedule_method: ScheduleMethod,
    time_slice: Duration,
    iters_per_us: f64,
) -> (Vec<Duration>, Vec<Duration>) {
    let mut runtime = Runtime::new(
        DispatcherConfig::new()
            .num_workers(1)
            .jbsq_len(1)
            .time_slice(time_slice)
            .max_requests(4096)
            .max_continuations(4096)
            .schedule_method(schedule_method),
    );

    let n_short = 300;
    let n_long = 300;
    let short_iters = us_to_iters(1, iters_per_us);
    let long_iters = us_to_iters(100, iters_per_us);

    let mut pending: Vec<(Instant, Receiver<Response>, bool)> = Vec::with_capacity(n_short + n_long);

    for i in 0..(n_short + n_long) {
        let is_short = i % 2 == 0;
        let (tx, rx) = mpsc::channel();
        let req = Request {
            request_type: RequestType::Put,
            key: format!("mix-{i}").into_bytes(),
            value: b"v".to_vec(),
            busy_iters: if is_short { short_iters } else { long_iters },
            reply: Some(tx),
        };
        let submitted_at = Instant::now();
        runtime.submit(req).unwrap();
        pending.push((submitted_at, rx, is_short));
    }

    let mut short_latencies = Vec::with_capacity(n_short);
    let mut long_latencies = Vec::with_capacity(n_long);
    for (submitted_at, rx, is_short) in pending {
        let _ = rx.recv();
        let latency = submitted_at.elapsed();
        if is_short {
            short_latencies.push(latency);
        } else {
            long_latencies.push(latency);
        }
    }

    runtime.shutdown();
    (short_latencies, long_latencies)
}

fn report_mixed_latency(label: &str, mut short: Vec<Duration>, mut long: Vec<Duration>) {
    short.sort();
    long.sort();
    println!("  {label}:");
    println!("    short p50/p99: {:?} / {:?}", percentile(&short, 0.50), percentile(&short, 0.99));
    println!("    long  p50/p99: {:?} / {:?}\n", percentile(&long, 0.50), percentile(&long, 0.99));
}

/// S2: SCHEDULE=NONE, 50/50 mix of 1us/100us requests saturating one
/// worker. Expect the short requests' tail latency to grow with the long
/// requests' service time (head-of-line blocking, no preemption).
fn s2_head_of_line(iters_per_us: f64) {
    println!("Scenario S2: head-of-line (SCHEDULE=NONE)");
    println!("{}", "-".repeat(50));

    let (short, long) = run_mixed_latency(ScheduleMethod::None, Duration::from_micros(5), iters_per_us);
    report_mixed_latency("none", short, long);
}

/// S3: SCHEDULE=POSTED_IPI, TIME_SLICE=5us, same mix as S2. Expect each
/// 100us request to be preempted repeatedly and short-request tail latency
/// bounded by roughly TIME_SLICE plus admission delay.
fn s3_posted_ipi(iters_per_us: f64) {
    println!("Scenario S3: preempt enabled (SCHEDULE=POSTED_IPI, TIME_SLICE=5us)");
    println!("{}", "-".repeat(50));

    let (short, long) =
        run_mixed_latency(ScheduleMethod::PostedIpi, Duration::from_micros(5), iters_per_us);
    report_mixed_latency("posted_ipi", short, long);
}

/// S4: same as S3 but via the cooperative-yield transport. Expect tail
/// behavior within roughly 10% of S3's.
fn s4_cooperative_yield(iters_per_us: f64) {
    println!("Scenario S4: cooperative yield (SCHEDULE=COOPERATIVE_YIELD, TIME_SLICE=5us)");
    println!("{}", "-".repeat(50));

    let (short, long) =
        run_mixed_latency(ScheduleMethod::CooperativeYield, Duration::from_micros(5), iters_per_us);
    report_mixed_latency("cooperative_yield", short, long);
}

/// S6: two request types with SLO ratio 1:10, both saturated on one worker.
/// Expect completion counts over a window to approximate the inverse ratio
/// 10:1 in favor of the tighter SLO.
fn s6_slo_weighting() {
    println!("Scenario S6: SLO weighting (ratio 1:10)");
    println!("{}", "-".repeat(50));

    let slo_ns = vec![1_000, 10_000, 50_000, 50_000, 50_000]; // Get tight, Put loose, rest unused here
    let mut runtime = Runtime::new(
        DispatcherConfig::new()
            .num_workers(1)
            .jbsq_len(1)
            .max_requests(8192)
            .max_continuations(8192)
            .schedule_method(ScheduleMethod::None)
            .slo_ns(slo_ns),
    );

    let batch = 2000;
    let (tight_tx, tight_rx) = mpsc::channel();
    let (loose_tx, loose_rx) = mpsc::channel();

    for i in 0..batch {
        runtime
            .submit(Request {
                request_type: RequestType::Get,
                key: format!("tight-{i}").into_bytes(),
                value: vec![],
                busy_iters: 0,
                reply: Some(tight_tx.clone()),
            })
            .unwrap();
        runtime
            .submit(Request {
                request_type: RequestType::Put,
                key: format!("loose-{i}").into_bytes(),
                value: b"v".to_vec(),
                busy_iters: 0,
                reply: Some(loose_tx.clone()),
            })
            .unwrap();
    }
    drop(tight_tx);
    drop(loose_tx);

    let target = 1000usize;
    let mut tight_count = 0usize;
    let mut loose_count = 0usize;
    while tight_count + loose_count < target {
        let mut progressed = false;
        if tight_rx.try_recv().is_ok() {
            tight_count += 1;
            progressed = true;
        }
        if loose_rx.try_recv().is_ok() {
            loose_count += 1;
            progressed = true;
        }
        if !progressed {
            std::thread::sleep(Duration::from_micros(50));
        }
    }

    println!("  tight-SLO completions: {tight_count}");
    println!("  loose-SLO completions: {loose_count}");
    println!(
        "  ratio (tight/loose):   {:.1} (expect roughly 10.0)\n",
        tight_count as f64 / loose_count.max(1) as f64
    );

    runtime.shutdown();
}
