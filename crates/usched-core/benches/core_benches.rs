//! Microbenchmarks for the dispatcher-private primitives that back the
//! hot path: idle-worker selection, handle pool allocation, and per-type
//! task queue selection. All three run single-threaded on the dispatcher
//! core in production, so wall-clock cost here is dispatcher-tick cost.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use usched_core::idle_list::IdleWorkerList;
use usched_core::pool::FixedPool;
use usched_core::state::TaskCategory;
use usched_core::task_queue::{Task, TaskQueues};
use usched_core::{ContinuationId, RequestId};

fn bench_idle_list_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("idle_list_take_then_push");
    for &num_workers in &[2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(num_workers), &num_workers, |b, &n| {
            let mut list = IdleWorkerList::new(n);
            b.iter(|| {
                let worker = list.take_lowest().unwrap();
                black_box(worker);
                list.push(worker);
            });
        });
    }
    group.finish();
}

fn bench_fixed_pool_allocate_release(c: &mut Criterion) {
    c.bench_function("fixed_pool_allocate_release", |b| {
        let pool: FixedPool<RequestId> = FixedPool::new(1024);
        b.iter(|| {
            let id = pool.allocate().unwrap();
            black_box(id);
            pool.release(id);
        });
    });
}

fn bench_fixed_pool_allocate_release_continuation(c: &mut Criterion) {
    c.bench_function("fixed_pool_allocate_release_continuation", |b| {
        let pool: FixedPool<ContinuationId> = FixedPool::new(1024);
        b.iter(|| {
            let id = pool.allocate().unwrap();
            black_box(id);
            pool.release(id);
        });
    });
}

fn bench_task_queue_select_and_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_and_dequeue");
    for &num_types in &[1usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_types), &num_types, |b, &num_types| {
            let slo = vec![50_000u64; num_types];
            let mut queues = TaskQueues::new(num_types, slo);
            let mut now = 0u64;
            b.iter_batched(
                || {
                    for type_id in 0..num_types {
                        queues.queue_mut(type_id).enqueue_tail(Task {
                            continuation_id: ContinuationId::new(0),
                            request_id: RequestId::new(0),
                            type_id: type_id as u8,
                            category: TaskCategory::Packet,
                            arrival_ts: now,
                        });
                    }
                    now += 1;
                },
                |()| {
                    for _ in 0..num_types {
                        black_box(queues.select_and_dequeue(now));
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_idle_list_cycle,
    bench_fixed_pool_allocate_release,
    bench_fixed_pool_allocate_release_continuation,
    bench_task_queue_select_and_dequeue,
);
criterion_main!(benches);
