use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use std::thread;
use std::time::{Duration, Instant};

use actq_core::{
    DequeueResult, EnqueueResult, Key, Outcome, Priority, Scheduler, SchedulerConfig,
    prometheus::render_stats,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let run_seconds = 5u64;
    let worker_count = 4usize;
    let background_keys = 40u64;

    let scheduler = match Scheduler::new(SchedulerConfig::bounded(worker_count)) {
        Ok(scheduler) => Arc::new(scheduler),
        Err(err) => {
            eprintln!("invalid config: {err}");
            return;
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let produced_total = Arc::new(AtomicU64::new(0));
    let focused_served = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::new();

    let focused = Key::from("focused");
    handles.push(spawn_producer(
        Arc::clone(&scheduler),
        Arc::clone(&running),
        Arc::clone(&produced_total),
        focused.clone(),
        Priority::Highest,
        1,
    ));

    for idx in 0..background_keys {
        let priority = if idx % 2 == 0 {
            Priority::Low
        } else {
            Priority::Lowest
        };
        handles.push(spawn_producer(
            Arc::clone(&scheduler),
            Arc::clone(&running),
            Arc::clone(&produced_total),
            Key::from(format!("background-{idx:02}")),
            priority,
            25,
        ));
    }

    for _ in 0..worker_count {
        handles.push(spawn_worker(
            Arc::clone(&scheduler),
            focused.clone(),
            Arc::clone(&focused_served),
        ));
    }

    println!(
        "bench: focused key vs {} background keys ({} workers, {}s)",
        background_keys, worker_count, run_seconds
    );
    let start = Instant::now();
    thread::sleep(Duration::from_secs(run_seconds));
    let elapsed = start.elapsed().as_secs_f64();

    running.store(false, Ordering::Relaxed);
    let dropped = scheduler.close().len();
    info!(dropped, "closed scheduler");

    let panicked = join_threads(handles);
    if panicked > 0 {
        error!(panicked, "bench threads panicked; discarding results");
        std::process::exit(1);
    }

    let stats = scheduler.stats();
    let avg_queue_time_ms = if stats.queue_time_samples > 0 {
        let avg_ns = stats.queue_time_sum_ns as f64 / stats.queue_time_samples as f64;
        avg_ns / 1_000_000.0
    } else {
        0.0
    };
    let throughput = if elapsed > 0.0 {
        stats.dispatched as f64 / elapsed
    } else {
        0.0
    };

    println!(
        "stats: enq={} dispatched={} succeeded={} cancelled={} queued={}",
        stats.enqueued, stats.dispatched, stats.succeeded, stats.cancelled, stats.queued
    );
    println!(
        "derived: throughput={:.1} ops/s avg_queue_time_ms={:.3} p99_queue_time_ms={:.3}",
        throughput,
        avg_queue_time_ms,
        stats.queue_time_p99_ns as f64 / 1_000_000.0
    );
    println!(
        "produced_total={} focused_served={} dropped_on_close={}",
        produced_total.load(Ordering::Relaxed),
        focused_served.load(Ordering::Relaxed),
        dropped
    );
    print!("{}", render_stats(&stats, "actq_bench"));
}

fn spawn_producer(
    scheduler: Arc<Scheduler<u64>>,
    running: Arc<AtomicBool>,
    produced_total: Arc<AtomicU64>,
    key: Key,
    priority: Priority,
    interval_ms: u64,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut seq = 0u64;
        while running.load(Ordering::Relaxed) {
            seq += 1;
            match scheduler.enqueue(key.clone(), priority, "step", seq) {
                EnqueueResult::Enqueued { .. } => {
                    produced_total.fetch_add(1, Ordering::Relaxed);
                }
                EnqueueResult::Closed(_) => break,
            }
            if interval_ms > 0 {
                thread::sleep(Duration::from_millis(interval_ms));
            }
        }
    })
}

fn spawn_worker(
    scheduler: Arc<Scheduler<u64>>,
    focused: Key,
    focused_served: Arc<AtomicU64>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        loop {
            match scheduler.dequeue_blocking_timeout(Duration::from_millis(50)) {
                DequeueResult::Dispatched(dispatch) => {
                    if dispatch.entry.key == focused {
                        focused_served.fetch_add(1, Ordering::Relaxed);
                    }
                    scheduler.complete(dispatch.ticket, Outcome::Succeeded);
                }
                DequeueResult::Closed => break,
                DequeueResult::Saturated | DequeueResult::Empty => {}
            }
        }
    })
}

/// Joins every thread and returns how many of them panicked.
fn join_threads(handles: Vec<thread::JoinHandle<()>>) -> usize {
    handles
        .into_iter()
        .map(|handle| handle.join())
        .filter(Result::is_err)
        .count()
}
