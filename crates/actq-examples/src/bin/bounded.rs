use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actq_async::prometheus::render_stats;
use actq_async::{ActionSchedulerBuilder, Priority, SchedulerConfig, executor_fn};
use futures_util::future::join_all;
use tracing::info;
use tracing_subscriber::EnvFilter;

// Bounded remote API: at most 4 concurrent requests shared by a dashboard.
// Each panel is a key; within the "sales" panel the column the user sorts by
// is boosted ahead of the other columns.

#[derive(Clone, Copy, Debug)]
struct Request {
    panel: &'static str,
    cost_ms: u64,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig {
        per_key_limit: 2,
        ..SchedulerConfig::bounded(4)
    };

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        executor_fn(move |operation: String, request: Request| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(request.cost_ms)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                if operation == "export" {
                    return Err(format!("{}: export not permitted", request.panel));
                }
                Ok(format!("{}.{operation}", request.panel))
            }
        })
    };

    let scheduler = ActionSchedulerBuilder::new().config(config).build(executor)?;
    info!(limit = scheduler.in_flight_limit(), "remote API scheduler ready");

    let mut pending = Vec::new();
    for (panel, priority) in [
        ("sales", Priority::High),
        ("inventory", Priority::Medium),
        ("audit", Priority::Lowest),
    ] {
        for op in ["fetch", "aggregate", "chart"] {
            pending.push(scheduler.enqueue(panel, priority, op, Request { panel, cost_ms: 40 }));
        }
    }
    for column in ["region", "revenue", "margin"] {
        for page in 1..=3 {
            pending.push(scheduler.enqueue_sub_key(
                "sales",
                column,
                Priority::High,
                format!("{column}.page{page}"),
                Request {
                    panel: "sales",
                    cost_ms: 25,
                },
            ));
        }
    }
    pending.push(scheduler.enqueue(
        "audit",
        Priority::Lowest,
        "export",
        Request {
            panel: "audit",
            cost_ms: 10,
        },
    ));

    // The user sorts by revenue.
    scheduler.boost_sub_key("sales", "revenue", true);
    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.mark_inactive("inventory");

    for result in join_all(pending).await {
        match result {
            Ok(done) => info!(%done, "request finished"),
            Err(err) => info!(%err, "request failed"),
        }
    }
    scheduler.drain().await;

    info!(
        peak = peak.load(Ordering::SeqCst),
        limit = scheduler.in_flight_limit(),
        "peak concurrency"
    );
    for snapshot in scheduler.keys() {
        info!(key = %snapshot.key, weight = %snapshot.weight, retained = snapshot.retained, "key");
    }
    print!("{}", render_stats(&scheduler.stats(), "dashboard"));
    Ok(())
}
