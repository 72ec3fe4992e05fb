use std::sync::Arc;
use std::time::{Duration, Instant};

use actq_async::{ActionScheduler, Executor, Priority, ScheduleError, SchedulerConfig};
use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// One embedded query engine shared by every open view. Each view is a key;
// the view on screen runs at High, background views at Low or Lowest.

/// Simulated single-connection engine. Every call holds the connection for
/// `latency`, so calls are strictly sequential.
struct EmbeddedEngine {
    connection: Mutex<()>,
    latency: Duration,
    started: Instant,
}

#[async_trait]
impl Executor for EmbeddedEngine {
    type Args = &'static str;
    type Output = String;
    type Error = String;

    async fn execute(&self, operation: &str, view: &'static str) -> Result<String, String> {
        let _connection = self.connection.lock().await;
        let at = self.started.elapsed().as_millis();
        info!(view, operation, at_ms = at as u64, "engine call");
        sleep(self.latency).await;
        Ok(format!("{view}.{operation}"))
    }
}

const OPS: [&str; 3] = ["schema", "rows", "stats"];

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig::from_env()?;
    info!(?config, "loaded scheduler config");

    focus_switch(config.clone()).await?;
    late_promotion(config.clone()).await?;
    close_view(config).await?;
    Ok(())
}

fn engine() -> Arc<EmbeddedEngine> {
    Arc::new(EmbeddedEngine {
        connection: Mutex::new(()),
        latency: Duration::from_millis(100),
        started: Instant::now(),
    })
}

fn settle<O, E: std::fmt::Display>(
    results: Vec<Result<O, ScheduleError<E>>>,
) -> anyhow::Result<usize> {
    let mut ok = 0;
    for result in results {
        match result {
            Ok(_) => ok += 1,
            Err(err) if err.is_cancelled() => {}
            Err(err) => anyhow::bail!("view operation failed: {err}"),
        }
    }
    Ok(ok)
}

/// A background view is loading when the user opens another one.
async fn focus_switch(config: SchedulerConfig) -> anyhow::Result<()> {
    info!("scenario: focus switch");
    let scheduler = ActionScheduler::new(config, engine())?;

    let mut pending: Vec<_> = OPS
        .iter()
        .map(|op| scheduler.enqueue("orders", Priority::Low, *op, "orders"))
        .collect();
    sleep(Duration::from_millis(50)).await;
    pending.extend(
        OPS.iter()
            .map(|op| scheduler.enqueue("customers", Priority::High, *op, "customers")),
    );

    let ok = settle(join_all(pending).await)?;
    info!(ok, "focus switch done");
    Ok(())
}

/// A view queued at Lowest gets focus while another view is loading.
async fn late_promotion(config: SchedulerConfig) -> anyhow::Result<()> {
    info!("scenario: late promotion");
    let scheduler = ActionScheduler::new(config, engine())?;

    let mut pending: Vec<_> = OPS
        .iter()
        .map(|op| scheduler.enqueue("orders", Priority::Low, *op, "orders"))
        .collect();
    sleep(Duration::from_millis(50)).await;
    pending.extend(
        OPS.iter()
            .map(|op| scheduler.enqueue("customers", Priority::Lowest, *op, "customers")),
    );
    sleep(Duration::from_millis(10)).await;
    scheduler.update_priority("customers", Priority::High);

    let ok = settle(join_all(pending).await)?;
    info!(ok, "late promotion done");
    Ok(())
}

/// The user closes a view mid-load and opens a new one.
async fn close_view(config: SchedulerConfig) -> anyhow::Result<()> {
    info!("scenario: close view");
    let scheduler = ActionScheduler::new(config, engine())?;

    let mut pending: Vec<_> = OPS
        .iter()
        .map(|op| scheduler.enqueue("orders", Priority::Low, *op, "orders"))
        .collect();
    pending.extend(
        OPS.iter()
            .map(|op| scheduler.enqueue("archive", Priority::Lowest, *op, "archive")),
    );
    sleep(Duration::from_millis(50)).await;

    let cancelled = scheduler.cancel_key("orders");
    if cancelled > 0 {
        warn!(cancelled, "closed orders view with queued work");
    }
    pending.extend(
        OPS.iter()
            .map(|op| scheduler.enqueue("invoices", Priority::Medium, *op, "invoices")),
    );

    let ok = settle(join_all(pending).await)?;
    scheduler.drain().await;
    let stats = scheduler.stats();
    info!(
        ok,
        cancelled = stats.cancelled,
        succeeded = stats.succeeded,
        p95_queue_ms = stats.queue_time_p95_ns / 1_000_000,
        "close view done"
    );
    Ok(())
}
