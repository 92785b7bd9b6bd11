//! Worker pool command.

use console::style;

use crate::config::Settings;
use crate::registry::JobRegistry;
use crate::worker::WorkerPool;

/// Run the worker pool until a shutdown signal arrives.
pub async fn cmd_worker(settings: Settings, registry: JobRegistry) -> anyhow::Result<()> {
    println!(
        "{} Starting worker pool ({} slot(s), polling every {}ms)",
        style("→").cyan(),
        settings.worker_concurrency,
        settings.poll_interval_ms
    );
    println!("  Press Ctrl+C to stop");

    let pool = WorkerPool::new(settings, registry.global)?;
    pool.run().await
}
