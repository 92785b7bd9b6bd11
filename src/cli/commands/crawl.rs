//! Direct crawl command: run a named job without the queue.

use anyhow::bail;
use console::style;

use crate::aggregate;
use crate::config::Settings;
use crate::registry::JobRegistry;

/// Run every task of a named job sequentially and aggregate the outputs.
pub async fn cmd_crawl(
    settings: Settings,
    registry: JobRegistry,
    name: &str,
) -> anyhow::Result<()> {
    let Some(tasks) = registry.job(name) else {
        bail!("unknown job '{}'; run `context-crawler jobs` to list them", name);
    };

    println!(
        "{} Running job '{}' ({} task(s))",
        style("→").cyan(),
        name,
        tasks.len()
    );

    let written =
        aggregate::run_direct_job(&settings.root, name, tasks, registry.global).await?;

    match written {
        Some(path) => {
            println!("{} Output written to {}", style("✓").green(), path.display());
            Ok(())
        }
        None => {
            bail!("no task of job '{}' produced output", name);
        }
    }
}
