//! Registry listing command.

use console::style;

use crate::registry::JobRegistry;

/// Print registered jobs with their task counts.
pub fn cmd_jobs(registry: &JobRegistry) -> anyhow::Result<()> {
    if registry.is_empty() {
        println!(
            "{} No jobs registered. Create a context-crawler.json next to the binary.",
            style("!").yellow()
        );
        return Ok(());
    }

    for (name, tasks) in registry.iter() {
        println!(
            "{} {} ({} task(s))",
            style("•").cyan(),
            style(name).bold(),
            tasks.len()
        );
        for task in tasks {
            println!("    {} -> {}", task.name, task.entry);
        }
    }
    Ok(())
}
