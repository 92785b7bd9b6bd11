//! Polling worker pool with adaptive backoff and bounded concurrency.
//!
//! One polling loop claims entries and dispatches them onto tokio tasks,
//! bounded by a semaphore. Shutdown signals stop the polling and drain the
//! in-flight tasks to completion; nothing is cancelled mid-crawl.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::models::{GlobalConfig, JobStatus, QueueEntry, QueuePayload, StatusUpdate};
use crate::runner::TaskRunner;
use crate::store::{JobStore, QueueStore};

/// Terminal rows older than this are purged at worker start.
const CLEANUP_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

pub struct WorkerPool {
    settings: Settings,
    global: GlobalConfig,
    queue: Arc<QueueStore>,
    jobs: Arc<JobStore>,
}

impl WorkerPool {
    pub fn new(settings: Settings, global: GlobalConfig) -> Result<Self> {
        let queue = Arc::new(
            QueueStore::open(&settings.queue_db_path()).context("failed to open queue store")?,
        );
        let jobs = Arc::new(
            JobStore::open(&settings.jobs_db_path()).context("failed to open job store")?,
        );
        Ok(Self {
            settings,
            global,
            queue,
            jobs,
        })
    }

    /// Run until a shutdown signal arrives, then drain active tasks.
    pub async fn run(&self) -> Result<()> {
        self.recover_on_startup()?;

        let concurrency = self.settings.worker_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut interval = self.settings.poll_interval_ms;

        info!(concurrency, "worker pool started");

        #[cfg(unix)]
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        loop {
            #[cfg(unix)]
            let terminate = sigterm.recv();
            #[cfg(not(unix))]
            let terminate = std::future::pending::<Option<()>>();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, stopping poll loop");
                    break;
                }
                _ = terminate => {
                    info!("received SIGTERM, stopping poll loop");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(interval)) => {
                    while tasks.try_join_next().is_some() {}
                    let claimed = self.claim_cycle(&semaphore, &mut tasks).await;
                    interval = next_interval(
                        interval,
                        claimed,
                        self.settings.poll_interval_ms,
                        self.settings.max_poll_interval_ms,
                    );
                }
            }
        }

        let active = concurrency - semaphore.available_permits();
        if active > 0 {
            info!(active, "draining in-flight tasks before shutdown");
        }
        while tasks.join_next().await.is_some() {}
        info!("worker pool stopped");
        Ok(())
    }

    /// Startup recovery: reclaim stuck rows, drop stale terminal rows.
    fn recover_on_startup(&self) -> Result<()> {
        let reset = self
            .queue
            .reset_stuck_jobs(self.settings.job_timeout_ms)
            .context("failed to reset stuck jobs")?;
        if reset > 0 {
            warn!(reset, "reclaimed stuck queue entries");
        }

        let removed = self
            .queue
            .cleanup_old_jobs(CLEANUP_AGE_MS)
            .context("failed to clean up old jobs")?;
        if removed > 0 {
            info!(removed, "removed aged-out terminal entries");
        }

        let stats = self.queue.get_stats().context("failed to read queue stats")?;
        info!(
            pending = stats.pending,
            claimed = stats.claimed,
            completed = stats.completed,
            failed = stats.failed,
            "queue state at startup"
        );
        Ok(())
    }

    /// Claim as many entries as open capacity allows. Returns whether any
    /// entry was claimed this cycle.
    async fn claim_cycle(&self, semaphore: &Arc<Semaphore>, tasks: &mut JoinSet<()>) -> bool {
        let mut claimed_any = false;
        loop {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            match self.queue.claim_next_job() {
                Ok(Some(entry)) => {
                    claimed_any = true;
                    let queue = self.queue.clone();
                    let jobs = self.jobs.clone();
                    let root = self.settings.root.clone();
                    let backoff = self.settings.backoff_delay_ms;
                    let global = self.global;
                    tasks.spawn(async move {
                        execute_entry(queue, jobs, root, backoff, global, entry, permit).await;
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    error!("queue claim failed: {}", e);
                    break;
                }
            }
        }
        claimed_any
    }
}

/// Execute one claimed entry through the task runner and record the outcome.
async fn execute_entry(
    queue: Arc<QueueStore>,
    jobs: Arc<JobStore>,
    root: std::path::PathBuf,
    backoff_delay_ms: u64,
    global: GlobalConfig,
    entry: QueueEntry,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;

    if let Err(e) = jobs.update_status(entry.job_id, JobStatus::Running, StatusUpdate::default()) {
        warn!(job_id = %entry.job_id, "failed to mark job running: {}", e);
    }

    let payload: QueuePayload = match serde_json::from_str(&entry.payload) {
        Ok(payload) => payload,
        Err(e) => {
            // A payload that cannot parse will never succeed; fail terminally.
            let message = format!("invalid queue payload: {}", e);
            error!(job_id = %entry.job_id, "{}", message);
            let _ = queue.mark_failed(entry.queue_id, &message, false, 0);
            let _ = jobs.update_status(
                entry.job_id,
                JobStatus::Failed,
                StatusUpdate {
                    error: Some(message),
                    ..StatusUpdate::completed_now()
                },
            );
            return;
        }
    };

    info!(
        job_id = %entry.job_id,
        job = %payload.job_name,
        task = %payload.task.name,
        attempt = entry.attempts,
        "executing task"
    );

    let runner = TaskRunner::new(root, payload.job_name, payload.task, global);
    let outcome = runner.run().await;

    if outcome.success {
        if let Err(e) = queue.mark_completed(entry.queue_id) {
            error!(job_id = %entry.job_id, "failed to mark queue entry completed: {}", e);
        }
        let output_file = outcome
            .output_file
            .map(|p| p.to_string_lossy().into_owned());
        if let Err(e) = jobs.update_status(
            entry.job_id,
            JobStatus::Completed,
            StatusUpdate {
                output_file,
                ..StatusUpdate::completed_now()
            },
        ) {
            error!(job_id = %entry.job_id, "failed to mark job completed: {}", e);
        }
        match queue.clear_completed_jobs() {
            Ok(removed) if removed > 0 => {
                info!(removed, "cleared terminal queue entries");
            }
            Ok(_) => {}
            Err(e) => warn!("opportunistic queue cleanup failed: {}", e),
        }
        return;
    }

    let error_message = outcome.error.unwrap_or_else(|| "task failed".to_string());
    let should_retry = entry.attempts < entry.max_attempts;
    let backoff = jittered_backoff(backoff_delay_ms);

    let final_status = queue.mark_failed(entry.queue_id, &error_message, should_retry, backoff);
    match final_status {
        Ok(status) if status.is_terminal() => {
            warn!(
                job_id = %entry.job_id,
                attempts = entry.attempts,
                "task failed permanently: {}", error_message
            );
            let _ = jobs.update_status(
                entry.job_id,
                JobStatus::Failed,
                StatusUpdate {
                    error: Some(error_message),
                    ..StatusUpdate::completed_now()
                },
            );
        }
        Ok(_) => {
            info!(
                job_id = %entry.job_id,
                attempts = entry.attempts,
                "task failed, retry scheduled: {}", error_message
            );
            let _ = jobs.update_status(entry.job_id, JobStatus::Pending, StatusUpdate::default());
        }
        Err(e) => error!(job_id = %entry.job_id, "failed to record task failure: {}", e),
    }
}

/// Jitter the retry base to avoid a thundering herd; the queue applies the
/// exponential factor on top.
fn jittered_backoff(base_ms: u64) -> u64 {
    let factor = 0.5 + rand::random::<f64>() * 0.5;
    (base_ms as f64 * factor) as u64
}

/// Adaptive poll interval: reset on work, grow by half when idle.
fn next_interval(current: u64, claimed: bool, base: u64, max: u64) -> u64 {
    if claimed {
        base
    } else {
        (current + current / 2).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_resets_after_a_claim() {
        assert_eq!(next_interval(9_000, true, 1_000, 10_000), 1_000);
    }

    #[test]
    fn interval_grows_by_half_up_to_the_cap() {
        assert_eq!(next_interval(1_000, false, 1_000, 10_000), 1_500);
        assert_eq!(next_interval(1_500, false, 1_000, 10_000), 2_250);
        assert_eq!(next_interval(9_000, false, 1_000, 10_000), 10_000);
        assert_eq!(next_interval(10_000, false, 1_000, 10_000), 10_000);
    }

    #[test]
    fn jitter_stays_within_half_to_full_base() {
        for _ in 0..100 {
            let backoff = jittered_backoff(5_000);
            assert!((2_500..=5_000).contains(&backoff), "got {}", backoff);
        }
    }
}
