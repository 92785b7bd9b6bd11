//! Submission path shared by the HTTP façade and the CLI.
//!
//! A submission validates first, then creates the job record, then enqueues.
//! Validation failures leave no side effects, and a failed enqueue rolls the
//! job record back so a visible queue entry always has a record behind it.

use tracing::debug;
use uuid::Uuid;

use crate::crawler::hooks;
use crate::models::{QueuePayload, TaskConfig};
use crate::store::{JobStore, QueueStore, StoreError};

/// Queue-level retry budget for submitted tasks.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Job name used for ad-hoc single-config submissions.
pub const ADHOC_JOB_NAME: &str = "custom";

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validate a task beyond its declarative shape (hook names need the
/// compiled-in registry, which the model layer cannot see).
pub fn validate_task(task: &TaskConfig) -> Result<(), SubmitError> {
    task.validate().map_err(SubmitError::Validation)?;
    if let Some(hook) = &task.on_visit_page {
        if !hooks::is_known(hook) {
            return Err(SubmitError::Validation(format!(
                "unknown onVisitPage hook '{}'",
                hook
            )));
        }
    }
    Ok(())
}

/// Submit one task: mint an id, persist the job record, enqueue.
pub fn submit_task(
    queue: &QueueStore,
    jobs: &JobStore,
    job_name: &str,
    task: &TaskConfig,
    priority: i64,
) -> Result<Uuid, SubmitError> {
    validate_task(task)?;

    let job_id = Uuid::new_v4();
    let payload = serde_json::to_string(&QueuePayload {
        job_name: job_name.to_string(),
        task: task.clone(),
    })
    .map_err(StoreError::from)?;
    let config = serde_json::to_string(task).map_err(StoreError::from)?;

    jobs.create(job_id, &config)?;
    if let Err(e) = queue.add(job_id, &payload, priority, DEFAULT_MAX_ATTEMPTS) {
        // Keep the stores consistent: no queue entry, no job record.
        let _ = jobs.delete(job_id);
        return Err(e.into());
    }

    debug!(%job_id, job = job_name, task = %task.name, "task enqueued");
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use tempfile::tempdir;

    fn task() -> TaskConfig {
        serde_json::from_value(serde_json::json!({
            "name": "docs",
            "entry": "https://example.test/docs",
            "match": "https://example.test/docs/**",
            "selector": "main"
        }))
        .unwrap()
    }

    fn stores(dir: &tempfile::TempDir) -> (QueueStore, JobStore) {
        (
            QueueStore::open(&dir.path().join("queue.db")).unwrap(),
            JobStore::open(&dir.path().join("jobs.db")).unwrap(),
        )
    }

    #[test]
    fn submit_creates_record_and_queue_entry() {
        let dir = tempdir().unwrap();
        let (queue, jobs) = stores(&dir);

        let job_id = submit_task(&queue, &jobs, "alpha", &task(), 0).unwrap();

        let record = jobs.get(job_id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Pending);

        let entry = queue.claim_next_job().unwrap().unwrap();
        assert_eq!(entry.job_id, job_id);
        let payload: QueuePayload = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(payload.job_name, "alpha");
        assert_eq!(payload.task.name, "docs");
    }

    #[test]
    fn invalid_task_leaves_no_side_effects() {
        let dir = tempdir().unwrap();
        let (queue, jobs) = stores(&dir);

        let mut bad = task();
        bad.entry = "ftp://example.test/".to_string();
        assert!(matches!(
            submit_task(&queue, &jobs, "alpha", &bad, 0),
            Err(SubmitError::Validation(_))
        ));

        assert!(jobs.list().unwrap().is_empty());
        assert_eq!(queue.get_stats().unwrap().total(), 0);
    }

    #[test]
    fn unknown_hook_is_a_validation_error() {
        let dir = tempdir().unwrap();
        let (queue, jobs) = stores(&dir);

        let mut bad = task();
        bad.on_visit_page = Some("no-such-hook".to_string());
        let err = submit_task(&queue, &jobs, "alpha", &bad, 0).unwrap_err();
        assert!(err.to_string().contains("no-such-hook"));
        assert!(jobs.list().unwrap().is_empty());
    }

    #[test]
    fn known_hook_passes_validation() {
        let mut ok = task();
        ok.on_visit_page = Some("meta-description".to_string());
        assert!(validate_task(&ok).is_ok());
    }
}
