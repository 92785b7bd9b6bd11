//! Durable work queue with atomic claims and retry scheduling.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, parse_datetime_opt, Result, StoreError};
use crate::models::{QueueEntry, QueueStats, QueueStatus};

/// SQLite-backed queue. Claims use a single `BEGIN IMMEDIATE` transaction so
/// no two workers can take the same row.
pub struct QueueStore {
    db_path: PathBuf,
}

impl QueueStore {
    /// Open (and if needed create) the queue database.
    pub fn open(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queue_entries (
                queue_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                next_retry_at TEXT,
                claimed_at TEXT,
                completed_at TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_queue_claim
                ON queue_entries(status, next_retry_at);
            CREATE INDEX IF NOT EXISTS idx_queue_created
                ON queue_entries(created_at);
        "#,
        )?;
        Ok(())
    }

    /// Insert a new pending entry. Fails if the job id is already present.
    pub fn add(
        &self,
        job_id: Uuid,
        payload: &str,
        priority: i64,
        max_attempts: u32,
    ) -> Result<i64> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO queue_entries (job_id, status, payload, priority, max_attempts, created_at)
            VALUES (?, 'pending', ?, ?, ?, ?)
            "#,
            params![
                job_id.to_string(),
                payload,
                priority,
                max_attempts,
                Utc::now().to_rfc3339()
            ],
        );

        match inserted {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateJob(job_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically claim the next runnable entry.
    ///
    /// Selects the top pending row whose retry time has passed, ordered by
    /// priority then age, marks it claimed and bumps its attempt counter, all
    /// inside one immediate transaction.
    pub fn claim_next_job(&self) -> Result<Option<QueueEntry>> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<QueueEntry>> = (|| {
            let now = Utc::now();
            let query_result = conn.query_row(
                r#"
                SELECT * FROM queue_entries
                WHERE status = 'pending'
                AND (next_retry_at IS NULL OR next_retry_at <= ?)
                ORDER BY priority DESC, created_at ASC, queue_id ASC
                LIMIT 1
                "#,
                params![now.to_rfc3339()],
                row_to_entry,
            );

            match query_result {
                Ok(mut entry) => {
                    conn.execute(
                        r#"
                        UPDATE queue_entries
                        SET status = 'claimed', claimed_at = ?, attempts = attempts + 1
                        WHERE queue_id = ?
                        "#,
                        params![now.to_rfc3339(), entry.queue_id],
                    )?;
                    entry.status = QueueStatus::Claimed;
                    entry.claimed_at = Some(now);
                    entry.attempts += 1;
                    Ok(Some(entry))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Mark an entry as successfully completed (terminal).
    pub fn mark_completed(&self, queue_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE queue_entries SET status = 'completed', completed_at = ? WHERE queue_id = ?",
            params![Utc::now().to_rfc3339(), queue_id],
        )?;
        Ok(())
    }

    /// Record a failure, scheduling a retry when the budget allows.
    ///
    /// The retry delay is `backoff_ms * 2^(attempts - 1)`; callers jitter the
    /// base before passing it in. Returns the entry's resulting status.
    pub fn mark_failed(
        &self,
        queue_id: i64,
        error: &str,
        should_retry: bool,
        backoff_ms: u64,
    ) -> Result<QueueStatus> {
        let conn = self.connect()?;

        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<QueueStatus> = (|| {
            let (attempts, max_attempts): (u32, u32) = conn.query_row(
                "SELECT attempts, max_attempts FROM queue_entries WHERE queue_id = ?",
                params![queue_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let now = Utc::now();
            if should_retry && attempts < max_attempts {
                let exponent = attempts.saturating_sub(1).min(20);
                let delay_ms = backoff_ms.saturating_mul(1u64 << exponent);
                let next_retry = now + Duration::milliseconds(delay_ms as i64);
                conn.execute(
                    r#"
                    UPDATE queue_entries
                    SET status = 'pending', next_retry_at = ?, error = ?
                    WHERE queue_id = ?
                    "#,
                    params![next_retry.to_rfc3339(), error, queue_id],
                )?;
                Ok(QueueStatus::Pending)
            } else {
                conn.execute(
                    r#"
                    UPDATE queue_entries
                    SET status = 'failed', completed_at = ?, error = ?
                    WHERE queue_id = ?
                    "#,
                    params![now.to_rfc3339(), error, queue_id],
                )?;
                Ok(QueueStatus::Failed)
            }
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    /// Revert claims older than `timeout_ms` back to pending.
    ///
    /// Attempt counters are left untouched; the claim was never observed to
    /// finish. Returns the number of reset rows.
    pub fn reset_stuck_jobs(&self, timeout_ms: u64) -> Result<usize> {
        let conn = self.connect()?;
        let cutoff = Utc::now() - Duration::milliseconds(timeout_ms as i64);
        let reset = conn.execute(
            r#"
            UPDATE queue_entries
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'claimed' AND claimed_at < ?
            "#,
            params![cutoff.to_rfc3339()],
        )?;
        Ok(reset)
    }

    /// Delete terminal rows older than `age_ms`. Returns the number removed.
    pub fn cleanup_old_jobs(&self, age_ms: u64) -> Result<usize> {
        let conn = self.connect()?;
        let cutoff = Utc::now() - Duration::milliseconds(age_ms as i64);
        let removed = conn.execute(
            r#"
            DELETE FROM queue_entries
            WHERE status IN ('completed', 'failed') AND created_at < ?
            "#,
            params![cutoff.to_rfc3339()],
        )?;
        Ok(removed)
    }

    /// Delete all terminal rows regardless of age. Returns the number removed.
    pub fn clear_completed_jobs(&self) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM queue_entries WHERE status IN ('completed', 'failed')",
            [],
        )?;
        Ok(removed)
    }

    /// Entry counts by status.
    pub fn get_stats(&self) -> Result<QueueStats> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM queue_entries GROUP BY status")?;
        let mut stats = QueueStats::default();
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            Ok((status, count))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => stats.pending = count,
                "claimed" => stats.claimed = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Fetch one entry by its queue id.
    pub fn get(&self, queue_id: i64) -> Result<Option<QueueEntry>> {
        let conn = self.connect()?;
        match conn.query_row(
            "SELECT * FROM queue_entries WHERE queue_id = ?",
            params![queue_id],
            row_to_entry,
        ) {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    let job_id: String = row.get("job_id")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(QueueEntry {
        queue_id: row.get("queue_id")?,
        job_id: Uuid::parse_str(&job_id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Failed),
        payload: row.get("payload")?,
        priority: row.get("priority")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        next_retry_at: parse_datetime_opt(row.get("next_retry_at")?),
        claimed_at: parse_datetime_opt(row.get("claimed_at")?),
        completed_at: parse_datetime_opt(row.get("completed_at")?),
        error: row.get("error")?,
        created_at: parse_datetime(&created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_queue(dir: &tempfile::TempDir) -> QueueStore {
        QueueStore::open(&dir.path().join("queue.db")).unwrap()
    }

    #[test]
    fn add_claim_complete_lifecycle() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let job_id = Uuid::new_v4();
        queue.add(job_id, "{}", 0, 3).unwrap();

        let entry = queue.claim_next_job().unwrap().unwrap();
        assert_eq!(entry.job_id, job_id);
        assert_eq!(entry.status, QueueStatus::Claimed);
        assert_eq!(entry.attempts, 1);
        assert!(entry.claimed_at.is_some());

        // Nothing else to claim while the row is held.
        assert!(queue.claim_next_job().unwrap().is_none());

        queue.mark_completed(entry.queue_id).unwrap();
        let done = queue.get(entry.queue_id).unwrap().unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn duplicate_job_id_is_rejected() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let job_id = Uuid::new_v4();
        queue.add(job_id, "{}", 0, 3).unwrap();
        assert!(matches!(
            queue.add(job_id, "{}", 0, 3),
            Err(StoreError::DuplicateJob(id)) if id == job_id
        ));
    }

    #[test]
    fn higher_priority_claims_first() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.add(low, "{}", 0, 3).unwrap();
        queue.add(high, "{}", 5, 3).unwrap();

        let first = queue.claim_next_job().unwrap().unwrap();
        assert_eq!(first.job_id, high);
        let second = queue.claim_next_job().unwrap().unwrap();
        assert_eq!(second.job_id, low);
    }

    #[test]
    fn failed_with_retry_budget_goes_back_to_pending_with_delay() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        queue.add(Uuid::new_v4(), "{}", 0, 3).unwrap();

        let entry = queue.claim_next_job().unwrap().unwrap();
        let status = queue
            .mark_failed(entry.queue_id, "boom", true, 5_000)
            .unwrap();
        assert_eq!(status, QueueStatus::Pending);

        let row = queue.get(entry.queue_id).unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Pending);
        assert_eq!(row.error.as_deref(), Some("boom"));
        // attempts = 1, so delay is the plain base.
        let delay = row.next_retry_at.unwrap() - Utc::now();
        assert!(delay.num_milliseconds() > 3_000 && delay.num_milliseconds() <= 5_100);

        // Not claimable until the retry time passes.
        assert!(queue.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn retry_delay_doubles_with_attempts() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        queue.add(Uuid::new_v4(), "{}", 0, 5).unwrap();

        let entry = queue.claim_next_job().unwrap().unwrap();
        // Force a second claim by making the retry immediately available.
        queue.mark_failed(entry.queue_id, "first", true, 0).unwrap();
        let entry = queue.claim_next_job().unwrap().unwrap();
        assert_eq!(entry.attempts, 2);

        queue
            .mark_failed(entry.queue_id, "second", true, 5_000)
            .unwrap();
        let row = queue.get(entry.queue_id).unwrap().unwrap();
        // attempts = 2 -> backoff * 2
        let delay = row.next_retry_at.unwrap() - Utc::now();
        assert!(delay.num_milliseconds() > 8_000 && delay.num_milliseconds() <= 10_100);
    }

    #[test]
    fn exhausted_attempts_become_terminal_failed() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        queue.add(Uuid::new_v4(), "{}", 0, 1).unwrap();

        let entry = queue.claim_next_job().unwrap().unwrap();
        let status = queue
            .mark_failed(entry.queue_id, "fatal", true, 5_000)
            .unwrap();
        assert_eq!(status, QueueStatus::Failed);

        let row = queue.get(entry.queue_id).unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Failed);
        assert!(row.completed_at.is_some());
        assert_eq!(row.error.as_deref(), Some("fatal"));
    }

    #[test]
    fn reset_stuck_jobs_reverts_old_claims_only() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        queue.add(Uuid::new_v4(), "{}", 0, 3).unwrap();
        let entry = queue.claim_next_job().unwrap().unwrap();

        // A fresh claim is not stuck.
        assert_eq!(queue.reset_stuck_jobs(60_000).unwrap(), 0);
        // With a zero timeout every claim is stale.
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(queue.reset_stuck_jobs(0).unwrap(), 1);

        let row = queue.get(entry.queue_id).unwrap().unwrap();
        assert_eq!(row.status, QueueStatus::Pending);
        assert!(row.claimed_at.is_none());
        // Attempts are preserved across the reset.
        assert_eq!(row.attempts, 1);
    }

    #[test]
    fn cleanup_and_clear_remove_terminal_rows() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        queue.add(Uuid::new_v4(), "{}", 0, 3).unwrap();
        queue.add(Uuid::new_v4(), "{}", 0, 3).unwrap();

        let entry = queue.claim_next_job().unwrap().unwrap();
        queue.mark_completed(entry.queue_id).unwrap();

        // Young terminal rows survive age-based cleanup.
        assert_eq!(queue.cleanup_old_jobs(60_000).unwrap(), 0);
        assert_eq!(queue.clear_completed_jobs().unwrap(), 1);

        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn stats_count_by_status() {
        let dir = tempdir().unwrap();
        let queue = open_queue(&dir);
        for _ in 0..3 {
            queue.add(Uuid::new_v4(), "{}", 0, 3).unwrap();
        }
        let entry = queue.claim_next_job().unwrap().unwrap();
        queue.mark_failed(entry.queue_id, "x", false, 0).unwrap();
        let entry = queue.claim_next_job().unwrap().unwrap();
        queue.mark_completed(entry.queue_id).unwrap();

        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.claimed, 0);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 3);
    }
}
