//! Job record store keyed by external job id.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{connect, parse_datetime, parse_datetime_opt, Result};
use crate::models::{JobRecord, JobStatus, StatusUpdate};

/// SQLite-backed store for per-submission status and results.
///
/// Callers create the job record before enqueueing the corresponding queue
/// entry, so a visible queue row always has a durable job record behind it.
pub struct JobStore {
    db_path: PathBuf,
}

impl JobStore {
    /// Open (and if needed create) the job database.
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
            CREATE TABLE IF NOT EXISTS job_records (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending',
                config TEXT NOT NULL,
                output_file TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_records_status
                ON job_records(status);
        "#,
        )?;
        Ok(())
    }

    /// Insert a new pending record.
    pub fn create(&self, job_id: Uuid, config: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO job_records (id, status, config, created_at)
            VALUES (?, 'pending', ?, ?)
            "#,
            params![job_id.to_string(), config, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Fetch one record.
    pub fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let conn = self.connect()?;
        match conn.query_row(
            "SELECT * FROM job_records WHERE id = ?",
            params![job_id.to_string()],
            row_to_record,
        ) {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Transition a record, optionally writing result fields.
    pub fn update_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: StatusUpdate,
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE job_records
            SET status = ?,
                output_file = COALESCE(?, output_file),
                error = COALESCE(?, error),
                completed_at = COALESCE(?, completed_at)
            WHERE id = ?
            "#,
            params![
                status.as_str(),
                update.output_file,
                update.error,
                update.completed_at.map(|dt| dt.to_rfc3339()),
                job_id.to_string()
            ],
        )?;
        Ok(())
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<JobRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM job_records ORDER BY created_at DESC")?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Remove one record.
    pub fn delete(&self, job_id: Uuid) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "DELETE FROM job_records WHERE id = ?",
            params![job_id.to_string()],
        )?;
        Ok(())
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let id: String = row.get("id")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    Ok(JobRecord {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        config: row.get("config")?,
        output_file: row.get("output_file")?,
        error: row.get("error")?,
        created_at: parse_datetime(&created_at),
        completed_at: parse_datetime_opt(row.get("completed_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> JobStore {
        JobStore::open(&dir.path().join("jobs.db")).unwrap()
    }

    #[test]
    fn create_and_get() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let id = Uuid::new_v4();
        store.create(id, r#"{"name":"docs"}"#).unwrap();

        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.status, JobStatus::Pending);
        assert!(record.output_file.is_none());
        assert!(record.completed_at.is_none());

        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn update_status_writes_result_fields() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let id = Uuid::new_v4();
        store.create(id, "{}").unwrap();

        store
            .update_status(id, JobStatus::Running, StatusUpdate::default())
            .unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().status, JobStatus::Running);

        store
            .update_status(
                id,
                JobStatus::Completed,
                StatusUpdate {
                    output_file: Some("output/jobs/docs.json".to_string()),
                    ..StatusUpdate::completed_now()
                },
            )
            .unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.output_file.as_deref(), Some("output/jobs/docs.json"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn failed_update_records_error() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let id = Uuid::new_v4();
        store.create(id, "{}").unwrap();

        store
            .update_status(
                id,
                JobStatus::Failed,
                StatusUpdate {
                    error: Some("navigation timeout".to_string()),
                    ..StatusUpdate::completed_now()
                },
            )
            .unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("navigation timeout"));
    }

    #[test]
    fn list_and_delete() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        store.create(first, "{}").unwrap();
        store.create(second, "{}").unwrap();

        assert_eq!(store.list().unwrap().len(), 2);
        store.delete(first).unwrap();
        let remaining = store.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second);
    }
}
