//! Task lifecycle: isolated storage, crawl, output, cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::crawler::CrawlSession;
use crate::dataset::Dataset;
use crate::models::{GlobalConfig, TaskConfig};
use crate::output::OutputWriter;

/// Outcome of one task execution.
#[derive(Debug)]
pub struct TaskOutcome {
    pub success: bool,
    pub output_file: Option<PathBuf>,
    pub error: Option<String>,
}

/// Runs one task end to end: storage setup, crawl session, output writing,
/// unconditional storage cleanup.
pub struct TaskRunner {
    root: PathBuf,
    job_name: String,
    task: TaskConfig,
    global: GlobalConfig,
    output_override: Option<PathBuf>,
}

impl TaskRunner {
    pub fn new(root: PathBuf, job_name: String, task: TaskConfig, global: GlobalConfig) -> Self {
        Self {
            root,
            job_name,
            task,
            global,
            output_override: None,
        }
    }

    /// Redirect output to an explicit path (used by the aggregation scratch).
    pub fn with_output_path(mut self, path: PathBuf) -> Self {
        self.output_override = Some(path);
        self
    }

    /// Execute the task. Failures are folded into the outcome, never raised.
    pub async fn run(&self) -> TaskOutcome {
        match self.execute().await {
            Ok(output_file) => TaskOutcome {
                success: true,
                output_file: Some(output_file),
                error: None,
            },
            Err(e) => TaskOutcome {
                success: false,
                output_file: None,
                error: Some(first_line(&e)),
            },
        }
    }

    async fn execute(&self) -> Result<PathBuf> {
        let dataset_name = format!("ds-{}", short_hex());
        let storage_dir = self
            .root
            .join("storage")
            .join("jobs")
            .join(&dataset_name);
        info!(
            task = %self.task.name,
            dataset = %dataset_name,
            "starting task"
        );

        let dataset = Arc::new(Dataset::create(&storage_dir)?);
        let session = CrawlSession::new(self.task.clone(), self.global, dataset.clone())?;
        let crawl_result = session.run().await;

        let outcome = match crawl_result {
            Ok(0) => Err(anyhow::anyhow!(
                "crawl produced no records for task '{}'",
                self.task.name
            )),
            Ok(records) => self.write_output(&dataset, records),
            Err(e) => Err(e),
        };

        cleanup_storage(&storage_dir);
        outcome
    }

    fn write_output(&self, dataset: &Dataset, records: usize) -> Result<PathBuf> {
        let output_path = match &self.output_override {
            Some(path) => path.clone(),
            None => self
                .root
                .join("output")
                .join("jobs")
                .join(sanitize_output_name(
                    self.task.output_file_name.as_deref(),
                    &self.job_name,
                )),
        };

        let max_bytes = self.task.max_file_size.map(|mb| mb * 1024 * 1024);
        let writer = OutputWriter::new(output_path.clone(), max_bytes, self.global.max_tokens)?;
        let segments = writer.write_records(dataset.records()?)?;

        info!(
            task = %self.task.name,
            records,
            segments = segments.len(),
            "output written"
        );
        segments
            .into_iter()
            .next()
            .context("writer produced no segments")
    }
}

/// Force a user-supplied output name into a bare filename under the job
/// output directory. Directory components and traversal are discarded.
pub fn sanitize_output_name(name: Option<&str>, job_name: &str) -> String {
    let base = name
        .map(|candidate| {
            Path::new(candidate)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .trim()
                .to_string()
        })
        .unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." {
        format!("{}.json", job_name)
    } else {
        base
    }
}

fn cleanup_storage(storage_dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(storage_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(
                "failed to remove storage dir {}: {}",
                storage_dir.display(),
                e
            );
        }
    }
}

fn short_hex() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Reduce an error chain to the single line surfaced to users.
fn first_line(error: &anyhow::Error) -> String {
    let rendered = format!("{:#}", error);
    rendered
        .lines()
        .next()
        .unwrap_or("task failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal_components() {
        // Property: any user-supplied name lands strictly under output/jobs/.
        assert_eq!(
            sanitize_output_name(Some("../../etc/passwd.json"), "alpha"),
            "passwd.json"
        );
        assert_eq!(
            sanitize_output_name(Some("/etc/passwd.json"), "alpha"),
            "passwd.json"
        );
        assert_eq!(
            sanitize_output_name(Some("nested/dir/out.json"), "alpha"),
            "out.json"
        );
    }

    #[test]
    fn sanitize_defaults_to_job_name() {
        assert_eq!(sanitize_output_name(None, "alpha"), "alpha.json");
        assert_eq!(sanitize_output_name(Some(""), "alpha"), "alpha.json");
        assert_eq!(sanitize_output_name(Some(".."), "alpha"), "alpha.json");
        assert_eq!(sanitize_output_name(Some("   "), "alpha"), "alpha.json");
    }

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(
            sanitize_output_name(Some("docs.json"), "alpha"),
            "docs.json"
        );
    }

    #[test]
    fn dataset_names_are_short_hex() {
        let a = short_hex();
        let b = short_hex();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn first_line_truncates_multiline_errors() {
        let err = anyhow::anyhow!("top level\nstack detail");
        assert_eq!(first_line(&err), "top level");
    }
}
