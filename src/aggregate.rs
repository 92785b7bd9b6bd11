//! Multi-task job aggregation for the direct (non-queued) path.
//!
//! Tasks run sequentially, each writing into a fresh scratch directory under
//! the OS temp dir. Successful outputs are then merged into the canonical
//! job artifact with a streaming writer that holds at most one task's file
//! in memory at a time.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{GlobalConfig, TaskConfig};
use crate::runner::TaskRunner;

/// Run a named job's tasks sequentially and aggregate their outputs.
///
/// Returns the final artifact path, or `None` when no task succeeded (no
/// file is written in that case).
pub async fn run_direct_job(
    root: &Path,
    job_name: &str,
    tasks: &[TaskConfig],
    global: GlobalConfig,
) -> Result<Option<PathBuf>> {
    let scratch = tempfile::Builder::new()
        .prefix("context-crawler-")
        .tempdir()
        .context("failed to create aggregation scratch dir")?;

    let mut transient: Vec<PathBuf> = Vec::new();
    for (index, task) in tasks.iter().enumerate() {
        let stem = format!("{:02}-{}", index, task.name);
        let tmp_out = scratch.path().join(format!("{}.json", stem));
        let runner = TaskRunner::new(
            root.to_path_buf(),
            job_name.to_string(),
            task.clone(),
            global,
        )
        .with_output_path(tmp_out);

        let outcome = runner.run().await;
        if outcome.success {
            transient.extend(task_segments(scratch.path(), &stem));
        } else {
            warn!(
                task = %task.name,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "task failed, skipping its output in aggregation"
            );
        }
    }

    let final_path = root.join("output").join("jobs").join(format!("{}.json", job_name));
    let written = merge_transient_files(&transient, &final_path)?;

    if let Err(e) = scratch.close() {
        warn!("failed to remove aggregation scratch dir: {}", e);
    }

    if let Some(path) = &written {
        info!(job = job_name, output = %path.display(), "aggregation complete");
    } else {
        info!(job = job_name, "no task succeeded, skipping aggregation");
    }
    Ok(written)
}

/// Collect a task's output segments from the scratch dir in segment order.
///
/// A task normally writes `{stem}.json`, but byte/token caps may have split
/// it into `{stem}-1.json`, `{stem}-2.json`, ….
fn task_segments(scratch: &Path, stem: &str) -> Vec<PathBuf> {
    let plain = scratch.join(format!("{}.json", stem));
    if plain.exists() {
        return vec![plain];
    }

    let mut segments: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(scratch) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&format!("{}-", stem)) && name.ends_with(".json") {
                segments.push(entry.path());
            }
        }
    }
    segments.sort();
    segments
}

/// Stream-merge transient JSON files into one pretty-printed array.
///
/// Each input is parsed one at a time (array or single object); unreadable
/// files are skipped with a warning. If nothing parses, no file is written.
pub fn merge_transient_files(files: &[PathBuf], final_path: &Path) -> Result<Option<PathBuf>> {
    let mut writer: Option<BufWriter<File>> = None;
    let mut first = true;

    for file in files {
        let parsed: Value = match std::fs::read_to_string(file)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "skipping unreadable transient file {}: {:#}",
                    file.display(),
                    e
                );
                continue;
            }
        };

        let elements = match parsed {
            Value::Array(items) => items,
            other => vec![other],
        };

        for element in elements {
            if writer.is_none() {
                if let Some(parent) = final_path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("failed to create output dir {}", parent.display())
                    })?;
                }
                let file = File::create(final_path).with_context(|| {
                    format!("failed to create aggregate output {}", final_path.display())
                })?;
                let mut buffered = BufWriter::new(file);
                buffered.write_all(b"[\n")?;
                writer = Some(buffered);
            }
            let out = writer
                .as_mut()
                .context("aggregate writer missing after initialization")?;

            if !first {
                out.write_all(b",\n")?;
            }
            first = false;

            let pretty = serde_json::to_string_pretty(&element)?;
            for (i, line) in pretty.lines().enumerate() {
                if i > 0 {
                    out.write_all(b"\n")?;
                }
                out.write_all(b"  ")?;
                out.write_all(line.as_bytes())?;
            }
        }
    }

    match writer {
        Some(mut out) => {
            out.write_all(b"\n]\n")?;
            out.flush()?;
            Ok(Some(final_path.to_path_buf()))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn merge_preserves_counts_and_order() {
        // Property: valid arrays of N_i objects merge into one array of sum(N_i),
        // in input order.
        let dir = tempdir().unwrap();
        let a = write_json(
            dir.path(),
            "a.json",
            &json!([{"url": "https://a.test/1"}, {"url": "https://a.test/2"}]),
        );
        let b = write_json(dir.path(), "b.json", &json!([{"url": "https://b.test/1"}]));

        let out = dir.path().join("merged.json");
        let written = merge_transient_files(&[a, b], &out).unwrap();
        assert_eq!(written, Some(out.clone()));

        let merged: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let items = merged.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["url"], "https://a.test/1");
        assert_eq!(items[2]["url"], "https://b.test/1");
    }

    #[test]
    fn merge_wraps_single_objects() {
        let dir = tempdir().unwrap();
        let a = write_json(dir.path(), "a.json", &json!({"url": "https://a.test/only"}));
        let out = dir.path().join("merged.json");
        merge_transient_files(&[a], &out).unwrap();

        let merged: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(merged.as_array().unwrap().len(), 1);
    }

    #[test]
    fn merge_skips_unreadable_files() {
        let dir = tempdir().unwrap();
        let good = write_json(dir.path(), "good.json", &json!([{"n": 1}]));
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json {").unwrap();
        let missing = dir.path().join("never-written.json");

        let out = dir.path().join("merged.json");
        let written = merge_transient_files(&[bad, good, missing], &out).unwrap();
        assert!(written.is_some());

        let merged: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(merged.as_array().unwrap().len(), 1);
    }

    #[test]
    fn merge_with_no_valid_inputs_writes_nothing() {
        let dir = tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "garbage").unwrap();

        let out = dir.path().join("merged.json");
        let written = merge_transient_files(&[bad], &out).unwrap();
        assert!(written.is_none());
        assert!(!out.exists());

        let written = merge_transient_files(&[], &out).unwrap();
        assert!(written.is_none());
    }

    #[test]
    fn merged_output_matches_artifact_format() {
        let dir = tempdir().unwrap();
        let a = write_json(
            dir.path(),
            "a.json",
            &json!([{"title": "T", "url": "https://a.test/", "html": "text"}]),
        );
        let out = dir.path().join("merged.json");
        merge_transient_files(&[a], &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("[\n  {\n    \""));
        assert!(text.ends_with("\n]\n"));
        assert!(!text.contains('\r'));
    }

    #[test]
    fn task_segments_finds_split_outputs() {
        let dir = tempdir().unwrap();
        write_json(dir.path(), "00-docs-1.json", &json!([{"n": 1}]));
        write_json(dir.path(), "00-docs-2.json", &json!([{"n": 2}]));
        write_json(dir.path(), "01-other.json", &json!([{"n": 3}]));

        let split = task_segments(dir.path(), "00-docs");
        assert_eq!(split.len(), 2);
        assert!(split[0].ends_with("00-docs-1.json"));

        let plain = task_segments(dir.path(), "01-other");
        assert_eq!(plain.len(), 1);
    }
}
