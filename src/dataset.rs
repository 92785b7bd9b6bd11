//! Per-session isolated record store.
//!
//! Each crawl session appends records to its own JSONL file under the
//! session's storage directory. Sessions never touch another session's
//! directory, which is what keeps concurrent crawls isolated on shared disk.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::Value;

const RECORDS_FILE: &str = "records.jsonl";

/// Append-only record store owned by exactly one crawl session.
pub struct Dataset {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    count: AtomicUsize,
}

impl Dataset {
    /// Create the storage directory and an empty record file inside it.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create storage dir {}", dir.display()))?;
        let path = dir.join(RECORDS_FILE);
        let file = File::create(&path)
            .with_context(|| format!("failed to create record store {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            count: AtomicUsize::new(0),
        })
    }

    /// Append one record.
    pub fn push(&self, record: &Value) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("record store writer poisoned"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate records in insertion order, one at a time.
    pub fn records(&self) -> Result<impl Iterator<Item = Result<Value>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open record store {}", self.path.display()))?;
        Ok(BufReader::new(file).lines().map(|line| {
            let line = line.context("failed to read record line")?;
            serde_json::from_str(&line).context("malformed record line")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn push_and_read_back_in_order() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::create(&dir.path().join("ds-test")).unwrap();
        for i in 0..5 {
            dataset.push(&json!({"url": format!("https://example.test/{i}")})).unwrap();
        }
        assert_eq!(dataset.len(), 5);

        let records: Vec<Value> = dataset
            .records()
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0]["url"], "https://example.test/0");
        assert_eq!(records[4]["url"], "https://example.test/4");
    }

    #[test]
    fn empty_dataset_reads_empty() {
        let dir = tempdir().unwrap();
        let dataset = Dataset::create(&dir.path().join("ds-empty")).unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.records().unwrap().count(), 0);
    }
}
