//! Streaming output writer with byte and token segmentation.
//!
//! Records stream through a single batch buffer; when either cap would be
//! exceeded the batch is closed as a segment and a new one starts. Segments
//! stream to `{base}-{n}.json`; a run that ends with exactly one segment is
//! renamed to the bare `{base}` so single-file outputs carry no suffix.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;
use tiktoken_rs::CoreBPE;

use crate::models::Limit;

/// Writes crawled records into one or more pretty-printed JSON array files.
pub struct OutputWriter {
    base_path: PathBuf,
    max_bytes: Option<u64>,
    max_tokens: Limit,
    bpe: CoreBPE,
}

struct Batch {
    records: Vec<Value>,
    estimated_bytes: u64,
    estimated_tokens: u64,
}

impl Batch {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            estimated_bytes: 0,
            estimated_tokens: 0,
        }
    }
}

impl OutputWriter {
    /// Create a writer targeting `base_path` (a `.json` file path).
    pub fn new(base_path: PathBuf, max_bytes: Option<u64>, max_tokens: Limit) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().context("failed to load tokenizer")?;
        Ok(Self {
            base_path,
            max_bytes,
            max_tokens,
            bpe,
        })
    }

    /// Consume a record stream and write all segments.
    ///
    /// Returns the written file paths in order. Byte-identical for identical
    /// input streams.
    pub fn write_records<I>(&self, records: I) -> Result<Vec<PathBuf>>
    where
        I: IntoIterator<Item = Result<Value>>,
    {
        let mut segments: Vec<PathBuf> = Vec::new();
        let mut batch = Batch::new();

        for record in records {
            let record = record?;
            let encoded = serde_json::to_string(&record)?;
            let bytes = encoded.len() as u64;
            let tokens = self.bpe.encode_with_special_tokens(&encoded).len() as u64;

            if let Limit::Count(cap) = self.max_tokens {
                if tokens > cap {
                    // A record too large for any batch gets its own segment,
                    // with the running estimate halved so the next record
                    // still has room beside it.
                    self.flush(&mut batch, &mut segments)?;
                    batch.records.push(record);
                    batch.estimated_tokens = tokens / 2;
                    batch.estimated_bytes = bytes;
                    continue;
                }
                if !batch.records.is_empty() && batch.estimated_tokens + tokens > cap {
                    self.flush(&mut batch, &mut segments)?;
                }
            }

            if let Some(cap) = self.max_bytes {
                if !batch.records.is_empty() && batch.estimated_bytes + bytes > cap {
                    self.flush(&mut batch, &mut segments)?;
                }
            }

            batch.records.push(record);
            batch.estimated_bytes += bytes;
            batch.estimated_tokens += tokens;
        }

        self.flush(&mut batch, &mut segments)?;

        if segments.len() == 1 {
            std::fs::rename(&segments[0], &self.base_path).with_context(|| {
                format!("failed to finalize output {}", self.base_path.display())
            })?;
            return Ok(vec![self.base_path.clone()]);
        }
        Ok(segments)
    }

    fn flush(&self, batch: &mut Batch, segments: &mut Vec<PathBuf>) -> Result<()> {
        if batch.records.is_empty() {
            return Ok(());
        }
        let path = self.segment_path(segments.len() + 1);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create output dir {}", parent.display()))?;
        }
        let records = std::mem::take(&mut batch.records);
        let json = serde_json::to_string_pretty(&Value::Array(records))?;
        std::fs::write(&path, format!("{}\n", json))
            .with_context(|| format!("failed to write segment {}", path.display()))?;
        segments.push(path);
        batch.estimated_bytes = 0;
        batch.estimated_tokens = 0;
        Ok(())
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        let stem = self
            .base_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.strip_suffix(".json").unwrap_or(name).to_string())
            .unwrap_or_else(|| "output".to_string());
        let file_name = format!("{}-{}.json", stem, index);
        match self.base_path.parent() {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn records(n: usize) -> Vec<Result<Value>> {
        (0..n)
            .map(|i| {
                Ok(json!({
                    "title": format!("Page {i}"),
                    "url": format!("https://example.test/{i}"),
                    "html": "some extracted text content",
                }))
            })
            .collect()
    }

    #[test]
    fn single_segment_lands_on_the_bare_base_path() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        let writer = OutputWriter::new(base.clone(), None, Limit::Unlimited).unwrap();
        let paths = writer.write_records(records(3)).unwrap();

        assert_eq!(paths, vec![base.clone()]);
        assert!(!dir.path().join("docs-1.json").exists());
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&base).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 3);
    }

    #[test]
    fn output_is_pretty_printed_with_two_space_indent() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        let writer = OutputWriter::new(base.clone(), None, Limit::Unlimited).unwrap();
        writer.write_records(records(1)).unwrap();

        let text = std::fs::read_to_string(&base).unwrap();
        assert!(text.starts_with("[\n  {\n    \""));
        assert!(text.ends_with("]\n"));
    }

    #[test]
    fn byte_cap_splits_into_suffixed_segments() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        // Each record serializes to ~90 bytes; a 150-byte cap forces one per segment.
        let writer = OutputWriter::new(base.clone(), Some(150), Limit::Unlimited).unwrap();
        let paths = writer.write_records(records(3)).unwrap();

        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0], dir.path().join("docs-1.json"));
        assert_eq!(paths[2], dir.path().join("docs-3.json"));
        assert!(!base.exists());

        // Order is preserved across segments.
        let first: Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[0]).unwrap()).unwrap();
        assert_eq!(first[0]["url"], "https://example.test/0");
        let last: Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[2]).unwrap()).unwrap();
        assert_eq!(last[0]["url"], "https://example.test/2");
    }

    #[test]
    fn token_cap_splits_batches() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        // Records run ~30 tokens each; 40 allows one per batch but not two.
        let writer = OutputWriter::new(base, None, Limit::Count(40)).unwrap();
        let paths = writer.write_records(records(4)).unwrap();

        assert!(paths.len() > 1);
        let total: usize = paths
            .iter()
            .map(|p| {
                let v: Value = serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap();
                v.as_array().unwrap().len()
            })
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn oversized_record_gets_its_own_fresh_batch() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        // Cap below any record's token count: every record is oversized and
        // flushes whatever came before it.
        let writer = OutputWriter::new(base, None, Limit::Count(5)).unwrap();
        let paths = writer.write_records(records(3)).unwrap();

        assert_eq!(paths.len(), 3);
        for path in &paths {
            let v: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
            assert_eq!(v.as_array().unwrap().len(), 1);
        }
    }

    #[test]
    fn identical_input_produces_identical_bytes() {
        let dir = tempdir().unwrap();
        let first_base = dir.path().join("a.json");
        let second_base = dir.path().join("b.json");

        let writer = OutputWriter::new(first_base.clone(), Some(150), Limit::Unlimited).unwrap();
        let first_paths = writer.write_records(records(3)).unwrap();
        let writer = OutputWriter::new(second_base.clone(), Some(150), Limit::Unlimited).unwrap();
        let second_paths = writer.write_records(records(3)).unwrap();

        assert_eq!(first_paths.len(), second_paths.len());
        for (a, b) in first_paths.iter().zip(second_paths.iter()) {
            assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
        }
    }

    #[test]
    fn empty_stream_writes_nothing() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("docs.json");
        let writer = OutputWriter::new(base.clone(), None, Limit::Unlimited).unwrap();
        let paths = writer.write_records(Vec::new()).unwrap();
        assert!(paths.is_empty());
        assert!(!base.exists());
    }
}
