//! Crawled page records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One crawled page as it lands in the output artifact.
///
/// `html` carries the extracted text content under the task selector, not the
/// raw markup. Hooks may attach arbitrary extra fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawledRecord {
    pub title: String,
    /// Final URL after redirects.
    pub url: String,
    pub html: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
