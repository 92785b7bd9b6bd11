//! Task configuration types.
//!
//! Tasks are declared in JSON (or TOML/YAML via the job registry) with
//! camelCase keys, so the serde layer mirrors that convention.

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::matcher;

/// Default selector for navigation-driven seed discovery.
pub const DEFAULT_DISCOVERY_SELECTOR: &str = "nav, aside";

/// Default wait-for-selector timeout in milliseconds.
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 5_000;

/// A cookie applied to every request made against the task's origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub name: String,
    pub value: String,
}

/// Declarative crawl specification for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    /// Stable identifier, unique across all jobs.
    pub name: String,
    /// Seed URL. Must be HTTPS.
    pub entry: String,
    /// Glob patterns a URL must match (at least one) to be enqueued.
    #[serde(rename = "match", deserialize_with = "one_or_many")]
    pub match_patterns: Vec<String>,
    /// Glob patterns that disqualify a URL when any of them matches.
    #[serde(default, deserialize_with = "one_or_many")]
    pub exclude: Vec<String>,
    /// Content selector. A leading `/` marks it as XPath, otherwise CSS.
    pub selector: String,
    /// Whether to run navigation-driven seed discovery before crawling.
    #[serde(default = "default_true")]
    pub auto_discover_nav: bool,
    /// Selector for the elements whose anchors seed the crawl.
    #[serde(default = "default_discovery_selector")]
    pub discovery_selector: String,
    /// Cookies applied before every navigation against the task origin.
    #[serde(default, deserialize_with = "one_or_many_cookies")]
    pub cookie: Vec<CookieSpec>,
    /// Milliseconds to wait for `selector` on each page.
    #[serde(default = "default_selector_timeout")]
    pub wait_for_selector_timeout: u64,
    /// File extensions whose requests are aborted (e.g. images, fonts).
    #[serde(default)]
    pub resource_exclusions: Vec<String>,
    /// Per-output-segment cap in megabytes.
    #[serde(default)]
    pub max_file_size: Option<u64>,
    /// Named post-load hook, resolved against the compiled-in hook registry.
    #[serde(default)]
    pub on_visit_page: Option<String>,
    /// Output filename. Sanitized to a bare filename under the job output dir.
    #[serde(default)]
    pub output_file_name: Option<String>,
}

impl TaskConfig {
    /// Validate the declarative parts of the config.
    ///
    /// Hook names are checked separately at submission, where the registry
    /// of compiled-in hooks is in scope.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        let entry = Url::parse(&self.entry)
            .map_err(|e| format!("invalid entry URL '{}': {}", self.entry, e))?;
        if entry.scheme() != "https" {
            return Err(format!(
                "entry URL '{}' must use https, got '{}'",
                self.entry,
                entry.scheme()
            ));
        }
        if self.match_patterns.is_empty() {
            return Err(format!("task '{}' needs at least one match pattern", self.name));
        }
        if self.selector.trim().is_empty() {
            return Err(format!("task '{}' needs a content selector", self.name));
        }
        matcher::compile(&self.match_patterns)
            .map_err(|e| format!("task '{}' has an invalid match pattern: {}", self.name, e))?;
        matcher::compile(&self.exclude)
            .map_err(|e| format!("task '{}' has an invalid exclude pattern: {}", self.name, e))?;
        Ok(())
    }

    /// Whether the content selector is an XPath expression.
    pub fn selector_is_xpath(&self) -> bool {
        self.selector.starts_with('/')
    }
}

fn default_true() -> bool {
    true
}

fn default_discovery_selector() -> String {
    DEFAULT_DISCOVERY_SELECTOR.to_string()
}

fn default_selector_timeout() -> u64 {
    DEFAULT_SELECTOR_TIMEOUT_MS
}

/// Accept either a single string or a list of strings.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Accept either a single cookie object or a list of them.
fn one_or_many_cookies<'de, D>(deserializer: D) -> Result<Vec<CookieSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CookieSpec),
        Many(Vec<CookieSpec>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(c) => vec![c],
        OneOrMany::Many(v) => v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> TaskConfig {
        serde_json::from_value(serde_json::json!({
            "name": "docs",
            "entry": "https://example.test/docs",
            "match": "https://example.test/docs/**",
            "selector": "main"
        }))
        .unwrap()
    }

    #[test]
    fn parses_minimal_camel_case_config() {
        let task = base_task();
        assert_eq!(task.name, "docs");
        assert_eq!(task.match_patterns, vec!["https://example.test/docs/**"]);
        assert!(task.auto_discover_nav);
        assert_eq!(task.discovery_selector, DEFAULT_DISCOVERY_SELECTOR);
        assert_eq!(task.wait_for_selector_timeout, DEFAULT_SELECTOR_TIMEOUT_MS);
        assert!(task.exclude.is_empty());
        assert!(task.cookie.is_empty());
    }

    #[test]
    fn match_accepts_string_or_list() {
        let task: TaskConfig = serde_json::from_value(serde_json::json!({
            "name": "docs",
            "entry": "https://example.test/",
            "match": ["https://example.test/a/**", "https://example.test/b/**"],
            "selector": "main"
        }))
        .unwrap();
        assert_eq!(task.match_patterns.len(), 2);
    }

    #[test]
    fn cookie_accepts_object_or_list() {
        let task: TaskConfig = serde_json::from_value(serde_json::json!({
            "name": "docs",
            "entry": "https://example.test/",
            "match": "https://example.test/**",
            "selector": "main",
            "cookie": {"name": "session", "value": "abc"}
        }))
        .unwrap();
        assert_eq!(task.cookie.len(), 1);
        assert_eq!(task.cookie[0].name, "session");
    }

    #[test]
    fn rejects_non_https_entry() {
        let mut task = base_task();
        task.entry = "http://example.test/".to_string();
        assert!(task.validate().unwrap_err().contains("https"));
    }

    #[test]
    fn rejects_empty_match() {
        let mut task = base_task();
        task.match_patterns.clear();
        assert!(task.validate().is_err());
    }

    #[test]
    fn rejects_invalid_glob() {
        let mut task = base_task();
        task.exclude = vec!["https://example.test/[".to_string()];
        assert!(task.validate().is_err());
    }

    #[test]
    fn detects_xpath_selector() {
        let mut task = base_task();
        assert!(!task.selector_is_xpath());
        task.selector = "//main/article".to_string();
        assert!(task.selector_is_xpath());
    }
}
