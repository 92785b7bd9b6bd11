//! Process settings from environment variables.
//!
//! All persisted state lives under the working directory: `data/` for the
//! two databases, `storage/jobs/` for transient crawl datasets, and
//! `output/jobs/` for the canonical artifacts.

use std::path::PathBuf;

use tracing::warn;

/// Default parallel task slots per worker process.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 2;
/// Default starting poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default poll interval ceiling in milliseconds.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 10_000;
/// Default stuck-claim threshold: 30 minutes.
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 1_800_000;
/// Default retry backoff base in milliseconds.
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 5_000;
/// Default HTTP bind host.
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
/// Default HTTP port.
pub const DEFAULT_API_PORT: u16 = 3000;

/// Runtime settings, sourced from the environment with defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for all persisted state (working directory).
    pub root: PathBuf,
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub job_timeout_ms: u64,
    pub backoff_delay_ms: u64,
    pub api_host: String,
    pub api_port: u16,
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
            backoff_delay_ms: DEFAULT_BACKOFF_DELAY_MS,
            api_host: DEFAULT_API_HOST.to_string(),
            api_port: DEFAULT_API_PORT,
            api_key: None,
        }
    }
}

impl Settings {
    /// Load settings, applying environment overrides to the defaults.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(n) = env_parse::<usize>("WORKER_CONCURRENCY") {
            settings.worker_concurrency = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("POLL_INTERVAL_MS") {
            settings.poll_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("MAX_POLL_INTERVAL_MS") {
            settings.max_poll_interval_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("JOB_TIMEOUT_MS") {
            settings.job_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("BACKOFF_DELAY_MS") {
            settings.backoff_delay_ms = ms;
        }
        if let Ok(host) = std::env::var("API_HOST") {
            if !host.is_empty() {
                settings.api_host = host;
            }
        }
        if let Some(port) = env_parse::<u16>("API_PORT") {
            settings.api_port = port;
        }
        settings.api_key = std::env::var("API_KEY").ok().filter(|k| !k.is_empty());
        settings
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.root.join("data").join("queue.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.root.join("data").join("jobs.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output").join("jobs")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.root.join("storage").join("jobs")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let value = std::env::var(key).ok().filter(|v| !v.is_empty())?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("ignoring invalid value for {}: '{}'", key, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.worker_concurrency, 2);
        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.max_poll_interval_ms, 10_000);
        assert_eq!(settings.job_timeout_ms, 1_800_000);
        assert_eq!(settings.backoff_delay_ms, 5_000);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn state_paths_hang_off_the_root() {
        let settings = Settings {
            root: PathBuf::from("/srv/crawler"),
            ..Default::default()
        };
        assert_eq!(
            settings.queue_db_path(),
            PathBuf::from("/srv/crawler/data/queue.db")
        );
        assert_eq!(
            settings.jobs_db_path(),
            PathBuf::from("/srv/crawler/data/jobs.db")
        );
        assert_eq!(
            settings.output_dir(),
            PathBuf::from("/srv/crawler/output/jobs")
        );
        assert_eq!(
            settings.storage_dir(),
            PathBuf::from("/srv/crawler/storage/jobs")
        );
    }
}
