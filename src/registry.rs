//! Job registry: the static mapping from job name to task list.
//!
//! Loaded once at startup from a JSON, TOML, or YAML file (by extension).
//! Task names must be unique across all jobs; collisions are a configuration
//! error, not a runtime surprise.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::crawler::hooks;
use crate::models::{GlobalConfig, TaskConfig};

/// Basenames probed when no explicit registry path is given.
const REGISTRY_BASENAMES: &[&str] = &["context-crawler", "crawler"];
const REGISTRY_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    global: GlobalConfig,
    #[serde(default)]
    jobs: BTreeMap<String, Vec<TaskConfig>>,
}

/// The loaded, validated registry.
#[derive(Debug, Default)]
pub struct JobRegistry {
    pub global: GlobalConfig,
    jobs: BTreeMap<String, Vec<TaskConfig>>,
}

impl JobRegistry {
    /// Load from an explicit path, or probe standard locations under `root`.
    /// With nothing found, an empty registry is returned: the service can
    /// still take ad-hoc submissions.
    pub fn discover(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        for basename in REGISTRY_BASENAMES {
            for ext in REGISTRY_EXTENSIONS {
                let candidate = root.join(format!("{}.{}", basename, ext));
                if candidate.exists() {
                    debug!("found job registry at {}", candidate.display());
                    return Self::load(&candidate);
                }
            }
        }
        info!("no job registry file found, only ad-hoc submissions available");
        Ok(Self::default())
    }

    /// Load and validate a registry file. The format follows the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read registry {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let file: RegistryFile = match ext {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("failed to parse TOML registry {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse YAML registry {}", path.display()))?,
            _ => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse JSON registry {}", path.display()))?,
        };

        let registry = Self {
            global: file.global,
            jobs: file.jobs,
        };
        registry.validate()?;
        info!(
            jobs = registry.jobs.len(),
            "loaded job registry from {}",
            path.display()
        );
        Ok(registry)
    }

    fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for (job_name, tasks) in &self.jobs {
            if tasks.is_empty() {
                bail!("job '{}' has no tasks", job_name);
            }
            for task in tasks {
                task.validate()
                    .map_err(|e| anyhow::anyhow!("job '{}': {}", job_name, e))?;
                if let Some(hook) = &task.on_visit_page {
                    if !hooks::is_known(hook) {
                        bail!(
                            "job '{}', task '{}': unknown onVisitPage hook '{}'",
                            job_name,
                            task.name,
                            hook
                        );
                    }
                }
                if !seen.insert(task.name.as_str()) {
                    bail!(
                        "task name '{}' appears more than once across jobs",
                        task.name
                    );
                }
            }
        }
        Ok(())
    }

    /// Tasks of a named job.
    pub fn job(&self, name: &str) -> Option<&[TaskConfig]> {
        self.jobs.get(name).map(|tasks| tasks.as_slice())
    }

    /// Registered job names with their task lists, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[TaskConfig])> {
        self.jobs
            .iter()
            .map(|(name, tasks)| (name.as_str(), tasks.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
