//! Compiled-in `onVisitPage` hooks.
//!
//! Task configs reference hooks by name; the configuration format has no way
//! to carry code, so hooks are registered here and resolved at submission.

use anyhow::Result;
use async_trait::async_trait;
use chromiumoxide::Page;
use serde_json::{Map, Value};

/// A post-load page hook. Returned fields are merged into the record.
#[async_trait]
pub trait VisitHook: Send + Sync {
    fn name(&self) -> &'static str;
    async fn visit(&self, page: &Page) -> Result<Map<String, Value>>;
}

/// Captures the page's meta description into a `description` field.
struct MetaDescription;

#[async_trait]
impl VisitHook for MetaDescription {
    fn name(&self) -> &'static str {
        "meta-description"
    }

    async fn visit(&self, page: &Page) -> Result<Map<String, Value>> {
        const SCRIPT: &str = r#"
(() => {
    const meta = document.querySelector('meta[name="description"]');
    return meta ? (meta.getAttribute('content') || "") : "";
})()
"#;
        let description: String = page
            .evaluate(SCRIPT.to_string())
            .await?
            .into_value()
            .unwrap_or_default();

        let mut extra = Map::new();
        if !description.is_empty() {
            extra.insert("description".to_string(), Value::String(description));
        }
        Ok(extra)
    }
}

static HOOKS: &[&(dyn VisitHook)] = &[&MetaDescription];

/// Look up a hook by its registered name.
pub fn resolve(name: &str) -> Option<&'static dyn VisitHook> {
    HOOKS.iter().find(|hook| hook.name() == name).copied()
}

/// Whether a hook name is registered.
pub fn is_known(name: &str) -> bool {
    resolve(name).is_some()
}
