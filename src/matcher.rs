//! Glob-based URL filtering.
//!
//! Both filtering call sites (seed discovery and crawl-time link enqueue) go
//! through [`UrlFilter`], so include/exclude semantics cannot diverge.
//! Patterns are anchored full-URL globs: `*` stops at `/`, `**` crosses it.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Compile a pattern list into a matcher set.
pub fn compile(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_one(pattern)?);
    }
    builder.build()
}

fn compile_one(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern).literal_separator(true).build()
}

/// Expand plain-path exclude patterns to also cover their subpaths.
///
/// A pattern with no wildcard and no trailing `/` (say `/support`) would
/// otherwise let `/support/foo` through; emit both the literal and
/// `pattern + "/**"`. Patterns already containing wildcards pass unchanged.
pub fn expand_excludes(patterns: &[String]) -> Vec<String> {
    let mut expanded = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        expanded.push(pattern.clone());
        let has_wildcard = pattern.contains('*') || pattern.contains('?') || pattern.contains('[');
        if !has_wildcard && !pattern.ends_with('/') {
            expanded.push(format!("{}/**", pattern));
        }
    }
    expanded
}

/// Include/exclude evaluation for one task.
#[derive(Debug)]
pub struct UrlFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl UrlFilter {
    /// Build a filter from raw task patterns. Excludes are subpath-expanded.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self, globset::Error> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(&expand_excludes(exclude))?,
        })
    }

    /// True when the URL matches at least one include pattern and no exclude.
    pub fn allows(&self, url: &str) -> bool {
        self.include.is_match(url) && !self.excluded(url)
    }

    /// True when any exclude pattern matches.
    pub fn excluded(&self, url: &str) -> bool {
        self.exclude.is_match(url)
    }
}
