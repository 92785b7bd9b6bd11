//! Navigation-driven seed discovery.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use super::browser::BrowserHandle;
use super::page;
use crate::matcher::UrlFilter;
use crate::models::TaskConfig;

/// Open the entry URL and collect in-scope anchors from navigation elements.
///
/// Callers treat failure as non-fatal: the crawl proceeds with the explicit
/// entry URL alone.
pub async fn discover_nav_seeds(
    browser: &BrowserHandle,
    task: &TaskConfig,
    filter: &UrlFilter,
) -> Result<Vec<String>> {
    let page = browser.new_page().await?;
    let result = discover_inner(&page, task, filter).await;
    let _ = page.close().await;
    result
}

async fn discover_inner(
    page: &chromiumoxide::Page,
    task: &TaskConfig,
    filter: &UrlFilter,
) -> Result<Vec<String>> {
    page::prepare_page(page, &task.cookie, &task.entry, &[]).await?;
    page::navigate(page, &task.entry).await?;
    page::wait_for_ready(page, page::NAVIGATION_TIMEOUT_SECS).await;

    let html = page.content().await?;
    let anchors = page::discovery_anchors(&html, &task.discovery_selector, &task.entry);
    debug!(
        "discovery selector '{}' yielded {} anchors",
        task.discovery_selector,
        anchors.len()
    );

    let mut seen: HashSet<String> = HashSet::new();
    let seeds: Vec<String> = anchors
        .into_iter()
        .filter(|url| seen.insert(url.clone()))
        .filter(|url| filter.allows(url))
        .collect();

    info!(
        task = %task.name,
        discovered = seeds.len(),
        "navigation discovery complete"
    );
    Ok(seeds)
}
