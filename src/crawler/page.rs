//! Per-page browser operations: navigation, waits, extraction, link harvest.

use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, SetBlockedUrLsParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, warn};

use super::browser::BROWSER_USER_AGENT;
use crate::models::CookieSpec;

/// Seconds allowed for one navigation.
pub const NAVIGATION_TIMEOUT_SECS: u64 = 30;

/// Poll interval while waiting for the content selector.
const SELECTOR_POLL_MS: u64 = 250;

/// JavaScript that resolves once the DOM is interactive.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Result of probing for the content selector.
#[derive(Debug, Deserialize)]
struct SelectorProbe {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    error: Option<String>,
}

/// Prepare a page: user agent, blocked resource patterns, cookies.
pub async fn prepare_page(
    page: &Page,
    cookies: &[CookieSpec],
    origin_url: &str,
    resource_exclusions: &[String],
) -> Result<()> {
    page.execute(SetUserAgentOverrideParams::new(
        BROWSER_USER_AGENT.to_string(),
    ))
    .await?;

    if !resource_exclusions.is_empty() {
        let patterns: Vec<String> = resource_exclusions
            .iter()
            .map(|ext| format!("*.{}", ext.trim_start_matches('.')))
            .collect();
        page.execute(SetBlockedUrLsParams::new(patterns)).await?;
    }

    apply_cookies(page, cookies, origin_url).await?;
    Ok(())
}

/// Apply task cookies against the task origin before navigation.
pub async fn apply_cookies(page: &Page, cookies: &[CookieSpec], origin_url: &str) -> Result<()> {
    for cookie in cookies {
        let param = CookieParam::builder()
            .name(&cookie.name)
            .value(&cookie.value)
            .url(origin_url)
            .build();
        match param {
            Ok(param) => {
                if let Err(e) = page.set_cookie(param).await {
                    warn!("failed to set cookie {}: {}", cookie.name, e);
                }
            }
            Err(e) => warn!("failed to build cookie {}: {}", cookie.name, e),
        }
    }
    Ok(())
}

/// Navigate with a hard timeout.
pub async fn navigate(page: &Page, url: &str) -> Result<()> {
    debug!("navigating to {}", url);
    let params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(|e| anyhow::anyhow!("invalid URL {}: {}", url, e))?;

    tokio::time::timeout(
        Duration::from_secs(NAVIGATION_TIMEOUT_SECS),
        page.execute(params),
    )
    .await
    .map_err(|_| {
        anyhow::anyhow!(
            "navigation timed out after {}s for {}",
            NAVIGATION_TIMEOUT_SECS,
            url
        )
    })?
    .map_err(|e| anyhow::anyhow!("navigation failed for {}: {}", url, e))?;

    Ok(())
}

/// Wait for the DOM to reach an interactive state.
pub async fn wait_for_ready(page: &Page, timeout_secs: u64) {
    match tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        page.evaluate(WAIT_FOR_READY_SCRIPT.to_string()),
    )
    .await
    {
        Ok(Ok(result)) => {
            let state: String = result
                .into_value()
                .unwrap_or_else(|_| "unknown".to_string());
            debug!("page ready state: {}", state);
        }
        Ok(Err(e)) => debug!("could not check ready state: {}", e),
        Err(_) => warn!("timeout waiting for page ready state"),
    }
}

/// Wait for the content selector and return its text content.
///
/// A leading `/` marks the selector as XPath, otherwise CSS. Polls inside the
/// page until the node appears or the task's timeout elapses.
pub async fn wait_for_selector(page: &Page, selector: &str, timeout_ms: u64) -> Result<String> {
    let script = selector_probe_script(selector);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        let raw: Option<String> = match page.evaluate(script.clone()).await {
            Ok(result) => result.into_value().ok(),
            Err(e) => {
                debug!("selector probe failed: {}", e);
                None
            }
        };

        if let Some(raw) = raw {
            let probe: SelectorProbe = serde_json::from_str(&raw)
                .with_context(|| format!("bad selector probe response for '{}'", selector))?;
            if let Some(error) = probe.error {
                return Err(anyhow::anyhow!("selector '{}' failed: {}", selector, error));
            }
            if probe.found {
                return Ok(probe.text);
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow::anyhow!(
                "timed out after {}ms waiting for selector '{}'",
                timeout_ms,
                selector
            ));
        }
        tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
    }
}

fn selector_probe_script(selector: &str) -> String {
    let literal = serde_json::Value::String(selector.to_string()).to_string();
    format!(
        r#"
(() => {{
    const sel = {literal};
    let node = null;
    try {{
        node = sel.startsWith('/')
            ? document.evaluate(sel, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue
            : document.querySelector(sel);
    }} catch (e) {{
        return JSON.stringify({{ error: String(e) }});
    }}
    if (!node) return JSON.stringify({{ found: false }});
    return JSON.stringify({{ found: true, text: node.textContent || "" }});
}})()
"#
    )
}

/// Extract and resolve anchor targets from rendered page content.
///
/// Drops fragment-only, `javascript:`, `mailto:` and `tel:` hrefs, resolves
/// the rest against the page URL.
pub fn harvest_links(html: &str, page_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let href = match element.value().attr("href") {
            Some(h) => h.trim(),
            None => continue,
        };
        if let Some(resolved) = resolve_href(href, page_url) {
            links.push(resolved);
        }
    }
    links
}

/// Extract anchors inside elements matching a discovery selector.
///
/// The selector may target the anchors themselves or their containers.
pub fn discovery_anchors(html: &str, discovery_selector: &str, page_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let container_selector = match Selector::parse(discovery_selector) {
        Ok(s) => s,
        Err(e) => {
            warn!("invalid discovery selector '{}': {:?}", discovery_selector, e);
            return Vec::new();
        }
    };
    let anchor_selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    let mut links = Vec::new();
    for element in document.select(&container_selector) {
        if element.value().name() == "a" {
            if let Some(href) = element.value().attr("href") {
                if let Some(resolved) = resolve_href(href.trim(), page_url) {
                    links.push(resolved);
                }
            }
            continue;
        }
        for anchor in element.select(&anchor_selector) {
            if let Some(href) = anchor.value().attr("href") {
                if let Some(resolved) = resolve_href(href.trim(), page_url) {
                    links.push(resolved);
                }
            }
        }
    }
    links
}

fn resolve_href(href: &str, page_url: &str) -> Option<String> {
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
    {
        return None;
    }

    let base = url::Url::parse(page_url).ok()?;
    let mut resolved = base.join(href).ok()?;
    // Fragments never change the fetched document.
    resolved.set_fragment(None);
    Some(resolved.to_string())
}
