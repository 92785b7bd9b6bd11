//! Sitemap detection and expansion.
//!
//! Seed URLs that look like sitemaps are fetched once and replaced by the
//! URLs they contain. Sitemap indexes are followed through a work queue, and
//! `<loc>` values are extracted with plain string scanning since sitemap XML
//! namespaces defeat CSS-selector parsing.

use std::collections::HashSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

/// Guard against sitemap indexes that loop or fan out without end.
const MAX_SITEMAPS: usize = 100;

/// Whether a URL should be treated as a sitemap rather than a page.
pub fn is_sitemap_url(url: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"sitemap.*\.xml$").expect("static sitemap regex"));
    re.is_match(url)
}

/// Fetch a sitemap (or sitemap index) and return every contained page URL.
pub async fn fetch_sitemap_urls(client: &reqwest::Client, url: &str) -> Result<Vec<String>> {
    let mut all_urls = Vec::new();
    let mut pending = vec![url.to_string()];
    let mut processed: HashSet<String> = HashSet::new();

    while let Some(sitemap_url) = pending.pop() {
        if processed.contains(&sitemap_url) || processed.len() >= MAX_SITEMAPS {
            continue;
        }
        processed.insert(sitemap_url.clone());

        debug!("fetching sitemap: {}", sitemap_url);

        let response = client
            .get(&sitemap_url)
            .send()
            .await
            .with_context(|| format!("failed to fetch sitemap {}", sitemap_url))?;

        if !response.status().is_success() {
            warn!("sitemap {} returned {}", sitemap_url, response.status());
            continue;
        }

        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!("failed to read sitemap {}: {}", sitemap_url, e);
                continue;
            }
        };

        if text.contains("<sitemapindex") {
            for loc in extract_locs(&text) {
                if !processed.contains(&loc) {
                    pending.push(loc);
                }
            }
        } else {
            all_urls.extend(extract_locs(&text));
        }
    }

    debug!("sitemap expansion yielded {} URLs", all_urls.len());
    Ok(all_urls)
}

/// Extract `<loc>` values, unescaping XML entities.
fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    for line in xml.lines() {
        let mut rest = line;
        while let Some(start) = rest.find("<loc>") {
            let after = &rest[start + 5..];
            match after.find("</loc>") {
                Some(end) => {
                    locs.push(unescape_xml(&after[..end]));
                    rest = &after[end + 6..];
                }
                None => break,
            }
        }
    }
    locs
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sitemap_urls() {
        assert!(is_sitemap_url("https://example.test/sitemap.xml"));
        assert!(is_sitemap_url("https://example.test/sitemap_index.xml"));
        assert!(is_sitemap_url("https://example.test/docs/sitemap-pages.xml"));
        assert!(!is_sitemap_url("https://example.test/docs/page"));
        assert!(!is_sitemap_url("https://example.test/sitemap.xml.bak"));
    }

    #[test]
    fn extracts_locs_from_simple_sitemap() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.test/docs/intro</loc>
  </url>
  <url>
    <loc>https://example.test/docs/api</loc>
  </url>
</urlset>"#;
        let urls = extract_locs(xml);
        assert_eq!(urls.len(), 2);
        assert!(urls.contains(&"https://example.test/docs/intro".to_string()));
    }

    #[test]
    fn extracts_multiple_locs_on_one_line() {
        let xml = "<urlset><url><loc>https://a.test/1</loc></url><url><loc>https://a.test/2</loc></url></urlset>";
        assert_eq!(extract_locs(xml).len(), 2);
    }

    #[test]
    fn unescapes_xml_entities() {
        let xml = "<url><loc>https://example.test/search?q=test&amp;page=1</loc></url>";
        assert_eq!(
            extract_locs(xml),
            vec!["https://example.test/search?q=test&page=1".to_string()]
        );
    }
}
