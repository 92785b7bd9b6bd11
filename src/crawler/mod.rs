//! Browser-driven crawl execution.
//!
//! A session runs one task: discover seeds, expand sitemaps, then drive a
//! breadth-first crawl over a shared frontier with a small fixed number of
//! page workers. Records land in the session's isolated dataset.

mod browser;
mod discovery;
pub mod hooks;
mod page;
pub mod sitemap;

pub use hooks::VisitHook;

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::Page;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::matcher::UrlFilter;
use crate::models::{CrawledRecord, GlobalConfig, Limit, TaskConfig};
use browser::BrowserHandle;

/// Page workers per session, bounding browser memory.
const SESSION_CONCURRENCY: usize = 2;

/// Navigation/selector failures get two automatic retries per page.
const PAGE_ATTEMPTS: u32 = 3;

/// Idle wait while the frontier is empty but pages are still in flight.
const FRONTIER_IDLE_MS: u64 = 100;

/// Shared crawl state across the session's page workers.
struct Frontier {
    queue: Mutex<VecDeque<String>>,
    visited: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    pages_started: AtomicU64,
    stopped: AtomicBool,
}

impl Frontier {
    fn new(seeds: Vec<String>) -> Self {
        let visited: HashSet<String> = seeds.iter().cloned().collect();
        Self {
            queue: Mutex::new(seeds.into()),
            visited: Mutex::new(visited),
            in_flight: AtomicUsize::new(0),
            pages_started: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

/// One task's crawl execution against a browser.
pub struct CrawlSession {
    task: Arc<TaskConfig>,
    global: GlobalConfig,
    dataset: Arc<Dataset>,
    filter: Arc<UrlFilter>,
    hook: Option<&'static dyn VisitHook>,
}

impl CrawlSession {
    pub fn new(task: TaskConfig, global: GlobalConfig, dataset: Arc<Dataset>) -> Result<Self> {
        let filter = UrlFilter::new(&task.match_patterns, &task.exclude)
            .with_context(|| format!("invalid glob patterns in task '{}'", task.name))?;
        let hook = match &task.on_visit_page {
            Some(name) => Some(
                hooks::resolve(name)
                    .ok_or_else(|| anyhow::anyhow!("unknown onVisitPage hook '{}'", name))?,
            ),
            None => None,
        };
        Ok(Self {
            task: Arc::new(task),
            global,
            dataset,
            filter: Arc::new(filter),
            hook,
        })
    }

    /// Run the crawl to completion. Returns the number of stored records.
    pub async fn run(&self) -> Result<usize> {
        let browser = Arc::new(
            BrowserHandle::launch()
                .await
                .context("browser launch failed")?,
        );

        let seeds = self.assemble_seeds(&browser).await?;
        info!(task = %self.task.name, seeds = seeds.len(), "starting crawl");

        let frontier = Arc::new(Frontier::new(seeds));
        let mut workers = Vec::with_capacity(SESSION_CONCURRENCY);
        for worker_id in 0..SESSION_CONCURRENCY {
            let frontier = frontier.clone();
            let browser = browser.clone();
            let task = self.task.clone();
            let filter = self.filter.clone();
            let dataset = self.dataset.clone();
            let global = self.global;
            let hook = self.hook;
            workers.push(tokio::spawn(async move {
                page_worker(worker_id, frontier, browser, task, filter, dataset, global, hook)
                    .await;
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }

        let crawled = frontier.pages_started.load(Ordering::SeqCst);
        info!(
            task = %self.task.name,
            pages = crawled,
            records = self.dataset.len(),
            "crawl complete"
        );

        match Arc::try_unwrap(browser) {
            Ok(handle) => handle.close().await,
            Err(_) => warn!("browser handle still shared at session end"),
        }

        Ok(self.dataset.len())
    }

    /// Build the seed set: entry plus discovered URLs, sitemaps expanded,
    /// excludes applied post-merge, deduplicated by exact string equality.
    async fn assemble_seeds(&self, browser: &BrowserHandle) -> Result<Vec<String>> {
        let mut merged: Vec<String> = vec![self.task.entry.clone()];

        if self.task.auto_discover_nav {
            match discovery::discover_nav_seeds(browser, &self.task, &self.filter).await {
                Ok(discovered) => merged.extend(discovered),
                Err(e) => {
                    warn!(task = %self.task.name, "seed discovery failed, continuing with entry only: {:#}", e);
                }
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(browser::BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build sitemap client")?;

        let mut seeds: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for url in merged {
            if sitemap::is_sitemap_url(&url) {
                match sitemap::fetch_sitemap_urls(&client, &url).await {
                    Ok(urls) => {
                        for contained in urls {
                            if self.filter.allows(&contained) && seen.insert(contained.clone()) {
                                seeds.push(contained);
                            }
                        }
                    }
                    Err(e) => warn!("sitemap expansion failed for {}: {:#}", url, e),
                }
            } else if seen.insert(url.clone()) {
                seeds.push(url);
            }
        }

        seeds.retain(|url| !self.filter.excluded(url));
        Ok(seeds)
    }
}

#[allow(clippy::too_many_arguments)]
async fn page_worker(
    worker_id: usize,
    frontier: Arc<Frontier>,
    browser: Arc<BrowserHandle>,
    task: Arc<TaskConfig>,
    filter: Arc<UrlFilter>,
    dataset: Arc<Dataset>,
    global: GlobalConfig,
    hook: Option<&'static dyn VisitHook>,
) {
    loop {
        if frontier.stopped.load(Ordering::SeqCst) {
            break;
        }

        let url = {
            let mut queue = frontier.queue.lock().await;
            match queue.pop_front() {
                Some(url) => {
                    frontier.in_flight.fetch_add(1, Ordering::SeqCst);
                    Some(url)
                }
                None => None,
            }
        };

        let Some(url) = url else {
            if frontier.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(FRONTIER_IDLE_MS)).await;
            continue;
        };

        if let Limit::Count(cap) = global.max_pages_to_crawl {
            let started = frontier.pages_started.fetch_add(1, Ordering::SeqCst);
            if started >= cap {
                debug!(worker_id, "page cap of {} reached", cap);
                frontier.pages_started.fetch_sub(1, Ordering::SeqCst);
                frontier.stopped.store(true, Ordering::SeqCst);
                frontier.in_flight.fetch_sub(1, Ordering::SeqCst);
                break;
            }
        } else {
            frontier.pages_started.fetch_add(1, Ordering::SeqCst);
        }

        let mut last_error: Option<anyhow::Error> = None;
        for attempt in 1..=PAGE_ATTEMPTS {
            match visit_page(&browser, &task, &dataset, hook, &url).await {
                Ok(links) => {
                    last_error = None;
                    enqueue_links(&frontier, &filter, links).await;
                    break;
                }
                Err(e) => {
                    debug!(worker_id, attempt, "page visit failed for {}: {:#}", url, e);
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            warn!(
                worker_id,
                "skipping {} after {} attempts: {:#}", url, PAGE_ATTEMPTS, e
            );
        }

        frontier.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn enqueue_links(frontier: &Frontier, filter: &UrlFilter, links: Vec<String>) {
    for link in links {
        if !filter.allows(&link) {
            continue;
        }
        let fresh = {
            let mut visited = frontier.visited.lock().await;
            visited.insert(link.clone())
        };
        if fresh {
            frontier.queue.lock().await.push_back(link);
        }
    }
}

/// Visit one URL: prepare, navigate, extract, store, harvest links.
async fn visit_page(
    browser: &BrowserHandle,
    task: &TaskConfig,
    dataset: &Dataset,
    hook: Option<&'static dyn VisitHook>,
    url: &str,
) -> Result<Vec<String>> {
    let page = browser.new_page().await?;
    let result = visit_inner(&page, task, dataset, hook, url).await;
    let _ = page.close().await;
    result
}

async fn visit_inner(
    page: &Page,
    task: &TaskConfig,
    dataset: &Dataset,
    hook: Option<&'static dyn VisitHook>,
    url: &str,
) -> Result<Vec<String>> {
    page::prepare_page(page, &task.cookie, &task.entry, &task.resource_exclusions).await?;
    page::navigate(page, url).await?;
    page::wait_for_ready(page, page::NAVIGATION_TIMEOUT_SECS).await;

    let text = page::wait_for_selector(page, &task.selector, task.wait_for_selector_timeout).await?;

    let title = page.get_title().await?.unwrap_or_default();
    let final_url = page
        .url()
        .await?
        .map(|u| u.to_string())
        .unwrap_or_else(|| url.to_string());

    let mut record = CrawledRecord {
        title,
        url: final_url.clone(),
        html: text,
        extra: serde_json::Map::new(),
    };

    if let Some(hook) = hook {
        match hook.visit(page).await {
            Ok(extra) => record.extra.extend(extra),
            Err(e) => warn!("hook '{}' failed on {}: {:#}", hook.name(), url, e),
        }
    }

    dataset.push(&serde_json::to_value(&record)?)?;

    let html = page.content().await?;
    Ok(page::harvest_links(&html, &final_url))
}
