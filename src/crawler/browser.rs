//! Headless browser lifecycle via CDP.
//!
//! Launches a local Chromium in headless mode, or connects to a remote
//! instance when `BROWSER_URL` points at a DevTools endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::handler::HandlerConfig;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// User agent presented by crawl pages.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Seconds allowed for a single CDP request.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Common Chromium executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

/// A running browser shared by the page workers of one crawl session.
pub struct BrowserHandle {
    browser: Arc<Mutex<Browser>>,
    handler_task: JoinHandle<()>,
}

impl BrowserHandle {
    /// Launch a local browser, or connect to `BROWSER_URL` when set.
    pub async fn launch() -> Result<Self> {
        if let Ok(remote) = std::env::var("BROWSER_URL") {
            if !remote.is_empty() {
                return Self::connect_remote(&remote).await;
            }
        }
        Self::launch_local().await
    }

    async fn launch_local() -> Result<Self> {
        let chrome_path = find_chrome()?;
        info!("launching browser from {}", chrome_path);

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler_task,
        })
    }

    /// Connect to a remote Chromium's DevTools endpoint.
    async fn connect_remote(url: &str) -> Result<Self> {
        info!("connecting to remote browser at {}", url);

        let http_url = url.replace("ws://", "http://").replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::new();
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .context("failed to reach remote browser")?
            .json()
            .await
            .context("failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("no webSocketDebuggerUrl in version response"))?;

        debug!("connecting to websocket {}", ws_url);

        let handler_config = HandlerConfig {
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .context("failed to connect to remote browser")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler_task,
        })
    }

    /// Open a fresh blank page.
    pub async fn new_page(&self) -> Result<Page> {
        let browser = self.browser.lock().await;
        browser
            .new_page("about:blank")
            .await
            .context("failed to open page")
    }

    /// Close the browser and stop its event handler.
    pub async fn close(self) {
        {
            let mut browser = self.browser.lock().await;
            let _ = browser.close().await;
        }
        self.handler_task.abort();
    }
}

fn find_chrome() -> Result<String> {
    for path in CHROME_PATHS {
        if std::path::Path::new(path).exists() {
            return Ok(path.to_string());
        }
    }

    for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Ok(path);
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Chrome/Chromium not found; install it or set BROWSER_URL to a remote DevTools endpoint"
    ))
}
