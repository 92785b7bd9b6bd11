//! HTTP submission API over the job store and queue.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::config::Settings;
use crate::registry::JobRegistry;
use crate::store::{JobStore, QueueStore};

/// Shared state for the API.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueStore>,
    pub jobs: Arc<JobStore>,
    pub registry: Arc<JobRegistry>,
    pub global: crate::models::GlobalConfig,
    /// When set, every request must present this key.
    pub api_key: Option<Arc<String>>,
}

impl AppState {
    pub fn new(settings: &Settings, registry: JobRegistry) -> Result<Self> {
        let queue =
            QueueStore::open(&settings.queue_db_path()).context("failed to open queue store")?;
        let jobs = JobStore::open(&settings.jobs_db_path()).context("failed to open job store")?;
        Ok(Self {
            queue: Arc::new(queue),
            jobs: Arc::new(jobs),
            global: registry.global,
            registry: Arc::new(registry),
            api_key: settings.api_key.clone().map(Arc::new),
        })
    }
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve(settings: &Settings, registry: JobRegistry) -> Result<()> {
    let state = AppState::new(settings, registry)?;
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.api_host, settings.api_port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                settings.api_host, settings.api_port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("API stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// API-key check. Accepts `Authorization: Bearer <key>` or a bare key.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|h| h.strip_prefix("Bearer ").unwrap_or(h).trim());

    match presented {
        Some(key) if key == expected.as_str() => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": {"kind": "unauthorized", "message": "missing or invalid API key"}
            })),
        )
            .into_response(),
    }
}
