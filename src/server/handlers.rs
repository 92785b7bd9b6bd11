//! Submission API endpoint handlers.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::AppState;
use crate::models::{JobStatus, TaskConfig};
use crate::runner::sanitize_output_name;
use crate::submit::{self, SubmitError, ADHOC_JOB_NAME};

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Structured error taxonomy surfaced to API clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("unknown job '{0}'")]
    UnknownJob(String),
    #[error("job not found")]
    NotFound,
    #[error("job failed: {0}")]
    JobFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::UnknownJob(_) => "unknown_job",
            ApiError::NotFound => "not_found",
            ApiError::JobFailed(_) => "job_failed",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownJob(_) | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::JobFailed(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": {"kind": self.kind(), "message": self.to_string()}
        }));
        (self.status(), body).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(message) => ApiError::Validation(message),
            SubmitError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub name: Option<String>,
    pub config: Option<TaskConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub job_name: String,
    pub status_url: String,
    pub results_url: String,
}

fn submit_response(job_id: Uuid, job_name: &str) -> SubmitResponse {
    SubmitResponse {
        job_id,
        job_name: job_name.to_string(),
        status_url: format!("/crawl/status/{}", job_id),
        results_url: format!("/crawl/results/{}", job_id),
    }
}

/// `POST /crawl`: submit an ad-hoc config or a single-task named job.
pub async fn submit_crawl(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    match (body.name, body.config) {
        (Some(_), Some(_)) | (None, None) => Err(ApiError::Validation(
            "provide exactly one of 'name' or 'config'".to_string(),
        )),
        (None, Some(config)) => {
            let job_id = submit::submit_task(&state.queue, &state.jobs, ADHOC_JOB_NAME, &config, 0)?;
            Ok((
                StatusCode::ACCEPTED,
                Json(submit_response(job_id, ADHOC_JOB_NAME)),
            ))
        }
        (Some(name), None) => {
            let tasks = state
                .registry
                .job(&name)
                .ok_or_else(|| ApiError::UnknownJob(name.clone()))?;
            if tasks.len() != 1 {
                return Err(ApiError::Validation(format!(
                    "job '{}' has {} tasks; submit it via /crawl/batch",
                    name,
                    tasks.len()
                )));
            }
            let job_id = submit::submit_task(&state.queue, &state.jobs, &name, &tasks[0], 0)?;
            Ok((StatusCode::ACCEPTED, Json(submit_response(job_id, &name))))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub config_index: usize,
    pub job_id: Uuid,
    pub status_url: String,
    pub results_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub job_name: String,
    pub config_count: usize,
    pub configs: Vec<BatchEntry>,
}

/// `POST /crawl/batch`: enqueue every task of a named job.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    let tasks = state
        .registry
        .job(&body.name)
        .ok_or_else(|| ApiError::UnknownJob(body.name.clone()))?;

    // Validate everything up front so a bad task cannot leave a partial batch.
    for task in tasks {
        submit::validate_task(task)?;
    }

    let mut configs = Vec::with_capacity(tasks.len());
    for (config_index, task) in tasks.iter().enumerate() {
        let job_id = submit::submit_task(&state.queue, &state.jobs, &body.name, task, 0)?;
        configs.push(BatchEntry {
            config_index,
            job_id,
            status_url: format!("/crawl/status/{}", job_id),
            results_url: format!("/crawl/results/{}", job_id),
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponse {
            job_name: body.name,
            config_count: configs.len(),
            configs,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /crawl/status/:job_id`
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let record = state
        .jobs
        .get(job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(StatusResponse {
        job_id: record.id,
        status: record.status,
        created_at: record.created_at.to_rfc3339(),
        completed_at: record.completed_at.map(|dt| dt.to_rfc3339()),
        error: record.error,
    }))
}

/// `GET /crawl/results/:job_id`: 202 while processing, stream on success.
pub async fn job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let record = state
        .jobs
        .get(job_id)
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or(ApiError::NotFound)?;

    match record.status {
        JobStatus::Pending | JobStatus::Running => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "jobId": record.id,
                "status": record.status,
                "statusUrl": format!("/crawl/status/{}", record.id),
            })),
        )
            .into_response()),
        JobStatus::Failed => Err(ApiError::JobFailed(
            record.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        JobStatus::Completed => {
            let output_file = record
                .output_file
                .ok_or_else(|| ApiError::Internal("completed job has no output file".to_string()))?;
            let file = tokio::fs::File::open(&output_file)
                .await
                .map_err(|e| ApiError::Internal(format!("cannot open {}: {}", output_file, e)))?;
            let stream = ReaderStream::new(file);
            let response = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from_stream(stream))
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            Ok(response)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationEntry {
    pub name: String,
    pub config_count: usize,
    pub output_file_name: String,
}

/// `GET /configurations`: registered jobs and their task counts.
pub async fn list_configurations(State(state): State<AppState>) -> impl IntoResponse {
    let jobs: Vec<ConfigurationEntry> = state
        .registry
        .iter()
        .map(|(name, tasks)| {
            let output_file_name = if tasks.len() == 1 {
                sanitize_output_name(tasks[0].output_file_name.as_deref(), name)
            } else {
                format!("{}.json", name)
            };
            ConfigurationEntry {
                name: name.to_string(),
                config_count: tasks.len(),
                output_file_name,
            }
        })
        .collect();

    Json(serde_json::json!({ "jobs": jobs }))
}

fn parse_job_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::Validation(format!("invalid job id '{}'", raw)))
}
