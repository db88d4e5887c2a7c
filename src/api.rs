//! REST API server for the documentation pipeline.
//!
//! Provides HTTP endpoints for:
//! - Job submission (from a Git host or an uploaded archive)
//! - Status polling
//! - Resuming a crashed/cancelled job
//!
//! This is ambient scaffolding around the orchestrator core, not a
//! reimplementation of the excluded outer surfaces (auth, dashboards,
//! user/bot CRUD).

use crate::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
use crate::config::Config;
use crate::corpus::{CorpusFetcher, CorpusSource};
use crate::embedder::HttpEmbeddingClient;
use crate::error::{PipelineError, Result};
use crate::llm::HttpLlmClient;
use crate::orchestrator::{CancellationToken, GenerationOutput, NullProgressSink, Orchestrator};
use crate::outline::Chapter;
use crate::rag::RagEngine;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// A completed job's output, held in memory once its checkpoint has been
/// deleted so the final markdown stays retrievable by repeated status polls.
#[derive(Debug, Clone)]
struct CompletedJob {
    markdown: String,
    chapters: Vec<Chapter>,
    owner: String,
    repo_name: String,
    total_files: usize,
    total_chars: usize,
    duration_seconds: f64,
    pdf_ref: Option<String>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator<HttpEmbeddingClient, HttpLlmClient>>,
    checkpoints: CheckpointStore,
    completed: Arc<RwLock<HashMap<String, CompletedJob>>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let embedder = HttpEmbeddingClient::new(&config.embedding);
        let llm = HttpLlmClient::new(&config.llm).await?;
        let rag = RagEngine::new(embedder, llm, config.rag.clone());
        let corpus_fetcher = CorpusFetcher::new(config.corpus.clone())?;
        let checkpoints = CheckpointStore::new(config.checkpoint.clone()).await?;
        // No concrete `PdfRenderer` ships with this crate; PDF rendering is an
        // external collaborator (§1 Non-goals) invoked only when a host wires one in.
        let orchestrator =
            Orchestrator::new(corpus_fetcher, rag, checkpoints.clone(), None, config.orchestrator.pdf_output_dir.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            checkpoints,
            completed: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

/// Request to start documentation generation for a remote repository.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateJobRequest {
    /// Repository owner/org.
    #[schema(example = "acme")]
    pub owner: String,
    /// Repository name.
    #[schema(example = "tool")]
    pub repo_name: String,
    /// Full repo URL, stored for display/checkpoint purposes only.
    #[schema(example = "https://github.com/acme/tool")]
    pub repo_url: Option<String>,
}

/// Request to start documentation generation from an uploaded archive.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateArchiveJobRequest {
    pub owner: String,
    pub repo_name: String,
    /// Base64-encoded zip archive bytes.
    pub archive_base64: String,
}

/// Response for job submission.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CreateJobResponse {
    /// Opaque job identifier; also the checkpoint's `repo_id`.
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub job_id: String,
    #[schema(example = "pending")]
    pub status: String,
}

/// Response for a job status poll.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub current_step: String,
    pub error: Option<String>,
    pub result: Option<JobResult>,
}

/// Final output of a completed job (§6 job outputs shape).
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct JobResult {
    pub markdown: String,
    pub chapters: Vec<Chapter>,
    pub repo_info: RepoInfo,
    pub duration_seconds: f64,
    /// Path/URL of the rendered PDF, absent when no renderer was configured
    /// or rendering failed (§7 `PartialFailure`).
    pub pdf_ref: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RepoInfo {
    pub owner: String,
    pub repo_name: String,
    pub total_files: usize,
    pub total_chars: usize,
}

/// Health check response.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "0.1.0")]
    pub version: String,
}

/// Error response.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorResponse {
    #[schema(example = "validation_failure")]
    pub error: String,
    pub details: Option<String>,
}

/// Custom error type for API responses.
#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::Validation { .. } => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Transient { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            PipelineError::PartialFailure { .. } => StatusCode::OK,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse { error: self.0.category().to_string(), details: Some(self.0.to_string()) });

        (status, body).into_response()
    }
}

/// Convert `Result<T>` to `Result<T, ApiError>`.
type ApiResult<T> = std::result::Result<T, ApiError>;

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_job_handler,
        create_archive_job_handler,
        get_job_status_handler,
        resume_job_handler,
    ),
    components(
        schemas(
            CreateJobRequest,
            CreateArchiveJobRequest,
            CreateJobResponse,
            JobStatusResponse,
            JobResult,
            RepoInfo,
            HealthResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "jobs", description = "Documentation generation jobs")
    ),
    info(
        title = "reposcribe API",
        version = "0.1.0",
        description = "REST API for the RAG-driven documentation pipeline orchestrator\n\nProvides endpoints for:\n- Submitting a repository or archive for documentation generation\n- Polling job status and progress\n- Resuming a crashed or cancelled job",
        contact(
            name = "Turing Works",
            email = "rboddipalli@turingworks.com",
            url = "https://turingworks.com"
        )
    )
)]
struct ApiDoc;

/// Bind and serve the API router until the process is terminated.
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!(%addr, "starting API server");

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PipelineError::Internal(format!("failed to bind to {addr}: {e}")))?;

    info!(%addr, "API server listening");

    axum::serve(listener, app).await.map_err(|e| PipelineError::Internal(format!("server error: {e}")))?;

    Ok(())
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/jobs", post(create_job_handler))
        .route("/api/v1/jobs/archive", post(create_archive_job_handler))
        .route("/api/v1/jobs/{id}", get(get_job_status_handler))
        .route("/api/v1/jobs/{id}/resume", post(resume_job_handler))
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: crate::VERSION.to_string() })
}

fn spawn_job(state: AppState, job_id: String, source: CorpusSource, repo_url: Option<String>, owner: String, repo_name: String) {
    tokio::spawn(async move {
        let sink = NullProgressSink;
        let cancellation = CancellationToken::new();
        let result = state.orchestrator.generate(&job_id, source, repo_url, &owner, &repo_name, &sink, &cancellation).await;
        record_outcome(&state, &job_id, result).await;
    });
}

fn spawn_resume(state: AppState, job_id: String) {
    tokio::spawn(async move {
        let sink = NullProgressSink;
        let cancellation = CancellationToken::new();
        let result = state.orchestrator.resume(&job_id, &sink, &cancellation).await;
        record_outcome(&state, &job_id, result).await;
    });
}

async fn record_outcome(state: &AppState, job_id: &str, result: Result<GenerationOutput>) {
    match result {
        Ok(output) => {
            info!(repo_id = %job_id, "generation job finished");
            let mut completed = state.completed.write().await;
            completed.insert(
                job_id.to_string(),
                CompletedJob {
                    markdown: output.markdown,
                    chapters: output.chapters,
                    owner: output.owner,
                    repo_name: output.repo_name,
                    total_files: output.total_files,
                    total_chars: output.total_chars,
                    duration_seconds: output.duration_seconds,
                    pdf_ref: output.pdf_path,
                },
            );
        }
        Err(e) => {
            error!(repo_id = %job_id, error = %e, "generation job failed");
        }
    }
}

/// Submit a repository for documentation generation.
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    tag = "jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = CreateJobResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
async fn create_job_handler(State(state): State<AppState>, Json(request): Json<CreateJobRequest>) -> ApiResult<Json<CreateJobResponse>> {
    let job_id = Uuid::new_v4().to_string();
    info!(repo_id = %job_id, owner = %request.owner, repo = %request.repo_name, "submitting remote repo job");

    let source = CorpusSource::Remote { owner: request.owner.clone(), repo: request.repo_name.clone() };
    spawn_job(state, job_id.clone(), source, request.repo_url, request.owner, request.repo_name);

    Ok(Json(CreateJobResponse { job_id, status: "pending".to_string() }))
}

/// Submit an uploaded archive for documentation generation.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/archive",
    tag = "jobs",
    request_body = CreateArchiveJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = CreateJobResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
async fn create_archive_job_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateArchiveJobRequest>,
) -> ApiResult<Json<CreateJobResponse>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&request.archive_base64)
        .map_err(|e| ApiError::from(PipelineError::validation("ingesting", format!("invalid base64 archive: {e}"))))?;

    let job_id = Uuid::new_v4().to_string();
    info!(repo_id = %job_id, owner = %request.owner, repo = %request.repo_name, "submitting archive job");

    let source = CorpusSource::Archive { bytes };
    spawn_job(state, job_id.clone(), source, None, request.owner, request.repo_name);

    Ok(Json(CreateJobResponse { job_id, status: "pending".to_string() }))
}

fn status_response(job_id: &str, checkpoint: Option<Checkpoint>, completed: Option<CompletedJob>) -> JobStatusResponse {
    if let Some(job) = completed {
        return JobStatusResponse {
            job_id: job_id.to_string(),
            status: "completed".to_string(),
            progress: 100,
            current_step: "done".to_string(),
            error: None,
            result: Some(JobResult {
                markdown: job.markdown,
                chapters: job.chapters,
                repo_info: RepoInfo {
                    owner: job.owner,
                    repo_name: job.repo_name,
                    total_files: job.total_files,
                    total_chars: job.total_chars,
                },
                duration_seconds: job.duration_seconds,
                pdf_ref: job.pdf_ref,
            }),
        };
    }

    match checkpoint {
        Some(cp) => JobStatusResponse {
            job_id: job_id.to_string(),
            status: status_label(&cp.status).to_string(),
            progress: cp.progress,
            current_step: cp.current_step,
            error: cp.error,
            result: None,
        },
        None => JobStatusResponse {
            job_id: job_id.to_string(),
            status: "not_found".to_string(),
            progress: 0,
            current_step: String::new(),
            error: None,
            result: None,
        },
    }
}

fn status_label(status: &CheckpointStatus) -> &'static str {
    match status {
        CheckpointStatus::Pending => "pending",
        CheckpointStatus::Ingesting => "ingesting",
        CheckpointStatus::Scanning => "scanning",
        CheckpointStatus::Indexing => "indexing",
        CheckpointStatus::Generating => "generating",
        CheckpointStatus::Merging => "merging",
        CheckpointStatus::Completed => "completed",
        CheckpointStatus::Failed => "failed",
    }
}

/// Poll a job's current status and, once complete, its result.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    tag = "jobs",
    params(("id" = String, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
async fn get_job_status_handler(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<JobStatusResponse>> {
    let completed = state.completed.read().await.get(&job_id).cloned();
    if completed.is_some() {
        return Ok(Json(status_response(&job_id, None, completed)));
    }

    let checkpoint = state.checkpoints.get(&job_id).await.map_err(ApiError::from)?;
    if checkpoint.is_none() {
        return Err(ApiError::from(PipelineError::NotFound(format!("no job found for id: {job_id}"))));
    }

    Ok(Json(status_response(&job_id, checkpoint, None)))
}

/// Resume a crashed or cancelled job from its last checkpoint.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/resume",
    tag = "jobs",
    params(("id" = String, Path, description = "Job identifier")),
    responses(
        (status = 202, description = "Resume accepted", body = CreateJobResponse),
        (status = 404, description = "Checkpoint not found", body = ErrorResponse),
        (status = 400, description = "Job already completed", body = ErrorResponse)
    )
)]
async fn resume_job_handler(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResult<Json<CreateJobResponse>> {
    let checkpoint = state
        .checkpoints
        .get(&job_id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(PipelineError::NotFound(format!("no checkpoint found for id: {job_id}"))))?;

    if checkpoint.status == CheckpointStatus::Completed {
        return Err(ApiError::from(PipelineError::validation("resuming", format!("job already completed: {job_id}"))));
    }

    info!(repo_id = %job_id, "resuming generation job");
    spawn_resume(state, job_id.clone());

    Ok(Json(CreateJobResponse { job_id, status: "resuming".to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_covers_every_variant() {
        assert_eq!(status_label(&CheckpointStatus::Pending), "pending");
        assert_eq!(status_label(&CheckpointStatus::Completed), "completed");
        assert_eq!(status_label(&CheckpointStatus::Failed), "failed");
    }

    #[test]
    fn status_response_prefers_completed_job_over_checkpoint() {
        let job = CompletedJob {
            markdown: "# Hello".to_string(),
            chapters: vec![],
            owner: "acme".to_string(),
            repo_name: "tool".to_string(),
            total_files: 3,
            total_chars: 128,
            duration_seconds: 1.5,
            pdf_ref: None,
        };
        let resp = status_response("job-1", None, Some(job));
        assert_eq!(resp.status, "completed");
        assert_eq!(resp.progress, 100);
        assert!(resp.result.is_some());
    }

    #[test]
    fn status_response_reports_not_found_when_nothing_exists() {
        let resp = status_response("job-missing", None, None);
        assert_eq!(resp.status, "not_found");
    }
}
