//! Worker lifecycle endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::worker::{WorkerKind, WorkerSize};

/// Worker routes, nested under /v1/workers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workers).post(provision_workers))
        .route("/{worker_id}", get(get_worker))
        .route("/{worker_id}/drain", post(drain_worker))
        .route("/{worker_id}/destroy", post(destroy_worker))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<WorkerKind>,
}

/// GET /v1/workers?kind=
async fn list_workers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workers = state.workers().list_workers(query.kind).await?;
    Ok(Json(workers))
}

/// GET /v1/workers/{worker_id}
async fn get_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state.workers().get_worker_details(&worker_id).await?;
    Ok(Json(worker))
}

#[derive(Debug, Deserialize)]
struct ProvisionRequest {
    #[serde(default = "default_count")]
    count: u32,
    #[serde(default = "default_ttl_hours")]
    ttl_hours: u32,
    #[serde(default)]
    size: WorkerSize,
}

fn default_count() -> u32 {
    1
}

fn default_ttl_hours() -> u32 {
    4
}

/// POST /v1/workers
async fn provision_workers(
    State(state): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let provisioned = state
        .workers()
        .provision_workers(request.count, request.ttl_hours, request.size)
        .await?;
    Ok((StatusCode::CREATED, Json(provisioned)))
}

#[derive(Debug, Deserialize)]
struct DrainQuery {
    /// When set, block until the worker is observed drained or the wait
    /// times out.
    wait_seconds: Option<u64>,
}

/// POST /v1/workers/{worker_id}/drain?wait_seconds=
async fn drain_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    Query(query): Query<DrainQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut report = state.workers().drain_worker(&worker_id).await?;

    if let Some(wait_seconds) = query.wait_seconds {
        report.state = state
            .workers()
            .wait_for_drained(&worker_id, wait_seconds)
            .await?;
    }

    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
struct DestroyRequest {
    #[serde(default)]
    force: bool,
}

/// POST /v1/workers/{worker_id}/destroy
///
/// Body is optional; an absent body means no force.
async fn destroy_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
    request: Option<Json<DestroyRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request.unwrap_or_default();
    let outcome = state
        .workers()
        .destroy_worker(&worker_id, request.force)
        .await?;
    Ok(Json(outcome))
}
