//! Allocation ledger endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use corral_id::AllocationId;
use corral_ledger::{AllocationRequest, AllocationState, ReleaseOutcome};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Allocation routes, nested under /v1/allocations.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(request_resources).get(list_allocations))
        .route("/sweep", post(sweep))
        .route(
            "/{allocation_id}",
            get(get_allocation).delete(release_resources),
        )
}

/// Capacity routes, nested under /v1/capacity.
pub fn capacity_routes() -> Router<AppState> {
    Router::new().route("/", get(get_capacity))
}

/// POST /v1/allocations
///
/// A capacity shortfall is a normal outcome: the response carries a
/// `failed`-state allocation with the shortfall description, not an error
/// status.
async fn request_resources(
    State(state): State<AppState>,
    Json(request): Json<AllocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let allocation = state.registry().request_resources(request)?;
    let status = if allocation.state == AllocationState::Active {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(allocation)))
}

/// DELETE /v1/allocations/{allocation_id}
async fn release_resources(
    State(state): State<AppState>,
    Path(allocation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let allocation_id = parse_allocation_id(&allocation_id)?;

    match state.registry().release_resources(allocation_id) {
        ReleaseOutcome::NotFound { allocation_id } => Err(ApiError::not_found(
            "allocation_not_found",
            format!("allocation {allocation_id} not found"),
        )),
        outcome => Ok(Json(outcome)),
    }
}

/// GET /v1/allocations/{allocation_id}
async fn get_allocation(
    State(state): State<AppState>,
    Path(allocation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let allocation_id = parse_allocation_id(&allocation_id)?;

    state
        .registry()
        .get_allocation(allocation_id)
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(
                "allocation_not_found",
                format!("allocation {allocation_id} not found"),
            )
        })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
    job_id: Option<String>,
}

/// GET /v1/allocations?state=&job_id=
async fn list_allocations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let state_filter = query
        .state
        .as_deref()
        .map(str::parse::<AllocationState>)
        .transpose()
        .map_err(|e| ApiError::bad_request("invalid_state_filter", e))?;

    let allocations = state
        .registry()
        .list_allocations(state_filter, query.job_id.as_deref());
    Ok(Json(allocations))
}

/// GET /v1/capacity
async fn get_capacity(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry().get_capacity())
}

#[derive(Debug, Serialize)]
struct SweepResponse {
    released: Vec<AllocationId>,
    count: usize,
}

/// POST /v1/allocations/sweep
///
/// Manual trigger for the same sweep the background loop runs.
async fn sweep(State(state): State<AppState>) -> impl IntoResponse {
    let released = state.registry().cleanup_expired_allocations();
    let count = released.len();
    Json(SweepResponse { released, count })
}

fn parse_allocation_id(raw: &str) -> Result<AllocationId, ApiError> {
    AllocationId::parse(raw).map_err(|e| {
        ApiError::bad_request("invalid_allocation_id", format!("{raw}: {e}"))
    })
}
