use crate::server::{
    service::{AppState, IDENTITY_HEADER, error::ApiError},
    telemetry::{increment_allocations, increment_coins, increment_heartbeats, increment_reports},
};
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use shardline::{ShardReport, SwarmStatus};

#[derive(Debug, Deserialize)]
pub struct AllocateParams {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResponse {
    pub chunk: u32,
    pub assigned_start_time: u64,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub key: String,
}

/// A missing `shards` array is rejected rather than read as an empty report.
#[derive(Debug, Deserialize)]
pub struct StatsRequest {
    #[serde(default)]
    pub key: String,
    pub shards: Vec<ShardReport>,
}

/// `GET /allocate?key=K`
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn allocate(
    State(state): State<AppState>,
    Query(params): Query<AllocateParams>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let allocation = state.orchestrator.allocate(&params.key)?;
    increment_allocations();

    Ok(Json(AllocationResponse {
        chunk: allocation.chunk(),
        assigned_start_time: allocation.assigned_start_time(),
    }))
}

/// `GET /shardcoin`, identity taken from the `x-shardline-identity` header.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn shardcoin(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<bool>, ApiError> {
    let identity = headers
        .get(IDENTITY_HEADER)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| ApiError::bad_request(format!("`{IDENTITY_HEADER}` is not valid ASCII")))?
        .unwrap_or_default();

    let granted = state.orchestrator.request_coin(identity)?;
    increment_coins(granted);
    Ok(Json(granted))
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<SwarmStatus> {
    Json(state.orchestrator.status())
}

/// `POST /heartbeat` with `{"key": K}`
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn heartbeat(
    State(state): State<AppState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body?;
    state.orchestrator.heartbeat(&request.key)?;
    increment_heartbeats();
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /stats` with `{"key": K, "shards": [...]}`
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub async fn stats(
    State(state): State<AppState>,
    body: Result<Json<StatsRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body?;
    state
        .orchestrator
        .submit_report(&request.key, request.shards)?;
    increment_reports();
    Ok(StatusCode::NO_CONTENT)
}
