// handlers/system.rs - /api/system handlers

use axum::extract::State;

use crate::app::AppState;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::metrics::collect;
use crate::services::SystemMetrics;

/// GET /api/system/metrics
pub async fn metrics(State(state): State<AppState>) -> ApiResult<SystemMetrics> {
    let snapshot = collect(state.store.as_ref(), &state.metrics).await?;
    Ok(ApiResponse::success(snapshot))
}
