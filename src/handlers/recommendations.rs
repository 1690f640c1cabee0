// handlers/recommendations.rs - /api/ai-recommendations handlers

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension,
};
use uuid::Uuid;

use super::optional_json;
use crate::app::AppState;
use crate::database::models::Recommendation;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::recommendation_service::Decision;
use crate::services::{DecisionRequest, GenerateRequest, RecommendationQuery, RecommendationService};

fn service(state: &AppState) -> RecommendationService {
    RecommendationService::new(
        state.store.clone(),
        state.engine.clone(),
        state.config.recommendations.max_per_run,
    )
}

/// GET /api/ai-recommendations/permissions?status&userId
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<RecommendationQuery>, QueryRejection>,
) -> ApiResult<Vec<Recommendation>> {
    let Query(query) = query?;
    Ok(ApiResponse::success(service(&state).list(&query).await?))
}

/// POST /api/ai-recommendations/permissions/generate
pub async fn generate(State(state): State<AppState>, body: Bytes) -> ApiResult<Vec<Recommendation>> {
    let request: GenerateRequest = optional_json(&body)?;
    let stored = service(&state).generate(request.user_id).await?;
    Ok(ApiResponse::created(stored))
}

/// POST /api/ai-recommendations/permissions/:id/approve
pub async fn approve(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> ApiResult<Decision> {
    let Path(id) = id?;
    let request: DecisionRequest = optional_json(&body)?;
    let decision = service(&state)
        .approve(id, request.reason.as_deref(), user.performed_by())
        .await?;
    Ok(ApiResponse::success(decision))
}

/// POST /api/ai-recommendations/permissions/:id/reject
pub async fn reject(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> ApiResult<Recommendation> {
    let Path(id) = id?;
    let request: DecisionRequest = optional_json(&body)?;
    let rec = service(&state)
        .reject(id, request.reason.as_deref(), user.performed_by())
        .await?;
    Ok(ApiResponse::success(rec))
}
