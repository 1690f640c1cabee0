// handlers/tenants.rs - /api/tenants handlers

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};
use uuid::Uuid;

use super::optional_json;
use crate::app::AppState;
use crate::database::models::{CreateTenant, Tenant, TenantInsight, UpdateTenant};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::{InsightRequest, InsightService, TenantAnalytics, TenantListQuery, TenantService};

/// GET /api/tenants - paginated listing, archived tenants only on `status=ARCHIVED`
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<TenantListQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let page = state.pagination(query.page, query.limit);
    let result = TenantService::new(state.store.clone()).list(&query, page).await?;
    Ok(ApiResponse::success(json!({
        "tenants": result.items,
        "pagination": result.info(),
    })))
}

/// POST /api/tenants
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateTenant>, JsonRejection>,
) -> ApiResult<Tenant> {
    let Json(input) = payload?;
    let tenant = TenantService::new(state.store.clone()).create(input).await?;
    Ok(ApiResponse::created(tenant))
}

/// GET /api/tenants/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<Uuid>, PathRejection>) -> ApiResult<Tenant> {
    let Path(id) = id?;
    Ok(ApiResponse::success(TenantService::new(state.store.clone()).get(id).await?))
}

/// PUT /api/tenants/:id - partial update
pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateTenant>, JsonRejection>,
) -> ApiResult<Tenant> {
    let Path(id) = id?;
    let Json(input) = payload?;
    Ok(ApiResponse::success(
        TenantService::new(state.store.clone()).update(id, input).await?,
    ))
}

/// DELETE /api/tenants/:id - archives the tenant
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Tenant> {
    let Path(id) = id?;
    let tenant = TenantService::new(state.store.clone())
        .archive(id, user.performed_by())
        .await?;
    Ok(ApiResponse::success(tenant))
}

/// GET /api/tenants/analytics
pub async fn analytics(State(state): State<AppState>) -> ApiResult<TenantAnalytics> {
    Ok(ApiResponse::success(
        TenantService::new(state.store.clone()).analytics().await?,
    ))
}

/// POST /api/tenants/ai-recommendations - insight stream
///
/// Each insight is one `data:` event; the stream ends with `data: [DONE]`.
pub async fn insights(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request: InsightRequest = optional_json(&body)?;
    let items = InsightService::new(state.store.clone())
        .collect(request.tenant_id)
        .await?;
    tracing::debug!(count = items.len(), "Streaming tenant insights");

    let delay = Duration::from_millis(state.config.recommendations.stream_delay_ms);
    Ok(Sse::new(insight_stream(items, delay)).keep_alive(KeepAlive::default()))
}

fn insight_stream(
    items: Vec<TenantInsight>,
    delay: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let insights = stream::iter(items.into_iter().enumerate()).then(move |(i, insight)| async move {
        if i > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let data = serde_json::to_string(&insight).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });
    insights.chain(stream::once(async { Ok(Event::default().data("[DONE]")) }))
}
