// handlers/permission_engine.rs - /api/permission-engine handlers

use axum::extract::{rejection::QueryRejection, Query, State};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::models::{ChainVerification, MenuPermission};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{AuditQuery, AuditService, PermissionService};

/// GET /api/permission-engine/menu-permissions
pub async fn menu_permissions(State(state): State<AppState>) -> ApiResult<Vec<MenuPermission>> {
    Ok(ApiResponse::success(
        PermissionService::new(state.store.clone()).catalog().await?,
    ))
}

/// GET /api/permission-engine/audit - newest first
pub async fn audit(
    State(state): State<AppState>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let page = state.pagination(query.page, query.limit);
    let result = AuditService::new(state.store.clone()).list(&query, page).await?;
    Ok(ApiResponse::success(json!({
        "entries": result.items,
        "pagination": result.info(),
    })))
}

/// GET /api/permission-engine/audit/verify
pub async fn audit_verify(State(state): State<AppState>) -> ApiResult<ChainVerification> {
    Ok(ApiResponse::success(AuditService::new(state.store.clone()).verify().await?))
}
