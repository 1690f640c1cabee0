// handlers/users.rs - /api/user-management handlers

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{CreateUser, PermissionChangeRequest, Role, UpdateUser, UserView};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::{PermissionService, UserListQuery, UserPermissions, UserService};

/// GET /api/user-management/users
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<UserListQuery>, QueryRejection>,
) -> ApiResult<Value> {
    let Query(query) = query?;
    let page = state.pagination(query.page, query.limit);
    let result = UserService::new(state.store.clone()).list(&query, page).await?;
    Ok(ApiResponse::success(json!({
        "users": result.items,
        "pagination": result.info(),
    })))
}

/// POST /api/user-management/users
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> ApiResult<UserView> {
    let Json(input) = payload?;
    let view = UserService::new(state.store.clone())
        .create(input, user.performed_by())
        .await?;
    Ok(ApiResponse::created(view))
}

/// GET /api/user-management/users/:id
pub async fn show(State(state): State<AppState>, id: Result<Path<Uuid>, PathRejection>) -> ApiResult<UserView> {
    let Path(id) = id?;
    Ok(ApiResponse::success(UserService::new(state.store.clone()).view(id).await?))
}

/// PATCH /api/user-management/users/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateUser>, JsonRejection>,
) -> ApiResult<UserView> {
    let Path(id) = id?;
    let Json(input) = payload?;
    let view = UserService::new(state.store.clone())
        .update(id, input, user.performed_by())
        .await?;
    Ok(ApiResponse::success(view))
}

/// DELETE /api/user-management/users/:id - deactivates the user
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<UserView> {
    let Path(id) = id?;
    let view = UserService::new(state.store.clone())
        .deactivate(id, user.performed_by())
        .await?;
    Ok(ApiResponse::success(view))
}

/// GET /api/user-management/roles
pub async fn roles(State(state): State<AppState>) -> ApiResult<Vec<Role>> {
    Ok(ApiResponse::success(UserService::new(state.store.clone()).roles().await?))
}

/// GET /api/user-management/users/:id/permissions
pub async fn permissions_get(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<UserPermissions> {
    let Path(id) = id?;
    Ok(ApiResponse::success(
        PermissionService::new(state.store.clone()).user_permissions(id).await?,
    ))
}

/// POST /api/user-management/users/:id/permissions
///
/// Applies role replacement, revocations and new overrides, in that order.
pub async fn permissions_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PermissionChangeRequest>, JsonRejection>,
) -> ApiResult<UserPermissions> {
    let Path(id) = id?;
    let Json(request) = payload?;
    let result = PermissionService::new(state.store.clone())
        .apply_changes(id, request, user.performed_by())
        .await?;
    Ok(ApiResponse::success(result))
}
