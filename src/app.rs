use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::{Pagination, Store};
use crate::handlers;
use crate::middleware::{jwt_auth_middleware, request_metrics_middleware};
use crate::services::{Metrics, RecommendationEngine};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub metrics: Arc<Metrics>,
    pub engine: Arc<dyn RecommendationEngine>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig, engine: Arc<dyn RecommendationEngine>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            metrics: Arc::new(Metrics::new()),
            engine,
        }
    }

    /// Pagination from query parameters, bounded by the configured page sizes
    pub fn pagination(&self, page: Option<u32>, limit: Option<u32>) -> Pagination {
        Pagination::new(
            page,
            limit,
            self.config.api.default_page_size,
            self.config.api.max_page_size,
        )
    }
}

pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = state.config.api.max_request_size_bytes;

    Router::new()
        // Public
        .route("/", get(root))
        .route("/health", get(health))
        // Protected API
        .merge(api_routes(state.clone()))
        // Global middleware
        .layer(middleware::from_fn_with_state(state.clone(), request_metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes(state: AppState) -> Router<AppState> {
    use handlers::{permission_engine, recommendations, system, tenants, users};

    Router::new()
        // Tenants
        .route("/api/tenants", get(tenants::list).post(tenants::create))
        .route("/api/tenants/analytics", get(tenants::analytics))
        .route("/api/tenants/ai-recommendations", post(tenants::insights))
        .route(
            "/api/tenants/:id",
            get(tenants::show).put(tenants::update).delete(tenants::delete),
        )
        // Users
        .route("/api/user-management/users", get(users::list).post(users::create))
        .route(
            "/api/user-management/users/:id",
            get(users::show).patch(users::update).delete(users::delete),
        )
        .route(
            "/api/user-management/users/:id/permissions",
            get(users::permissions_get).post(users::permissions_post),
        )
        .route("/api/user-management/roles", get(users::roles))
        // Permission engine
        .route("/api/permission-engine/menu-permissions", get(permission_engine::menu_permissions))
        .route("/api/permission-engine/audit", get(permission_engine::audit))
        .route("/api/permission-engine/audit/verify", get(permission_engine::audit_verify))
        // Recommendations
        .route("/api/ai-recommendations/permissions", get(recommendations::list))
        .route("/api/ai-recommendations/permissions/generate", post(recommendations::generate))
        .route("/api/ai-recommendations/permissions/:id/approve", post(recommendations::approve))
        .route("/api/ai-recommendations/permissions/:id/reject", post(recommendations::reject))
        // System
        .route("/api/system/metrics", get(system::metrics))
        .route_layer(middleware::from_fn_with_state(state, jwt_auth_middleware))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    if config.security.cors_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}

async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Tenant Console API",
            "version": version,
            "description": "Multi-tenant administration backend",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "tenants": "/api/tenants[/:id], /api/tenants/analytics, /api/tenants/ai-recommendations (protected)",
                "users": "/api/user-management/users[/:id[/permissions]], /api/user-management/roles (protected)",
                "permission_engine": "/api/permission-engine/menu-permissions, /api/permission-engine/audit[/verify] (protected)",
                "recommendations": "/api/ai-recommendations/permissions[/generate|/:id/approve|/:id/reject] (protected)",
                "system": "/api/system/metrics (protected)",
            }
        }
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let backend = state.store.backend();

    match state.store.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": backend
                }
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, backend, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database": backend
                    }
                })),
            )
        }
    }
}
