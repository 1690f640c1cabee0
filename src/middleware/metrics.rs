use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::app::AppState;

/// Counts every request and every response with a 4xx/5xx status
pub async fn request_metrics_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    state.metrics.record_request(status.is_client_error() || status.is_server_error());
    response
}
