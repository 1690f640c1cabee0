pub mod auth;
pub mod metrics;
pub mod response;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use metrics::request_metrics_middleware;
pub use response::{ApiResponse, ApiResult};
