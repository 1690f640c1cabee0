pub mod audit_service;
pub mod error;
pub mod insight;
pub mod metrics;
pub mod permission_service;
pub mod recommendation_engine;
pub mod recommendation_service;
pub mod tenant_service;
pub mod user_service;

pub use audit_service::{AuditQuery, AuditService};
pub use error::{ServiceError, ServiceResult};
pub use insight::{InsightRequest, InsightService};
pub use metrics::{Metrics, SystemMetrics};
pub use permission_service::{PermissionService, UserPermissions};
pub use recommendation_engine::{EngineError, HeuristicEngine, HttpEngine, RecommendationEngine};
pub use recommendation_service::{DecisionRequest, GenerateRequest, RecommendationQuery, RecommendationService};
pub use tenant_service::{TenantAnalytics, TenantListQuery, TenantService};
pub use user_service::{UserListQuery, UserService};
