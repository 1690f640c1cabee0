pub mod audit;
pub mod menu;
pub mod permission_override;
pub mod recommendation;
pub mod role;
pub mod tenant;
pub mod user;

pub use audit::{AuditAction, AuditEntityType, AuditLogEntry, ChainVerification, NewAuditEntry};
pub use menu::MenuPermission;
pub use permission_override::{OverrideInput, OverrideType, PermissionChangeRequest, PermissionOverride};
pub use recommendation::{NewRecommendation, Recommendation, RecommendationKind, RecommendationStatus};
pub use role::{Role, RolePermission, RoleSummary};
pub use tenant::{CreateTenant, InsightSeverity, PlanType, Tenant, TenantInsight, TenantStatus, UpdateTenant};
pub use user::{CreateUser, UpdateUser, User, UserView};
