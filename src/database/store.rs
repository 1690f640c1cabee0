//! Storage abstraction.
//!
//! Each entity family has its own repository trait; [`Store`] bundles them so
//! handlers can share one `Arc<dyn Store>`. Two implementations exist: the
//! Postgres store used in deployments and the in-memory store used when no
//! database is configured (and by the test suite).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::{
    AuditAction, AuditEntityType, AuditLogEntry, MenuPermission, NewAuditEntry, PermissionOverride,
    PlanType, Recommendation, RecommendationStatus, Role, Tenant, TenantStatus, User,
};

pub type StoreResult<T> = Result<T, DatabaseError>;

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit.max(1)),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn info(&self) -> PageInfo {
        let limit = u64::from(self.pagination.limit);
        PageInfo {
            page: self.pagination.page,
            limit: self.pagination.limit,
            total: self.total,
            total_pages: self.total.div_ceil(limit),
        }
    }

    /// Slice an already filtered and ordered collection
    pub fn from_vec(all: Vec<T>, pagination: Pagination) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit as usize)
            .collect();
        Self { items, total, pagination }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TenantFilter {
    pub search: Option<String>,
    /// `None` means every status except ARCHIVED
    pub status: Option<TenantStatus>,
    pub plan_type: Option<PlanType>,
}

impl TenantFilter {
    pub fn matches(&self, tenant: &Tenant) -> bool {
        let status_ok = match self.status {
            Some(status) => tenant.status == status,
            None => !tenant.is_archived(),
        };
        let plan_ok = self.plan_type.map_or(true, |p| tenant.plan_type == p);
        let search_ok = match search_term(&self.search) {
            Some(term) => {
                tenant.name.to_lowercase().contains(&term) || tenant.domain.to_lowercase().contains(&term)
            }
            None => true,
        };
        status_ok && plan_ok && search_ok
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub tenant_id: Option<Uuid>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        let search_ok = match search_term(&self.search) {
            Some(term) => [Some(&user.email), user.first_name.as_ref(), user.last_name.as_ref()]
                .into_iter()
                .flatten()
                .any(|v| v.to_lowercase().contains(&term)),
            None => true,
        };
        search_ok
            && self.role_id.map_or(true, |r| user.role_ids.contains(&r))
            && self.is_active.map_or(true, |a| user.is_active == a)
            && self.tenant_id.map_or(true, |t| user.tenant_id == Some(t))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<AuditEntityType>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub date_from: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        self.entity_type.map_or(true, |t| entry.entity_type == t)
            && self.entity_id.as_ref().map_or(true, |id| &entry.entity_id == id)
            && self.action.map_or(true, |a| entry.action == a)
            && self.date_from.map_or(true, |from| entry.performed_at >= from)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecommendationFilter {
    pub status: Option<RecommendationStatus>,
    pub user_id: Option<Uuid>,
}

impl RecommendationFilter {
    pub fn matches(&self, rec: &Recommendation) -> bool {
        self.status.map_or(true, |s| rec.status == s) && self.user_id.map_or(true, |u| rec.user_id == u)
    }
}

fn search_term(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Fails with `Conflict` when the domain is taken by any tenant, archived or not
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    /// Replaces the stored record; same domain rule as insert, excluding itself
    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn get_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>>;
    async fn list_tenants(&self, filter: &TenantFilter, page: Pagination) -> StoreResult<Page<Tenant>>;
    async fn all_tenants(&self) -> StoreResult<Vec<Tenant>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` on a duplicate email
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> StoreResult<Page<User>>;
    async fn count_users(&self, filter: &UserFilter) -> StoreResult<u64>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn insert_menu_permission(&self, menu: &MenuPermission) -> StoreResult<()>;
    async fn list_menu_permissions(&self) -> StoreResult<Vec<MenuPermission>>;
}

#[async_trait]
pub trait OverrideRepository: Send + Sync {
    /// Revokes the active override on the same user and menu, then inserts the
    /// new one, atomically. Returns the superseded override.
    async fn supersede_override(
        &self,
        next: &PermissionOverride,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PermissionOverride>>;
    /// Returns the override as it was before revocation, or `None` when it
    /// does not exist or was already revoked
    async fn revoke_override(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<PermissionOverride>>;
    /// Every override the user ever had, oldest first
    async fn list_overrides(&self, user_id: Uuid) -> StoreResult<Vec<PermissionOverride>>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Seals the entry onto the end of the chain
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry>;
    /// Newest first
    async fn list_audit(&self, filter: &AuditFilter, page: Pagination) -> StoreResult<Page<AuditLogEntry>>;
    /// Whole chain in sequence order
    async fn audit_chain(&self) -> StoreResult<Vec<AuditLogEntry>>;
    async fn count_audit(&self) -> StoreResult<u64>;
}

#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    async fn insert_recommendation(&self, rec: &Recommendation) -> StoreResult<()>;
    async fn update_recommendation(&self, rec: &Recommendation) -> StoreResult<()>;
    /// Writes the decision only while the stored row is still PENDING.
    /// Returns `false` when another decision got there first.
    async fn claim_recommendation(&self, rec: &Recommendation) -> StoreResult<bool>;
    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Option<Recommendation>>;
    /// Newest first
    async fn list_recommendations(&self, filter: &RecommendationFilter) -> StoreResult<Vec<Recommendation>>;
}

#[async_trait]
pub trait Store:
    TenantRepository
    + UserRepository
    + RoleRepository
    + CatalogRepository
    + OverrideRepository
    + AuditRepository
    + RecommendationRepository
{
    fn backend(&self) -> &'static str;
    async fn health_check(&self) -> StoreResult<()>;
}
