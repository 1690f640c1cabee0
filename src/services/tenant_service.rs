use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use crate::database::models::tenant::{normalize_domain, DEFAULT_BRAND_COLOR};
use crate::database::models::{
    AuditAction, AuditEntityType, CreateTenant, NewAuditEntry, PlanType, Tenant, TenantStatus, UpdateTenant,
};
use crate::database::store::{AuditRepository, TenantFilter, TenantRepository};
use crate::database::{Page, Pagination, Store};
use crate::permissions::baseline;
use crate::validation::{FieldErrors, Validate};

/// Query string of `GET /api/tenants`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub plan_type: Option<String>,
}

impl TenantListQuery {
    pub fn to_filter(&self) -> Result<TenantFilter, crate::validation::ValidationError> {
        let mut errors = FieldErrors::default();
        let mut filter = TenantFilter {
            search: self.search.clone(),
            ..Default::default()
        };
        if let Some(status) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            match status.parse() {
                Ok(s) => filter.status = Some(s),
                Err(e) => errors.add("status", e),
            }
        }
        if let Some(plan) = self.plan_type.as_deref().filter(|s| !s.trim().is_empty()) {
            match plan.parse() {
                Ok(p) => filter.plan_type = Some(p),
                Err(e) => errors.add("planType", e),
            }
        }
        errors.into_result().map(|_| filter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantAnalytics {
    /// Non-archived tenants
    pub total: u64,
    pub by_plan: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub average_health_score: f64,
    pub archived: u64,
}

impl TenantAnalytics {
    pub fn from_tenants(tenants: &[Tenant]) -> Self {
        let mut by_plan: BTreeMap<String, u64> = PlanType::ALL.iter().map(|p| (p.to_string(), 0)).collect();
        let mut by_status: BTreeMap<String, u64> = TenantStatus::ALL
            .iter()
            .filter(|s| **s != TenantStatus::Archived)
            .map(|s| (s.to_string(), 0))
            .collect();

        let mut total = 0u64;
        let mut archived = 0u64;
        let mut health_sum = 0u64;
        for tenant in tenants {
            if tenant.is_archived() {
                archived += 1;
                continue;
            }
            total += 1;
            health_sum += u64::from(tenant.health_score);
            *by_plan.entry(tenant.plan_type.to_string()).or_default() += 1;
            *by_status.entry(tenant.status.to_string()).or_default() += 1;
        }

        let average_health_score = if total == 0 {
            0.0
        } else {
            // One decimal place
            ((health_sum as f64 / total as f64) * 10.0).round() / 10.0
        };

        Self {
            total,
            by_plan,
            by_status,
            average_health_score,
            archived,
        }
    }
}

pub struct TenantService {
    store: Arc<dyn Store>,
}

impl TenantService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: &TenantListQuery, page: Pagination) -> ServiceResult<Page<Tenant>> {
        let filter = query.to_filter()?;
        Ok(self.store.list_tenants(&filter, page).await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Tenant> {
        self.store
            .get_tenant(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Tenant {} not found", id)))
    }

    pub async fn create(&self, input: CreateTenant) -> ServiceResult<Tenant> {
        input.validate()?;

        let now = Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            domain: normalize_domain(&input.domain),
            plan_type: input.plan_type.unwrap_or(PlanType::Demo),
            status: input.status.unwrap_or(TenantStatus::PendingSetup),
            brand_color: input
                .brand_color
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_else(|| DEFAULT_BRAND_COLOR.to_string()),
            health_score: input.health_score.unwrap_or(100),
            description: input.description,
            max_users: input.max_users,
            created_at: now,
            updated_at: now,
            archived_at: None,
        };

        self.store.insert_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, domain = %tenant.domain, "Created tenant");
        Ok(tenant)
    }

    /// Partial update. A non-archived status restores an archived tenant.
    pub async fn update(&self, id: Uuid, input: UpdateTenant) -> ServiceResult<Tenant> {
        input.validate()?;
        let mut tenant = self.get(id).await?;

        if let Some(name) = input.name {
            tenant.name = name.trim().to_string();
        }
        if let Some(domain) = input.domain {
            tenant.domain = normalize_domain(&domain);
        }
        if let Some(plan) = input.plan_type {
            tenant.plan_type = plan;
        }
        if let Some(status) = input.status {
            tenant.status = status;
            tenant.archived_at = None;
        }
        if let Some(color) = input.brand_color {
            tenant.brand_color = color.to_ascii_uppercase();
        }
        if let Some(score) = input.health_score {
            tenant.health_score = score;
        }
        if input.description.is_some() {
            tenant.description = input.description;
        }
        if input.max_users.is_some() {
            tenant.max_users = input.max_users;
        }
        tenant.updated_at = Utc::now();

        self.store.update_tenant(&tenant).await?;
        info!(tenant_id = %tenant.id, "Updated tenant");
        Ok(tenant)
    }

    /// Archive instead of delete. Archiving an archived tenant is a no-op.
    pub async fn archive(&self, id: Uuid, performed_by: &str) -> ServiceResult<Tenant> {
        let mut tenant = self.get(id).await?;
        if tenant.is_archived() {
            return Ok(tenant);
        }

        let previous_status = tenant.status;
        let now = Utc::now();
        tenant.status = TenantStatus::Archived;
        tenant.archived_at = Some(now);
        tenant.updated_at = now;
        self.store.update_tenant(&tenant).await?;

        self.store
            .append_audit(
                NewAuditEntry::new(AuditEntityType::System, tenant.id.to_string(), AuditAction::Modified, performed_by)
                    .values(
                        json!({ "status": previous_status }),
                        json!({ "status": tenant.status, "archivedAt": now }),
                    )
                    .reason(Some("Tenant archived"))
                    .scores(baseline(true)),
            )
            .await?;

        info!(tenant_id = %tenant.id, "Archived tenant");
        Ok(tenant)
    }

    pub async fn analytics(&self) -> ServiceResult<TenantAnalytics> {
        let tenants = self.store.all_tenants().await?;
        Ok(TenantAnalytics::from_tenants(&tenants))
    }
}
