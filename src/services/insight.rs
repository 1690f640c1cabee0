//! Tenant insights derived from tenant records and their user counts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use crate::database::models::{InsightSeverity, Tenant, TenantInsight, TenantStatus};
use crate::database::store::{TenantRepository, UserFilter, UserRepository};
use crate::database::Store;

pub const CRITICAL_HEALTH: u8 = 50;
pub const WARNING_HEALTH: u8 = 70;
pub const TRIAL_DAYS: i64 = 14;
pub const SETUP_DAYS: i64 = 7;
/// Percent of `maxUsers` at which a tenant becomes an upgrade candidate
pub const UPGRADE_THRESHOLD: u64 = 90;

/// Body of `POST /api/tenants/ai-recommendations`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub tenant_id: Option<Uuid>,
}

fn insight(tenant: &Tenant, severity: InsightSeverity, title: &str, message: String) -> TenantInsight {
    TenantInsight {
        tenant_id: tenant.id,
        title: title.to_string(),
        severity,
        message,
    }
}

pub fn tenant_insights(tenant: &Tenant, user_count: u64, now: DateTime<Utc>) -> Vec<TenantInsight> {
    let mut out = Vec::new();
    let age = now - tenant.created_at;

    if tenant.health_score < CRITICAL_HEALTH {
        out.push(insight(
            tenant,
            InsightSeverity::Critical,
            "Low health score",
            format!("{} has a health score of {}", tenant.name, tenant.health_score),
        ));
    } else if tenant.health_score < WARNING_HEALTH {
        out.push(insight(
            tenant,
            InsightSeverity::Warning,
            "Declining health score",
            format!("{} has a health score of {}", tenant.name, tenant.health_score),
        ));
    }

    match tenant.status {
        TenantStatus::Trial if age > Duration::days(TRIAL_DAYS) => out.push(insight(
            tenant,
            InsightSeverity::Warning,
            "Long-running trial",
            format!("{} has been on trial for {} days", tenant.name, age.num_days()),
        )),
        TenantStatus::PendingSetup if age > Duration::days(SETUP_DAYS) => out.push(insight(
            tenant,
            InsightSeverity::Warning,
            "Setup not completed",
            format!("{} has been pending setup for {} days", tenant.name, age.num_days()),
        )),
        _ => {}
    }

    if let Some(max) = tenant.max_users.filter(|m| *m > 0) {
        let max = u64::from(max);
        if user_count > max {
            out.push(insight(
                tenant,
                InsightSeverity::Critical,
                "User limit exceeded",
                format!("{} has {} users on a limit of {}", tenant.name, user_count, max),
            ));
        } else if user_count * 100 >= max * UPGRADE_THRESHOLD {
            out.push(insight(
                tenant,
                InsightSeverity::Info,
                "Upgrade candidate",
                format!(
                    "{} uses {} of {} seats on the {} plan",
                    tenant.name, user_count, max, tenant.plan_type
                ),
            ));
        }
    }

    if out.is_empty() {
        out.push(insight(
            tenant,
            InsightSeverity::Info,
            "Healthy",
            format!("{} shows no issues", tenant.name),
        ));
    }
    out
}

pub struct InsightService {
    store: Arc<dyn Store>,
}

impl InsightService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insights for one tenant, or for every non-archived tenant
    pub async fn collect(&self, tenant_id: Option<Uuid>) -> ServiceResult<Vec<TenantInsight>> {
        let tenants = match tenant_id {
            Some(id) => vec![self
                .store
                .get_tenant(id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Tenant {} not found", id)))?],
            None => self
                .store
                .all_tenants()
                .await?
                .into_iter()
                .filter(|t| !t.is_archived())
                .collect(),
        };

        let mut counts = HashMap::with_capacity(tenants.len());
        for tenant in &tenants {
            let filter = UserFilter {
                tenant_id: Some(tenant.id),
                ..Default::default()
            };
            counts.insert(tenant.id, self.store.count_users(&filter).await?);
        }

        let now = Utc::now();
        Ok(tenants
            .iter()
            .flat_map(|t| tenant_insights(t, counts.get(&t.id).copied().unwrap_or(0), now))
            .collect())
    }
}
