use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::RecommendationStatus;
use crate::database::store::{RecommendationFilter, TenantFilter, UserFilter};
use crate::database::store::{AuditRepository, RecommendationRepository, TenantRepository, UserRepository};
use crate::database::Store;

use super::error::ServiceResult;

/// Process-wide request counters
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, is_error: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn requests(&self) -> RequestCounters {
        RequestCounters {
            total: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCounters {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub uptime_seconds: u64,
    pub requests: RequestCounters,
    pub tenants: u64,
    pub users: u64,
    pub audit_entries: u64,
    pub pending_recommendations: u64,
    pub timestamp: DateTime<Utc>,
}

/// Counters plus entity counts. `tenants` excludes archived tenants.
pub async fn collect(store: &dyn Store, metrics: &Metrics) -> ServiceResult<SystemMetrics> {
    let tenants = store
        .all_tenants()
        .await?
        .iter()
        .filter(|t| TenantFilter::default().matches(t))
        .count() as u64;
    let users = store.count_users(&UserFilter::default()).await?;
    let audit_entries = store.count_audit().await?;
    let pending_recommendations = store
        .list_recommendations(&RecommendationFilter {
            status: Some(RecommendationStatus::Pending),
            user_id: None,
        })
        .await?
        .len() as u64;

    Ok(SystemMetrics {
        uptime_seconds: metrics.uptime_seconds(),
        requests: metrics.requests(),
        tenants,
        users,
        audit_entries,
        pending_recommendations,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_requests_and_errors() {
        let metrics = Metrics::new();
        metrics.record_request(false);
        metrics.record_request(true);
        metrics.record_request(false);
        assert_eq!(metrics.requests(), RequestCounters { total: 3, errors: 1 });
    }
}
