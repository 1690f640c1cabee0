use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use super::error::ServiceResult;
use crate::database::models::audit::verify_chain;
use crate::database::models::{AuditLogEntry, ChainVerification};
use crate::database::store::{AuditFilter, AuditRepository};
use crate::database::{Page, Pagination, Store};
use crate::validation::{FieldErrors, ValidationError};

/// Query string of `GET /api/permission-engine/audit`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<String>,
    pub date_from: Option<String>,
}

impl AuditQuery {
    pub fn to_filter(&self) -> Result<AuditFilter, ValidationError> {
        let mut errors = FieldErrors::default();
        let mut filter = AuditFilter {
            entity_id: self.entity_id.clone().filter(|s| !s.is_empty()),
            ..Default::default()
        };

        if let Some(value) = non_empty(&self.entity_type) {
            match value.parse() {
                Ok(t) => filter.entity_type = Some(t),
                Err(e) => errors.add("entityType", e),
            }
        }
        if let Some(value) = non_empty(&self.action) {
            match value.parse() {
                Ok(a) => filter.action = Some(a),
                Err(e) => errors.add("action", e),
            }
        }
        if let Some(value) = non_empty(&self.date_from) {
            match parse_date_from(value) {
                Some(from) => filter.date_from = Some(from),
                None => errors.add("dateFrom", "Expected RFC 3339 or YYYY-MM-DD"),
            }
        }

        errors.into_result().map(|_| filter)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// RFC 3339 timestamp, or a bare date meaning midnight UTC
pub fn parse_date_from(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

pub struct AuditService {
    store: Arc<dyn Store>,
}

impl AuditService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: &AuditQuery, page: Pagination) -> ServiceResult<Page<AuditLogEntry>> {
        let filter = query.to_filter()?;
        Ok(self.store.list_audit(&filter, page).await?)
    }

    pub async fn verify(&self) -> ServiceResult<ChainVerification> {
        let chain = self.store.audit_chain().await?;
        let result = verify_chain(&chain);
        if !result.chain_intact {
            tracing::warn!(first_break_at = ?result.first_break_at, "Audit hash chain is broken");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AuditAction, AuditEntityType};
    use chrono::{Datelike, Timelike};

    #[test]
    fn bare_dates_mean_midnight_utc() {
        let from = parse_date_from("2024-03-05").unwrap();
        assert_eq!((from.year(), from.month(), from.day(), from.hour()), (2024, 3, 5, 0));
        assert!(parse_date_from("2024-03-05T10:00:00+02:00").is_some());
        assert!(parse_date_from("last tuesday").is_none());
    }

    #[test]
    fn query_parses_enum_filters() {
        let query = AuditQuery {
            entity_type: Some("user".into()),
            action: Some("OVERRIDDEN".into()),
            ..Default::default()
        };
        let filter = query.to_filter().unwrap();
        assert_eq!(filter.entity_type, Some(AuditEntityType::User));
        assert_eq!(filter.action, Some(AuditAction::Overridden));
    }

    #[test]
    fn unknown_filters_are_field_errors() {
        let query = AuditQuery {
            action: Some("DELETED".into()),
            date_from: Some("yesterday".into()),
            ..Default::default()
        };
        let err = query.to_filter().unwrap_err();
        assert!(err.has_field("action"));
        assert!(err.has_field("dateFrom"));
    }
}
