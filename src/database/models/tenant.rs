use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validation::{check_length, is_valid_domain, is_valid_hex_color, FieldErrors, Validate, ValidationError};

pub const DEFAULT_BRAND_COLOR: &str = "#3B82F6";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Demo,
    Basic,
    Pro,
    Enterprise,
    Custom,
}

impl PlanType {
    pub const ALL: [PlanType; 5] = [
        PlanType::Demo,
        PlanType::Basic,
        PlanType::Pro,
        PlanType::Enterprise,
        PlanType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Demo => "DEMO",
            PlanType::Basic => "BASIC",
            PlanType::Pro => "PRO",
            PlanType::Enterprise => "ENTERPRISE",
            PlanType::Custom => "CUSTOM",
        }
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanType::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown plan type '{}'", s))
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
    Trial,
    Archived,
    PendingSetup,
}

impl TenantStatus {
    pub const ALL: [TenantStatus; 6] = [
        TenantStatus::Active,
        TenantStatus::Inactive,
        TenantStatus::Suspended,
        TenantStatus::Trial,
        TenantStatus::Archived,
        TenantStatus::PendingSetup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "ACTIVE",
            TenantStatus::Inactive => "INACTIVE",
            TenantStatus::Suspended => "SUSPENDED",
            TenantStatus::Trial => "TRIAL",
            TenantStatus::Archived => "ARCHIVED",
            TenantStatus::PendingSetup => "PENDING_SETUP",
        }
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown tenant status '{}'", s))
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An isolated customer organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub plan_type: PlanType,
    pub status: TenantStatus,
    pub brand_color: String,
    pub health_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_archived(&self) -> bool {
        self.status == TenantStatus::Archived
    }
}

/// Body of `POST /api/tenants`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenant {
    pub name: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
}

impl Validate for CreateTenant {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        check_length(&mut errors, "name", &self.name, 2, 100);
        check_domain(&mut errors, &self.domain);
        if let Some(color) = &self.brand_color {
            check_color(&mut errors, color);
        }
        if let Some(score) = self.health_score {
            check_health(&mut errors, score);
        }
        if self.status == Some(TenantStatus::Archived) {
            errors.add("status", "A tenant cannot be created archived");
        }
        errors.into_result()
    }
}

/// Body of `PUT /api/tenants/:id`; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TenantStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
}

impl Validate for UpdateTenant {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        if let Some(name) = &self.name {
            check_length(&mut errors, "name", name, 2, 100);
        }
        if let Some(domain) = &self.domain {
            check_domain(&mut errors, domain);
        }
        if let Some(color) = &self.brand_color {
            check_color(&mut errors, color);
        }
        if let Some(score) = self.health_score {
            check_health(&mut errors, score);
        }
        if self.status == Some(TenantStatus::Archived) {
            errors.add("status", "Use DELETE to archive a tenant");
        }
        errors.into_result()
    }
}

/// Domains compare case-insensitively; store them lowercased
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

fn check_domain(errors: &mut FieldErrors, domain: &str) {
    if domain.trim().is_empty() {
        errors.add("domain", "Domain is required");
    } else if !is_valid_domain(&normalize_domain(domain)) {
        errors.add("domain", "Invalid domain name");
    }
}

fn check_color(errors: &mut FieldErrors, color: &str) {
    if !is_valid_hex_color(color) {
        errors.add("brandColor", "Brand color must be #RRGGBB");
    }
}

fn check_health(errors: &mut FieldErrors, score: u8) {
    if score > 100 {
        errors.add("healthScore", "Health score must be between 0 and 100");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Info,
    Warning,
    Critical,
}

/// One chunk of the tenant insight stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInsight {
    pub tenant_id: Uuid,
    pub title: String,
    pub severity: InsightSeverity,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CreateTenant {
        CreateTenant {
            name: "Acme".into(),
            domain: "acme.example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_tenant() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn uppercase_domain_is_normalized_before_checking() {
        let mut input = valid();
        input.domain = "ACME.Example.com".into();
        assert!(input.validate().is_ok());
        assert_eq!(normalize_domain(&input.domain), "acme.example.com");
    }

    #[test]
    fn reports_every_bad_field() {
        let input = CreateTenant {
            name: "A".into(),
            domain: "not a domain".into(),
            brand_color: Some("blue".into()),
            health_score: Some(140),
            ..Default::default()
        };
        let err = input.validate().unwrap_err();
        assert!(err.has_field("name"));
        assert!(err.has_field("domain"));
        assert!(err.has_field("brandColor"));
        assert!(err.has_field("healthScore"));
    }

    #[test]
    fn update_cannot_archive() {
        let update = UpdateTenant {
            status: Some(TenantStatus::Archived),
            ..Default::default()
        };
        assert!(update.validate().unwrap_err().has_field("status"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!("pending_setup".parse::<TenantStatus>().unwrap(), TenantStatus::PendingSetup);
        assert_eq!(
            serde_json::to_value(TenantStatus::PendingSetup).unwrap(),
            serde_json::json!("PENDING_SETUP")
        );
    }
}
