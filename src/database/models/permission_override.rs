use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::ActionSet;
use crate::validation::{FieldErrors, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideType {
    Grant,
    Deny,
    Custom,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::Grant => "GRANT",
            OverrideType::Deny => "DENY",
            OverrideType::Custom => "CUSTOM",
        }
    }
}

impl FromStr for OverrideType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GRANT" => Ok(OverrideType::Grant),
            "DENY" => Ok(OverrideType::Deny),
            "CUSTOM" => Ok(OverrideType::Custom),
            other => Err(format!("unknown override type '{}'", other)),
        }
    }
}

/// Per-user exception layered over role defaults for one menu item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverride {
    pub id: Uuid,
    pub user_id: Uuid,
    pub menu_permission_id: Uuid,
    pub override_type: OverrideType,
    pub allowed_actions: ActionSet,
    pub denied_actions: ActionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PermissionOverride {
    /// Not revoked and not past its expiry
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// One override in a permissions change request.
///
/// The target menu is addressed either by id or by `menuKey`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_permission_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_key: Option<String>,
    pub override_type: Option<OverrideType>,
    #[serde(default)]
    pub allowed_actions: ActionSet,
    #[serde(default)]
    pub denied_actions: ActionSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OverrideInput {
    /// Shape checks that don't need the catalog. `prefix` scopes field names,
    /// e.g. `overrides[0]`.
    pub fn check(&self, prefix: &str, now: DateTime<Utc>, errors: &mut FieldErrors) {
        let field = |name: &str| format!("{}.{}", prefix, name);

        if self.menu_permission_id.is_none() && self.menu_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            errors.add(field("menuPermissionId"), "A menu permission id or menuKey is required");
        }

        let overlap: Vec<_> = self.allowed_actions.intersection(&self.denied_actions).collect();
        if !overlap.is_empty() {
            errors.add(field("deniedActions"), "An action cannot be both allowed and denied");
        }

        match self.override_type {
            None => errors.add(field("overrideType"), "Override type is required"),
            Some(OverrideType::Grant) => {
                if self.allowed_actions.is_empty() {
                    errors.add(field("allowedActions"), "A grant must allow at least one action");
                }
                if !self.denied_actions.is_empty() {
                    errors.add(field("deniedActions"), "A grant cannot deny actions");
                }
            }
            Some(OverrideType::Deny) => {
                if self.denied_actions.is_empty() {
                    errors.add(field("deniedActions"), "A deny must deny at least one action");
                }
                if !self.allowed_actions.is_empty() {
                    errors.add(field("allowedActions"), "A deny cannot allow actions");
                }
            }
            Some(OverrideType::Custom) => {
                if self.allowed_actions.is_empty() && self.denied_actions.is_empty() {
                    errors.add(field("allowedActions"), "A custom override must change at least one action");
                }
            }
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                errors.add(field("expiresAt"), "Expiry must be in the future");
            }
        }
    }
}

/// Body of `POST /api/user-management/users/:id/permissions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionChangeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub overrides: Vec<OverrideInput>,
    #[serde(default)]
    pub revoke_override_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionChangeRequest {
    pub fn validate_at(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();

        if matches!(&self.role_ids, Some(ids) if ids.is_empty()) {
            errors.add("roleIds", super::user::ROLE_REQUIRED);
        }

        for (idx, input) in self.overrides.iter().enumerate() {
            input.check(&format!("overrides[{}]", idx), now, &mut errors);
        }

        let has_reason = self.reason.as_deref().map_or(false, |r| !r.trim().is_empty());
        if !self.overrides.is_empty() && !has_reason {
            errors.add("reason", "A reason is required when creating overrides");
        }

        if self.role_ids.is_none() && self.overrides.is_empty() && self.revoke_override_ids.is_empty() {
            return Err(ValidationError::new("No permission changes supplied"));
        }

        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Action;
    use chrono::Duration;

    fn grant(actions: &[Action]) -> OverrideInput {
        OverrideInput {
            menu_key: Some("tenants".into()),
            override_type: Some(OverrideType::Grant),
            allowed_actions: actions.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn expiry_controls_activity() {
        let now = Utc::now();
        let mut o = PermissionOverride {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            menu_permission_id: Uuid::new_v4(),
            override_type: OverrideType::Grant,
            allowed_actions: [Action::Read].into_iter().collect(),
            denied_actions: ActionSet::new(),
            reason: None,
            expires_at: Some(now + Duration::hours(1)),
            created_by: "ops".into(),
            created_at: now,
            revoked_at: None,
        };
        assert!(o.is_active(now));
        assert!(!o.is_active(now + Duration::hours(2)));
        o.expires_at = None;
        o.revoked_at = Some(now);
        assert!(!o.is_active(now));
    }

    #[test]
    fn grant_cannot_deny() {
        let mut input = grant(&[Action::Write]);
        input.denied_actions.insert(Action::Delete);
        let mut errors = FieldErrors::default();
        input.check("overrides[0]", Utc::now(), &mut errors);
        let err = errors.into_result().unwrap_err();
        assert!(err.has_field("overrides[0].deniedActions"));
    }

    #[test]
    fn overrides_need_a_reason() {
        let request = PermissionChangeRequest {
            overrides: vec![grant(&[Action::Write])],
            ..Default::default()
        };
        let err = request.validate_at(Utc::now()).unwrap_err();
        assert!(err.has_field("reason"));
    }

    #[test]
    fn empty_request_is_rejected() {
        assert!(PermissionChangeRequest::default().validate_at(Utc::now()).is_err());
    }

    #[test]
    fn past_expiry_is_rejected() {
        let now = Utc::now();
        let mut input = grant(&[Action::Read]);
        input.expires_at = Some(now - Duration::minutes(1));
        let mut errors = FieldErrors::default();
        input.check("o", now, &mut errors);
        assert!(errors.into_result().unwrap_err().has_field("o.expiresAt"));
    }
}
