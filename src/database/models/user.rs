use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::permission_override::PermissionOverride;
use super::role::RoleSummary;
use crate::validation::{check_length, is_valid_email, FieldErrors, Validate, ValidationError};

pub const ROLE_REQUIRED: &str = "At least one role is required";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub role_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone(),
        }
    }
}

/// User with roles and active overrides expanded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<RoleSummary>,
    pub permission_overrides: Vec<PermissionOverride>,
}

/// Body of `POST /api/user-management/users`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Validate for CreateUser {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        if self.email.trim().is_empty() {
            errors.add("email", "Email is required");
        } else if !is_valid_email(&self.email) {
            errors.add("email", "Invalid email address");
        }
        check_names(&mut errors, self.first_name.as_deref(), self.last_name.as_deref());
        if self.role_ids.is_empty() {
            errors.add("roleIds", ROLE_REQUIRED);
        }
        errors.into_result()
    }
}

/// Body of `PATCH /api/user-management/users/:id`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_ids: Option<Vec<Uuid>>,
}

impl Validate for UpdateUser {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        check_names(&mut errors, self.first_name.as_deref(), self.last_name.as_deref());
        if matches!(&self.role_ids, Some(ids) if ids.is_empty()) {
            errors.add("roleIds", ROLE_REQUIRED);
        }
        errors.into_result()
    }
}

/// Emails compare case-insensitively
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub(crate) fn check_names(errors: &mut FieldErrors, first: Option<&str>, last: Option<&str>) {
    if let Some(first) = first {
        check_length(errors, "firstName", first, 1, 100);
    }
    if let Some(last) = last {
        check_length(errors, "lastName", last, 1, 100);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_is_required() {
        let input = CreateUser {
            email: "ops@example.com".into(),
            ..Default::default()
        };
        let err = input.validate().unwrap_err();
        assert_eq!(err.field_errors["roleIds"], ROLE_REQUIRED);
    }

    #[test]
    fn rejects_bad_email() {
        let input = CreateUser {
            email: "ops.example.com".into(),
            role_ids: vec![Uuid::new_v4()],
            ..Default::default()
        };
        assert!(input.validate().unwrap_err().has_field("email"));
    }

    #[test]
    fn patch_may_omit_roles_but_not_empty_them() {
        assert!(UpdateUser::default().validate().is_ok());
        let clear = UpdateUser {
            role_ids: Some(vec![]),
            ..Default::default()
        };
        assert!(clear.validate().unwrap_err().has_field("roleIds"));
    }
}
