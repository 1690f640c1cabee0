//! CLI input forms. Each form is validated in full before the client sends
//! anything, using the same rules the server applies.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::database::models::user::{check_names, ROLE_REQUIRED};
use crate::database::models::{CreateTenant, OverrideInput, OverrideType, PermissionChangeRequest};
use crate::permissions::parse_action_list;
use crate::validation::{is_valid_email, FieldErrors, Validate, ValidationError};

/// `console user create`
#[derive(Debug, Clone, Default)]
pub struct NewUserForm {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Role names or ids; resolved against the server after validation
    pub roles: Vec<String>,
    pub tenant_id: Option<Uuid>,
}

impl Validate for NewUserForm {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = FieldErrors::default();
        if self.email.trim().is_empty() {
            errors.add("email", "Email is required");
        } else if !is_valid_email(&self.email) {
            errors.add("email", "Invalid email address");
        }
        check_names(&mut errors, self.first_name.as_deref(), self.last_name.as_deref());
        if self.roles.iter().all(|r| r.trim().is_empty()) {
            errors.add("roleIds", ROLE_REQUIRED);
        }
        errors.into_result()
    }
}

/// `console tenant create`
#[derive(Debug, Clone, Default)]
pub struct NewTenantForm {
    pub name: String,
    pub domain: String,
    pub plan_type: Option<String>,
    pub status: Option<String>,
    pub brand_color: Option<String>,
    pub health_score: Option<u8>,
    pub description: Option<String>,
    pub max_users: Option<u32>,
}

impl NewTenantForm {
    pub fn to_request(&self) -> Result<CreateTenant, ValidationError> {
        let mut errors = FieldErrors::default();
        let mut request = CreateTenant {
            name: self.name.clone(),
            domain: self.domain.clone(),
            brand_color: self.brand_color.clone(),
            health_score: self.health_score,
            description: self.description.clone(),
            max_users: self.max_users,
            ..Default::default()
        };
        if let Some(plan) = &self.plan_type {
            match plan.parse() {
                Ok(p) => request.plan_type = Some(p),
                Err(e) => errors.add("planType", e),
            }
        }
        if let Some(status) = &self.status {
            match status.parse() {
                Ok(s) => request.status = Some(s),
                Err(e) => errors.add("status", e),
            }
        }

        if let Err(err) = request.validate() {
            for (field, message) in err.field_errors {
                errors.add(field, message);
            }
        }
        errors.into_result().map(|_| request)
    }
}

impl Validate for NewTenantForm {
    fn validate(&self) -> Result<(), ValidationError> {
        self.to_request().map(|_| ())
    }
}

/// `console permission override`
#[derive(Debug, Clone, Default)]
pub struct OverrideForm {
    pub menu_key: String,
    pub override_type: String,
    /// Comma separated, e.g. `read,write`
    pub allow: Option<String>,
    pub deny: Option<String>,
    pub expires_in_hours: Option<i64>,
    pub reason: Option<String>,
}

impl OverrideForm {
    pub fn to_request(&self, now: DateTime<Utc>) -> Result<PermissionChangeRequest, ValidationError> {
        let mut errors = FieldErrors::default();
        let mut input = OverrideInput {
            menu_key: Some(self.menu_key.trim().to_string()).filter(|k| !k.is_empty()),
            ..Default::default()
        };

        match self.override_type.parse::<OverrideType>() {
            Ok(t) => input.override_type = Some(t),
            Err(e) => errors.add("overrideType", e),
        }
        match parse_action_list(self.allow.as_deref().unwrap_or_default()) {
            Ok(set) => input.allowed_actions = set,
            Err(e) => errors.add("allowedActions", e),
        }
        match parse_action_list(self.deny.as_deref().unwrap_or_default()) {
            Ok(set) => input.denied_actions = set,
            Err(e) => errors.add("deniedActions", e),
        }
        if let Some(hours) = self.expires_in_hours {
            if hours <= 0 {
                errors.add("expiresAt", "Expiry must be in the future");
            } else {
                input.expires_at = Some(now + Duration::hours(hours));
            }
        }

        let request = PermissionChangeRequest {
            overrides: vec![input],
            reason: self.reason.clone(),
            ..Default::default()
        };
        if let Err(err) = request.validate_at(now) {
            for (field, message) in err.field_errors {
                // Single override; report fields without the list prefix
                let field = field.strip_prefix("overrides[0].").map(str::to_string).unwrap_or(field);
                errors.add(field, message);
            }
        }
        errors.into_result().map(|_| request)
    }
}

impl Validate for OverrideForm {
    fn validate(&self) -> Result<(), ValidationError> {
        self.to_request(Utc::now()).map(|_| ())
    }
}

/// Human readable list of field errors
pub fn describe(err: &ValidationError) -> String {
    if err.field_errors.is_empty() {
        return err.message.clone();
    }
    let fields: Vec<String> = err
        .field_errors
        .iter()
        .map(|(field, message)| format!("{}: {}", field, message))
        .collect();
    format!("{} ({})", err.message, fields.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_form_requires_a_role() {
        let form = NewUserForm {
            email: "dana@example.com".into(),
            ..Default::default()
        };
        let err = form.validate().unwrap_err();
        assert_eq!(err.field_errors["roleIds"], ROLE_REQUIRED);

        let form = NewUserForm {
            roles: vec!["viewer".into()],
            ..form
        };
        assert!(form.validate().is_ok());
    }

    #[test]
    fn tenant_form_reports_every_field() {
        let form = NewTenantForm {
            name: "A".into(),
            domain: "not a domain".into(),
            plan_type: Some("PLATINUM".into()),
            brand_color: Some("blue".into()),
            ..Default::default()
        };
        let err = form.validate().unwrap_err();
        for field in ["name", "domain", "planType", "brandColor"] {
            assert!(err.has_field(field), "missing {}", field);
        }
    }

    #[test]
    fn override_form_builds_request() {
        let now = Utc::now();
        let form = OverrideForm {
            menu_key: "tenants".into(),
            override_type: "grant".into(),
            allow: Some("read, delete".into()),
            expires_in_hours: Some(24),
            reason: Some("Quarter close".into()),
            ..Default::default()
        };
        let request = form.to_request(now).unwrap();
        assert_eq!(request.overrides[0].allowed_actions.len(), 2);
        assert_eq!(request.overrides[0].expires_at, Some(now + Duration::hours(24)));
    }

    #[test]
    fn override_form_needs_reason_and_known_actions() {
        let form = OverrideForm {
            menu_key: "tenants".into(),
            override_type: "deny".into(),
            deny: Some("read,fly".into()),
            ..Default::default()
        };
        let err = form.validate().unwrap_err();
        assert!(err.has_field("deniedActions"));
        assert!(err.has_field("reason"));
    }
}
