//! Role assignment and per-user overrides.
//!
//! A change request is checked completely against the catalog and the user's
//! current overrides before anything is written, then applied in order:
//! role replacement, revocations, new overrides.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use super::user_service::{check_roles_exist, replace_roles, UserService};
use crate::database::models::{
    AuditAction, AuditEntityType, MenuPermission, NewAuditEntry, OverrideInput, OverrideType, PermissionChangeRequest,
    PermissionOverride, Role, User,
};
use crate::database::store::{AuditRepository, CatalogRepository, OverrideRepository, RoleRepository, UserRepository};
use crate::database::Store;
use crate::permissions::{assess, resolve, ActionSet, ChangeProfile, EffectivePermission, EffectivePermissions};
use crate::validation::FieldErrors;

/// Response of the user permissions endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    pub user: User,
    pub roles: Vec<Role>,
    /// Active overrides only
    pub overrides: Vec<PermissionOverride>,
    pub effective: Vec<EffectivePermission>,
}

/// A validated override ready to be stored
#[derive(Debug, Clone)]
pub struct OverrideGrant {
    pub menu: MenuPermission,
    pub override_type: OverrideType,
    pub allowed_actions: ActionSet,
    pub denied_actions: ActionSet,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct PermissionService {
    store: Arc<dyn Store>,
    users: UserService,
}

impl PermissionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            users: UserService::new(store.clone()),
            store,
        }
    }

    pub async fn catalog(&self) -> ServiceResult<Vec<MenuPermission>> {
        Ok(self.store.list_menu_permissions().await?)
    }

    pub async fn effective(&self, user: &User, now: DateTime<Utc>) -> ServiceResult<EffectivePermissions> {
        let catalog = self.store.list_menu_permissions().await?;
        let roles = assigned_roles(user, &self.store.list_roles().await?);
        let overrides = self.store.list_overrides(user.id).await?;
        Ok(resolve(&catalog, &roles, &overrides, now))
    }

    pub async fn user_permissions(&self, user_id: Uuid) -> ServiceResult<UserPermissions> {
        let user = self.users.get(user_id).await?;
        let now = Utc::now();
        let catalog = self.store.list_menu_permissions().await?;
        let roles = assigned_roles(&user, &self.store.list_roles().await?);
        let overrides = self.store.list_overrides(user.id).await?;
        let effective = resolve(&catalog, &roles, &overrides, now);

        Ok(UserPermissions {
            roles,
            overrides: overrides.into_iter().filter(|o| o.is_active(now)).collect(),
            effective: effective.iter().cloned().collect(),
            user,
        })
    }

    pub async fn apply_changes(
        &self,
        user_id: Uuid,
        request: PermissionChangeRequest,
        performed_by: &str,
    ) -> ServiceResult<UserPermissions> {
        let now = Utc::now();
        request.validate_at(now)?;

        let mut user = self.users.get(user_id).await?;
        let catalog = self.store.list_menu_permissions().await?;
        let roles = self.store.list_roles().await?;
        let existing = self.store.list_overrides(user_id).await?;
        let reason = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty());

        // Check everything before the first write
        if let Some(ids) = &request.role_ids {
            check_roles_exist(ids, &roles)?;
        }
        for id in &request.revoke_override_ids {
            if !existing.iter().any(|o| o.id == *id && o.revoked_at.is_none()) {
                return Err(ServiceError::NotFound(format!(
                    "Override {} not found or already revoked for user {}",
                    id, user_id
                )));
            }
        }
        let grants = resolve_overrides(&request.overrides, &catalog, reason)?;

        if let Some(ids) = request.role_ids {
            if let Some(previous) = replace_roles(&mut user, ids) {
                user.updated_at = now;
                self.store.update_user(&user).await?;
                self.users
                    .audit_role_change(&user, &previous, &roles, reason, performed_by)
                    .await?;
                info!(user_id = %user.id, "Replaced user roles");
            }
        }

        for id in &request.revoke_override_ids {
            if let Some(revoked) = self.store.revoke_override(*id, now).await? {
                let menu = catalog.iter().find(|m| m.id == revoked.menu_permission_id);
                self.audit_revocation(&revoked, menu, reason.unwrap_or("Override revoked"), performed_by)
                    .await?;
                info!(user_id = %user.id, override_id = %revoked.id, "Revoked override");
            }
        }

        for grant in grants {
            self.grant_override(&user, grant, performed_by).await?;
        }

        self.user_permissions(user_id).await
    }

    /// Store one override, superseding the active one on the same menu
    pub async fn grant_override(
        &self,
        user: &User,
        grant: OverrideGrant,
        performed_by: &str,
    ) -> ServiceResult<PermissionOverride> {
        let now = Utc::now();
        let record = PermissionOverride {
            id: Uuid::new_v4(),
            user_id: user.id,
            menu_permission_id: grant.menu.id,
            override_type: grant.override_type,
            allowed_actions: grant.allowed_actions,
            denied_actions: grant.denied_actions,
            reason: grant.reason,
            expires_at: grant.expires_at,
            created_by: performed_by.to_string(),
            created_at: now,
            revoked_at: None,
        };

        if let Some(previous) = self.store.supersede_override(&record, now).await? {
            let why = format!("Superseded by override {}", record.id);
            self.audit_revocation(&previous, Some(&grant.menu), &why, performed_by).await?;
        }

        let granting = !record.allowed_actions.is_empty();
        let scored: ActionSet = if granting {
            record.allowed_actions.clone()
        } else {
            record.denied_actions.clone()
        };
        let assessment = assess(ChangeProfile {
            level: grant.menu.ai_security_level,
            actions: &scored,
            granting,
            has_expiry: record.expires_at.is_some(),
            has_reason: record.reason.is_some(),
        });

        self.store
            .append_audit(
                NewAuditEntry::new(AuditEntityType::User, user.id.to_string(), AuditAction::Overridden, performed_by)
                    .values(json!(null), override_values(&record, &grant.menu))
                    .reason(record.reason.as_deref())
                    .scores(assessment),
            )
            .await?;

        info!(user_id = %user.id, override_id = %record.id, menu_key = %grant.menu.menu_key, "Created override");
        Ok(record)
    }

    async fn audit_revocation(
        &self,
        revoked: &PermissionOverride,
        menu: Option<&MenuPermission>,
        reason: &str,
        performed_by: &str,
    ) -> ServiceResult<()> {
        let mut old_values = json!({
            "overrideId": revoked.id,
            "overrideType": revoked.override_type,
            "allowedActions": revoked.allowed_actions,
            "deniedActions": revoked.denied_actions,
        });
        if let Some(menu) = menu {
            old_values["menuKey"] = json!(menu.menu_key);
        }

        let scores = match menu {
            Some(menu) => assess(ChangeProfile {
                level: menu.ai_security_level,
                actions: &revoked.allowed_actions,
                granting: false,
                has_expiry: true,
                has_reason: true,
            }),
            None => crate::permissions::baseline(true),
        };

        self.store
            .append_audit(
                NewAuditEntry::new(
                    AuditEntityType::User,
                    revoked.user_id.to_string(),
                    AuditAction::Revoked,
                    performed_by,
                )
                .values(old_values, json!({ "revoked": true }))
                .reason(Some(reason))
                .scores(scores),
            )
            .await?;
        Ok(())
    }
}

fn assigned_roles(user: &User, roles: &[Role]) -> Vec<Role> {
    roles.iter().filter(|r| user.role_ids.contains(&r.id)).cloned().collect()
}

fn override_values(record: &PermissionOverride, menu: &MenuPermission) -> serde_json::Value {
    json!({
        "overrideId": record.id,
        "menuKey": menu.menu_key,
        "menuPermissionId": menu.id,
        "overrideType": record.override_type,
        "allowedActions": record.allowed_actions,
        "deniedActions": record.denied_actions,
        "expiresAt": record.expires_at,
    })
}

/// Look up each override's menu and check its actions against the menu's
/// required actions
pub fn resolve_overrides(
    inputs: &[OverrideInput],
    catalog: &[MenuPermission],
    reason: Option<&str>,
) -> Result<Vec<OverrideGrant>, crate::validation::ValidationError> {
    let mut errors = FieldErrors::default();
    let mut grants = Vec::with_capacity(inputs.len());

    for (idx, input) in inputs.iter().enumerate() {
        let field = |name: &str| format!("overrides[{}].{}", idx, name);

        let menu = match (&input.menu_permission_id, input.menu_key.as_deref()) {
            (Some(id), _) => catalog.iter().find(|m| m.id == *id),
            (None, Some(key)) => catalog.iter().find(|m| m.menu_key == key.trim()),
            (None, None) => None,
        };
        let Some(menu) = menu else {
            errors.add(field("menuPermissionId"), "Unknown menu permission");
            continue;
        };

        for (name, actions) in [("allowedActions", &input.allowed_actions), ("deniedActions", &input.denied_actions)] {
            let unsupported: Vec<&str> = actions
                .difference(&menu.required_actions)
                .map(|a| a.as_str())
                .collect();
            if !unsupported.is_empty() {
                errors.add(
                    field(name),
                    format!("Not supported by menu '{}': {}", menu.menu_key, unsupported.join(", ")),
                );
            }
        }

        if let Some(override_type) = input.override_type {
            grants.push(OverrideGrant {
                menu: menu.clone(),
                override_type,
                allowed_actions: input.allowed_actions.clone(),
                denied_actions: input.denied_actions.clone(),
                reason: reason.map(str::to_string),
                expires_at: input.expires_at,
            });
        }
    }

    errors.into_result().map(|_| grants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::CreateUser;
    use crate::database::MemoryStore;
    use crate::permissions::{seed_defaults, Action, CatalogSeed, PermissionSource};

    struct Fixture {
        store: Arc<MemoryStore>,
        service: PermissionService,
        user: User,
    }

    async fn fixture(role: &str) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        seed_defaults(store.as_ref(), &CatalogSeed::builtin().unwrap()).await.unwrap();
        let roles = store.list_roles().await.unwrap();
        let role = roles.iter().find(|r| r.name == role).unwrap();
        let view = UserService::new(store.clone())
            .create(
                CreateUser {
                    email: "dana@example.com".into(),
                    role_ids: vec![role.id],
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        Fixture {
            service: PermissionService::new(store.clone()),
            store,
            user: view.user,
        }
    }

    fn input(menu_key: &str, override_type: OverrideType, allowed: &[Action], denied: &[Action]) -> OverrideInput {
        OverrideInput {
            menu_key: Some(menu_key.into()),
            override_type: Some(override_type),
            allowed_actions: allowed.iter().copied().collect(),
            denied_actions: denied.iter().copied().collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn grant_then_deny_via_requests() {
        let f = fixture("viewer").await;
        let result = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    overrides: vec![input("tenants", OverrideType::Grant, &[Action::Write], &[])],
                    reason: Some("covering for a colleague".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        let tenants = result.effective.iter().find(|p| p.menu_key == "tenants").unwrap();
        assert!(tenants.allows(Action::Write));
        assert_eq!(tenants.source, PermissionSource::Override);

        let result = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    overrides: vec![input("tenants", OverrideType::Deny, &[], &[Action::Read])],
                    reason: Some("incident".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        let tenants = result.effective.iter().find(|p| p.menu_key == "tenants").unwrap();
        // The deny superseded the grant, so write is gone along with read
        assert!(!tenants.allows(Action::Read));
        assert!(!tenants.allows(Action::Write));
        assert_eq!(result.overrides.len(), 1);
    }

    #[tokio::test]
    async fn superseding_records_revoked_then_overridden() {
        let f = fixture("viewer").await;
        for _ in 0..2 {
            f.service
                .apply_changes(
                    f.user.id,
                    PermissionChangeRequest {
                        overrides: vec![input("users", OverrideType::Grant, &[Action::Write], &[])],
                        reason: Some("project".into()),
                        ..Default::default()
                    },
                    "ops",
                )
                .await
                .unwrap();
        }
        let actions: Vec<_> = f.store.audit_chain().await.unwrap().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Granted,
                AuditAction::Overridden,
                AuditAction::Revoked,
                AuditAction::Overridden
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_overrides_leave_one_active() {
        let f = fixture("viewer").await;
        let change = |allowed: Action| PermissionChangeRequest {
            overrides: vec![input("tenants", OverrideType::Grant, &[allowed], &[])],
            reason: Some("race".into()),
            ..Default::default()
        };
        let (a, b) = tokio::join!(
            f.service.apply_changes(f.user.id, change(Action::Write), "ops"),
            f.service.apply_changes(f.user.id, change(Action::Delete), "ops"),
        );
        a.unwrap();
        b.unwrap();

        let now = Utc::now();
        let active: Vec<_> = f
            .store
            .list_overrides(f.user.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|o| o.is_active(now))
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_action_is_rejected_before_writing() {
        let f = fixture("viewer").await;
        let err = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    overrides: vec![input("dashboard", OverrideType::Grant, &[Action::Admin], &[])],
                    reason: Some("why not".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(v) if v.has_field("overrides[0].allowedActions")));
        assert_eq!(f.store.count_audit().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn revoking_restores_role_defaults() {
        let f = fixture("viewer").await;
        let result = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    overrides: vec![input("tenants", OverrideType::Deny, &[], &[Action::Read])],
                    reason: Some("audit hold".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        let override_id = result.overrides[0].id;

        let result = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    revoke_override_ids: vec![override_id],
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        let tenants = result.effective.iter().find(|p| p.menu_key == "tenants").unwrap();
        assert!(tenants.allows(Action::Read));
        assert!(!tenants.has_override);

        let again = f
            .service
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    revoke_override_ids: vec![override_id],
                    ..Default::default()
                },
                "ops",
            )
            .await;
        assert!(matches!(again, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let f = fixture("viewer").await;
        assert!(matches!(
            f.service.user_permissions(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
