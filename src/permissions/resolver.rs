//! Effective permission resolution.
//!
//! A user's access to a menu item starts from the union of the actions every
//! assigned role grants on it. Active overrides then add their allowed actions
//! and collect their denied actions; denied actions are removed last, so a deny
//! wins over any grant for the same action regardless of where the grant came
//! from. Expired and revoked overrides are ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::{Action, ActionSet};
use crate::database::models::{MenuPermission, PermissionOverride, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionSource {
    Role,
    Override,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermission {
    pub menu_key: String,
    pub menu_permission_id: Uuid,
    pub allowed_actions: ActionSet,
    pub denied_actions: ActionSet,
    pub source: PermissionSource,
    pub has_override: bool,
}

impl EffectivePermission {
    pub fn allows(&self, action: Action) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// `menuKey` → effective permission, one entry per catalog item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeMap<String, EffectivePermission>);

impl EffectivePermissions {
    pub fn get(&self, menu_key: &str) -> Option<&EffectivePermission> {
        self.0.get(menu_key)
    }

    /// Unknown menu keys are never allowed
    pub fn check(&self, menu_key: &str, action: Action) -> bool {
        self.0.get(menu_key).map_or(false, |p| p.allows(action))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectivePermission> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn resolve(
    catalog: &[MenuPermission],
    roles: &[Role],
    overrides: &[PermissionOverride],
    now: DateTime<Utc>,
) -> EffectivePermissions {
    let mut by_menu: BTreeMap<Uuid, (ActionSet, ActionSet, bool)> = BTreeMap::new();

    for grant in roles.iter().flat_map(|r| r.permissions.iter()) {
        let entry = by_menu.entry(grant.menu_permission_id).or_default();
        entry.0.extend(grant.actions.iter().copied());
    }

    for o in overrides.iter().filter(|o| o.is_active(now)) {
        let entry = by_menu.entry(o.menu_permission_id).or_default();
        entry.0.extend(o.allowed_actions.iter().copied());
        entry.1.extend(o.denied_actions.iter().copied());
        entry.2 = true;
    }

    let resolved = catalog
        .iter()
        .map(|menu| {
            let (allowed, denied, touched) = by_menu.remove(&menu.id).unwrap_or_default();
            let allowed: ActionSet = allowed.difference(&denied).copied().collect();
            let permission = EffectivePermission {
                menu_key: menu.menu_key.clone(),
                menu_permission_id: menu.id,
                allowed_actions: allowed,
                denied_actions: denied,
                source: if touched { PermissionSource::Override } else { PermissionSource::Role },
                has_override: touched,
            };
            (menu.menu_key.clone(), permission)
        })
        .collect();

    EffectivePermissions(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{OverrideType, RolePermission};
    use crate::permissions::SecurityLevel;
    use chrono::Duration;

    fn menu(key: &str) -> MenuPermission {
        MenuPermission {
            id: Uuid::new_v4(),
            menu_key: key.into(),
            menu_title: key.into(),
            menu_path: format!("/{}", key),
            module: "admin".into(),
            required_actions: Action::ALL.into_iter().collect(),
            ai_security_level: SecurityLevel::Standard,
            description: None,
        }
    }

    fn role(grants: &[(&MenuPermission, &[Action])]) -> Role {
        Role {
            id: Uuid::new_v4(),
            name: "role".into(),
            description: None,
            permissions: grants
                .iter()
                .map(|(m, actions)| RolePermission {
                    menu_permission_id: m.id,
                    actions: actions.iter().copied().collect(),
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    fn override_for(
        m: &MenuPermission,
        kind: OverrideType,
        allowed: &[Action],
        denied: &[Action],
    ) -> PermissionOverride {
        PermissionOverride {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            menu_permission_id: m.id,
            override_type: kind,
            allowed_actions: allowed.iter().copied().collect(),
            denied_actions: denied.iter().copied().collect(),
            reason: Some("test".into()),
            expires_at: None,
            created_by: "ops".into(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    fn set(actions: &[Action]) -> ActionSet {
        actions.iter().copied().collect()
    }

    #[test]
    fn role_only_user_gets_role_defaults() {
        let tenants = menu("tenants");
        let users = menu("users");
        let viewer = role(&[(&tenants, &[Action::Read])]);
        let catalog = vec![tenants, users];

        let effective = resolve(&catalog, &[viewer], &[], Utc::now());

        assert_eq!(effective.len(), 2);
        let t = effective.get("tenants").unwrap();
        assert_eq!(t.allowed_actions, set(&[Action::Read]));
        assert!(!t.has_override);
        assert_eq!(t.source, PermissionSource::Role);
        let u = effective.get("users").unwrap();
        assert!(u.allowed_actions.is_empty());
        assert!(!u.has_override);
    }

    #[test]
    fn multiple_roles_union() {
        let tenants = menu("tenants");
        let a = role(&[(&tenants, &[Action::Read])]);
        let b = role(&[(&tenants, &[Action::Write])]);
        let effective = resolve(&[tenants], &[a, b], &[], Utc::now());
        assert_eq!(
            effective.get("tenants").unwrap().allowed_actions,
            set(&[Action::Read, Action::Write])
        );
    }

    #[test]
    fn grant_override_adds_action() {
        let tenants = menu("tenants");
        let viewer = role(&[(&tenants, &[Action::Read])]);
        let grant = override_for(&tenants, OverrideType::Grant, &[Action::Delete], &[]);

        let effective = resolve(&[tenants], &[viewer], &[grant], Utc::now());

        let t = effective.get("tenants").unwrap();
        assert!(t.allows(Action::Delete));
        assert!(t.allows(Action::Read));
        assert!(t.has_override);
        assert_eq!(t.source, PermissionSource::Override);
    }

    #[test]
    fn deny_beats_role_grant() {
        let tenants = menu("tenants");
        let manager = role(&[(&tenants, &[Action::Read, Action::Write])]);
        let deny = override_for(&tenants, OverrideType::Deny, &[], &[Action::Write]);

        let effective = resolve(&[tenants], &[manager], &[deny], Utc::now());

        assert!(!effective.check("tenants", Action::Write));
        assert!(effective.check("tenants", Action::Read));
        assert_eq!(effective.get("tenants").unwrap().denied_actions, set(&[Action::Write]));
    }

    #[test]
    fn deny_beats_grant_from_another_override() {
        let tenants = menu("tenants");
        let grant = override_for(&tenants, OverrideType::Grant, &[Action::Admin], &[]);
        let deny = override_for(&tenants, OverrideType::Deny, &[], &[Action::Admin]);
        let effective = resolve(&[tenants], &[], &[grant, deny], Utc::now());
        assert!(!effective.check("tenants", Action::Admin));
    }

    #[test]
    fn expired_and_revoked_overrides_are_ignored() {
        let tenants = menu("tenants");
        let viewer = role(&[(&tenants, &[Action::Read])]);
        let now = Utc::now();

        let mut expired = override_for(&tenants, OverrideType::Deny, &[], &[Action::Read]);
        expired.expires_at = Some(now - Duration::minutes(5));
        let mut revoked = override_for(&tenants, OverrideType::Grant, &[Action::Admin], &[]);
        revoked.revoked_at = Some(now);

        let effective = resolve(&[tenants], &[viewer], &[expired, revoked], now);

        let t = effective.get("tenants").unwrap();
        assert_eq!(t.allowed_actions, set(&[Action::Read]));
        assert!(!t.has_override);
    }

    #[test]
    fn unknown_menu_key_is_denied() {
        let effective = resolve(&[menu("tenants")], &[], &[], Utc::now());
        assert!(!effective.check("billing", Action::Read));
    }

    #[test]
    fn serializes_as_map_keyed_by_menu() {
        let tenants = menu("tenants");
        let effective = resolve(&[tenants], &[], &[], Utc::now());
        let json = serde_json::to_value(&effective).unwrap();
        assert_eq!(json["tenants"]["hasOverride"], serde_json::json!(false));
        assert_eq!(json["tenants"]["source"], serde_json::json!("role"));
    }
}
