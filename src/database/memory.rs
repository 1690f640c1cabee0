use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::audit::GENESIS_HASH;
use super::models::{
    AuditLogEntry, MenuPermission, NewAuditEntry, PermissionOverride, Recommendation, RecommendationStatus, Role,
    Tenant, User,
};
use super::store::*;

#[derive(Default)]
struct MemoryState {
    tenants: Vec<Tenant>,
    users: Vec<User>,
    roles: Vec<Role>,
    menus: Vec<MenuPermission>,
    overrides: Vec<PermissionOverride>,
    audit: Vec<AuditLogEntry>,
    recommendations: Vec<Recommendation>,
}

/// Process-local store. Everything lives behind one lock so multi-step
/// writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    // Equal timestamps fall back to most recently inserted first
    items.reverse();
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.tenants.iter().any(|t| t.domain == tenant.domain) {
            return Err(DatabaseError::Conflict(format!("domain '{}' is already in use", tenant.domain)));
        }
        state.tenants.push(tenant.clone());
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state
            .tenants
            .iter()
            .any(|t| t.id != tenant.id && t.domain == tenant.domain)
        {
            return Err(DatabaseError::Conflict(format!("domain '{}' is already in use", tenant.domain)));
        }
        let slot = state
            .tenants
            .iter_mut()
            .find(|t| t.id == tenant.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("tenant {}", tenant.id)))?;
        *slot = tenant.clone();
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(self.state.read().await.tenants.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tenants(&self, filter: &TenantFilter, page: Pagination) -> StoreResult<Page<Tenant>> {
        let state = self.state.read().await;
        let mut matched: Vec<Tenant> = state.tenants.iter().filter(|t| filter.matches(t)).cloned().collect();
        newest_first(&mut matched, |t| t.created_at);
        Ok(Page::from_vec(matched, page))
    }

    async fn all_tenants(&self) -> StoreResult<Vec<Tenant>> {
        Ok(self.state.read().await.tenants.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| u.email == user.email) {
            return Err(DatabaseError::Conflict(format!("email '{}' is already registered", user.email)));
        }
        state.users.push(user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("user {}", user.id)))?;
        *slot = user.clone();
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> StoreResult<Page<User>> {
        let state = self.state.read().await;
        let mut matched: Vec<User> = state.users.iter().filter(|u| filter.matches(u)).cloned().collect();
        newest_first(&mut matched, |u| u.created_at);
        Ok(Page::from_vec(matched, page))
    }

    async fn count_users(&self, filter: &UserFilter) -> StoreResult<u64> {
        let state = self.state.read().await;
        Ok(state.users.iter().filter(|u| filter.matches(u)).count() as u64)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.roles.iter().any(|r| r.name == role.name) {
            return Err(DatabaseError::Conflict(format!("role '{}' already exists", role.name)));
        }
        state.roles.push(role.clone());
        Ok(())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let mut roles = self.state.read().await.roles.clone();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn insert_menu_permission(&self, menu: &MenuPermission) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.menus.iter().any(|m| m.menu_key == menu.menu_key) {
            return Err(DatabaseError::Conflict(format!("menu key '{}' already exists", menu.menu_key)));
        }
        state.menus.push(menu.clone());
        Ok(())
    }

    async fn list_menu_permissions(&self) -> StoreResult<Vec<MenuPermission>> {
        let mut menus = self.state.read().await.menus.clone();
        menus.sort_by(|a, b| a.menu_key.cmp(&b.menu_key));
        Ok(menus)
    }
}

#[async_trait]
impl OverrideRepository for MemoryStore {
    async fn supersede_override(
        &self,
        next: &PermissionOverride,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PermissionOverride>> {
        let mut state = self.state.write().await;
        let previous = state
            .overrides
            .iter_mut()
            .find(|o| o.user_id == next.user_id && o.menu_permission_id == next.menu_permission_id && o.is_active(now))
            .map(|o| {
                let before = o.clone();
                o.revoked_at = Some(now);
                before
            });
        state.overrides.push(next.clone());
        Ok(previous)
    }

    async fn revoke_override(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<PermissionOverride>> {
        let mut state = self.state.write().await;
        Ok(state
            .overrides
            .iter_mut()
            .find(|o| o.id == id && o.revoked_at.is_none())
            .map(|o| {
                let before = o.clone();
                o.revoked_at = Some(now);
                before
            }))
    }

    async fn list_overrides(&self, user_id: Uuid) -> StoreResult<Vec<PermissionOverride>> {
        let state = self.state.read().await;
        Ok(state.overrides.iter().filter(|o| o.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let mut state = self.state.write().await;
        let (sequence, prev_hash) = match state.audit.last() {
            Some(last) => (last.sequence + 1, last.hash.clone()),
            None => (1, GENESIS_HASH.to_string()),
        };
        let sealed = entry.seal(sequence, &prev_hash);
        state.audit.push(sealed.clone());
        Ok(sealed)
    }

    async fn list_audit(&self, filter: &AuditFilter, page: Pagination) -> StoreResult<Page<AuditLogEntry>> {
        let state = self.state.read().await;
        let matched: Vec<AuditLogEntry> = state.audit.iter().rev().filter(|e| filter.matches(e)).cloned().collect();
        Ok(Page::from_vec(matched, page))
    }

    async fn audit_chain(&self) -> StoreResult<Vec<AuditLogEntry>> {
        Ok(self.state.read().await.audit.clone())
    }

    async fn count_audit(&self) -> StoreResult<u64> {
        Ok(self.state.read().await.audit.len() as u64)
    }
}

#[async_trait]
impl RecommendationRepository for MemoryStore {
    async fn insert_recommendation(&self, rec: &Recommendation) -> StoreResult<()> {
        self.state.write().await.recommendations.push(rec.clone());
        Ok(())
    }

    async fn update_recommendation(&self, rec: &Recommendation) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let slot = state
            .recommendations
            .iter_mut()
            .find(|r| r.id == rec.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("recommendation {}", rec.id)))?;
        *slot = rec.clone();
        Ok(())
    }

    async fn claim_recommendation(&self, rec: &Recommendation) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let slot = state
            .recommendations
            .iter_mut()
            .find(|r| r.id == rec.id)
            .ok_or_else(|| DatabaseError::NotFound(format!("recommendation {}", rec.id)))?;
        if slot.status != RecommendationStatus::Pending {
            return Ok(false);
        }
        *slot = rec.clone();
        Ok(true)
    }

    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Option<Recommendation>> {
        Ok(self.state.read().await.recommendations.iter().find(|r| r.id == id).cloned())
    }

    async fn list_recommendations(&self, filter: &RecommendationFilter) -> StoreResult<Vec<Recommendation>> {
        let state = self.state.read().await;
        let mut matched: Vec<Recommendation> =
            state.recommendations.iter().filter(|r| filter.matches(r)).cloned().collect();
        newest_first(&mut matched, |r| r.created_at);
        Ok(matched)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::audit::verify_chain;
    use crate::database::models::{AuditAction, AuditEntityType, OverrideType};
    use crate::permissions::{Action, ActionSet};
    use serde_json::json;

    fn override_on(user_id: Uuid, menu_id: Uuid) -> PermissionOverride {
        PermissionOverride {
            id: Uuid::new_v4(),
            user_id,
            menu_permission_id: menu_id,
            override_type: OverrideType::Grant,
            allowed_actions: [Action::Write].into_iter().collect(),
            denied_actions: ActionSet::new(),
            reason: Some("cover".into()),
            expires_at: None,
            created_by: "ops".into(),
            created_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn supersede_revokes_previous_active_override() {
        let store = MemoryStore::new();
        let (user, menu) = (Uuid::new_v4(), Uuid::new_v4());
        let first = override_on(user, menu);
        let second = override_on(user, menu);
        let now = Utc::now();

        assert!(store.supersede_override(&first, now).await.unwrap().is_none());
        let replaced = store.supersede_override(&second, now).await.unwrap();
        assert_eq!(replaced.map(|o| o.id), Some(first.id));

        let all = store.list_overrides(user).await.unwrap();
        let active: Vec<_> = all.iter().filter(|o| o.is_active(now)).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn revoking_twice_returns_none() {
        let store = MemoryStore::new();
        let o = override_on(Uuid::new_v4(), Uuid::new_v4());
        store.supersede_override(&o, Utc::now()).await.unwrap();
        assert!(store.revoke_override(o.id, Utc::now()).await.unwrap().is_some());
        assert!(store.revoke_override(o.id, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn appended_audit_entries_chain() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .append_audit(NewAuditEntry {
                    entity_type: AuditEntityType::System,
                    entity_id: format!("entity-{}", i),
                    action: AuditAction::Modified,
                    old_values: json!(null),
                    new_values: json!({ "i": i }),
                    reason: None,
                    ai_risk_score: 10,
                    ai_compliance_score: 75,
                    performed_by: "system".into(),
                    performed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let chain = store.audit_chain().await.unwrap();
        assert_eq!(chain.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(verify_chain(&chain).chain_intact);

        let newest = store.list_audit(&AuditFilter::default(), Pagination::default()).await.unwrap();
        assert_eq!(newest.items[0].sequence, 3);
    }
}
