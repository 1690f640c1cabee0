use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use crate::database::models::user::normalize_email;
use crate::database::models::{
    AuditAction, AuditEntityType, CreateUser, NewAuditEntry, Role, RoleSummary, UpdateUser, User, UserView,
};
use crate::database::store::{
    AuditRepository, OverrideRepository, RoleRepository, TenantRepository, UserFilter, UserRepository,
};
use crate::database::{Page, Pagination, Store};
use crate::permissions::baseline;
use crate::validation::{FieldErrors, Validate, ValidationError};

/// Query string of `GET /api/user-management/users`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    /// Role name or id
    pub role: Option<String>,
    /// `active` or `inactive`
    pub status: Option<String>,
}

pub struct UserService {
    store: Arc<dyn Store>,
}

impl UserService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list(&self, query: &UserListQuery, page: Pagination) -> ServiceResult<Page<UserView>> {
        let mut filter = UserFilter {
            search: query.search.clone(),
            ..Default::default()
        };

        filter.is_active = match query.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) if s.eq_ignore_ascii_case("active") => Some(true),
            Some(s) if s.eq_ignore_ascii_case("inactive") => Some(false),
            Some(_) => return Err(ValidationError::field("status", "Expected 'active' or 'inactive'").into()),
        };

        let roles = self.store.list_roles().await?;
        if let Some(role) = query.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            let found = roles
                .iter()
                .find(|r| r.id.to_string() == role || r.name.eq_ignore_ascii_case(role));
            match found {
                Some(r) => filter.role_id = Some(r.id),
                // Unknown role matches nobody
                None => return Ok(Page::from_vec(Vec::new(), page)),
            }
        }

        let users = self.store.list_users(&filter, page).await?;
        let mut views = Vec::with_capacity(users.items.len());
        for user in users.items {
            views.push(self.view_with(user, &roles).await?);
        }
        Ok(Page {
            items: views,
            total: users.total,
            pagination: users.pagination,
        })
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))
    }

    pub async fn view(&self, id: Uuid) -> ServiceResult<UserView> {
        let user = self.get(id).await?;
        let roles = self.store.list_roles().await?;
        self.view_with(user, &roles).await
    }

    async fn view_with(&self, user: User, roles: &[Role]) -> ServiceResult<UserView> {
        let now = Utc::now();
        let overrides = self
            .store
            .list_overrides(user.id)
            .await?
            .into_iter()
            .filter(|o| o.is_active(now))
            .collect();
        Ok(UserView {
            roles: summaries(&user.role_ids, roles),
            permission_overrides: overrides,
            user,
        })
    }

    pub async fn create(&self, input: CreateUser, performed_by: &str) -> ServiceResult<UserView> {
        input.validate()?;
        let roles = self.store.list_roles().await?;
        check_roles_exist(&input.role_ids, &roles)?;
        if let Some(tenant_id) = input.tenant_id {
            if self.store.get_tenant(tenant_id).await?.is_none() {
                let mut errors = FieldErrors::default();
                errors.add("tenantId", format!("Unknown tenant id: {}", tenant_id));
                errors.into_result()?;
            }
        }

        let now = Utc::now();
        let role_ids = dedup_ids(input.role_ids);
        let user = User {
            id: Uuid::new_v4(),
            email: normalize_email(&input.email),
            first_name: input.first_name.map(|n| n.trim().to_string()),
            last_name: input.last_name.map(|n| n.trim().to_string()),
            is_active: input.is_active.unwrap_or(true),
            tenant_id: input.tenant_id,
            role_ids,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_user(&user).await?;

        let granted = summaries(&user.role_ids, &roles);
        self.store
            .append_audit(
                NewAuditEntry::new(AuditEntityType::User, user.id.to_string(), AuditAction::Granted, performed_by)
                    .values(json!(null), json!({ "email": user.email, "roles": granted }))
                    .scores(baseline(false)),
            )
            .await?;

        info!(user_id = %user.id, email = %user.email, "Created user");
        self.view_with(user, &roles).await
    }

    pub async fn update(&self, id: Uuid, input: UpdateUser, performed_by: &str) -> ServiceResult<UserView> {
        input.validate()?;
        let mut user = self.get(id).await?;
        let roles = self.store.list_roles().await?;

        if let Some(first) = input.first_name {
            user.first_name = Some(first.trim().to_string());
        }
        if let Some(last) = input.last_name {
            user.last_name = Some(last.trim().to_string());
        }
        if let Some(active) = input.is_active {
            user.is_active = active;
        }

        let role_change = match input.role_ids {
            Some(ids) => {
                check_roles_exist(&ids, &roles)?;
                replace_roles(&mut user, ids)
            }
            None => None,
        };

        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;

        if let Some(previous) = role_change {
            self.audit_role_change(&user, &previous, &roles, None, performed_by).await?;
        }

        info!(user_id = %user.id, "Updated user");
        self.view_with(user, &roles).await
    }

    pub(crate) async fn audit_role_change(
        &self,
        user: &User,
        previous: &[Uuid],
        roles: &[Role],
        reason: Option<&str>,
        performed_by: &str,
    ) -> ServiceResult<()> {
        let has_reason = reason.map_or(false, |r| !r.trim().is_empty());
        self.store
            .append_audit(
                NewAuditEntry::new(AuditEntityType::User, user.id.to_string(), AuditAction::Inherited, performed_by)
                    .values(
                        json!({ "roles": summaries(previous, roles) }),
                        json!({ "roles": summaries(&user.role_ids, roles) }),
                    )
                    .reason(reason)
                    .scores(baseline(has_reason)),
            )
            .await?;
        Ok(())
    }

    /// `DELETE` deactivates; deactivating an inactive user is a no-op
    pub async fn deactivate(&self, id: Uuid, performed_by: &str) -> ServiceResult<UserView> {
        let mut user = self.get(id).await?;
        if user.is_active {
            user.is_active = false;
            user.updated_at = Utc::now();
            self.store.update_user(&user).await?;
            self.store
                .append_audit(
                    NewAuditEntry::new(AuditEntityType::User, user.id.to_string(), AuditAction::Modified, performed_by)
                        .values(json!({ "isActive": true }), json!({ "isActive": false }))
                        .reason(Some("User deactivated"))
                        .scores(baseline(true)),
                )
                .await?;
            info!(user_id = %user.id, "Deactivated user");
        }
        let roles = self.store.list_roles().await?;
        self.view_with(user, &roles).await
    }

    pub async fn roles(&self) -> ServiceResult<Vec<Role>> {
        Ok(self.store.list_roles().await?)
    }
}

/// Keeps first occurrences, in order
fn dedup_ids(ids: Vec<Uuid>) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

/// Swap the user's role list; returns the previous list when it changed
pub(crate) fn replace_roles(user: &mut User, ids: Vec<Uuid>) -> Option<Vec<Uuid>> {
    let ids = dedup_ids(ids);
    let before: HashSet<&Uuid> = user.role_ids.iter().collect();
    let after: HashSet<&Uuid> = ids.iter().collect();
    if before == after {
        return None;
    }
    Some(std::mem::replace(&mut user.role_ids, ids))
}

pub(crate) fn summaries(ids: &[Uuid], roles: &[Role]) -> Vec<RoleSummary> {
    ids.iter()
        .filter_map(|id| roles.iter().find(|r| r.id == *id))
        .map(RoleSummary::from)
        .collect()
}

pub(crate) fn check_roles_exist(ids: &[Uuid], roles: &[Role]) -> Result<(), ValidationError> {
    let mut errors = FieldErrors::default();
    let unknown: Vec<String> = ids
        .iter()
        .filter(|id| !roles.iter().any(|r| r.id == **id))
        .map(Uuid::to_string)
        .collect();
    if !unknown.is_empty() {
        errors.add("roleIds", format!("Unknown role id: {}", unknown.join(", ")));
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::permissions::{seed_defaults, CatalogSeed};

    async fn seeded() -> (Arc<MemoryStore>, UserService, Vec<Role>) {
        let store = Arc::new(MemoryStore::new());
        seed_defaults(store.as_ref(), &CatalogSeed::builtin().unwrap()).await.unwrap();
        let roles = store.list_roles().await.unwrap();
        (store.clone(), UserService::new(store), roles)
    }

    fn new_user(email: &str, role_ids: Vec<Uuid>) -> CreateUser {
        CreateUser {
            email: email.into(),
            first_name: Some("Dana".into()),
            role_ids,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_requires_a_role() {
        let (_, svc, _) = seeded().await;
        let err = svc.create(new_user("dana@example.com", vec![]), "ops").await.unwrap_err();
        match err {
            ServiceError::Validation(v) => assert_eq!(v.field_errors["roleIds"], "At least one role is required"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_rejects_unknown_roles() {
        let (_, svc, _) = seeded().await;
        let err = svc
            .create(new_user("dana@example.com", vec![Uuid::new_v4()]), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(v) if v.has_field("roleIds")));
    }

    #[tokio::test]
    async fn create_checks_the_tenant_exists() {
        let (store, svc, roles) = seeded().await;
        let mut input = new_user("dana@example.com", vec![roles[0].id]);
        input.tenant_id = Some(Uuid::new_v4());
        let err = svc.create(input.clone(), "ops").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(v) if v.has_field("tenantId")));
        assert_eq!(store.count_audit().await.unwrap(), 0);

        let tenant = crate::services::TenantService::new(store.clone())
            .create(crate::database::models::CreateTenant {
                name: "Acme".into(),
                domain: "acme.example.com".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        input.tenant_id = Some(tenant.id);
        let view = svc.create(input, "ops").await.unwrap();
        assert_eq!(view.user.tenant_id, Some(tenant.id));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let (_, svc, roles) = seeded().await;
        svc.create(new_user("dana@example.com", vec![roles[0].id]), "ops").await.unwrap();
        let err = svc
            .create(new_user("Dana@Example.com", vec![roles[0].id]), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Database(crate::database::DatabaseError::Conflict(_))));
    }

    #[tokio::test]
    async fn role_change_is_audited_as_inherited() {
        let (store, svc, roles) = seeded().await;
        let view = svc.create(new_user("dana@example.com", vec![roles[0].id]), "ops").await.unwrap();
        svc.update(
            view.user.id,
            UpdateUser {
                role_ids: Some(vec![roles[1].id]),
                ..Default::default()
            },
            "ops",
        )
        .await
        .unwrap();

        let chain = store.audit_chain().await.unwrap();
        let actions: Vec<_> = chain.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Granted, AuditAction::Inherited]);
    }

    #[tokio::test]
    async fn list_filters_by_role_name_and_status() {
        let (_, svc, roles) = seeded().await;
        let viewer = roles.iter().find(|r| r.name == "viewer").unwrap();
        let admin = roles.iter().find(|r| r.name == "admin").unwrap();
        svc.create(new_user("a@example.com", vec![viewer.id]), "ops").await.unwrap();
        let b = svc.create(new_user("b@example.com", vec![admin.id]), "ops").await.unwrap();
        svc.deactivate(b.user.id, "ops").await.unwrap();

        let query = UserListQuery {
            role: Some("VIEWER".into()),
            ..Default::default()
        };
        let page = svc.list(&query, Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user.email, "a@example.com");

        let query = UserListQuery {
            status: Some("inactive".into()),
            ..Default::default()
        };
        let page = svc.list(&query, Pagination::default()).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.items[0].user.is_active);

        let query = UserListQuery {
            role: Some("nobody".into()),
            ..Default::default()
        };
        assert_eq!(svc.list(&query, Pagination::default()).await.unwrap().total, 0);
    }
}
