use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ServiceError, ServiceResult};
use super::permission_service::{OverrideGrant, PermissionService};
use super::recommendation_engine::{EngineInput, RecommendationEngine, UserSnapshot};
use crate::database::models::{
    AuditAction, AuditEntityType, MenuPermission, NewAuditEntry, NewRecommendation, OverrideType, PermissionOverride,
    Recommendation, RecommendationKind, RecommendationStatus, User,
};
use crate::database::store::{
    AuditRepository, CatalogRepository, OverrideRepository, RecommendationFilter, RecommendationRepository,
    RoleRepository, UserFilter, UserRepository,
};
use crate::database::{Pagination, Store};
use crate::permissions::{baseline, resolve, ActionSet};
use crate::validation::{FieldErrors, ValidationError};

/// Query string of `GET /api/ai-recommendations/permissions`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationQuery {
    pub status: Option<String>,
    pub user_id: Option<Uuid>,
}

impl RecommendationQuery {
    pub fn to_filter(&self) -> Result<RecommendationFilter, ValidationError> {
        let mut errors = FieldErrors::default();
        let mut filter = RecommendationFilter {
            user_id: self.user_id,
            ..Default::default()
        };
        if let Some(status) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            match status.parse() {
                Ok(s) => filter.status = Some(s),
                Err(e) => errors.add("status", e),
            }
        }
        errors.into_result().map(|_| filter)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub reason: Option<String>,
}

/// Outcome of approving a recommendation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub recommendation: Recommendation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_created: Option<PermissionOverride>,
}

pub struct RecommendationService {
    store: Arc<dyn Store>,
    engine: Arc<dyn RecommendationEngine>,
    permissions: PermissionService,
    max_per_run: usize,
}

impl RecommendationService {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn RecommendationEngine>, max_per_run: usize) -> Self {
        Self {
            permissions: PermissionService::new(store.clone()),
            store,
            engine,
            max_per_run,
        }
    }

    pub async fn list(&self, query: &RecommendationQuery) -> ServiceResult<Vec<Recommendation>> {
        let filter = query.to_filter()?;
        Ok(self.store.list_recommendations(&filter).await?)
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Recommendation> {
        self.store
            .get_recommendation(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Recommendation {} not found", id)))
    }

    /// Run the engine over one user or every active user and store the new
    /// PENDING suggestions. Returns only what was stored by this run.
    pub async fn generate(&self, user_id: Option<Uuid>) -> ServiceResult<Vec<Recommendation>> {
        let targets = self.targets(user_id).await?;
        let catalog = self.store.list_menu_permissions().await?;
        let roles = self.store.list_roles().await?;
        let now = Utc::now();

        let mut users = Vec::with_capacity(targets.len());
        for user in targets {
            let assigned: Vec<_> = roles.iter().filter(|r| user.role_ids.contains(&r.id)).cloned().collect();
            let overrides: Vec<_> = self
                .store
                .list_overrides(user.id)
                .await?
                .into_iter()
                .filter(|o| o.is_active(now))
                .collect();
            let effective = resolve(&catalog, &assigned, &overrides, now);
            users.push(UserSnapshot {
                user,
                roles: assigned,
                overrides,
                effective,
            });
        }

        let input = EngineInput { users, catalog };
        let proposed = self.engine.generate(&input).await?;
        let proposed_count = proposed.len();

        let pending = self
            .store
            .list_recommendations(&RecommendationFilter {
                status: Some(RecommendationStatus::Pending),
                ..Default::default()
            })
            .await?;

        let accepted = accept(proposed, &input, &pending, self.max_per_run);
        let mut stored = Vec::with_capacity(accepted.len());
        for candidate in accepted {
            let rec = Recommendation::from_new(candidate, now);
            self.store.insert_recommendation(&rec).await?;
            stored.push(rec);
        }

        info!(
            engine = self.engine.name(),
            proposed = proposed_count,
            stored = stored.len(),
            "Generated recommendations"
        );
        Ok(stored)
    }

    async fn targets(&self, user_id: Option<Uuid>) -> ServiceResult<Vec<User>> {
        if let Some(id) = user_id {
            let user = self
                .store
                .get_user(id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))?;
            return Ok(vec![user]);
        }

        let filter = UserFilter {
            is_active: Some(true),
            ..Default::default()
        };
        let total = self.store.count_users(&filter).await?;
        let page = Pagination {
            page: 1,
            limit: u32::try_from(total.max(1)).unwrap_or(u32::MAX),
        };
        Ok(self.store.list_users(&filter, page).await?.items)
    }

    pub async fn approve(&self, id: Uuid, reason: Option<&str>, performed_by: &str) -> ServiceResult<Decision> {
        let rec = self.pending(id).await?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Approved recommendation {}: {}", rec.id, rec.rationale));

        // Everything that can be rejected up front is checked before the claim
        let target = match rec.kind {
            RecommendationKind::Grant | RecommendationKind::Revoke => {
                let user = self
                    .store
                    .get_user(rec.user_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", rec.user_id)))?;
                let menu = self.menu(&rec).await?;
                let actions: ActionSet = rec.actions.intersection(&menu.required_actions).copied().collect();
                if actions.is_empty() {
                    return Err(ServiceError::BadRequest(format!(
                        "Recommendation {} names no action supported by menu '{}'",
                        rec.id, menu.menu_key
                    )));
                }
                Some((user, menu, actions))
            }
            RecommendationKind::Review => None,
        };

        let recommendation = self.claim(&rec, RecommendationStatus::Approved, performed_by).await?;
        let applied = match target {
            Some((user, menu, actions)) => self.apply(&rec, &user, menu, actions, &reason, performed_by).await.map(Some),
            None => self
                .audit_review(&rec, RecommendationStatus::Approved, &reason, performed_by)
                .await
                .map(|_| None),
        };
        let override_created = self.release_on_error(&rec, applied).await?;

        Ok(Decision {
            recommendation,
            override_created,
        })
    }

    pub async fn reject(&self, id: Uuid, reason: Option<&str>, performed_by: &str) -> ServiceResult<Recommendation> {
        let rec = self.pending(id).await?;
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Rejected recommendation {}", rec.id));

        let recommendation = self.claim(&rec, RecommendationStatus::Rejected, performed_by).await?;
        let audited = self
            .audit_review(&rec, RecommendationStatus::Rejected, &reason, performed_by)
            .await;
        self.release_on_error(&rec, audited).await?;
        Ok(recommendation)
    }

    /// Creates the override for an approved GRANT or REVOKE, folded into the
    /// user's active override on the menu so only the named actions change.
    async fn apply(
        &self,
        rec: &Recommendation,
        user: &User,
        menu: MenuPermission,
        actions: ActionSet,
        reason: &str,
        performed_by: &str,
    ) -> ServiceResult<PermissionOverride> {
        let now = Utc::now();
        let previous = self
            .store
            .list_overrides(user.id)
            .await?
            .into_iter()
            .find(|o| o.menu_permission_id == menu.id && o.is_active(now));

        let (override_type, allowed_actions, denied_actions) = merge_into(rec.kind, &actions, previous.as_ref());
        let grant = OverrideGrant {
            menu,
            override_type,
            allowed_actions,
            denied_actions,
            reason: Some(reason.to_string()),
            expires_at: previous.and_then(|p| p.expires_at),
        };
        self.permissions.grant_override(user, grant, performed_by).await
    }

    async fn pending(&self, id: Uuid) -> ServiceResult<Recommendation> {
        let rec = self.get(id).await?;
        if rec.status != RecommendationStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Recommendation {} is already {}",
                id,
                rec.status.as_str()
            )));
        }
        Ok(rec)
    }

    async fn menu(&self, rec: &Recommendation) -> ServiceResult<MenuPermission> {
        self.store
            .list_menu_permissions()
            .await?
            .into_iter()
            .find(|m| m.id == rec.menu_permission_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Menu permission {} not found", rec.menu_permission_id)))
    }

    /// Moves a PENDING recommendation to `status`. Only one decider wins;
    /// the others get a conflict and write nothing.
    async fn claim(
        &self,
        rec: &Recommendation,
        status: RecommendationStatus,
        performed_by: &str,
    ) -> ServiceResult<Recommendation> {
        let mut decided = rec.clone();
        decided.status = status;
        decided.decided_at = Some(Utc::now());
        decided.decided_by = Some(performed_by.to_string());
        if !self.store.claim_recommendation(&decided).await? {
            return Err(ServiceError::Conflict(format!("Recommendation {} is already decided", rec.id)));
        }
        info!(recommendation_id = %rec.id, status = decided.status.as_str(), "Decided recommendation");
        Ok(decided)
    }

    /// Puts a claimed recommendation back to PENDING when its side effects failed
    async fn release_on_error<T>(&self, pending: &Recommendation, result: ServiceResult<T>) -> ServiceResult<T> {
        if result.is_err() {
            if let Err(e) = self.store.update_recommendation(pending).await {
                warn!(recommendation_id = %pending.id, error = %e, "Failed to reopen recommendation");
            }
        }
        result
    }

    async fn audit_review(
        &self,
        rec: &Recommendation,
        status: RecommendationStatus,
        reason: &str,
        performed_by: &str,
    ) -> ServiceResult<()> {
        self.store
            .append_audit(
                NewAuditEntry::new(AuditEntityType::User, rec.user_id.to_string(), AuditAction::Reviewed, performed_by)
                    .values(
                        json!({ "recommendationId": rec.id, "status": rec.status }),
                        json!({
                            "recommendationId": rec.id,
                            "kind": rec.kind,
                            "menuPermissionId": rec.menu_permission_id,
                            "actions": rec.actions,
                            "status": status,
                        }),
                    )
                    .reason(Some(reason))
                    .scores(baseline(true)),
            )
            .await?;
        Ok(())
    }
}

/// Override contents for an approved GRANT or REVOKE of `actions`, keeping
/// whatever else the active override on the menu allows or denies.
fn merge_into(
    kind: RecommendationKind,
    actions: &ActionSet,
    previous: Option<&PermissionOverride>,
) -> (OverrideType, ActionSet, ActionSet) {
    let (prev_allowed, prev_denied) = previous
        .map(|p| (p.allowed_actions.clone(), p.denied_actions.clone()))
        .unwrap_or_default();

    let (allowed, denied): (ActionSet, ActionSet) = if kind == RecommendationKind::Revoke {
        (
            prev_allowed.difference(actions).copied().collect(),
            prev_denied.union(actions).copied().collect(),
        )
    } else {
        (
            prev_allowed.union(actions).copied().collect(),
            prev_denied.difference(actions).copied().collect(),
        )
    };

    let override_type = match (allowed.is_empty(), denied.is_empty()) {
        (false, true) => OverrideType::Grant,
        (true, false) => OverrideType::Deny,
        _ => OverrideType::Custom,
    };
    (override_type, allowed, denied)
}

/// Filter engine output down to what may be stored: known user and menu,
/// at least one action, no duplicate of a PENDING suggestion, capped.
fn accept(
    proposed: Vec<NewRecommendation>,
    input: &EngineInput,
    pending: &[Recommendation],
    max: usize,
) -> Vec<NewRecommendation> {
    let users: HashSet<Uuid> = input.users.iter().map(|s| s.user.id).collect();
    let menus: HashSet<Uuid> = input.catalog.iter().map(|m| m.id).collect();
    let mut seen: HashSet<(Uuid, Uuid, RecommendationKind)> = pending
        .iter()
        .map(|r| (r.user_id, r.menu_permission_id, r.kind))
        .collect();

    let mut accepted = Vec::new();
    for candidate in proposed {
        if accepted.len() >= max {
            warn!(max, "Recommendation run capped");
            break;
        }
        if !users.contains(&candidate.user_id) || !menus.contains(&candidate.menu_permission_id) {
            warn!(user_id = %candidate.user_id, menu_permission_id = %candidate.menu_permission_id, "Dropping recommendation for unknown target");
            continue;
        }
        if candidate.actions.is_empty() {
            continue;
        }
        if !seen.insert((candidate.user_id, candidate.menu_permission_id, candidate.kind)) {
            continue;
        }
        accepted.push(candidate);
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{CreateUser, OverrideInput, PermissionChangeRequest};
    use crate::database::MemoryStore;
    use crate::permissions::{seed_defaults, Action, CatalogSeed};
    use crate::services::recommendation_engine::HeuristicEngine;
    use crate::services::user_service::UserService;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: RecommendationService,
        user: User,
    }

    /// A manager with a permanent admin override on the critical `roles` menu
    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        seed_defaults(store.as_ref(), &CatalogSeed::builtin().unwrap()).await.unwrap();
        let roles = store.list_roles().await.unwrap();
        let manager = roles.iter().find(|r| r.name == "manager").unwrap();
        let view = UserService::new(store.clone())
            .create(
                CreateUser {
                    email: "sam@example.com".into(),
                    role_ids: vec![manager.id],
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        PermissionService::new(store.clone())
            .apply_changes(
                view.user.id,
                PermissionChangeRequest {
                    overrides: vec![OverrideInput {
                        menu_key: Some("roles".into()),
                        override_type: Some(OverrideType::Grant),
                        allowed_actions: [Action::Admin].into_iter().collect(),
                        ..Default::default()
                    }],
                    reason: Some("Migration cover".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();

        Fixture {
            service: RecommendationService::new(store.clone(), Arc::new(HeuristicEngine), 50),
            store,
            user: view.user,
        }
    }

    #[tokio::test]
    async fn generate_skips_pending_duplicates() {
        let f = fixture().await;
        let first = f.service.generate(None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, RecommendationKind::Revoke);
        assert_eq!(first[0].user_id, f.user.id);

        let second = f.service.generate(None).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(f.service.list(&RecommendationQuery::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn generate_for_unknown_user_is_not_found() {
        let f = fixture().await;
        let err = f.service.generate(Some(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn approving_revoke_denies_the_action() {
        let f = fixture().await;
        let rec = f.service.generate(Some(f.user.id)).await.unwrap().remove(0);

        let decision = f.service.approve(rec.id, None, "ops").await.unwrap();
        assert_eq!(decision.recommendation.status, RecommendationStatus::Approved);
        assert_eq!(decision.recommendation.decided_by.as_deref(), Some("ops"));
        let created = decision.override_created.unwrap();
        assert_eq!(created.override_type, OverrideType::Deny);

        let perms = PermissionService::new(f.store.clone()).user_permissions(f.user.id).await.unwrap();
        let roles_menu = perms.effective.iter().find(|p| p.menu_key == "roles").unwrap();
        assert!(!roles_menu.allows(Action::Admin));
        assert!(roles_menu.allows(Action::Read));
    }

    #[tokio::test]
    async fn deciding_twice_conflicts() {
        let f = fixture().await;
        let rec = f.service.generate(None).await.unwrap().remove(0);
        f.service.reject(rec.id, Some("Still needed"), "ops").await.unwrap();

        let err = f.service.approve(rec.id, None, "ops").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let filter = crate::database::store::AuditFilter {
            action: Some(AuditAction::Reviewed),
            ..Default::default()
        };
        let reviewed = f
            .store
            .list_audit(&filter, Pagination { page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(reviewed.total, 1);
    }

    #[tokio::test]
    async fn approving_revoke_keeps_other_overridden_actions() {
        let f = fixture().await;
        PermissionService::new(f.store.clone())
            .apply_changes(
                f.user.id,
                PermissionChangeRequest {
                    overrides: vec![OverrideInput {
                        menu_key: Some("roles".into()),
                        override_type: Some(OverrideType::Grant),
                        allowed_actions: [Action::Write, Action::Admin].into_iter().collect(),
                        ..Default::default()
                    }],
                    reason: Some("Role editing cover".into()),
                    ..Default::default()
                },
                "ops",
            )
            .await
            .unwrap();
        let rec = f.service.generate(Some(f.user.id)).await.unwrap().remove(0);
        assert_eq!(rec.kind, RecommendationKind::Revoke);

        let created = f.service.approve(rec.id, None, "ops").await.unwrap().override_created.unwrap();
        assert_eq!(created.override_type, OverrideType::Custom);
        assert_eq!(created.allowed_actions, [Action::Write].into_iter().collect::<ActionSet>());
        assert_eq!(created.denied_actions, [Action::Admin].into_iter().collect::<ActionSet>());

        let perms = PermissionService::new(f.store.clone()).user_permissions(f.user.id).await.unwrap();
        let roles_menu = perms.effective.iter().find(|p| p.menu_key == "roles").unwrap();
        assert!(roles_menu.allows(Action::Read));
        assert!(roles_menu.allows(Action::Write));
        assert!(!roles_menu.allows(Action::Admin));
        assert_eq!(perms.overrides.len(), 1);
    }

    #[test]
    fn merge_into_only_touches_named_actions() {
        let now = Utc::now();
        let set = |list: &[Action]| list.iter().copied().collect::<ActionSet>();
        let previous = PermissionOverride {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            menu_permission_id: Uuid::new_v4(),
            override_type: OverrideType::Custom,
            allowed_actions: set(&[Action::Write, Action::Admin]),
            denied_actions: set(&[Action::Delete]),
            reason: None,
            expires_at: None,
            created_by: "ops".into(),
            created_at: now,
            revoked_at: None,
        };

        let revoke = merge_into(RecommendationKind::Revoke, &set(&[Action::Admin]), Some(&previous));
        assert_eq!(revoke, (OverrideType::Custom, set(&[Action::Write]), set(&[Action::Delete, Action::Admin])));

        let grant = merge_into(RecommendationKind::Grant, &set(&[Action::Delete]), Some(&previous));
        assert_eq!(grant, (OverrideType::Grant, set(&[Action::Write, Action::Delete, Action::Admin]), set(&[])));

        assert_eq!(
            merge_into(RecommendationKind::Revoke, &set(&[Action::Admin]), None),
            (OverrideType::Deny, set(&[]), set(&[Action::Admin]))
        );
    }

    #[tokio::test]
    async fn stale_decision_cannot_claim() {
        let f = fixture().await;
        let rec = f.service.generate(None).await.unwrap().remove(0);

        // A second decider read the row while it was still PENDING
        let mut stale = rec.clone();
        stale.status = RecommendationStatus::Approved;
        f.service.reject(rec.id, None, "ops").await.unwrap();

        assert!(!f.store.claim_recommendation(&stale).await.unwrap());
        let stored = f.store.get_recommendation(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecommendationStatus::Rejected);
    }

    #[tokio::test]
    async fn concurrent_decisions_apply_once() {
        let f = fixture().await;
        let rec = f.service.generate(None).await.unwrap().remove(0);

        let (approved, rejected) = tokio::join!(
            f.service.approve(rec.id, None, "ops"),
            f.service.reject(rec.id, None, "ops"),
        );
        assert!(approved.is_ok() != rejected.is_ok());

        let overrides = f.store.list_overrides(f.user.id).await.unwrap();
        let denies = overrides
            .iter()
            .filter(|o| o.override_type == OverrideType::Deny)
            .count();
        let reviewed = f
            .store
            .list_audit(
                &crate::database::store::AuditFilter {
                    action: Some(AuditAction::Reviewed),
                    ..Default::default()
                },
                Pagination { page: 1, limit: 10 },
            )
            .await
            .unwrap()
            .total;
        // Exactly one side effect: a deny from the approval or a review from the rejection
        assert_eq!(denies as u64 + reviewed, 1);
    }

    #[test]
    fn accept_drops_unknown_targets_and_caps() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".into(),
            first_name: None,
            last_name: None,
            is_active: true,
            tenant_id: None,
            role_ids: vec![],
            created_at: now,
            updated_at: now,
        };
        let menu = MenuPermission {
            id: Uuid::new_v4(),
            menu_key: "users".into(),
            menu_title: "Users".into(),
            menu_path: "/users".into(),
            module: "core".into(),
            required_actions: Action::ALL.into_iter().collect(),
            ai_security_level: crate::permissions::SecurityLevel::High,
            description: None,
        };
        let input = EngineInput {
            users: vec![UserSnapshot {
                user: user.clone(),
                roles: vec![],
                overrides: vec![],
                effective: Default::default(),
            }],
            catalog: vec![menu.clone()],
        };
        let rec = |user_id, kind| NewRecommendation {
            user_id,
            menu_permission_id: menu.id,
            kind,
            actions: [Action::Read].into_iter().collect(),
            rationale: "r".into(),
            confidence: 0.5,
        };

        let proposed = vec![
            rec(Uuid::new_v4(), RecommendationKind::Grant),
            rec(user.id, RecommendationKind::Grant),
            rec(user.id, RecommendationKind::Grant),
            rec(user.id, RecommendationKind::Review),
        ];
        assert_eq!(accept(proposed.clone(), &input, &[], 10).len(), 2);
        assert_eq!(accept(proposed, &input, &[], 1).len(), 1);
    }
}
