//! Postgres-backed [`Store`].
//!
//! Queries are built at runtime; rows decode into private `*Row` structs and
//! convert into the domain models, so enum columns that fail to parse surface
//! as `QueryError` instead of panicking.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::manager::DatabaseError;
use super::models::audit::GENESIS_HASH;
use super::models::{
    AuditLogEntry, MenuPermission, NewAuditEntry, PermissionOverride, Recommendation, Role, RolePermission, Tenant,
    User,
};
use super::store::*;
use crate::permissions::{actions_from_strings, actions_to_strings};

/// Key for the advisory lock serialising audit appends
const AUDIT_CHAIN_LOCK: i64 = 0x6175_6469_745f_6c67;

/// Advisory lock key for one (user, menu) override slot. An empty slot has
/// no row for `FOR UPDATE` to hold, so writers serialise on this instead.
fn override_slot_lock(user_id: Uuid, menu_permission_id: Uuid) -> i64 {
    let folded = user_id.as_u128() ^ menu_permission_id.as_u128().rotate_left(47);
    ((folded >> 64) as u64 ^ folded as u64) as i64
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(DatabaseError::QueryError)
}

/// Unique violations become `Conflict`, everything else passes through
fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> DatabaseError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => DatabaseError::Conflict(message()),
        _ => DatabaseError::Sqlx(err),
    }
}

fn count(total: i64) -> u64 {
    u64::try_from(total).unwrap_or(0)
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    domain: String,
    plan_type: String,
    status: String,
    brand_color: String,
    health_score: i16,
    description: Option<String>,
    max_users: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = DatabaseError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Tenant {
            id: row.id,
            name: row.name,
            domain: row.domain,
            plan_type: parse(&row.plan_type)?,
            status: parse(&row.status)?,
            brand_color: row.brand_color,
            health_score: row.health_score.clamp(0, 100) as u8,
            description: row.description,
            max_users: row.max_users.and_then(|m| u32::try_from(m).ok()),
            created_at: row.created_at,
            updated_at: row.updated_at,
            archived_at: row.archived_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    is_active: bool,
    tenant_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, role_ids: Vec<Uuid>) -> User {
        User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            is_active: self.is_active,
            tenant_id: self.tenant_id,
            role_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MenuRow {
    id: Uuid,
    menu_key: String,
    menu_title: String,
    menu_path: String,
    module: String,
    required_actions: Vec<String>,
    ai_security_level: String,
    description: Option<String>,
}

impl TryFrom<MenuRow> for MenuPermission {
    type Error = DatabaseError;

    fn try_from(row: MenuRow) -> Result<Self, Self::Error> {
        Ok(MenuPermission {
            id: row.id,
            menu_key: row.menu_key,
            menu_title: row.menu_title,
            menu_path: row.menu_path,
            module: row.module,
            required_actions: actions_from_strings(&row.required_actions),
            ai_security_level: parse(&row.ai_security_level)?,
            description: row.description,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RolePermissionRow {
    role_id: Uuid,
    menu_permission_id: Uuid,
    actions: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct OverrideRow {
    id: Uuid,
    user_id: Uuid,
    menu_permission_id: Uuid,
    override_type: String,
    allowed_actions: Vec<String>,
    denied_actions: Vec<String>,
    reason: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    created_by: String,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<OverrideRow> for PermissionOverride {
    type Error = DatabaseError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        Ok(PermissionOverride {
            id: row.id,
            user_id: row.user_id,
            menu_permission_id: row.menu_permission_id,
            override_type: parse(&row.override_type)?,
            allowed_actions: actions_from_strings(&row.allowed_actions),
            denied_actions: actions_from_strings(&row.denied_actions),
            reason: row.reason,
            expires_at: row.expires_at,
            created_by: row.created_by,
            created_at: row.created_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    sequence: i64,
    entity_type: String,
    entity_id: String,
    action: String,
    old_values: Value,
    new_values: Value,
    reason: Option<String>,
    ai_risk_score: i16,
    ai_compliance_score: i16,
    performed_by: String,
    performed_at: DateTime<Utc>,
    prev_hash: String,
    hash: String,
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = DatabaseError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            id: row.id,
            sequence: row.sequence,
            entity_type: parse(&row.entity_type)?,
            entity_id: row.entity_id,
            action: parse(&row.action)?,
            old_values: row.old_values,
            new_values: row.new_values,
            reason: row.reason,
            ai_risk_score: row.ai_risk_score.clamp(0, 100) as u8,
            ai_compliance_score: row.ai_compliance_score.clamp(0, 100) as u8,
            performed_by: row.performed_by,
            performed_at: row.performed_at,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    user_id: Uuid,
    menu_permission_id: Uuid,
    kind: String,
    actions: Vec<String>,
    rationale: String,
    confidence: f64,
    status: String,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    decided_by: Option<String>,
}

impl TryFrom<RecommendationRow> for Recommendation {
    type Error = DatabaseError;

    fn try_from(row: RecommendationRow) -> Result<Self, Self::Error> {
        Ok(Recommendation {
            id: row.id,
            user_id: row.user_id,
            menu_permission_id: row.menu_permission_id,
            kind: parse(&row.kind)?,
            actions: actions_from_strings(&row.actions),
            rationale: row.rationale,
            confidence: row.confidence,
            status: parse(&row.status)?,
            created_at: row.created_at,
            decided_at: row.decided_at,
            decided_by: row.decided_by,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = DatabaseError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const TENANT_COLUMNS: &str = "id, name, domain, plan_type, status, brand_color, health_score, description, \
     max_users, created_at, updated_at, archived_at";

const USER_COLUMNS: &str = "id, email, first_name, last_name, is_active, tenant_id, created_at, updated_at";

const OVERRIDE_COLUMNS: &str = "id, user_id, menu_permission_id, override_type, allowed_actions, denied_actions, \
     reason, expires_at, created_by, created_at, revoked_at";

const AUDIT_COLUMNS: &str = "id, sequence, entity_type, entity_id, action, old_values, new_values, reason, \
     ai_risk_score, ai_compliance_score, performed_by, performed_at, prev_hash, hash";

const RECOMMENDATION_COLUMNS: &str =
    "id, user_id, menu_permission_id, kind, actions, rationale, confidence, status, created_at, decided_at, decided_by";

/// `ILIKE` pattern matching `term` as a literal substring, paired with `ESCAPE '\'`
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_tenant_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &TenantFilter) {
    match filter.status {
        Some(status) => {
            qb.push(" WHERE status = ").push_bind(status.as_str());
        }
        None => {
            qb.push(" WHERE status <> 'ARCHIVED'");
        }
    }
    if let Some(plan) = filter.plan_type {
        qb.push(" AND plan_type = ").push_bind(plan.as_str());
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR domain ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn push_user_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &UserFilter) {
    qb.push(" WHERE TRUE");
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(term);
        qb.push(" AND (email ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR last_name ILIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
    if let Some(role_id) = filter.role_id {
        qb.push(" AND EXISTS (SELECT 1 FROM user_roles ur WHERE ur.user_id = users.id AND ur.role_id = ")
            .push_bind(role_id)
            .push(")");
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
    if let Some(tenant_id) = filter.tenant_id {
        qb.push(" AND tenant_id = ").push_bind(tenant_id);
    }
}

fn push_audit_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    qb.push(" WHERE TRUE");
    if let Some(entity_type) = filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.as_str());
    }
    if let Some(entity_id) = &filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(action) = filter.action {
        qb.push(" AND action = ").push_bind(action.as_str());
    }
    if let Some(from) = filter.date_from {
        qb.push(" AND performed_at >= ").push_bind(from);
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Pagination) {
    qb.push(" LIMIT ")
        .push_bind(i64::from(page.limit))
        .push(" OFFSET ")
        .push_bind(page.offset() as i64);
}

impl PgStore {
    async fn role_ids_for(&self, user_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<Uuid>>> {
        let rows: Vec<(Uuid, Uuid)> =
            sqlx::query_as("SELECT user_id, role_id FROM user_roles WHERE user_id = ANY($1) ORDER BY role_id")
                .bind(user_ids)
                .fetch_all(&self.pool)
                .await?;
        let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (user_id, role_id) in rows {
            map.entry(user_id).or_default().push(role_id);
        }
        Ok(map)
    }

    async fn attach_roles(&self, rows: Vec<UserRow>) -> StoreResult<Vec<User>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut roles = self.role_ids_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let role_ids = roles.remove(&row.id).unwrap_or_default();
                row.into_user(role_ids)
            })
            .collect())
    }

    async fn write_user_roles(tx: &mut sqlx::Transaction<'_, Postgres>, user: &User) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(user.id)
            .execute(&mut **tx)
            .await?;
        for role_id in &user.role_ids {
            sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user.id)
                .bind(role_id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenants (id, name, domain, plan_type, status, brand_color, health_score, description, \
             max_users, created_at, updated_at, archived_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(tenant.plan_type.as_str())
        .bind(tenant.status.as_str())
        .bind(&tenant.brand_color)
        .bind(i16::from(tenant.health_score))
        .bind(&tenant.description)
        .bind(tenant.max_users.map(|m| m as i32))
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .bind(tenant.archived_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("domain '{}' is already in use", tenant.domain)))?;
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE tenants SET name = $2, domain = $3, plan_type = $4, status = $5, brand_color = $6, \
             health_score = $7, description = $8, max_users = $9, updated_at = $10, archived_at = $11 \
             WHERE id = $1",
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .bind(tenant.plan_type.as_str())
        .bind(tenant.status.as_str())
        .bind(&tenant.brand_color)
        .bind(i16::from(tenant.health_score))
        .bind(&tenant.description)
        .bind(tenant.max_users.map(|m| m as i32))
        .bind(tenant.updated_at)
        .bind(tenant.archived_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("domain '{}' is already in use", tenant.domain)))?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("tenant {}", tenant.id)));
        }
        Ok(())
    }

    async fn get_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let row: Option<TenantRow> = sqlx::query_as(&format!("SELECT {} FROM tenants WHERE id = $1", TENANT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Tenant::try_from).transpose()
    }

    async fn list_tenants(&self, filter: &TenantFilter, page: Pagination) -> StoreResult<Page<Tenant>> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM tenants");
        push_tenant_filter(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM tenants", TENANT_COLUMNS));
        push_tenant_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<TenantRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: convert_all(rows)?,
            total: count(total),
            pagination: page,
        })
    }

    async fn all_tenants(&self) -> StoreResult<Vec<Tenant>> {
        let rows: Vec<TenantRow> =
            sqlx::query_as(&format!("SELECT {} FROM tenants ORDER BY created_at", TENANT_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, email, first_name, last_name, is_active, tenant_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.tenant_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("email '{}' is already registered", user.email)))?;

        Self::write_user_roles(&mut tx, user).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE users SET first_name = $2, last_name = $3, is_active = $4, tenant_id = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .bind(user.tenant_id)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", user.id)));
        }

        Self::write_user_roles(&mut tx, user).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.attach_roles(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_users(&self, filter: &UserFilter, page: Pagination) -> StoreResult<Page<User>> {
        let total = self.count_users(filter).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_user_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC");
        push_page(&mut qb, page);
        let rows: Vec<UserRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: self.attach_roles(rows).await?,
            total,
            pagination: page,
        })
    }

    async fn count_users(&self, filter: &UserFilter) -> StoreResult<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM users");
        push_user_filter(&mut qb, filter);
        let (total,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count(total))
    }
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO roles (id, name, description, created_at) VALUES ($1, $2, $3, $4)")
            .bind(role.id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(role.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, || format!("role '{}' already exists", role.name)))?;

        for grant in &role.permissions {
            sqlx::query("INSERT INTO role_permissions (role_id, menu_permission_id, actions) VALUES ($1, $2, $3)")
                .bind(role.id)
                .bind(grant.menu_permission_id)
                .bind(actions_to_strings(&grant.actions))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let roles: Vec<RoleRow> = sqlx::query_as("SELECT id, name, description, created_at FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let grants: Vec<RolePermissionRow> =
            sqlx::query_as("SELECT role_id, menu_permission_id, actions FROM role_permissions")
                .fetch_all(&self.pool)
                .await?;

        let mut by_role: HashMap<Uuid, Vec<RolePermission>> = HashMap::new();
        for grant in grants {
            by_role.entry(grant.role_id).or_default().push(RolePermission {
                menu_permission_id: grant.menu_permission_id,
                actions: actions_from_strings(&grant.actions),
            });
        }

        Ok(roles
            .into_iter()
            .map(|row| Role {
                permissions: by_role.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                description: row.description,
                created_at: row.created_at,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn insert_menu_permission(&self, menu: &MenuPermission) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO menu_permissions (id, menu_key, menu_title, menu_path, module, required_actions, \
             ai_security_level, description) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(menu.id)
        .bind(&menu.menu_key)
        .bind(&menu.menu_title)
        .bind(&menu.menu_path)
        .bind(&menu.module)
        .bind(actions_to_strings(&menu.required_actions))
        .bind(menu.ai_security_level.as_str())
        .bind(&menu.description)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("menu key '{}' already exists", menu.menu_key)))?;
        Ok(())
    }

    async fn list_menu_permissions(&self) -> StoreResult<Vec<MenuPermission>> {
        let rows: Vec<MenuRow> = sqlx::query_as(
            "SELECT id, menu_key, menu_title, menu_path, module, required_actions, ai_security_level, description \
             FROM menu_permissions ORDER BY menu_key",
        )
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl OverrideRepository for PgStore {
    async fn supersede_override(
        &self,
        next: &PermissionOverride,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<PermissionOverride>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(override_slot_lock(next.user_id, next.menu_permission_id))
            .execute(&mut *tx)
            .await?;

        let previous: Option<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM permission_overrides \
             WHERE user_id = $1 AND menu_permission_id = $2 AND revoked_at IS NULL \
             AND (expires_at IS NULL OR expires_at > $3) \
             ORDER BY created_at DESC LIMIT 1 FOR UPDATE",
            OVERRIDE_COLUMNS
        ))
        .bind(next.user_id)
        .bind(next.menu_permission_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(prev) = &previous {
            sqlx::query("UPDATE permission_overrides SET revoked_at = $2 WHERE id = $1")
                .bind(prev.id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO permission_overrides (id, user_id, menu_permission_id, override_type, allowed_actions, \
             denied_actions, reason, expires_at, created_by, created_at, revoked_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(next.id)
        .bind(next.user_id)
        .bind(next.menu_permission_id)
        .bind(next.override_type.as_str())
        .bind(actions_to_strings(&next.allowed_actions))
        .bind(actions_to_strings(&next.denied_actions))
        .bind(&next.reason)
        .bind(next.expires_at)
        .bind(&next.created_by)
        .bind(next.created_at)
        .bind(next.revoked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        previous.map(PermissionOverride::try_from).transpose()
    }

    async fn revoke_override(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<PermissionOverride>> {
        let mut tx = self.pool.begin().await?;
        let before: Option<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM permission_overrides WHERE id = $1 AND revoked_at IS NULL FOR UPDATE",
            OVERRIDE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if before.is_some() {
            sqlx::query("UPDATE permission_overrides SET revoked_at = $2 WHERE id = $1")
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        before.map(PermissionOverride::try_from).transpose()
    }

    async fn list_overrides(&self, user_id: Uuid) -> StoreResult<Vec<PermissionOverride>> {
        let rows: Vec<OverrideRow> = sqlx::query_as(&format!(
            "SELECT {} FROM permission_overrides WHERE user_id = $1 ORDER BY created_at",
            OVERRIDE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl AuditRepository for PgStore {
    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<AuditLogEntry> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut *tx)
            .await?;

        let last: Option<(i64, String)> =
            sqlx::query_as("SELECT sequence, hash FROM audit_log ORDER BY sequence DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let (sequence, prev_hash) = match last {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };
        let sealed = entry.seal(sequence, &prev_hash);

        sqlx::query(&format!(
            "INSERT INTO audit_log ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            AUDIT_COLUMNS
        ))
        .bind(sealed.id)
        .bind(sealed.sequence)
        .bind(sealed.entity_type.as_str())
        .bind(&sealed.entity_id)
        .bind(sealed.action.as_str())
        .bind(&sealed.old_values)
        .bind(&sealed.new_values)
        .bind(&sealed.reason)
        .bind(i16::from(sealed.ai_risk_score))
        .bind(i16::from(sealed.ai_compliance_score))
        .bind(&sealed.performed_by)
        .bind(sealed.performed_at)
        .bind(&sealed.prev_hash)
        .bind(&sealed.hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sealed)
    }

    async fn list_audit(&self, filter: &AuditFilter, page: Pagination) -> StoreResult<Page<AuditLogEntry>> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM audit_log");
        push_audit_filter(&mut count_qb, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM audit_log", AUDIT_COLUMNS));
        push_audit_filter(&mut qb, filter);
        qb.push(" ORDER BY sequence DESC");
        push_page(&mut qb, page);
        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        Ok(Page {
            items: convert_all(rows)?,
            total: count(total),
            pagination: page,
        })
    }

    async fn audit_chain(&self) -> StoreResult<Vec<AuditLogEntry>> {
        let rows: Vec<AuditRow> =
            sqlx::query_as(&format!("SELECT {} FROM audit_log ORDER BY sequence", AUDIT_COLUMNS))
                .fetch_all(&self.pool)
                .await?;
        convert_all(rows)
    }

    async fn count_audit(&self) -> StoreResult<u64> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(count(total))
    }
}

#[async_trait]
impl RecommendationRepository for PgStore {
    async fn insert_recommendation(&self, rec: &Recommendation) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO recommendations ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            RECOMMENDATION_COLUMNS
        ))
        .bind(rec.id)
        .bind(rec.user_id)
        .bind(rec.menu_permission_id)
        .bind(rec.kind.as_str())
        .bind(actions_to_strings(&rec.actions))
        .bind(&rec.rationale)
        .bind(rec.confidence)
        .bind(rec.status.as_str())
        .bind(rec.created_at)
        .bind(rec.decided_at)
        .bind(&rec.decided_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_recommendation(&self, rec: &Recommendation) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE recommendations SET status = $2, decided_at = $3, decided_by = $4 WHERE id = $1")
                .bind(rec.id)
                .bind(rec.status.as_str())
                .bind(rec.decided_at)
                .bind(&rec.decided_by)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("recommendation {}", rec.id)));
        }
        Ok(())
    }

    async fn claim_recommendation(&self, rec: &Recommendation) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE recommendations SET status = $2, decided_at = $3, decided_by = $4 \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(rec.id)
        .bind(rec.status.as_str())
        .bind(rec.decided_at)
        .bind(&rec.decided_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_recommendation(&self, id: Uuid) -> StoreResult<Option<Recommendation>> {
        let row: Option<RecommendationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM recommendations WHERE id = $1",
            RECOMMENDATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Recommendation::try_from).transpose()
    }

    async fn list_recommendations(&self, filter: &RecommendationFilter) -> StoreResult<Vec<Recommendation>> {
        let mut qb = QueryBuilder::new(format!("SELECT {} FROM recommendations WHERE TRUE", RECOMMENDATION_COLUMNS));
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        qb.push(" ORDER BY created_at DESC");
        let rows: Vec<RecommendationRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        convert_all(rows)
    }
}

#[async_trait]
impl Store for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("_"), "%\\_%");
        assert_eq!(like_pattern("50%"), "%50\\%%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }

    #[test]
    fn override_slot_lock_is_per_user_and_menu() {
        let user = Uuid::new_v4();
        let menu = Uuid::new_v4();
        let other_menu = Uuid::new_v4();
        assert_eq!(override_slot_lock(user, menu), override_slot_lock(user, menu));
        assert_ne!(override_slot_lock(user, menu), override_slot_lock(user, other_menu));
        assert_ne!(override_slot_lock(user, menu), override_slot_lock(menu, user));
        assert_ne!(override_slot_lock(user, menu), AUDIT_CHAIN_LOCK);
    }

    #[test]
    fn search_filters_bind_escaped_patterns() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM tenants");
        push_tenant_filter(
            &mut qb,
            &TenantFilter {
                search: Some("a_b".into()),
                ..Default::default()
            },
        );
        let sql = qb.sql();
        assert_eq!(sql.matches("ESCAPE '\\'").count(), 2, "sql: {}", sql);

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users");
        push_user_filter(
            &mut qb,
            &UserFilter {
                search: Some("x%".into()),
                ..Default::default()
            },
        );
        assert_eq!(qb.sql().matches("ESCAPE '\\'").count(), 3);
    }
}
