//! Postgres schema and migration runner.
//!
//! Enums are stored as TEXT with CHECK constraints, action sets as TEXT[].
//! Each migration runs once, inside its own transaction, and is recorded in
//! `_migrations`.

use sqlx::PgPool;
use tracing::info;

use super::manager::DatabaseError;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATION_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS _migrations (
    version     INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    applied_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)";

const SCHEMA_V1: &str = "
CREATE TABLE tenants (
    id            UUID PRIMARY KEY,
    name          TEXT NOT NULL,
    domain        TEXT NOT NULL UNIQUE,
    plan_type     TEXT NOT NULL CHECK (plan_type IN ('DEMO','BASIC','PRO','ENTERPRISE','CUSTOM')),
    status        TEXT NOT NULL CHECK (status IN ('ACTIVE','INACTIVE','SUSPENDED','TRIAL','ARCHIVED','PENDING_SETUP')),
    brand_color   TEXT NOT NULL,
    health_score  SMALLINT NOT NULL CHECK (health_score BETWEEN 0 AND 100),
    description   TEXT,
    max_users     INTEGER,
    created_at    TIMESTAMPTZ NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL,
    archived_at   TIMESTAMPTZ
);
CREATE INDEX idx_tenants_status ON tenants (status);

CREATE TABLE menu_permissions (
    id                UUID PRIMARY KEY,
    menu_key          TEXT NOT NULL UNIQUE,
    menu_title        TEXT NOT NULL,
    menu_path         TEXT NOT NULL,
    module            TEXT NOT NULL,
    required_actions  TEXT[] NOT NULL,
    ai_security_level TEXT NOT NULL CHECK (ai_security_level IN ('LOW','STANDARD','HIGH','CRITICAL')),
    description       TEXT
);

CREATE TABLE roles (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE role_permissions (
    role_id             UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
    menu_permission_id  UUID NOT NULL REFERENCES menu_permissions(id),
    actions             TEXT[] NOT NULL,
    PRIMARY KEY (role_id, menu_permission_id)
);

CREATE TABLE users (
    id          UUID PRIMARY KEY,
    email       TEXT NOT NULL UNIQUE,
    first_name  TEXT,
    last_name   TEXT,
    is_active   BOOLEAN NOT NULL,
    tenant_id   UUID REFERENCES tenants(id),
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE user_roles (
    user_id  UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role_id  UUID NOT NULL REFERENCES roles(id),
    PRIMARY KEY (user_id, role_id)
);

CREATE TABLE permission_overrides (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id),
    menu_permission_id  UUID NOT NULL REFERENCES menu_permissions(id),
    override_type       TEXT NOT NULL CHECK (override_type IN ('GRANT','DENY','CUSTOM')),
    allowed_actions     TEXT[] NOT NULL,
    denied_actions      TEXT[] NOT NULL,
    reason              TEXT,
    expires_at          TIMESTAMPTZ,
    created_by          TEXT NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    revoked_at          TIMESTAMPTZ
);
CREATE INDEX idx_overrides_user ON permission_overrides (user_id, menu_permission_id);

CREATE TABLE audit_log (
    id                   UUID PRIMARY KEY,
    sequence             BIGINT NOT NULL UNIQUE,
    entity_type          TEXT NOT NULL CHECK (entity_type IN ('USER','ROLE','MENU_PERMISSION','SYSTEM')),
    entity_id            TEXT NOT NULL,
    action               TEXT NOT NULL CHECK (action IN ('GRANTED','REVOKED','MODIFIED','REVIEWED','INHERITED','OVERRIDDEN')),
    old_values           JSONB NOT NULL,
    new_values           JSONB NOT NULL,
    reason               TEXT,
    ai_risk_score        SMALLINT NOT NULL,
    ai_compliance_score  SMALLINT NOT NULL,
    performed_by         TEXT NOT NULL,
    performed_at         TIMESTAMPTZ NOT NULL,
    prev_hash            TEXT NOT NULL,
    hash                 TEXT NOT NULL
);
CREATE INDEX idx_audit_entity ON audit_log (entity_type, entity_id);

CREATE TABLE recommendations (
    id                  UUID PRIMARY KEY,
    user_id             UUID NOT NULL REFERENCES users(id),
    menu_permission_id  UUID NOT NULL REFERENCES menu_permissions(id),
    kind                TEXT NOT NULL CHECK (kind IN ('GRANT','REVOKE','REVIEW')),
    actions             TEXT[] NOT NULL,
    rationale           TEXT NOT NULL,
    confidence          DOUBLE PRECISION NOT NULL,
    status              TEXT NOT NULL CHECK (status IN ('PENDING','APPROVED','REJECTED')),
    created_at          TIMESTAMPTZ NOT NULL,
    decided_at          TIMESTAMPTZ,
    decided_by          TEXT
);
";

// Append-only at the database level, not just by API omission
const SCHEMA_V2: &str = "
CREATE FUNCTION audit_log_is_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'audit_log is append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER audit_log_no_update_delete
    BEFORE UPDATE OR DELETE ON audit_log
    FOR EACH ROW EXECUTE FUNCTION audit_log_is_append_only();
";

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "audit_append_only",
        sql: SCHEMA_V2,
    },
];

pub async fn run_migrations(pool: &PgPool) -> Result<(), DatabaseError> {
    sqlx::query(MIGRATION_TABLE_DDL).execute(pool).await?;

    let applied: Vec<(i32,)> = sqlx::query_as("SELECT version FROM _migrations")
        .fetch_all(pool)
        .await?;

    for migration in MIGRATIONS {
        if applied.iter().any(|(v,)| *v == migration.version) {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("{}: {}", migration.name, e)))?;
        sqlx::query("INSERT INTO _migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(())
}
