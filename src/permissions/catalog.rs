//! Default menu catalog and roles.
//!
//! The built-in seed is compiled in from `catalog.yaml`; a deployment can
//! point `SEED_CATALOG_PATH` at its own file with the same shape.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::action::{ActionSet, SecurityLevel};
use crate::database::models::{MenuPermission, Role, RolePermission};
use crate::database::store::{CatalogRepository, RoleRepository};
use crate::database::{DatabaseError, Store};

const DEFAULT_CATALOG: &str = include_str!("catalog.yaml");

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Role '{role}' grants unknown menu '{menu_key}'")]
    UnknownMenu { role: String, menu_key: String },

    #[error("Role '{role}' grants actions on '{menu_key}' the menu does not require")]
    UnsupportedActions { role: String, menu_key: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MenuSeed {
    pub menu_key: String,
    pub menu_title: String,
    pub menu_path: String,
    pub module: String,
    pub required_actions: ActionSet,
    pub ai_security_level: SecurityLevel,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleSeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// menu key → actions
    #[serde(default)]
    pub grants: BTreeMap<String, ActionSet>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSeed {
    pub menus: Vec<MenuSeed>,
    #[serde(default)]
    pub roles: Vec<RoleSeed>,
}

impl CatalogSeed {
    pub fn builtin() -> Result<Self, SeedError> {
        Self::parse(DEFAULT_CATALOG)
    }

    pub fn parse(yaml: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Built-in seed unless a path is given
    pub fn load(path: Option<&str>) -> Result<Self, SeedError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    /// Materialise ids and resolve role grants against the menus
    pub fn build(&self) -> Result<(Vec<MenuPermission>, Vec<Role>), SeedError> {
        let menus: Vec<MenuPermission> = self
            .menus
            .iter()
            .map(|m| MenuPermission {
                id: Uuid::new_v4(),
                menu_key: m.menu_key.clone(),
                menu_title: m.menu_title.clone(),
                menu_path: m.menu_path.clone(),
                module: m.module.clone(),
                required_actions: m.required_actions.clone(),
                ai_security_level: m.ai_security_level,
                description: m.description.clone(),
            })
            .collect();

        let now = Utc::now();
        let mut roles = Vec::with_capacity(self.roles.len());
        for seed in &self.roles {
            let mut permissions = Vec::with_capacity(seed.grants.len());
            for (menu_key, actions) in &seed.grants {
                let menu = menus
                    .iter()
                    .find(|m| &m.menu_key == menu_key)
                    .ok_or_else(|| SeedError::UnknownMenu {
                        role: seed.name.clone(),
                        menu_key: menu_key.clone(),
                    })?;
                if !actions.is_subset(&menu.required_actions) {
                    return Err(SeedError::UnsupportedActions {
                        role: seed.name.clone(),
                        menu_key: menu_key.clone(),
                    });
                }
                permissions.push(RolePermission {
                    menu_permission_id: menu.id,
                    actions: actions.clone(),
                });
            }
            roles.push(Role {
                id: Uuid::new_v4(),
                name: seed.name.clone(),
                description: seed.description.clone(),
                permissions,
                created_at: now,
            });
        }

        Ok((menus, roles))
    }
}

/// Seed the catalog and roles into an empty store. Returns `false` when the
/// store already has a catalog.
pub async fn seed_defaults(store: &dyn Store, seed: &CatalogSeed) -> Result<bool, SeedError> {
    if !store.list_menu_permissions().await?.is_empty() {
        return Ok(false);
    }

    let (menus, roles) = seed.build()?;
    for menu in &menus {
        store.insert_menu_permission(menu).await?;
    }
    for role in &roles {
        store.insert_role(role).await?;
    }

    info!(menus = menus.len(), roles = roles.len(), "Seeded permission catalog");
    Ok(true)
}
