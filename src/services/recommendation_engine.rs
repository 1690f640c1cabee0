//! Recommendation engines.
//!
//! An engine looks at every user's roles, active overrides and effective
//! permissions and proposes GRANT, REVOKE or REVIEW suggestions. The built-in
//! [`HeuristicEngine`] runs in-process; [`HttpEngine`] delegates to an
//! external service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::models::{
    MenuPermission, NewRecommendation, PermissionOverride, RecommendationKind, Role, User,
};
use crate::permissions::{Action, ActionSet, EffectivePermissions, SecurityLevel};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid engine endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Engine request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Engine returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Everything an engine knows about one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub user: User,
    pub roles: Vec<Role>,
    /// Active overrides only
    pub overrides: Vec<PermissionOverride>,
    pub effective: EffectivePermissions,
}

/// Request body sent to external engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInput {
    pub users: Vec<UserSnapshot>,
    pub catalog: Vec<MenuPermission>,
}

#[derive(Debug, Clone, Deserialize)]
struct EngineOutput {
    #[serde(default)]
    recommendations: Vec<NewRecommendation>,
}

#[async_trait]
pub trait RecommendationEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, input: &EngineInput) -> Result<Vec<NewRecommendation>, EngineError>;
}

/// Rule-based engine:
///
/// - REVOKE `admin` granted by an override without expiry on a CRITICAL menu
/// - otherwise REVIEW overrides granting `admin` or `delete` on HIGH or CRITICAL menus
/// - GRANT `read` where a user can write, delete or administer a menu but not
///   read it, unless read is explicitly denied
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEngine;

impl HeuristicEngine {
    fn for_user(snapshot: &UserSnapshot, catalog: &[MenuPermission]) -> Vec<NewRecommendation> {
        let mut out = Vec::new();
        let user_id = snapshot.user.id;

        for o in &snapshot.overrides {
            let Some(menu) = catalog.iter().find(|m| m.id == o.menu_permission_id) else {
                continue;
            };

            if menu.ai_security_level == SecurityLevel::Critical
                && o.expires_at.is_none()
                && o.allowed_actions.contains(&Action::Admin)
            {
                out.push(NewRecommendation {
                    user_id,
                    menu_permission_id: menu.id,
                    kind: RecommendationKind::Revoke,
                    actions: [Action::Admin].into_iter().collect(),
                    rationale: format!(
                        "Permanent admin override on critical menu '{}' for {}",
                        menu.menu_key,
                        snapshot.user.display_name()
                    ),
                    confidence: 0.9,
                });
                continue;
            }

            let risky: ActionSet = o
                .allowed_actions
                .iter()
                .copied()
                .filter(|a| matches!(a, Action::Admin | Action::Delete))
                .collect();
            if menu.ai_security_level.is_sensitive() && !risky.is_empty() {
                let confidence = if o.expires_at.is_some() { 0.5 } else { 0.7 };
                out.push(NewRecommendation {
                    user_id,
                    menu_permission_id: menu.id,
                    kind: RecommendationKind::Review,
                    actions: risky,
                    rationale: format!(
                        "Override grants elevated actions on {} menu '{}'",
                        menu.ai_security_level.as_str(),
                        menu.menu_key
                    ),
                    confidence,
                });
            }
        }

        for menu in catalog {
            let Some(effective) = snapshot.effective.get(&menu.menu_key) else {
                continue;
            };
            let elevated = [Action::Write, Action::Delete, Action::Admin]
                .iter()
                .any(|a| effective.allowed_actions.contains(a));
            if elevated
                && !effective.allowed_actions.contains(&Action::Read)
                && !effective.denied_actions.contains(&Action::Read)
                && menu.required_actions.contains(&Action::Read)
            {
                out.push(NewRecommendation {
                    user_id,
                    menu_permission_id: menu.id,
                    kind: RecommendationKind::Grant,
                    actions: [Action::Read].into_iter().collect(),
                    rationale: format!("Can modify '{}' but cannot view it", menu.menu_key),
                    confidence: 0.8,
                });
            }
        }

        out
    }
}

#[async_trait]
impl RecommendationEngine for HeuristicEngine {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn generate(&self, input: &EngineInput) -> Result<Vec<NewRecommendation>, EngineError> {
        Ok(input
            .users
            .iter()
            .filter(|s| s.user.is_active)
            .flat_map(|s| Self::for_user(s, &input.catalog))
            .collect())
    }
}

/// POSTs the engine input as JSON and expects `{ "recommendations": [...] }`
pub struct HttpEngine {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpEngine {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EngineError> {
        let endpoint = url::Url::parse(endpoint).map_err(|e| EngineError::InvalidEndpoint(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl RecommendationEngine for HttpEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn generate(&self, input: &EngineInput) -> Result<Vec<NewRecommendation>, EngineError> {
        let response = self.client.post(self.endpoint.clone()).json(input).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let output: EngineOutput = response.json().await?;
        Ok(output.recommendations)
    }
}
