use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::{ActionSet, SecurityLevel};

/// A manageable capability in the console navigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuPermission {
    pub id: Uuid,
    pub menu_key: String,
    pub menu_title: String,
    pub menu_path: String,
    pub module: String,
    pub required_actions: ActionSet,
    pub ai_security_level: SecurityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
