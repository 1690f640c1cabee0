use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::ActionSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationKind {
    Grant,
    Revoke,
    Review,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationKind::Grant => "GRANT",
            RecommendationKind::Revoke => "REVOKE",
            RecommendationKind::Review => "REVIEW",
        }
    }
}

impl FromStr for RecommendationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GRANT" => Ok(RecommendationKind::Grant),
            "REVOKE" => Ok(RecommendationKind::Revoke),
            "REVIEW" => Ok(RecommendationKind::Review),
            other => Err(format!("unknown recommendation kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "PENDING",
            RecommendationStatus::Approved => "APPROVED",
            RecommendationStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(RecommendationStatus::Pending),
            "APPROVED" => Ok(RecommendationStatus::Approved),
            "REJECTED" => Ok(RecommendationStatus::Rejected),
            other => Err(format!("unknown recommendation status '{}'", other)),
        }
    }
}

/// Suggestion produced by a recommendation engine, as returned by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecommendation {
    pub user_id: Uuid,
    pub menu_permission_id: Uuid,
    pub kind: RecommendationKind,
    pub actions: ActionSet,
    pub rationale: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub menu_permission_id: Uuid,
    pub kind: RecommendationKind,
    pub actions: ActionSet,
    pub rationale: String,
    pub confidence: f64,
    pub status: RecommendationStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
}

impl Recommendation {
    pub fn from_new(input: NewRecommendation, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            menu_permission_id: input.menu_permission_id,
            kind: input.kind,
            actions: input.actions,
            rationale: input.rationale,
            confidence: input.confidence.clamp(0.0, 1.0),
            status: RecommendationStatus::Pending,
            created_at: now,
            decided_at: None,
            decided_by: None,
        }
    }

    /// Same user, menu and kind as a candidate
    pub fn duplicates(&self, candidate: &NewRecommendation) -> bool {
        self.user_id == candidate.user_id
            && self.menu_permission_id == candidate.menu_permission_id
            && self.kind == candidate.kind
    }
}
