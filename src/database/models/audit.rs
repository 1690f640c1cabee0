//! Append-only audit log entries.
//!
//! Entries are chained: each one stores the SHA-256 of the previous entry and
//! its own digest over the canonical JSON of every other field. Replaying the
//! chain from the genesis hash detects edits, insertions and deletions.

use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntityType {
    User,
    Role,
    MenuPermission,
    System,
}

impl AuditEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntityType::User => "USER",
            AuditEntityType::Role => "ROLE",
            AuditEntityType::MenuPermission => "MENU_PERMISSION",
            AuditEntityType::System => "SYSTEM",
        }
    }
}

impl FromStr for AuditEntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Ok(AuditEntityType::User),
            "ROLE" => Ok(AuditEntityType::Role),
            "MENU_PERMISSION" => Ok(AuditEntityType::MenuPermission),
            "SYSTEM" => Ok(AuditEntityType::System),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Granted,
    Revoked,
    Modified,
    Reviewed,
    Inherited,
    Overridden,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Granted => "GRANTED",
            AuditAction::Revoked => "REVOKED",
            AuditAction::Modified => "MODIFIED",
            AuditAction::Reviewed => "REVIEWED",
            AuditAction::Inherited => "INHERITED",
            AuditAction::Overridden => "OVERRIDDEN",
        }
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GRANTED" => Ok(AuditAction::Granted),
            "REVOKED" => Ok(AuditAction::Revoked),
            "MODIFIED" => Ok(AuditAction::Modified),
            "REVIEWED" => Ok(AuditAction::Reviewed),
            "INHERITED" => Ok(AuditAction::Inherited),
            "OVERRIDDEN" => Ok(AuditAction::Overridden),
            other => Err(format!("unknown audit action '{}'", other)),
        }
    }
}

/// An audit record before it has a position in the chain
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_values: Value,
    pub new_values: Value,
    pub reason: Option<String>,
    pub ai_risk_score: u8,
    pub ai_compliance_score: u8,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
}

impl NewAuditEntry {
    /// Entry with empty values and baseline scores, performed now
    pub fn new(
        entity_type: AuditEntityType,
        entity_id: impl Into<String>,
        action: AuditAction,
        performed_by: impl Into<String>,
    ) -> Self {
        let scores = crate::permissions::baseline(false);
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
            old_values: Value::Null,
            new_values: Value::Null,
            reason: None,
            ai_risk_score: scores.risk_score,
            ai_compliance_score: scores.compliance_score,
            performed_by: performed_by.into(),
            performed_at: Utc::now(),
        }
    }

    pub fn values(mut self, old_values: Value, new_values: Value) -> Self {
        self.old_values = old_values;
        self.new_values = new_values;
        self
    }

    /// Blank reasons are stored as absent
    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string);
        self
    }

    pub fn scores(mut self, assessment: crate::permissions::RiskAssessment) -> Self {
        self.ai_risk_score = assessment.risk_score;
        self.ai_compliance_score = assessment.compliance_score;
        self
    }

    /// Fix the entry at `sequence` after the entry hashed `prev_hash`
    pub fn seal(self, sequence: i64, prev_hash: &str) -> AuditLogEntry {
        let mut entry = AuditLogEntry {
            id: Uuid::new_v4(),
            sequence,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            old_values: self.old_values,
            new_values: self.new_values,
            reason: self.reason,
            ai_risk_score: self.ai_risk_score,
            ai_compliance_score: self.ai_compliance_score,
            performed_by: self.performed_by,
            // Postgres keeps microseconds; truncate so stored entries rehash identically
            performed_at: self.performed_at.trunc_subsecs(6),
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash();
        entry
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence: i64,
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub action: AuditAction,
    pub old_values: Value,
    pub new_values: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub ai_risk_score: u8,
    pub ai_compliance_score: u8,
    pub performed_by: String,
    pub performed_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    id: &'a Uuid,
    sequence: i64,
    entity_type: AuditEntityType,
    entity_id: &'a str,
    action: AuditAction,
    old_values: &'a Value,
    new_values: &'a Value,
    reason: &'a Option<String>,
    ai_risk_score: u8,
    ai_compliance_score: u8,
    performed_by: &'a str,
    performed_at: String,
    prev_hash: &'a str,
}

impl AuditLogEntry {
    pub fn compute_hash(&self) -> String {
        let fields = HashedFields {
            id: &self.id,
            sequence: self.sequence,
            entity_type: self.entity_type,
            entity_id: &self.entity_id,
            action: self.action,
            old_values: &self.old_values,
            new_values: &self.new_values,
            reason: &self.reason,
            ai_risk_score: self.ai_risk_score,
            ai_compliance_score: self.ai_compliance_score,
            performed_by: &self.performed_by,
            performed_at: self.performed_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            prev_hash: &self.prev_hash,
        };
        let json = serde_json::to_string(&fields).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }
}

/// Outcome of replaying the hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub total_entries: u64,
    pub chain_intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_break_at: Option<i64>,
}

/// Entries must be in ascending sequence order
pub fn verify_chain(entries: &[AuditLogEntry]) -> ChainVerification {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut expected_sequence = 1;

    for entry in entries {
        let linked = entry.prev_hash == prev_hash && entry.sequence == expected_sequence;
        if !linked || entry.compute_hash() != entry.hash {
            return ChainVerification {
                total_entries: entries.len() as u64,
                chain_intact: false,
                first_break_at: Some(entry.sequence),
            };
        }
        prev_hash = entry.hash.clone();
        expected_sequence += 1;
    }

    ChainVerification {
        total_entries: entries.len() as u64,
        chain_intact: true,
        first_break_at: None,
    }
}
