use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Actions that can be granted on a menu item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Delete,
    Admin,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Read, Action::Write, Action::Delete, Action::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
            Action::Admin => "admin",
        }
    }

    /// Relative weight used by the risk scorer
    pub fn weight(&self) -> u32 {
        match self {
            Action::Read => 1,
            Action::Write => 3,
            Action::Delete => 5,
            Action::Admin => 8,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Action::Read),
            "write" => Ok(Action::Write),
            "delete" => Ok(Action::Delete),
            "admin" => Ok(Action::Admin),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

/// Ordered set of actions. Serializes as a sorted JSON array.
pub type ActionSet = BTreeSet<Action>;

pub fn actions_to_strings(set: &ActionSet) -> Vec<String> {
    set.iter().map(|a| a.as_str().to_string()).collect()
}

/// Parse stored action names, skipping anything unrecognised
pub fn actions_from_strings(values: &[String]) -> ActionSet {
    values.iter().filter_map(|v| v.parse().ok()).collect()
}

/// Parse a comma separated list such as `read,write`
pub fn parse_action_list(value: &str) -> Result<ActionSet, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

/// How sensitive a menu item is considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    Low,
    Standard,
    High,
    Critical,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Low => "LOW",
            SecurityLevel::Standard => "STANDARD",
            SecurityLevel::High => "HIGH",
            SecurityLevel::Critical => "CRITICAL",
        }
    }

    pub fn weight(&self) -> u32 {
        match self {
            SecurityLevel::Low => 1,
            SecurityLevel::Standard => 2,
            SecurityLevel::High => 4,
            SecurityLevel::Critical => 6,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, SecurityLevel::High | SecurityLevel::Critical)
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(SecurityLevel::Low),
            "STANDARD" => Ok(SecurityLevel::Standard),
            "HIGH" => Ok(SecurityLevel::High),
            "CRITICAL" => Ok(SecurityLevel::Critical),
            other => Err(format!("unknown security level '{}'", other)),
        }
    }
}
