use serde::{Deserialize, Serialize};

use super::action::{ActionSet, SecurityLevel};

/// Scores attached to every audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub compliance_score: u8,
}

/// What a change does, as far as scoring is concerned
#[derive(Debug, Clone, Copy)]
pub struct ChangeProfile<'a> {
    pub level: SecurityLevel,
    pub actions: &'a ActionSet,
    pub granting: bool,
    pub has_expiry: bool,
    pub has_reason: bool,
}

const BASELINE_RISK: u32 = 10;

pub fn assess(change: ChangeProfile<'_>) -> RiskAssessment {
    let action_weight: u32 = change.actions.iter().map(|a| a.weight()).sum();
    let mut risk = change.level.weight() * action_weight;
    if change.granting && !change.has_expiry {
        risk *= 2;
    }
    score(risk, change.has_reason)
}

/// Changes not tied to a single menu item (role assignment, tenant lifecycle)
pub fn baseline(has_reason: bool) -> RiskAssessment {
    score(BASELINE_RISK, has_reason)
}

fn score(risk: u32, has_reason: bool) -> RiskAssessment {
    let risk = risk.min(100);
    let mut compliance = 100 - risk / 2;
    if !has_reason {
        compliance = compliance.saturating_sub(20);
    }
    RiskAssessment {
        risk_score: risk as u8,
        compliance_score: compliance as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Action;

    fn actions(list: &[Action]) -> ActionSet {
        list.iter().copied().collect()
    }

    #[test]
    fn read_on_low_is_negligible() {
        let set = actions(&[Action::Read]);
        let result = assess(ChangeProfile {
            level: SecurityLevel::Low,
            actions: &set,
            granting: true,
            has_expiry: true,
            has_reason: true,
        });
        assert_eq!(result.risk_score, 1);
        assert_eq!(result.compliance_score, 100);
    }

    #[test]
    fn open_ended_admin_on_critical_is_capped() {
        let set = actions(&[Action::Admin, Action::Delete]);
        let result = assess(ChangeProfile {
            level: SecurityLevel::Critical,
            actions: &set,
            granting: true,
            has_expiry: false,
            has_reason: false,
        });
        assert_eq!(result.risk_score, 100);
        assert_eq!(result.compliance_score, 30);
    }

    #[test]
    fn expiry_halves_grant_risk() {
        let set = actions(&[Action::Write]);
        let base = ChangeProfile {
            level: SecurityLevel::High,
            actions: &set,
            granting: true,
            has_expiry: false,
            has_reason: true,
        };
        let open = assess(base);
        let boxed = assess(ChangeProfile { has_expiry: true, ..base });
        assert_eq!(open.risk_score, 24);
        assert_eq!(boxed.risk_score, 12);
    }
}
