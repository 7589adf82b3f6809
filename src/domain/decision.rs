use crate::domain::abac_policy::Effect;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Why a decision came out the way it did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// At least one Permit rule matched and no Deny rule did.
    PermitRule,
    /// A Deny rule matched; it overrides any matching Permit.
    DenyRule,
    /// No rule matched. Denied by default.
    NotApplicable,
    /// The request referenced an entity the store does not know.
    UnknownEntity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub effect: Effect,
    pub reason: DecisionReason,
    pub matched_rules: Vec<String>,
    pub policy_version: u64,
}

impl Decision {
    pub fn permit(matched_rules: Vec<String>, policy_version: u64) -> Self {
        Self {
            effect: Effect::Permit,
            reason: DecisionReason::PermitRule,
            matched_rules,
            policy_version,
        }
    }

    pub fn deny(matched_rules: Vec<String>, policy_version: u64) -> Self {
        Self {
            effect: Effect::Deny,
            reason: DecisionReason::DenyRule,
            matched_rules,
            policy_version,
        }
    }

    pub fn not_applicable(policy_version: u64) -> Self {
        Self {
            effect: Effect::Deny,
            reason: DecisionReason::NotApplicable,
            matched_rules: vec![],
            policy_version,
        }
    }

    pub fn unknown_entity(policy_version: u64) -> Self {
        Self {
            effect: Effect::Deny,
            reason: DecisionReason::UnknownEntity,
            matched_rules: vec![],
            policy_version,
        }
    }

    pub fn is_permit(&self) -> bool {
        self.effect == Effect::Permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_closed_constructors() {
        assert_eq!(Decision::not_applicable(3).effect, Effect::Deny);
        assert_eq!(Decision::unknown_entity(3).effect, Effect::Deny);
        assert!(!Decision::deny(vec!["r".into()], 1).is_permit());
        assert!(Decision::permit(vec!["r".into()], 1).is_permit());
    }
}
