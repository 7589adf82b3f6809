use crate::domain::abac_policy::{Effect, PolicyRule, Predicate};
use crate::domain::attribute::AttributeLookup;
use crate::domain::decision::Decision;
use crate::infrastructure::PolicySnapshot;
use tracing::debug;

/// Decides a single (subject, resource, operation) triple against one policy
/// snapshot. Deny overrides Permit; no match is a Deny.
#[derive(Clone, Copy)]
pub struct PolicyEvaluator<'a> {
    policy: &'a PolicySnapshot,
}

impl<'a> PolicyEvaluator<'a> {
    pub fn new(policy: &'a PolicySnapshot) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &'a PolicySnapshot {
        self.policy
    }

    pub fn evaluate(
        &self,
        subject: &dyn AttributeLookup,
        resource: &dyn AttributeLookup,
        operation: &str,
    ) -> Decision {
        let mut permits = Vec::new();
        let mut denies = Vec::new();
        for rule in self.policy.rules_for(operation) {
            if self.rule_matches(rule, subject, resource) {
                match rule.effect {
                    Effect::Permit => permits.push(rule.id.clone()),
                    Effect::Deny => denies.push(rule.id.clone()),
                }
            }
        }

        let version = self.policy.version();
        if !denies.is_empty() {
            Decision::deny(denies, version)
        } else if !permits.is_empty() {
            Decision::permit(permits, version)
        } else {
            Decision::not_applicable(version)
        }
    }

    /// Same outcome as `evaluate(..).is_permit()`, without collecting rule ids.
    pub fn permits(
        &self,
        subject: &dyn AttributeLookup,
        resource: &dyn AttributeLookup,
        operation: &str,
    ) -> bool {
        let mut permitted = false;
        for rule in self.policy.rules_for(operation) {
            if !self.rule_matches(rule, subject, resource) {
                continue;
            }
            match rule.effect {
                Effect::Deny => return false,
                Effect::Permit => permitted = true,
            }
        }
        permitted
    }

    pub fn rule_matches(
        &self,
        rule: &PolicyRule,
        subject: &dyn AttributeLookup,
        resource: &dyn AttributeLookup,
    ) -> bool {
        self.predicate_holds(rule, &rule.subject, subject)
            && self.predicate_holds(rule, &rule.resource, resource)
    }

    /// A predicate that cannot be evaluated (missing or non-numeric attribute)
    /// does not hold.
    pub fn predicate_holds(
        &self,
        rule: &PolicyRule,
        predicate: &Predicate,
        attrs: &dyn AttributeLookup,
    ) -> bool {
        match predicate.matches(attrs) {
            Ok(holds) => holds,
            Err(e) => {
                debug!(rule_id = %rule.id, error = %e, "Condition treated as not satisfied");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::abac_policy::Condition;
    use crate::domain::attribute::{AttributeSet, Entity};
    use crate::domain::decision::DecisionReason;

    fn subject(role: &str) -> Entity {
        Entity::new("s", "Person", AttributeSet::new().with("role", role))
    }

    fn diplome() -> Entity {
        Entity::new("d", "Diplome", AttributeSet::new())
    }

    fn professeur_rule() -> PolicyRule {
        PolicyRule::permit("prof-lire", "lire")
            .with_subject(Condition::equals("role", "professeur"))
            .with_resource(Condition::equals("class", "Diplome"))
    }

    #[test]
    fn test_permit_on_matching_rule() {
        let policy = PolicySnapshot::build(1, vec![professeur_rule()]).unwrap();
        let decision =
            PolicyEvaluator::new(&policy).evaluate(&subject("professeur"), &diplome(), "lire");
        assert!(decision.is_permit());
        assert_eq!(decision.matched_rules, vec!["prof-lire".to_string()]);
        assert_eq!(decision.policy_version, 1);
    }

    #[test]
    fn test_no_match_denies() {
        let policy = PolicySnapshot::build(1, vec![professeur_rule()]).unwrap();
        let evaluator = PolicyEvaluator::new(&policy);
        let decision = evaluator.evaluate(&subject("etudiant"), &diplome(), "lire");
        assert_eq!(decision.effect, Effect::Deny);
        assert_eq!(decision.reason, DecisionReason::NotApplicable);

        let decision = evaluator.evaluate(&subject("professeur"), &diplome(), "ecrire");
        assert_eq!(decision.reason, DecisionReason::NotApplicable);
    }

    #[test]
    fn test_deny_overrides_permit_regardless_of_order() {
        let deny = PolicyRule::deny("no-lire", "lire").with_resource(Condition::Any);
        for rules in [
            vec![professeur_rule(), deny.clone()],
            vec![deny.clone(), professeur_rule()],
        ] {
            let policy = PolicySnapshot::build(1, rules).unwrap();
            let evaluator = PolicyEvaluator::new(&policy);
            let decision = evaluator.evaluate(&subject("professeur"), &diplome(), "lire");
            assert_eq!(decision.effect, Effect::Deny);
            assert_eq!(decision.reason, DecisionReason::DenyRule);
            assert_eq!(decision.matched_rules, vec!["no-lire".to_string()]);
            assert!(!evaluator.permits(&subject("professeur"), &diplome(), "lire"));
        }
    }

    #[test]
    fn test_missing_attribute_is_non_match() {
        let rule = PolicyRule::permit("emea", "lire")
            .with_subject(Condition::equals("region", "emea"));
        let policy = PolicySnapshot::build(1, vec![rule]).unwrap();
        let decision =
            PolicyEvaluator::new(&policy).evaluate(&subject("professeur"), &diplome(), "lire");
        assert_eq!(decision.reason, DecisionReason::NotApplicable);
    }

    #[test]
    fn test_missing_attribute_in_deny_rule_does_not_block_permit() {
        let deny = PolicyRule::deny("blocked", "lire")
            .with_subject(Condition::equals("blocked", "true"));
        let policy = PolicySnapshot::build(1, vec![professeur_rule(), deny]).unwrap();
        let evaluator = PolicyEvaluator::new(&policy);
        assert!(evaluator.permits(&subject("professeur"), &diplome(), "lire"));
    }
}
