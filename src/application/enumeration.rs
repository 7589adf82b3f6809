use super::evaluator::PolicyEvaluator;
use crate::domain::abac_policy::{Effect, Predicate};
use crate::domain::attribute::{Entity, EntityKind};
use crate::infrastructure::AttributeSnapshot;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

/// Finds every entity of `population` that, paired with `fixed`, is permitted
/// to perform `operation`.
///
/// `fixed_kind` says which side of the rule `fixed` sits on: a fixed resource
/// enumerates subjects (`whoAuthorized`), a fixed subject enumerates resources
/// (`whichAuthorized`). Implementations must agree exactly with evaluating
/// every member of `population`.
pub trait EnumerationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn enumerate(
        &self,
        evaluator: PolicyEvaluator<'_>,
        fixed_kind: EntityKind,
        fixed: &Entity,
        population: &AttributeSnapshot,
        operation: &str,
    ) -> BTreeSet<String>;
}

fn permitted(
    evaluator: &PolicyEvaluator<'_>,
    fixed_kind: EntityKind,
    fixed: &Entity,
    candidate: &Entity,
    operation: &str,
) -> bool {
    match fixed_kind {
        EntityKind::Resource => evaluator.permits(candidate, fixed, operation),
        EntityKind::Subject => evaluator.permits(fixed, candidate, operation),
    }
}

/// Evaluates every entity in the population.
#[derive(Debug, Default, Clone, Copy)]
pub struct BruteForceEnumeration;

impl EnumerationStrategy for BruteForceEnumeration {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn enumerate(
        &self,
        evaluator: PolicyEvaluator<'_>,
        fixed_kind: EntityKind,
        fixed: &Entity,
        population: &AttributeSnapshot,
        operation: &str,
    ) -> BTreeSet<String> {
        population
            .entities()
            .filter(|candidate| permitted(&evaluator, fixed_kind, fixed, candidate, operation))
            .map(|candidate| candidate.id.clone())
            .collect()
    }
}

/// Narrows the population through the store's inverted index before
/// evaluating.
///
/// Only Permit rules whose fixed-side predicate already holds can produce a
/// Permit. For each of them, the most selective `equals`/`in` condition on the
/// open side bounds the entities that can satisfy it. Rules without such a
/// condition force a full scan. Every candidate still goes through the full
/// evaluator, so Deny rules keep overriding.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexedEnumeration;

impl IndexedEnumeration {
    fn most_selective<'p>(
        predicate: &Predicate,
        population: &'p AttributeSnapshot,
    ) -> Option<Vec<&'p String>> {
        predicate
            .conditions()
            .iter()
            .filter_map(|condition| condition.pinned_values())
            .map(|(attribute, values)| {
                values
                    .into_iter()
                    .filter_map(|value| population.ids_with(attribute, value))
                    .flatten()
                    .collect::<Vec<_>>()
            })
            .min_by_key(Vec::len)
    }
}

impl EnumerationStrategy for IndexedEnumeration {
    fn name(&self) -> &'static str {
        "indexed"
    }

    fn enumerate(
        &self,
        evaluator: PolicyEvaluator<'_>,
        fixed_kind: EntityKind,
        fixed: &Entity,
        population: &AttributeSnapshot,
        operation: &str,
    ) -> BTreeSet<String> {
        let mut candidates: BTreeSet<&String> = BTreeSet::new();
        for rule in evaluator.policy().rules_for(operation) {
            if rule.effect != Effect::Permit {
                continue;
            }
            let (fixed_side, open_side) = match fixed_kind {
                EntityKind::Resource => (&rule.resource, &rule.subject),
                EntityKind::Subject => (&rule.subject, &rule.resource),
            };
            if !evaluator.predicate_holds(rule, fixed_side, fixed) {
                continue;
            }
            match Self::most_selective(open_side, population) {
                Some(ids) => candidates.extend(ids),
                None => {
                    return BruteForceEnumeration.enumerate(
                        evaluator, fixed_kind, fixed, population, operation,
                    );
                }
            }
        }

        candidates
            .into_iter()
            .filter_map(|id| population.get(id))
            .filter(|candidate| permitted(&evaluator, fixed_kind, fixed, candidate, operation))
            .map(|candidate| candidate.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Indexed,
    BruteForce,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn EnumerationStrategy> {
        match self {
            StrategyKind::Indexed => Arc::new(IndexedEnumeration),
            StrategyKind::BruteForce => Arc::new(BruteForceEnumeration),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indexed" => Ok(StrategyKind::Indexed),
            "brute_force" | "brute-force" => Ok(StrategyKind::BruteForce),
            other => Err(format!("unknown enumeration strategy `{other}`")),
        }
    }
}
