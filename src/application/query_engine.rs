use super::enumeration::EnumerationStrategy;
use super::evaluator::PolicyEvaluator;
use crate::domain::attribute::{Entity, EntityKind, EntityRef};
use crate::domain::decision::Decision;
use crate::infrastructure::{AttributeSnapshot, AttributeStore, PolicyRepository, PolicySnapshot};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ids returned by an enumeration query, with the policy version they were
/// computed against. Order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedSet {
    pub ids: BTreeSet<String>,
    pub policy_version: u64,
}

/// The policy and both attribute stores, as loaded at one instant. A query
/// runs entirely against one of these.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub policy: Arc<PolicySnapshot>,
    pub subjects: Arc<AttributeSnapshot>,
    pub resources: Arc<AttributeSnapshot>,
}

impl EngineSnapshot {
    fn population(&self, kind: EntityKind) -> &AttributeSnapshot {
        match kind {
            EntityKind::Subject => &self.subjects,
            EntityKind::Resource => &self.resources,
        }
    }

    /// Inline entities resolve to themselves, stored ones through the
    /// snapshot of their kind.
    pub fn resolve<'a>(&'a self, kind: EntityKind, entity: &'a EntityRef) -> Option<&'a Entity> {
        match entity {
            EntityRef::Inline(entity) => Some(entity),
            EntityRef::Stored(id) => self.population(kind).get(id).map(|e| e.as_ref()),
        }
    }

    pub fn is_authorized(&self, subject: &EntityRef, resource: &EntityRef, operation: &str) -> Decision {
        let (Some(subject), Some(resource)) = (
            self.resolve(EntityKind::Subject, subject),
            self.resolve(EntityKind::Resource, resource),
        ) else {
            debug!(operation, "Unknown entity in request, denying");
            return Decision::unknown_entity(self.policy.version());
        };
        PolicyEvaluator::new(&self.policy).evaluate(subject, resource, operation)
    }

    pub fn who_authorized(
        &self,
        strategy: &dyn EnumerationStrategy,
        resource: &EntityRef,
        operation: &str,
    ) -> AuthorizedSet {
        self.enumerate(strategy, EntityKind::Resource, resource, operation)
    }

    pub fn which_authorized(
        &self,
        strategy: &dyn EnumerationStrategy,
        subject: &EntityRef,
        operation: &str,
    ) -> AuthorizedSet {
        self.enumerate(strategy, EntityKind::Subject, subject, operation)
    }

    fn enumerate(
        &self,
        strategy: &dyn EnumerationStrategy,
        fixed_kind: EntityKind,
        fixed: &EntityRef,
        operation: &str,
    ) -> AuthorizedSet {
        let policy_version = self.policy.version();
        let Some(fixed) = self.resolve(fixed_kind, fixed) else {
            debug!(operation, kind = %fixed_kind, "Unknown entity in request, empty result");
            return AuthorizedSet {
                ids: BTreeSet::new(),
                policy_version,
            };
        };
        let population = match fixed_kind {
            EntityKind::Resource => self.population(EntityKind::Subject),
            EntityKind::Subject => self.population(EntityKind::Resource),
        };
        let ids = strategy.enumerate(
            PolicyEvaluator::new(&self.policy),
            fixed_kind,
            fixed,
            population,
            operation,
        );
        AuthorizedSet {
            ids,
            policy_version,
        }
    }
}

/// Answers `isAuthorized`, `whoAuthorized` and `whichAuthorized`.
pub struct QueryEngine {
    policies: Arc<dyn PolicyRepository>,
    subjects: Arc<dyn AttributeStore>,
    resources: Arc<dyn AttributeStore>,
    strategy: Arc<dyn EnumerationStrategy>,
}

impl QueryEngine {
    pub fn new(
        policies: Arc<dyn PolicyRepository>,
        subjects: Arc<dyn AttributeStore>,
        resources: Arc<dyn AttributeStore>,
        strategy: Arc<dyn EnumerationStrategy>,
    ) -> Self {
        Self {
            policies,
            subjects,
            resources,
            strategy,
        }
    }

    pub fn strategy(&self) -> &dyn EnumerationStrategy {
        self.strategy.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            policy: self.policies.current(),
            subjects: self.subjects.snapshot(),
            resources: self.resources.snapshot(),
        }
    }

    #[instrument(skip(self, subject, resource))]
    pub fn is_authorized(&self, subject: &EntityRef, resource: &EntityRef, operation: &str) -> Decision {
        self.snapshot().is_authorized(subject, resource, operation)
    }

    #[instrument(skip(self, resource), fields(strategy = self.strategy.name()))]
    pub fn who_authorized(&self, resource: &EntityRef, operation: &str) -> AuthorizedSet {
        self.snapshot()
            .who_authorized(self.strategy.as_ref(), resource, operation)
    }

    #[instrument(skip(self, subject), fields(strategy = self.strategy.name()))]
    pub fn which_authorized(&self, subject: &EntityRef, operation: &str) -> AuthorizedSet {
        self.snapshot()
            .which_authorized(self.strategy.as_ref(), subject, operation)
    }
}
