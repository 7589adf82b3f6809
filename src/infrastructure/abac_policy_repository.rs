use super::PolicyRepository;
use crate::domain::abac_policy::{PolicyLoadError, PolicyRule, validate_rules};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, instrument, warn};

/// An immutable, versioned rule set. Evaluations hold an `Arc` to one of these
/// for their whole duration.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    version: u64,
    loaded_at: DateTime<Utc>,
    rules: Vec<PolicyRule>,
    by_operation: HashMap<String, Vec<usize>>,
}

impl PolicySnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            rules: vec![],
            by_operation: HashMap::new(),
        }
    }

    pub fn build(version: u64, rules: Vec<PolicyRule>) -> Result<Self, PolicyLoadError> {
        validate_rules(&rules)?;
        let mut by_operation: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, rule) in rules.iter().enumerate() {
            by_operation
                .entry(rule.operation.clone())
                .or_default()
                .push(position);
        }
        Ok(Self {
            version,
            loaded_at: Utc::now(),
            rules,
            by_operation,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Rules for `operation`, in load order.
    pub fn rules_for<'a>(&'a self, operation: &str) -> impl Iterator<Item = &'a PolicyRule> + 'a {
        self.by_operation
            .get(operation)
            .into_iter()
            .flatten()
            .map(|&position| &self.rules[position])
    }
}

pub struct InMemoryPolicyRepository {
    current: ArcSwap<PolicySnapshot>,
    writer: Mutex<()>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(PolicySnapshot::empty()),
            writer: Mutex::new(()),
        }
    }

    pub fn with_rules(rules: Vec<PolicyRule>) -> Result<Self, PolicyLoadError> {
        let repo = Self::new();
        repo.load(rules)?;
        Ok(repo)
    }
}

impl Default for InMemoryPolicyRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyRepository for InMemoryPolicyRepository {
    #[instrument(skip(self, rules), fields(rule_count = rules.len()))]
    fn load(&self, rules: Vec<PolicyRule>) -> Result<u64, PolicyLoadError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load();
        let version = previous.version() + 1;
        match PolicySnapshot::build(version, rules) {
            Ok(snapshot) => {
                let rule_count = snapshot.rules().len();
                self.current.store(Arc::new(snapshot));
                info!(policy_version = version, rule_count, "Policy snapshot installed");
                Ok(version)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    active_version = previous.version(),
                    "Policy load rejected, keeping active snapshot"
                );
                Err(e)
            }
        }
    }

    fn current(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }
}
