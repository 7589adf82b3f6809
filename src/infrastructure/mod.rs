use crate::domain::abac_policy::{PolicyLoadError, PolicyRule};
use crate::domain::attribute::{AttributeSet, Entity, EntityKind};
use std::sync::Arc;

// Infrastructure layer: in-memory stores, feed sources, policy files
pub mod abac_policy_repository;
pub mod attribute_store;
pub mod feed;
pub mod policy_file;

pub use abac_policy_repository::{InMemoryPolicyRepository, PolicySnapshot};
pub use attribute_store::{AttributeSnapshot, ClassMembers, InMemoryAttributeStore};
pub use feed::{
    ChannelFeedSource, FeedAck, FeedDelivery, FeedError, FeedRecord, FeedSender, FeedSource,
    NdjsonFeedSource, feed_channel,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} `{id}` not found")]
    NotFound { kind: EntityKind, id: String },
}

/// A single change to an attribute store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreMutation {
    /// Replaces the entity's whole attribute set.
    Upsert(Entity),
    Remove(String),
}

pub trait AttributeStore: Send + Sync {
    fn kind(&self) -> EntityKind;
    fn upsert(&self, id: &str, class: &str, attributes: AttributeSet) -> u64;
    fn remove(&self, id: &str) -> u64;
    /// Applies `mutations` in order and publishes them as one snapshot.
    fn apply(&self, mutations: Vec<StoreMutation>) -> u64;
    fn get(&self, id: &str) -> Result<Arc<Entity>, StoreError>;
    fn all_of_class(&self, class: &str) -> ClassMembers;
    fn snapshot(&self) -> Arc<AttributeSnapshot>;
}

pub trait PolicyRepository: Send + Sync {
    fn load(&self, rules: Vec<PolicyRule>) -> Result<u64, PolicyLoadError>;
    fn current(&self) -> Arc<PolicySnapshot>;
}
