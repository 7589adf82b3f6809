use super::commands::{
    IngestFeedRecordCommand, LoadPolicyCommand, RemoveEntityCommand, UpsertEntityCommand,
};
use super::events::{DomainEvent, EventFactory};
use super::feed_consumer::FeedConsumer;
use crate::domain::abac_policy::PolicyLoadError;
use crate::domain::attribute::EntityKind;
use crate::infrastructure::{FeedError, FeedRecord, FeedSender, PolicyRepository};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Command handler trait
#[async_trait]
pub trait CommandHandler<C>: Send + Sync {
    type Result: Send + Sync;
    type Error: std::error::Error + Send + Sync;

    async fn handle(&self, command: C) -> Result<Self::Result, Self::Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    PolicyLoad(#[from] PolicyLoadError),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Load policy command handler
pub struct LoadPolicyCommandHandler {
    policies: Arc<dyn PolicyRepository>,
}

impl LoadPolicyCommandHandler {
    pub fn new(policies: Arc<dyn PolicyRepository>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl CommandHandler<LoadPolicyCommand> for LoadPolicyCommandHandler {
    type Result = u64;
    type Error = CommandError;

    #[instrument(name = "load_policy_command_handler", skip(self, command), fields(rule_count = command.rules.len()))]
    async fn handle(&self, command: LoadPolicyCommand) -> Result<Self::Result, Self::Error> {
        let rule_count = command.rules.len();
        let version = self.policies.load(command.rules)?;
        let event = EventFactory::policy_reloaded(version, rule_count, command.requested_by);
        tracing::info!(event_id = %event.event_id(), policy_version = version, "Policy reloaded event published");
        Ok(version)
    }
}

/// Upsert entity command handler. The write is queued on the feed like any
/// other record and the handler waits until the consumer has applied it, so
/// API writes and feed writes share one order and one set of decoding rules.
pub struct UpsertEntityCommandHandler {
    consumer: Arc<FeedConsumer>,
    sender: FeedSender,
}

impl UpsertEntityCommandHandler {
    pub fn new(consumer: Arc<FeedConsumer>, sender: FeedSender) -> Self {
        Self { consumer, sender }
    }
}

fn topic_for(consumer: &FeedConsumer, kind: EntityKind) -> Result<String, CommandError> {
    consumer
        .binding_for(kind)
        .map(|binding| binding.topic.clone())
        .ok_or_else(|| CommandError::MalformedRequest(format!("no feed topic bound to {kind}")))
}

fn rejected(error: FeedError) -> CommandError {
    match error {
        FeedError::Malformed(reason) => CommandError::MalformedRequest(reason),
        other => CommandError::Feed(other),
    }
}

fn checked_id(entity_id: String) -> Result<String, CommandError> {
    if entity_id.trim().is_empty() {
        return Err(CommandError::MalformedRequest(
            "entity id must not be empty".to_string(),
        ));
    }
    Ok(entity_id)
}

#[async_trait]
impl CommandHandler<UpsertEntityCommand> for UpsertEntityCommandHandler {
    type Result = u64;
    type Error = CommandError;

    #[instrument(name = "upsert_entity_command_handler", skip(self, command), fields(kind = %command.kind, entity_id = %command.entity_id))]
    async fn handle(&self, command: UpsertEntityCommand) -> Result<Self::Result, Self::Error> {
        let entity_id = checked_id(command.entity_id)?;
        if !command.attributes.is_object() {
            return Err(CommandError::MalformedRequest(
                "attributes must be a JSON object".to_string(),
            ));
        }
        let record = FeedRecord::upsert(
            topic_for(&self.consumer, command.kind)?,
            entity_id.clone(),
            command.attributes,
        );
        let (kind, version) = self.sender.submit(record).await.map_err(rejected)?;
        let event = EventFactory::entity_changed(kind, entity_id, false, version);
        tracing::info!(event_id = %event.event_id(), store_version = version, "Entity attributes replaced event published");
        Ok(version)
    }
}

/// Remove entity command handler. Queued as a tombstone, like upserts.
pub struct RemoveEntityCommandHandler {
    consumer: Arc<FeedConsumer>,
    sender: FeedSender,
}

impl RemoveEntityCommandHandler {
    pub fn new(consumer: Arc<FeedConsumer>, sender: FeedSender) -> Self {
        Self { consumer, sender }
    }
}

#[async_trait]
impl CommandHandler<RemoveEntityCommand> for RemoveEntityCommandHandler {
    type Result = u64;
    type Error = CommandError;

    #[instrument(name = "remove_entity_command_handler", skip(self, command), fields(kind = %command.kind, entity_id = %command.entity_id))]
    async fn handle(&self, command: RemoveEntityCommand) -> Result<Self::Result, Self::Error> {
        let entity_id = checked_id(command.entity_id)?;
        let record = FeedRecord::tombstone(topic_for(&self.consumer, command.kind)?, entity_id.clone());
        let (kind, version) = self.sender.submit(record).await.map_err(rejected)?;
        let event = EventFactory::entity_changed(kind, entity_id, true, version);
        tracing::info!(event_id = %event.event_id(), store_version = version, "Entity removed event published");
        Ok(version)
    }
}

/// Ingest feed record command handler. The record is queued, not applied
/// inline, so it keeps its place behind earlier feed traffic.
pub struct IngestFeedRecordCommandHandler {
    sender: FeedSender,
}

impl IngestFeedRecordCommandHandler {
    pub fn new(sender: FeedSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl CommandHandler<IngestFeedRecordCommand> for IngestFeedRecordCommandHandler {
    type Result = ();
    type Error = CommandError;

    #[instrument(name = "ingest_feed_record_command_handler", skip(self, command), fields(topic = %command.record.topic, key = %command.record.key))]
    async fn handle(&self, command: IngestFeedRecordCommand) -> Result<Self::Result, Self::Error> {
        self.sender.publish(command.record).await?;
        Ok(())
    }
}
