use crate::domain::attribute::{Entity, EntityKind, ID_FIELD};
use crate::infrastructure::{
    AttributeStore, FeedDelivery, FeedError, FeedRecord, FeedSource, StoreMutation,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Which store a topic feeds, and the class its entities get when the payload
/// does not name one.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicBinding {
    pub topic: String,
    pub kind: EntityKind,
    pub default_class: String,
}

impl TopicBinding {
    pub fn new(topic: impl Into<String>, kind: EntityKind, default_class: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind,
            default_class: default_class.into(),
        }
    }
}

/// Applies attribute feed records to the subject and resource stores.
pub struct FeedConsumer {
    bindings: HashMap<String, TopicBinding>,
    subjects: Arc<dyn AttributeStore>,
    resources: Arc<dyn AttributeStore>,
    max_batch: usize,
    retry_backoff: Duration,
}

impl FeedConsumer {
    pub fn new(
        bindings: Vec<TopicBinding>,
        subjects: Arc<dyn AttributeStore>,
        resources: Arc<dyn AttributeStore>,
    ) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|binding| (binding.topic.clone(), binding))
                .collect(),
            subjects,
            resources,
            max_batch: 256,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn binding_for(&self, kind: EntityKind) -> Option<&TopicBinding> {
        self.bindings.values().find(|binding| binding.kind == kind)
    }

    fn store(&self, kind: EntityKind) -> &Arc<dyn AttributeStore> {
        match kind {
            EntityKind::Subject => &self.subjects,
            EntityKind::Resource => &self.resources,
        }
    }

    /// Turns a record into the store mutation it stands for.
    pub fn decode(&self, record: &FeedRecord) -> Result<(EntityKind, StoreMutation), FeedError> {
        let binding = self
            .bindings
            .get(&record.topic)
            .ok_or_else(|| FeedError::Malformed(format!("unbound topic `{}`", record.topic)))?;

        let Some(value) = &record.value else {
            if record.key.is_empty() {
                return Err(FeedError::Malformed("tombstone without key".to_string()));
            }
            return Ok((binding.kind, StoreMutation::Remove(record.key.clone())));
        };

        let object = value
            .as_object()
            .ok_or_else(|| FeedError::Malformed("value is not a JSON object".to_string()))?;
        let key = match record.key.as_str() {
            "" => match object.get(ID_FIELD).and_then(|id| id.as_str()) {
                Some(id) if !id.is_empty() => id,
                _ => return Err(FeedError::Malformed("record has neither key nor id".to_string())),
            },
            key => key,
        };
        let entity = Entity::from_json_object(Some(key), object, Some(&binding.default_class))
            .map_err(|e| FeedError::Malformed(e.to_string()))?;
        Ok((binding.kind, StoreMutation::Upsert(entity)))
    }

    /// Applies `records` in order, one snapshot swap per touched store.
    /// Malformed records are skipped. Returns how many were applied.
    pub fn apply(&self, records: Vec<FeedRecord>) -> usize {
        self.apply_deliveries(records.into_iter().map(FeedDelivery::from).collect())
    }

    /// Like [`FeedConsumer::apply`], then acknowledges every delivery with
    /// the version of the store it landed in, or with why it was rejected.
    pub fn apply_deliveries(&self, deliveries: Vec<FeedDelivery>) -> usize {
        let mut subjects = Vec::new();
        let mut resources = Vec::new();
        let mut outcomes = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match self.decode(&delivery.record) {
                Ok((kind, mutation)) => {
                    match kind {
                        EntityKind::Subject => subjects.push(mutation),
                        EntityKind::Resource => resources.push(mutation),
                    }
                    outcomes.push((delivery, Ok(kind)));
                }
                Err(e) => {
                    warn!(topic = %delivery.record.topic, key = %delivery.record.key, error = %e, "Skipping feed record");
                    outcomes.push((delivery, Err(e)));
                }
            }
        }
        let applied = subjects.len() + resources.len();
        let subject_version =
            (!subjects.is_empty()).then(|| self.store(EntityKind::Subject).apply(subjects));
        let resource_version =
            (!resources.is_empty()).then(|| self.store(EntityKind::Resource).apply(resources));
        for (delivery, outcome) in outcomes {
            let outcome = outcome.map(|kind| {
                let version = match kind {
                    EntityKind::Subject => subject_version,
                    EntityKind::Resource => resource_version,
                };
                (kind, version.unwrap_or_default())
            });
            delivery.acknowledge(outcome);
        }
        applied
    }

    /// Reads `source` to its end and applies everything, in batches.
    #[instrument(skip(self, source))]
    pub async fn replay<S: FeedSource>(&self, mut source: S) -> Result<usize, FeedError> {
        let mut applied = 0;
        let mut batch = Vec::with_capacity(self.max_batch);
        loop {
            match source.next().await {
                Ok(Some(delivery)) => {
                    batch.push(delivery);
                    if batch.len() >= self.max_batch {
                        applied += self.apply_deliveries(std::mem::take(&mut batch));
                    }
                }
                Ok(None) => break,
                Err(FeedError::Malformed(reason)) => warn!(%reason, "Skipping feed record"),
                Err(e) => {
                    applied += self.apply_deliveries(batch);
                    error!(error = %e, applied, "Feed replay aborted");
                    return Err(e);
                }
            }
        }
        applied += self.apply_deliveries(batch);
        info!(applied, "Feed replay finished");
        Ok(applied)
    }

    /// Consumes a live source until it is exhausted. Records already queued
    /// are drained into the same batch. While the source is unavailable the
    /// stores keep serving their last snapshot and the read is retried.
    #[instrument(skip(self, source))]
    pub async fn run<S: FeedSource>(&self, mut source: S) {
        info!("Attribute feed consumer started");
        loop {
            let first = match source.next().await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => break,
                Err(FeedError::Malformed(reason)) => {
                    warn!(%reason, "Skipping feed record");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = self.retry_backoff.as_millis() as u64, "Attribute feed unavailable, serving last snapshot");
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
            };
            let mut batch = vec![first];
            while batch.len() < self.max_batch {
                match source.try_next() {
                    Some(delivery) => batch.push(delivery),
                    None => break,
                }
            }
            self.apply_deliveries(batch);
        }
        info!("Attribute feed consumer stopped");
    }
}
