use crate::domain::attribute::EntityKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot};
use utoipa::ToSchema;

/// One message from a compacted attribute topic. `value: None` is a tombstone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeedRecord {
    pub topic: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub value: Option<serde_json::Value>,
}

impl FeedRecord {
    pub fn upsert(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: Some(value),
        }
    }

    pub fn tombstone(topic: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            value: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("attribute feed unavailable: {0}")]
    Unavailable(String),
    #[error("malformed feed record: {0}")]
    Malformed(String),
    #[error("feed i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome reported back to a writer waiting on its record: the store it
/// touched and that store's version once the record is visible.
pub type FeedAck = Result<(EntityKind, u64), FeedError>;

/// A record as handed to the consumer, with an optional reply slot for
/// writers that wait until it is applied.
#[derive(Debug)]
pub struct FeedDelivery {
    pub record: FeedRecord,
    ack: Option<oneshot::Sender<FeedAck>>,
}

impl FeedDelivery {
    pub fn acknowledge(self, outcome: FeedAck) {
        if let Some(ack) = self.ack {
            // The writer may have given up waiting.
            let _ = ack.send(outcome);
        }
    }
}

impl From<FeedRecord> for FeedDelivery {
    fn from(record: FeedRecord) -> Self {
        Self { record, ack: None }
    }
}

/// A stream of feed records. `Ok(None)` means the source is exhausted.
#[async_trait]
pub trait FeedSource: Send {
    async fn next(&mut self) -> Result<Option<FeedDelivery>, FeedError>;

    /// Returns a record only if one is ready without waiting.
    fn try_next(&mut self) -> Option<FeedDelivery> {
        None
    }
}

fn consumer_stopped() -> FeedError {
    FeedError::Unavailable("feed consumer has stopped".to_string())
}

/// Sending half of the in-process feed channel. Every writer goes through
/// the same queue, so records for one entity apply in arrival order.
#[derive(Clone, Debug)]
pub struct FeedSender {
    tx: mpsc::Sender<FeedDelivery>,
}

impl FeedSender {
    /// Queues `record` without waiting for it to be applied.
    pub async fn publish(&self, record: FeedRecord) -> Result<(), FeedError> {
        self.tx
            .send(record.into())
            .await
            .map_err(|_| consumer_stopped())
    }

    /// Queues `record` and waits until the consumer has applied or rejected it.
    pub async fn submit(&self, record: FeedRecord) -> FeedAck {
        let (ack, reply) = oneshot::channel();
        self.tx
            .send(FeedDelivery {
                record,
                ack: Some(ack),
            })
            .await
            .map_err(|_| consumer_stopped())?;
        reply.await.map_err(|_| consumer_stopped())?
    }
}

pub struct ChannelFeedSource {
    rx: mpsc::Receiver<FeedDelivery>,
}

pub fn feed_channel(capacity: usize) -> (FeedSender, ChannelFeedSource) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FeedSender { tx }, ChannelFeedSource { rx })
}

#[async_trait]
impl FeedSource for ChannelFeedSource {
    async fn next(&mut self) -> Result<Option<FeedDelivery>, FeedError> {
        Ok(self.rx.recv().await)
    }

    fn try_next(&mut self) -> Option<FeedDelivery> {
        self.rx.try_recv().ok()
    }
}

/// Replays a newline-delimited JSON file of [`FeedRecord`]s, e.g. a dump of a
/// compacted topic taken at startup.
pub struct NdjsonFeedSource {
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

impl NdjsonFeedSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FeedError> {
        let file = File::open(path).await?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

#[async_trait]
impl FeedSource for NdjsonFeedSource {
    async fn next(&mut self) -> Result<Option<FeedDelivery>, FeedError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str::<FeedRecord>(&line)
                .map(|record| Some(record.into()))
                .map_err(|e| FeedError::Malformed(format!("line {}: {e}", self.line_number)));
        }
    }
}
