pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interface;
pub mod test_utils;

use application::{
    command_handlers::{
        IngestFeedRecordCommandHandler, LoadPolicyCommandHandler, RemoveEntityCommandHandler,
        UpsertEntityCommandHandler,
    },
    enumeration::StrategyKind,
    feed_consumer::{FeedConsumer, TopicBinding},
    query_engine::QueryEngine,
    query_handlers::{
        IsAuthorizedQueryHandler, WhichAuthorizedQueryHandler, WhoAuthorizedQueryHandler,
    },
};
use domain::abac_policy::{PolicyLoadError, PolicyRule};
use domain::attribute::{Entity, EntityKind};
use infrastructure::{
    AttributeStore, FeedError, InMemoryAttributeStore, InMemoryPolicyRepository,
    NdjsonFeedSource, PolicyRepository, feed_channel, policy_file::read_policy_file,
};
use interface::AppState;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

pub const DEFAULT_SUBJECT_TOPIC: &str = "user-attributes-compacted";
pub const DEFAULT_SUBJECT_CLASS: &str = "Person";
pub const DEFAULT_RESOURCE_TOPIC: &str = "facture-attributes";
pub const DEFAULT_RESOURCE_CLASS: &str = "Facture";

/// Application configuration with all environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub http_host: String,
    pub http_port: String,
    pub policy_file: Option<PathBuf>,
    pub feed_replay_file: Option<PathBuf>,
    pub api_keys: Vec<String>,
    pub enumeration_strategy: StrategyKind,
    pub request_timeout: Duration,
    pub subject_topic: String,
    pub subject_default_class: String,
    pub resource_topic: String,
    pub resource_default_class: String,
    pub feed_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_host: "127.0.0.1".to_string(),
            http_port: "8080".to_string(),
            policy_file: None,
            feed_replay_file: None,
            api_keys: Vec::new(),
            enumeration_strategy: StrategyKind::Indexed,
            request_timeout: Duration::from_millis(5000),
            subject_topic: DEFAULT_SUBJECT_TOPIC.to_string(),
            subject_default_class: DEFAULT_SUBJECT_CLASS.to_string(),
            resource_topic: DEFAULT_RESOURCE_TOPIC.to_string(),
            resource_default_class: DEFAULT_RESOURCE_CLASS.to_string(),
            feed_channel_capacity: 1024,
        }
    }
}

impl AppConfig {
    /// Creates a new AppConfig from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Unset variables
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(host) = var("HTTP_HOST") {
            config.http_host = host;
        }
        if let Some(port) = var("HTTP_PORT") {
            port.parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("HTTP_PORT `{port}` is not a port")))?;
            config.http_port = port;
        }
        config.policy_file = var("POLICY_FILE").map(PathBuf::from);
        config.feed_replay_file = var("FEED_REPLAY_FILE").map(PathBuf::from);
        if let Some(keys) = var("API_KEYS") {
            config.api_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(strategy) = var("ENUMERATION_STRATEGY") {
            config.enumeration_strategy = strategy
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("ENUMERATION_STRATEGY: {e}")))?;
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT_MS") {
            let millis = timeout
                .parse::<u64>()
                .ok()
                .filter(|millis| *millis > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "REQUEST_TIMEOUT_MS `{timeout}` is not a positive integer"
                    ))
                })?;
            config.request_timeout = Duration::from_millis(millis);
        }
        if let Some(topic) = var("SUBJECT_TOPIC") {
            config.subject_topic = topic;
        }
        if let Some(class) = var("SUBJECT_DEFAULT_CLASS") {
            config.subject_default_class = class;
        }
        if let Some(topic) = var("RESOURCE_TOPIC") {
            config.resource_topic = topic;
        }
        if let Some(class) = var("RESOURCE_DEFAULT_CLASS") {
            config.resource_default_class = class;
        }
        if config.subject_topic == config.resource_topic {
            return Err(ConfigError::Invalid(
                "SUBJECT_TOPIC and RESOURCE_TOPIC must differ".to_string(),
            ));
        }
        if let Some(capacity) = var("FEED_CHANNEL_CAPACITY") {
            config.feed_channel_capacity = capacity
                .parse::<usize>()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "FEED_CHANNEL_CAPACITY `{capacity}` is not a positive integer"
                    ))
                })?;
        }
        Ok(config)
    }

    /// Creates the HTTP address string from host and port
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn topic_bindings(&self) -> Vec<TopicBinding> {
        vec![
            TopicBinding::new(
                self.subject_topic.clone(),
                EntityKind::Subject,
                self.subject_default_class.clone(),
            ),
            TopicBinding::new(
                self.resource_topic.clone(),
                EntityKind::Resource,
                self.resource_default_class.clone(),
            ),
        ]
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// APPLICATION BUILDER
// ============================================================================

/// Builder for creating application state with better testability
#[derive(Debug, Default)]
pub struct AppStateBuilder {
    config: Option<AppConfig>,
    rules: Option<Vec<PolicyRule>>,
    subjects: Vec<Entity>,
    resources: Vec<Entity>,
}

impl AppStateBuilder {
    /// Creates a new AppStateBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `rules` instead of reading `POLICY_FILE`
    pub fn with_rules(mut self, rules: Vec<PolicyRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Seeds a store before any feed replay
    pub fn with_entities(mut self, kind: EntityKind, entities: Vec<Entity>) -> Self {
        match kind {
            EntityKind::Subject => self.subjects.extend(entities),
            EntityKind::Resource => self.resources.extend(entities),
        }
        self
    }

    /// Builds the application state and starts the live feed consumer.
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<Arc<AppState>, AppError> {
        let config = self.config.unwrap_or_default();

        let rules = match (self.rules, &config.policy_file) {
            (Some(rules), _) => rules,
            (None, Some(path)) => read_policy_file(path).await?,
            (None, None) => {
                tracing::warn!("No policy configured, every request will be denied");
                Vec::new()
            }
        };
        let policies =
            Arc::new(InMemoryPolicyRepository::with_rules(rules)?) as Arc<dyn PolicyRepository>;
        let subjects = Arc::new(InMemoryAttributeStore::with_entities(
            EntityKind::Subject,
            self.subjects,
        )) as Arc<dyn AttributeStore>;
        let resources = Arc::new(InMemoryAttributeStore::with_entities(
            EntityKind::Resource,
            self.resources,
        )) as Arc<dyn AttributeStore>;

        let consumer = Arc::new(FeedConsumer::new(
            config.topic_bindings(),
            subjects.clone(),
            resources.clone(),
        ));
        if let Some(path) = &config.feed_replay_file {
            consumer.replay(NdjsonFeedSource::open(path).await?).await?;
        }
        let (feed_sender, feed_source) = feed_channel(config.feed_channel_capacity);
        let live_consumer = consumer.clone();
        tokio::spawn(async move { live_consumer.run(feed_source).await });

        let engine = Arc::new(QueryEngine::new(
            policies.clone(),
            subjects.clone(),
            resources.clone(),
            config.enumeration_strategy.build(),
        ));
        let timeout = config.request_timeout;

        Ok(Arc::new(AppState {
            engine: engine.clone(),
            policies: policies.clone(),
            subjects,
            resources,
            api_keys: Arc::new(config.api_keys.iter().cloned().collect::<HashSet<_>>()),
            is_authorized: Arc::new(IsAuthorizedQueryHandler::new(engine.clone(), timeout)),
            who_authorized: Arc::new(WhoAuthorizedQueryHandler::new(engine.clone(), timeout)),
            which_authorized: Arc::new(WhichAuthorizedQueryHandler::new(engine, timeout)),
            load_policy: Arc::new(LoadPolicyCommandHandler::new(policies)),
            upsert_entity: Arc::new(UpsertEntityCommandHandler::new(
                consumer.clone(),
                feed_sender.clone(),
            )),
            remove_entity: Arc::new(RemoveEntityCommandHandler::new(consumer, feed_sender.clone())),
            ingest_feed: Arc::new(IngestFeedRecordCommandHandler::new(feed_sender)),
        }))
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyLoadError),
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}
