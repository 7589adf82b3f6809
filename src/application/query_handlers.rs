use super::queries::{IsAuthorizedQuery, Query, QueryError, WhichAuthorizedQuery, WhoAuthorizedQuery};
use super::query_engine::{AuthorizedSet, QueryEngine};
use crate::domain::decision::Decision;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Query handler trait
#[async_trait]
pub trait QueryHandler<Q>: Send + Sync {
    type Result: Send + Sync;
    type Error: std::error::Error + Send + Sync;

    async fn handle(&self, query: Q) -> Result<Self::Result, Self::Error>;
}

/// Runs engine work off the async workers, bounded by the request timeout.
async fn run_bounded<T, F>(timeout: Duration, work: F) -> Result<T, QueryError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(QueryError::Execution(e.to_string())),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Query exceeded request timeout");
            Err(QueryError::Timeout(timeout))
        }
    }
}

/// isAuthorized query handler
pub struct IsAuthorizedQueryHandler {
    engine: Arc<QueryEngine>,
    timeout: Duration,
}

impl IsAuthorizedQueryHandler {
    pub fn new(engine: Arc<QueryEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl QueryHandler<IsAuthorizedQuery> for IsAuthorizedQueryHandler {
    type Result = Decision;
    type Error = QueryError;

    #[instrument(name = "is_authorized_query_handler", skip(self, query), fields(query_id = %query.query_id(), operation = %query.operation()))]
    async fn handle(&self, query: IsAuthorizedQuery) -> Result<Self::Result, Self::Error> {
        let engine = self.engine.clone();
        let decision = run_bounded(self.timeout, move || {
            engine.is_authorized(&query.subject, &query.resource, &query.operation)
        })
        .await?;
        info!(
            effect = ?decision.effect,
            reason = ?decision.reason,
            policy_version = decision.policy_version,
            "Authorization decided"
        );
        Ok(decision)
    }
}

/// whoAuthorized query handler
pub struct WhoAuthorizedQueryHandler {
    engine: Arc<QueryEngine>,
    timeout: Duration,
}

impl WhoAuthorizedQueryHandler {
    pub fn new(engine: Arc<QueryEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl QueryHandler<WhoAuthorizedQuery> for WhoAuthorizedQueryHandler {
    type Result = AuthorizedSet;
    type Error = QueryError;

    #[instrument(name = "who_authorized_query_handler", skip(self, query), fields(query_id = %query.query_id(), operation = %query.operation()))]
    async fn handle(&self, query: WhoAuthorizedQuery) -> Result<Self::Result, Self::Error> {
        let engine = self.engine.clone();
        let result = run_bounded(self.timeout, move || {
            engine.who_authorized(&query.resource, &query.operation)
        })
        .await?;
        info!(
            subjects = result.ids.len(),
            policy_version = result.policy_version,
            "Authorized subjects enumerated"
        );
        Ok(result)
    }
}

/// whichAuthorized query handler
pub struct WhichAuthorizedQueryHandler {
    engine: Arc<QueryEngine>,
    timeout: Duration,
}

impl WhichAuthorizedQueryHandler {
    pub fn new(engine: Arc<QueryEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl QueryHandler<WhichAuthorizedQuery> for WhichAuthorizedQueryHandler {
    type Result = AuthorizedSet;
    type Error = QueryError;

    #[instrument(name = "which_authorized_query_handler", skip(self, query), fields(query_id = %query.query_id(), operation = %query.operation()))]
    async fn handle(&self, query: WhichAuthorizedQuery) -> Result<Self::Result, Self::Error> {
        let engine = self.engine.clone();
        let result = run_bounded(self.timeout, move || {
            engine.which_authorized(&query.subject, &query.operation)
        })
        .await?;
        info!(
            resources = result.ids.len(),
            policy_version = result.policy_version,
            "Authorized resources enumerated"
        );
        Ok(result)
    }
}
