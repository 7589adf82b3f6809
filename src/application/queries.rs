use crate::domain::attribute::{AttributeError, EntityRef};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Base trait for all queries
pub trait Query: Send + Sync {
    fn query_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;
    fn operation(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("query execution failed: {0}")]
    Execution(String),
}

impl From<AttributeError> for QueryError {
    fn from(e: AttributeError) -> Self {
        QueryError::MalformedRequest(e.to_string())
    }
}

/// Query to decide one subject/resource/operation triple
#[derive(Debug, Clone)]
pub struct IsAuthorizedQuery {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: EntityRef,
    pub resource: EntityRef,
    pub operation: String,
}

/// Query to list the subjects permitted to act on a resource
#[derive(Debug, Clone)]
pub struct WhoAuthorizedQuery {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub resource: EntityRef,
    pub operation: String,
}

/// Query to list the resources a subject is permitted to act on
#[derive(Debug, Clone)]
pub struct WhichAuthorizedQuery {
    pub query_id: String,
    pub timestamp: DateTime<Utc>,
    pub subject: EntityRef,
    pub operation: String,
}

macro_rules! impl_query {
    ($($ty:ty),*) => {
        $(impl Query for $ty {
            fn query_id(&self) -> &str {
                &self.query_id
            }
            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
            fn operation(&self) -> &str {
                &self.operation
            }
        })*
    };
}

impl_query!(IsAuthorizedQuery, WhoAuthorizedQuery, WhichAuthorizedQuery);

/// Builds queries from raw request payloads, rejecting malformed ones before
/// they reach the engine.
pub struct QueryFactory;

impl QueryFactory {
    fn operation(operation: String) -> Result<String, QueryError> {
        if operation.trim().is_empty() {
            return Err(QueryError::MalformedRequest(
                "operation must be a non-empty string".to_string(),
            ));
        }
        Ok(operation)
    }

    fn entity(field: &str, value: &Value) -> Result<EntityRef, QueryError> {
        EntityRef::from_json(value).map_err(|e| QueryError::MalformedRequest(format!("{field}: {e}")))
    }

    pub fn is_authorized(
        subject: &Value,
        resource: &Value,
        operation: String,
    ) -> Result<IsAuthorizedQuery, QueryError> {
        Ok(IsAuthorizedQuery {
            query_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            subject: Self::entity("subject", subject)?,
            resource: Self::entity("resource", resource)?,
            operation: Self::operation(operation)?,
        })
    }

    pub fn who_authorized(resource: &Value, operation: String) -> Result<WhoAuthorizedQuery, QueryError> {
        Ok(WhoAuthorizedQuery {
            query_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            resource: Self::entity("resource", resource)?,
            operation: Self::operation(operation)?,
        })
    }

    pub fn which_authorized(
        subject: &Value,
        operation: String,
    ) -> Result<WhichAuthorizedQuery, QueryError> {
        Ok(WhichAuthorizedQuery {
            query_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            subject: Self::entity("subject", subject)?,
            operation: Self::operation(operation)?,
        })
    }
}
