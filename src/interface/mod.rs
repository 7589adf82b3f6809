// Interface layer: HTTP API, DTOs, shared state

use crate::domain::abac_policy::{Effect, PolicyRule};
use crate::domain::decision::{Decision, DecisionReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `subject` and `resource` are either `{"id": "..."}` for a stored entity or
/// an inline attribute object carrying a `class`.
#[derive(Deserialize, ToSchema)]
pub struct IsAuthorizedRequest {
    #[schema(value_type = Object)]
    pub subject: serde_json::Value,
    #[schema(value_type = Object)]
    pub resource: serde_json::Value,
    pub operation: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct DecisionResponse {
    pub decision: Effect,
    pub authorized: bool,
    pub reason: DecisionReason,
    pub matched_rules: Vec<String>,
    pub policy_version: u64,
}

impl From<Decision> for DecisionResponse {
    fn from(decision: Decision) -> Self {
        Self {
            authorized: decision.is_permit(),
            decision: decision.effect,
            reason: decision.reason,
            matched_rules: decision.matched_rules,
            policy_version: decision.policy_version,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct WhoAuthorizedRequest {
    #[schema(value_type = Object)]
    pub resource: serde_json::Value,
    pub operation: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WhoAuthorizedResponse {
    pub subjects: Vec<String>,
    pub policy_version: u64,
}

#[derive(Deserialize, ToSchema)]
pub struct WhichAuthorizedRequest {
    #[schema(value_type = Object)]
    pub subject: serde_json::Value,
    pub operation: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WhichAuthorizedResponse {
    pub resources: Vec<String>,
    pub policy_version: u64,
}

/// Accepts the same shapes as the policy file: a bare rule array or
/// `{"rules": [...]}`.
#[derive(Deserialize, ToSchema)]
#[serde(untagged)]
pub enum LoadPolicyRequest {
    Rules(Vec<PolicyRule>),
    Document { rules: Vec<PolicyRule> },
}

impl LoadPolicyRequest {
    pub fn into_rules(self) -> Vec<PolicyRule> {
        match self {
            LoadPolicyRequest::Rules(rules) | LoadPolicyRequest::Document { rules } => rules,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoadPolicyResponse {
    pub policy_version: u64,
    pub rule_count: usize,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct PolicySetResponse {
    pub policy_version: u64,
    #[schema(value_type = String, format = DateTime)]
    pub loaded_at: DateTime<Utc>,
    pub rules: Vec<PolicyRule>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct EntityChangeResponse {
    pub id: String,
    pub store_version: u64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub policy_version: u64,
    pub subjects: usize,
    pub resources: usize,
    pub enumeration_strategy: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub mod app_state;
pub mod http_handlers;

pub use app_state::AppState;
pub use http_handlers::{
    delete_resource_handler, delete_subject_handler, get_policies_handler, health_handler,
    ingest_feed_handler, is_authorized_handler, put_policies_handler, put_resource_handler,
    put_subject_handler, routes, which_authorized_handler, who_authorized_handler,
};
