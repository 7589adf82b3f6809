use crate::application::command_handlers::{
    IngestFeedRecordCommandHandler, LoadPolicyCommandHandler, RemoveEntityCommandHandler,
    UpsertEntityCommandHandler,
};
use crate::application::query_engine::QueryEngine;
use crate::application::query_handlers::{
    IsAuthorizedQueryHandler, WhichAuthorizedQueryHandler, WhoAuthorizedQueryHandler,
};
use crate::infrastructure::{AttributeStore, PolicyRepository};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub policies: Arc<dyn PolicyRepository>,
    pub subjects: Arc<dyn AttributeStore>,
    pub resources: Arc<dyn AttributeStore>,
    /// Empty means the API is open.
    pub api_keys: Arc<HashSet<String>>,
    pub is_authorized: Arc<IsAuthorizedQueryHandler>,
    pub who_authorized: Arc<WhoAuthorizedQueryHandler>,
    pub which_authorized: Arc<WhichAuthorizedQueryHandler>,
    pub load_policy: Arc<LoadPolicyCommandHandler>,
    pub upsert_entity: Arc<UpsertEntityCommandHandler>,
    pub remove_entity: Arc<RemoveEntityCommandHandler>,
    pub ingest_feed: Arc<IngestFeedRecordCommandHandler>,
}
