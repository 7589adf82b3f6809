use crate::domain::abac_policy::PolicyRule;
use crate::domain::attribute::EntityKind;
use crate::infrastructure::FeedRecord;

/// Command to replace the active rule set
pub struct LoadPolicyCommand {
    pub rules: Vec<PolicyRule>,
    pub requested_by: Option<String>,
}

/// Command to replace one entity's attributes
pub struct UpsertEntityCommand {
    pub kind: EntityKind,
    pub entity_id: String,
    pub attributes: serde_json::Value,
}

/// Command to forget an entity
pub struct RemoveEntityCommand {
    pub kind: EntityKind,
    pub entity_id: String,
}

/// Command to queue a raw record on the attribute feed
pub struct IngestFeedRecordCommand {
    pub record: FeedRecord,
}
