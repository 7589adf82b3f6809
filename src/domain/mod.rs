// Domain layer: entities, rules and decisions
pub mod abac_policy;
pub mod attribute;
pub mod decision;
