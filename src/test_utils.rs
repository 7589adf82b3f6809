use crate::application::enumeration::StrategyKind;
use crate::application::query_engine::QueryEngine;
use crate::domain::abac_policy::{Condition, PolicyRule};
use crate::domain::attribute::{AttributeSet, Entity, EntityKind};
use crate::infrastructure::{
    AttributeStore, InMemoryAttributeStore, InMemoryPolicyRepository, PolicyRepository,
};
use crate::interface::app_state::AppState;
use crate::{AppConfig, AppStateBuilder};
use std::sync::Arc;

/// Permit(role = professeur, class = Diplome, lire)
pub fn professeur_reads_diplomes() -> PolicyRule {
    PolicyRule::permit("professeur-lit-diplome", "lire")
        .with_subject(Condition::equals("role", "professeur"))
        .with_resource(Condition::equals("class", "Diplome"))
}

/// The rule set shared by the unit and HTTP tests.
pub fn create_test_rules() -> Vec<PolicyRule> {
    vec![
        professeur_reads_diplomes(),
        PolicyRule::permit("auditeur-lit-facture", "lire")
            .with_subject(Condition::equals("role", "auditor"))
            .with_resource(Condition::equals("class", "Facture")),
        PolicyRule::deny("suspendu", "lire")
            .with_subject(Condition::equals("status", "suspended"))
            .with_resource(Condition::Any),
    ]
}

pub fn person(id: &str, role: &str) -> Entity {
    Entity::new(id, "Person", AttributeSet::new().with("role", role))
}

pub fn create_test_subjects() -> Vec<Entity> {
    vec![
        person("prof-1", "professeur"),
        person("etu-1", "etudiant"),
        person("aud-1", "auditor"),
        Entity::new(
            "aud-2",
            "Person",
            AttributeSet::new()
                .with("role", "auditor")
                .with("status", "suspended"),
        ),
    ]
}

pub fn create_test_resources() -> Vec<Entity> {
    vec![
        Entity::new("dip-1", "Diplome", AttributeSet::new().with("niveau", "master")),
        Entity::new("dip-2", "Diplome", AttributeSet::new().with("niveau", "licence")),
        Entity::new(
            "f-1",
            "Facture",
            AttributeSet::new()
                .with("montant", "120")
                .with("nom_de_service", "IT"),
        ),
    ]
}

pub fn create_test_engine_with(strategy: StrategyKind) -> Arc<QueryEngine> {
    let policies = Arc::new(
        InMemoryPolicyRepository::with_rules(create_test_rules()).expect("valid test rules"),
    ) as Arc<dyn PolicyRepository>;
    let subjects = Arc::new(InMemoryAttributeStore::with_entities(
        EntityKind::Subject,
        create_test_subjects(),
    )) as Arc<dyn AttributeStore>;
    let resources = Arc::new(InMemoryAttributeStore::with_entities(
        EntityKind::Resource,
        create_test_resources(),
    )) as Arc<dyn AttributeStore>;
    Arc::new(QueryEngine::new(policies, subjects, resources, strategy.build()))
}

/// Engine over the test rules and entities, indexed enumeration.
pub fn create_test_engine() -> Arc<QueryEngine> {
    create_test_engine_with(StrategyKind::Indexed)
}

/// Application state over the test rules and entities. No API keys.
pub async fn create_test_app_state() -> Arc<AppState> {
    create_test_app_state_with_config(AppConfig::default()).await
}

pub async fn create_test_app_state_with_config(config: AppConfig) -> Arc<AppState> {
    AppStateBuilder::new()
        .with_config(config)
        .with_rules(create_test_rules())
        .with_entities(EntityKind::Subject, create_test_subjects())
        .with_entities(EntityKind::Resource, create_test_resources())
        .build()
        .await
        .expect("Failed to build test app state")
}
