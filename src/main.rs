use abac_decision_service::domain::abac_policy::{Condition, Effect, PolicyRule, Predicate};
use abac_decision_service::domain::decision::DecisionReason;
use abac_decision_service::infrastructure::FeedRecord;
use abac_decision_service::interface::{
    DecisionResponse, EntityChangeResponse, ErrorResponse, HealthResponse, IsAuthorizedRequest,
    LoadPolicyRequest, LoadPolicyResponse, PolicySetResponse, WhichAuthorizedRequest,
    WhichAuthorizedResponse, WhoAuthorizedRequest, WhoAuthorizedResponse, routes,
};
use abac_decision_service::{AppConfig, AppError, AppStateBuilder};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        abac_decision_service::interface::http_handlers::is_authorized_handler,
        abac_decision_service::interface::http_handlers::who_authorized_handler,
        abac_decision_service::interface::http_handlers::which_authorized_handler,
        abac_decision_service::interface::http_handlers::get_policies_handler,
        abac_decision_service::interface::http_handlers::put_policies_handler,
        abac_decision_service::interface::http_handlers::put_subject_handler,
        abac_decision_service::interface::http_handlers::delete_subject_handler,
        abac_decision_service::interface::http_handlers::put_resource_handler,
        abac_decision_service::interface::http_handlers::delete_resource_handler,
        abac_decision_service::interface::http_handlers::ingest_feed_handler,
        abac_decision_service::interface::http_handlers::health_handler,
    ),
    components(schemas(
        IsAuthorizedRequest, DecisionResponse, WhoAuthorizedRequest, WhoAuthorizedResponse,
        WhichAuthorizedRequest, WhichAuthorizedResponse, LoadPolicyRequest, LoadPolicyResponse,
        PolicySetResponse, EntityChangeResponse, HealthResponse, ErrorResponse, FeedRecord,
        PolicyRule, Predicate, Condition, Effect, DecisionReason
    )),
    tags(
        (name = "Decision", description = "Authorization decision and enumeration endpoints"),
        (name = "Policy", description = "Rule set management endpoints"),
        (name = "Attributes", description = "Subject and resource attribute endpoints"),
        (name = "Health", description = "Liveness endpoint")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

// Add a security scheme modifier
pub struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "apiKey",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))),
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    // Load policy, replay the attribute feed, start the live consumer
    let app_state = AppStateBuilder::new()
        .with_config(config.clone())
        .build()
        .await?;

    let http_addr = config.http_address();
    let openapi = ApiDoc::openapi();

    let app = routes()
        .merge(SwaggerUi::new("/swagger").url("/openapi.json", openapi))
        .with_state(app_state);

    let listener = TcpListener::bind(&http_addr).await?;
    tracing::info!(
        address = %http_addr,
        strategy = ?config.enumeration_strategy,
        api_keys = config.api_keys.len(),
        "HTTP server listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
