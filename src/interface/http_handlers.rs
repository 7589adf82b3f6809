use crate::application::command_handlers::{CommandError, CommandHandler};
use crate::application::commands::{
    IngestFeedRecordCommand, LoadPolicyCommand, RemoveEntityCommand, UpsertEntityCommand,
};
use crate::application::queries::{QueryError, QueryFactory};
use crate::application::query_handlers::QueryHandler;
use crate::domain::attribute::EntityKind;
use crate::infrastructure::{FeedError, FeedRecord};
use crate::interface::app_state::AppState;
use crate::interface::{
    DecisionResponse, EntityChangeResponse, ErrorResponse, HealthResponse, IsAuthorizedRequest,
    LoadPolicyRequest, LoadPolicyResponse, PolicySetResponse, WhichAuthorizedRequest,
    WhichAuthorizedResponse, WhoAuthorizedRequest, WhoAuthorizedResponse,
};
use axum::Json;
use axum::Router;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::{StatusCode, request::Parts};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use std::ops::Deref;
use std::sync::Arc;
use tracing::warn;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Passes when no keys are configured, or the request carries one of them.
pub struct ApiKey;

impl<S> FromRequestParts<S> for ApiKey
where
    S: Deref<Target = AppState> + Send + Sync + 'static,
{
    type Rejection = (StatusCode, &'static str);
    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state: &AppState = state.deref();
        if app_state.api_keys.is_empty() {
            return Ok(ApiKey);
        }
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing API key"))?;
        if !app_state.api_keys.contains(presented) {
            warn!("Rejected request with unknown API key");
            return Err((StatusCode::UNAUTHORIZED, "Invalid API key"));
        }
        Ok(ApiKey)
    }
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = match &self {
            QueryError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            QueryError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            QueryError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self)
    }
}

impl IntoResponse for CommandError {
    fn into_response(self) -> Response {
        let status = match &self {
            CommandError::PolicyLoad(_) | CommandError::MalformedRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            CommandError::Feed(FeedError::Malformed(_)) => StatusCode::BAD_REQUEST,
            CommandError::Feed(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        error_response(status, self)
    }
}

// --- DECISION HANDLERS ---

#[axum::debug_handler]
#[utoipa::path(
    post,
    path = "/isAuthorized",
    request_body = IsAuthorizedRequest,
    responses(
        (status = 200, description = "Decision for the triple", body = DecisionResponse),
        (status = 400, description = "Malformed subject, resource or operation", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Request timed out", body = ErrorResponse),
    ),
    tags = ["Decision"],
    description = "Decide whether the subject may perform the operation on the resource."
)]
pub async fn is_authorized_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Json(payload): Json<IsAuthorizedRequest>,
) -> Result<Json<DecisionResponse>, QueryError> {
    let query =
        QueryFactory::is_authorized(&payload.subject, &payload.resource, payload.operation)?;
    let decision = state.is_authorized.handle(query).await?;
    Ok(Json(decision.into()))
}

#[axum::debug_handler]
#[utoipa::path(
    post,
    path = "/whoAuthorized",
    request_body = WhoAuthorizedRequest,
    responses(
        (status = 200, description = "Subjects permitted on the resource", body = WhoAuthorizedResponse),
        (status = 400, description = "Malformed resource or operation", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Request timed out", body = ErrorResponse),
    ),
    tags = ["Decision"],
    description = "List every known subject the policy permits to perform the operation on the resource."
)]
pub async fn who_authorized_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Json(payload): Json<WhoAuthorizedRequest>,
) -> Result<Json<WhoAuthorizedResponse>, QueryError> {
    let query = QueryFactory::who_authorized(&payload.resource, payload.operation)?;
    let result = state.who_authorized.handle(query).await?;
    Ok(Json(WhoAuthorizedResponse {
        subjects: result.ids.into_iter().collect(),
        policy_version: result.policy_version,
    }))
}

#[axum::debug_handler]
#[utoipa::path(
    post,
    path = "/whichAuthorized",
    request_body = WhichAuthorizedRequest,
    responses(
        (status = 200, description = "Resources the subject is permitted on", body = WhichAuthorizedResponse),
        (status = 400, description = "Malformed subject or operation", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Request timed out", body = ErrorResponse),
    ),
    tags = ["Decision"],
    description = "List every known resource on which the policy permits the subject to perform the operation."
)]
pub async fn which_authorized_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Json(payload): Json<WhichAuthorizedRequest>,
) -> Result<Json<WhichAuthorizedResponse>, QueryError> {
    let query = QueryFactory::which_authorized(&payload.subject, payload.operation)?;
    let result = state.which_authorized.handle(query).await?;
    Ok(Json(WhichAuthorizedResponse {
        resources: result.ids.into_iter().collect(),
        policy_version: result.policy_version,
    }))
}

// --- POLICY HANDLERS ---

#[utoipa::path(
    get,
    path = "/policies",
    responses(
        (status = 200, description = "Active rule set", body = PolicySetResponse),
        (status = 401, description = "Missing or invalid API key"),
    ),
    tags = ["Policy"]
)]
pub async fn get_policies_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
) -> Json<PolicySetResponse> {
    let snapshot = state.policies.current();
    Json(PolicySetResponse {
        policy_version: snapshot.version(),
        loaded_at: snapshot.loaded_at(),
        rules: snapshot.rules().to_vec(),
    })
}

#[utoipa::path(
    put,
    path = "/policies",
    request_body = LoadPolicyRequest,
    responses(
        (status = 200, description = "Rule set replaced", body = LoadPolicyResponse),
        (status = 400, description = "Invalid rule set, previous one stays active", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
    ),
    tags = ["Policy"],
    description = "Atomically replace the whole rule set."
)]
pub async fn put_policies_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Json(payload): Json<LoadPolicyRequest>,
) -> Result<Json<LoadPolicyResponse>, CommandError> {
    let rules = payload.into_rules();
    let rule_count = rules.len();
    let policy_version = state
        .load_policy
        .handle(LoadPolicyCommand {
            rules,
            requested_by: None,
        })
        .await?;
    Ok(Json(LoadPolicyResponse {
        policy_version,
        rule_count,
    }))
}

// --- ENTITY HANDLERS ---

async fn upsert_entity(
    state: &AppState,
    kind: EntityKind,
    entity_id: String,
    attributes: serde_json::Value,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    let store_version = state
        .upsert_entity
        .handle(UpsertEntityCommand {
            kind,
            entity_id: entity_id.clone(),
            attributes,
        })
        .await?;
    Ok(Json(EntityChangeResponse {
        id: entity_id,
        store_version,
    }))
}

async fn remove_entity(
    state: &AppState,
    kind: EntityKind,
    entity_id: String,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    let store_version = state
        .remove_entity
        .handle(RemoveEntityCommand {
            kind,
            entity_id: entity_id.clone(),
        })
        .await?;
    Ok(Json(EntityChangeResponse {
        id: entity_id,
        store_version,
    }))
}

#[utoipa::path(
    put,
    path = "/subjects/{id}",
    params(("id" = String, Path, description = "Subject id")),
    request_body(content = Object, description = "Complete attribute set, optionally with a `class`"),
    responses(
        (status = 200, description = "Attributes replaced", body = EntityChangeResponse),
        (status = 400, description = "Malformed attributes", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Feed consumer is not running", body = ErrorResponse),
    ),
    tags = ["Attributes"]
)]
pub async fn put_subject_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Path(id): Path<String>,
    Json(attributes): Json<serde_json::Value>,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    upsert_entity(&state, EntityKind::Subject, id, attributes).await
}

#[utoipa::path(
    delete,
    path = "/subjects/{id}",
    params(("id" = String, Path, description = "Subject id")),
    responses(
        (status = 200, description = "Subject removed", body = EntityChangeResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Feed consumer is not running", body = ErrorResponse),
    ),
    tags = ["Attributes"]
)]
pub async fn delete_subject_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    remove_entity(&state, EntityKind::Subject, id).await
}

#[utoipa::path(
    put,
    path = "/resources/{id}",
    params(("id" = String, Path, description = "Resource id")),
    request_body(content = Object, description = "Complete attribute set, optionally with a `class`"),
    responses(
        (status = 200, description = "Attributes replaced", body = EntityChangeResponse),
        (status = 400, description = "Malformed attributes", body = ErrorResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Feed consumer is not running", body = ErrorResponse),
    ),
    tags = ["Attributes"]
)]
pub async fn put_resource_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Path(id): Path<String>,
    Json(attributes): Json<serde_json::Value>,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    upsert_entity(&state, EntityKind::Resource, id, attributes).await
}

#[utoipa::path(
    delete,
    path = "/resources/{id}",
    params(("id" = String, Path, description = "Resource id")),
    responses(
        (status = 200, description = "Resource removed", body = EntityChangeResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Feed consumer is not running", body = ErrorResponse),
    ),
    tags = ["Attributes"]
)]
pub async fn delete_resource_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Path(id): Path<String>,
) -> Result<Json<EntityChangeResponse>, CommandError> {
    remove_entity(&state, EntityKind::Resource, id).await
}

#[utoipa::path(
    post,
    path = "/feed",
    request_body = FeedRecord,
    responses(
        (status = 202, description = "Record queued on the attribute feed"),
        (status = 401, description = "Missing or invalid API key"),
        (status = 503, description = "Feed consumer is not running", body = ErrorResponse),
    ),
    tags = ["Attributes"]
)]
pub async fn ingest_feed_handler(
    State(state): State<Arc<AppState>>,
    _key: ApiKey,
    Json(record): Json<FeedRecord>,
) -> Result<StatusCode, CommandError> {
    state
        .ingest_feed
        .handle(IngestFeedRecordCommand { record })
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tags = ["Health"]
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        policy_version: state.policies.current().version(),
        subjects: state.subjects.snapshot().len(),
        resources: state.resources.snapshot().len(),
        enumeration_strategy: state.engine.strategy().name().to_string(),
    })
}

/// All API routes, without the OpenAPI document.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/isAuthorized", post(is_authorized_handler))
        .route("/whoAuthorized", post(who_authorized_handler))
        .route("/whichAuthorized", post(which_authorized_handler))
        .route("/policies", get(get_policies_handler).put(put_policies_handler))
        .route(
            "/subjects/{id}",
            put(put_subject_handler).delete(delete_subject_handler),
        )
        .route(
            "/resources/{id}",
            put(put_resource_handler).delete(delete_resource_handler),
        )
        .route("/feed", post(ingest_feed_handler))
        .route("/health", get(health_handler))
}
