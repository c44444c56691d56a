//! REST API Handlers
//!
//! Internal HTTP surface called by the game API and the networking
//! backend's webhooks: registration, membership updates and lookups.

use crate::domain::instance::InstanceType;
use crate::domain::location::Location;
use crate::error::Error;
use crate::registry::InstanceRegistry;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Optional parameters for registration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterParams {
    pub capacity: Option<u32>,
}

/// World directory filter
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSearchParams {
    /// Privacy class, defaults to public
    #[serde(rename = "type")]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub include_over_capacity: bool,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

impl ApiErrorResponse {
    fn for_instance(err: &Error, instance_id: &str) -> Self {
        Self {
            error: err.to_string(),
            instance_id: Some(instance_id.to_string()),
            player_id: None,
        }
    }

    fn for_player(err: &Error, player_id: &str) -> Self {
        Self {
            error: err.to_string(),
            instance_id: None,
            player_id: Some(player_id.to_string()),
        }
    }
}

/// NotFound-class errors are a bare 404; everything else is a 500 with body
fn error_response(err: &Error, body: ApiErrorResponse) -> Response {
    if err.is_not_found() {
        return StatusCode::NOT_FOUND.into_response();
    }
    error!("{}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

/// Canonical registry id for a path parameter; unparseable ids are used as-is
fn canonical_id(raw: &str) -> String {
    Location::parse(raw).map(|l| l.id()).unwrap_or_else(|_| raw.to_string())
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    registry: Arc<InstanceRegistry>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            registry: self.registry,
        };

        Router::new()
            // Instance lifecycle
            .route("/:instance_id", get(get_instance))
            .route("/register/:instance_id", post(register_instance))
            .route("/unregister/:instance_id", post(unregister_instance))
            .route("/ping/:instance_id", post(ping_instance))
            // Membership (param names must agree per segment)
            .route("/player/:id", get(find_player))
            .route(
                "/player/:id/:player_id",
                put(add_player).delete(remove_player),
            )
            .route("/block/:instance_id/:player_id", post(block_player))
            // Lookups
            .route("/s/:short_name", get(find_short_name))
            .route("/world/:world_id", get(find_world))
            // Health endpoint
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    registry: Arc<InstanceRegistry>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Fetch an instance
async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.registry.get(&canonical_id(&instance_id)).await {
        Ok(instance) => (StatusCode::OK, Json(instance)).into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Register an instance from its location string
async fn register_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(params): Query<RegisterParams>,
) -> Response {
    let location = match Location::parse(&instance_id) {
        Ok(l) => l,
        Err(e) => {
            return error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id));
        }
    };

    match state.registry.register(&location, params.capacity).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Unregister an instance
async fn unregister_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.registry.unregister(&canonical_id(&instance_id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Liveness ping
async fn ping_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Response {
    match state.registry.ping(&canonical_id(&instance_id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Instances a player is in
async fn find_player(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Response {
    match state.registry.find_by_player(&player_id).await {
        Ok(instances) => (StatusCode::OK, Json(instances)).into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_player(&e, &player_id)),
    }
}

/// Add a player to an instance
async fn add_player(
    State(state): State<AppState>,
    Path((instance_id, player_id)): Path<(String, String)>,
) -> Response {
    match state
        .registry
        .add_player(&canonical_id(&instance_id), &player_id)
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Remove a player from an instance
async fn remove_player(
    State(state): State<AppState>,
    Path((instance_id, player_id)): Path<(String, String)>,
) -> Response {
    match state
        .registry
        .remove_player(&canonical_id(&instance_id), &player_id)
        .await
    {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Block a player from an instance
async fn block_player(
    State(state): State<AppState>,
    Path((instance_id, player_id)): Path<(String, String)>,
) -> Response {
    info!("Blocking {} from {}", player_id, instance_id);
    match state
        .registry
        .block_player(&canonical_id(&instance_id), &player_id)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &instance_id)),
    }
}

/// Resolve a short or secure name
async fn find_short_name(
    State(state): State<AppState>,
    Path(short_name): Path<String>,
) -> Response {
    match state.registry.find_by_short_name(&short_name).await {
        Ok(instance) => (StatusCode::OK, Json(instance)).into_response(),
        Err(e) => error_response(&e, ApiErrorResponse::for_instance(&e, &short_name)),
    }
}

/// World instance directory
async fn find_world(
    State(state): State<AppState>,
    Path(world_id): Path<String>,
    Query(params): Query<WorldSearchParams>,
) -> Response {
    let privacy = match params.instance_type.as_deref() {
        None => InstanceType::Public,
        Some(t) => match t.parse::<InstanceType>() {
            Ok(t) => t,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiErrorResponse {
                        error: e.to_string(),
                        instance_id: None,
                        player_id: None,
                    }),
                )
                    .into_response();
            }
        },
    };

    match state
        .registry
        .find_by_world(&world_id, privacy, params.include_over_capacity)
        .await
    {
        Ok(instances) => (StatusCode::OK, Json(instances)).into_response(),
        Err(e) => error_response(
            &e,
            ApiErrorResponse {
                error: e.to_string(),
                instance_id: None,
                player_id: None,
            },
        ),
    }
}

/// Health check against the store
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.store().health_check().await {
        Ok(true) => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "store unavailable"),
    }
}
