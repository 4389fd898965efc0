//! HTTP endpoints used by the lobby service and operators.
//!
//! Every failure renders as `{"success": false, "error": {code, message}}`
//! with a status derived from the error code.

use arena_core::errors::ArenaError;
use arena_core::ids::{LobbyId, UserId};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::claims::IdentityQuery;
use crate::rpc::errors::{self, RpcError};
use crate::rpc::handlers::matches::parse_start_request;
use crate::server::AppState;

/// Error response for the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: RpcError,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: RpcError::Custom {
                code: errors::UNAUTHORIZED.into(),
                message: "Missing user identity".into(),
                details: None,
            },
        }
    }

    /// HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// HTTP status for an error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        errors::INVALID_PARAMS | errors::PARSE_ERROR => StatusCode::BAD_REQUEST,
        errors::NOT_FOUND => StatusCode::NOT_FOUND,
        errors::FORBIDDEN => StatusCode::FORBIDDEN,
        errors::INVALID_STATE => StatusCode::CONFLICT,
        errors::STORAGE_ERROR | errors::TIMEOUT => StatusCode::SERVICE_UNAVAILABLE,
        errors::UNAUTHORIZED => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RpcError> for ApiError {
    fn from(error: RpcError) -> Self {
        Self {
            status: status_for_code(error.code()),
            error,
        }
    }
}

impl From<ArenaError> for ApiError {
    fn from(err: ArenaError) -> Self {
        Self::from(RpcError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "success": false, "error": self.error.to_error_body() });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn caller(
    state: &AppState,
    headers: &HeaderMap,
    query: &IdentityQuery,
) -> Result<UserId, ApiError> {
    state.claims.resolve(headers, query).ok_or_else(ApiError::unauthorized)
}

/// GET /lobbies/live
pub async fn list_live(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "lobbies": state.hub.lobby_summaries() }))
}

/// POST /lobbies/{lobby_id}/start
pub async fn start_match(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
    Query(query): Query<IdentityQuery>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult {
    let caller = caller(&state, &headers, &query)?;
    let lobby_id = LobbyId::parse(&lobby_id)?;
    let request = parse_start_request(Some(&body))?;
    let event = state.hub.start_match(lobby_id, &caller, request).await?;
    Ok(Json(serde_json::to_value(event).map_err(ArenaError::from)?))
}

/// POST /lobbies/{lobby_id}/updated
///
/// Re-reads the lobby record and broadcasts `lobby.updated`.
pub async fn lobby_updated(
    State(state): State<AppState>,
    Path(lobby_id): Path<String>,
    Query(query): Query<IdentityQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let _ = caller(&state, &headers, &query)?;
    let lobby_id = LobbyId::parse(&lobby_id)?;
    let lobby = state.hub.notify_lobby_updated(lobby_id).await?;
    Ok(Json(json!({ "lobby": lobby })))
}
