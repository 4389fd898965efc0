//! Match handlers: start.

use arena_core::ids::{LobbyId, ProblemId};
use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::{require_i64_param, require_id_param, require_param};
use crate::lobby::matches::StartMatchRequest;
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;

/// Host starts the lobby's match. Returns the broadcast start event.
pub struct StartMatchHandler;

/// Parse `problemIds`, `durationSec` and optional `preparationBufferSec`.
pub(crate) fn parse_start_request(params: Option<&Value>) -> Result<StartMatchRequest, RpcError> {
    let raw_problems = require_param(params, "problemIds")?.clone();
    let problem_ids: Vec<ProblemId> = serde_json::from_value(raw_problems)
        .map_err(|e| RpcError::InvalidParams {
            message: format!("Parameter 'problemIds' must be an array of UUIDs: {e}"),
        })?;
    let duration_sec = require_i64_param(params, "durationSec")?;
    let buffer_sec = match params.and_then(|p| p.get("preparationBufferSec")) {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_i64().ok_or_else(|| RpcError::InvalidParams {
            message: "Parameter 'preparationBufferSec' must be an integer".into(),
        })?),
    };
    Ok(StartMatchRequest {
        problem_ids,
        duration_sec,
        buffer_sec,
    })
}

#[async_trait]
impl MethodHandler for StartMatchHandler {
    #[instrument(skip(self, ctx), fields(method = "match.start"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let lobby_id: LobbyId = require_id_param(params.as_ref(), "lobbyId")?;
        let request = parse_start_request(params.as_ref())?;
        let event = ctx
            .hub
            .start_match(lobby_id, &ctx.connection.user_id, request)
            .await?;
        serde_json::to_value(event).map_err(|e| RpcError::Internal {
            message: e.to_string(),
        })
    }
}
