//! Lobby handlers: join, leave, kick, close, listLive.

use arena_core::ids::{LobbyId, UserId};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;

use super::{require_id_param, require_string_param};
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::{MAX_PARAM_LENGTH, validate_string_param};

/// Join the calling connection to a lobby group.
pub struct JoinLobbyHandler;

#[async_trait]
impl MethodHandler for JoinLobbyHandler {
    #[instrument(skip(self, ctx), fields(method = "lobby.join"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let lobby_id: LobbyId = require_id_param(params.as_ref(), "lobbyId")?;
        let record = ctx.hub.join_lobby(&ctx.connection, lobby_id).await?;
        Ok(json!({ "lobby": record }))
    }
}

/// Remove the calling connection from a lobby group.
pub struct LeaveLobbyHandler;

#[async_trait]
impl MethodHandler for LeaveLobbyHandler {
    #[instrument(skip(self, ctx), fields(method = "lobby.leave"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let lobby_id: LobbyId = require_id_param(params.as_ref(), "lobbyId")?;
        ctx.hub.leave_lobby(&ctx.connection, lobby_id);
        Ok(json!({ "left": true }))
    }
}

/// Host removes a participant.
pub struct KickParticipantHandler;

#[async_trait]
impl MethodHandler for KickParticipantHandler {
    #[instrument(skip(self, ctx), fields(method = "lobby.kick"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let lobby_id: LobbyId = require_id_param(params.as_ref(), "lobbyId")?;
        let target = require_string_param(params.as_ref(), "userId")?;
        validate_string_param(&target, "userId", MAX_PARAM_LENGTH)?;
        ctx.hub
            .kick_participant(lobby_id, &ctx.connection.user_id, &UserId::from(target))
            .await?;
        Ok(json!({ "kicked": true }))
    }
}

/// Host closes the lobby.
pub struct CloseLobbyHandler;

#[async_trait]
impl MethodHandler for CloseLobbyHandler {
    #[instrument(skip(self, ctx), fields(method = "lobby.close"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let lobby_id: LobbyId = require_id_param(params.as_ref(), "lobbyId")?;
        ctx.hub.close_lobby(lobby_id, &ctx.connection.user_id).await?;
        Ok(json!({ "closed": true }))
    }
}

/// Snapshot of live lobby entries.
pub struct ListLiveHandler;

#[async_trait]
impl MethodHandler for ListLiveHandler {
    #[instrument(skip(self, ctx), fields(method = "lobby.listLive"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({ "lobbies": ctx.hub.lobby_summaries() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::test_helpers::{context_for, drain, make_test_arena};

    #[tokio::test]
    async fn join_returns_record() {
        let arena = make_test_arena();
        let (ctx, mut rx) = context_for(&arena.hub, "b@x.io");
        let result = JoinLobbyHandler
            .handle(Some(json!({"lobbyId": arena.lobby.get()})), &ctx)
            .await
            .unwrap();
        assert_eq!(result["lobby"]["host"], "a@x.io");
        assert_eq!(result["lobby"]["status"], "Open");
        assert_eq!(drain(&mut rx)[0]["type"], "lobby.member_joined");
    }

    #[tokio::test]
    async fn join_rejects_outsider() {
        let arena = make_test_arena();
        let (ctx, _rx) = context_for(&arena.hub, "eve@x.io");
        let err = JoinLobbyHandler
            .handle(Some(json!({"lobbyId": arena.lobby.get()})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn join_rejects_malformed_id() {
        let (ctx, _rx) = context_for(&make_test_arena().hub, "a@x.io");
        let err = JoinLobbyHandler
            .handle(Some(json!({"lobbyId": "lobby-1"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
        assert!(err.to_string().contains("lobby-1"));
    }

    #[tokio::test]
    async fn join_unknown_lobby() {
        let (ctx, _rx) = context_for(&make_test_arena().hub, "a@x.io");
        let err = JoinLobbyHandler
            .handle(Some(json!({"lobbyId": 404})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn leave_twice_succeeds() {
        let arena = make_test_arena();
        let (ctx, _rx) = context_for(&arena.hub, "a@x.io");
        let params = json!({"lobbyId": arena.lobby.get()});
        let _ = JoinLobbyHandler.handle(Some(params.clone()), &ctx).await.unwrap();
        for _ in 0..2 {
            let result = LeaveLobbyHandler.handle(Some(params.clone()), &ctx).await.unwrap();
            assert_eq!(result["left"], true);
        }
    }

    #[tokio::test]
    async fn kick_requires_host() {
        let arena = make_test_arena();
        let (ctx, _rx) = context_for(&arena.hub, "b@x.io");
        let err = KickParticipantHandler
            .handle(Some(json!({"lobbyId": arena.lobby.get(), "userId": "a@x.io"})), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let (host, _rx) = context_for(&arena.hub, "a@x.io");
        let result = KickParticipantHandler
            .handle(Some(json!({"lobbyId": arena.lobby.get(), "userId": "b@x.io"})), &host)
            .await
            .unwrap();
        assert_eq!(result["kicked"], true);
    }

    #[tokio::test]
    async fn close_then_list_live() {
        let arena = make_test_arena();
        let (ctx, _rx) = context_for(&arena.hub, "a@x.io");
        let params = json!({"lobbyId": arena.lobby.get()});
        let _ = JoinLobbyHandler.handle(Some(params.clone()), &ctx).await.unwrap();

        let live = ListLiveHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(live["lobbies"][0]["memberCount"], 1);

        let result = CloseLobbyHandler.handle(Some(params), &ctx).await.unwrap();
        assert_eq!(result["closed"], true);
        let live = ListLiveHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(live["lobbies"][0]["status"], "Closed");
    }
}
