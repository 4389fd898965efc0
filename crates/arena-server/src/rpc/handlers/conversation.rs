//! Conversation handlers: join, leave, send.

use arena_core::ids::ConversationId;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;

use super::{require_id_param, require_string_param};
use crate::rpc::context::RpcContext;
use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodHandler;
use crate::rpc::validation::{MAX_CONTENT_BYTES, validate_string_param};

/// Join a conversation group (participants only).
pub struct JoinConversationHandler;

#[async_trait]
impl MethodHandler for JoinConversationHandler {
    #[instrument(skip(self, ctx), fields(method = "conversation.join"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let conversation_id: ConversationId = require_id_param(params.as_ref(), "conversationId")?;
        ctx.hub.join_conversation(&ctx.connection, conversation_id).await?;
        Ok(json!({ "joined": true }))
    }
}

/// Leave a conversation group.
pub struct LeaveConversationHandler;

#[async_trait]
impl MethodHandler for LeaveConversationHandler {
    #[instrument(skip(self, ctx), fields(method = "conversation.leave"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let conversation_id: ConversationId = require_id_param(params.as_ref(), "conversationId")?;
        ctx.hub.leave_conversation(&ctx.connection, conversation_id);
        Ok(json!({ "left": true }))
    }
}

/// Persist a chat message and broadcast it to the conversation.
pub struct SendMessageHandler;

#[async_trait]
impl MethodHandler for SendMessageHandler {
    #[instrument(skip(self, ctx, params), fields(method = "conversation.send"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let conversation_id: ConversationId = require_id_param(params.as_ref(), "conversationId")?;
        let content = require_string_param(params.as_ref(), "content")?;
        validate_string_param(&content, "content", MAX_CONTENT_BYTES)?;
        let message = ctx
            .hub
            .send_message(conversation_id, &ctx.connection.user_id, &content)
            .await?;
        serde_json::to_value(message).map_err(|e| RpcError::Internal {
            message: e.to_string(),
        })
    }
}
