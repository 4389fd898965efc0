//! RPC handler modules and registration.

pub mod conversation;
pub mod lobby;
pub mod matches;
pub mod system;

use std::str::FromStr;

use arena_core::errors::ArenaError;
use serde_json::Value;

use crate::rpc::errors::RpcError;
use crate::rpc::registry::MethodRegistry;

/// Register all RPC handlers with the registry.
pub fn register_all(registry: &mut MethodRegistry) {
    // System
    registry.register("system.ping", system::PingHandler);
    registry.register("system.getInfo", system::GetInfoHandler);

    // Lobby
    registry.register("lobby.join", lobby::JoinLobbyHandler);
    registry.register("lobby.leave", lobby::LeaveLobbyHandler);
    registry.register("lobby.kick", lobby::KickParticipantHandler);
    registry.register("lobby.close", lobby::CloseLobbyHandler);
    registry.register("lobby.listLive", lobby::ListLiveHandler);

    // Match
    registry.register("match.start", matches::StartMatchHandler);

    // Conversation
    registry.register("conversation.join", conversation::JoinConversationHandler);
    registry.register("conversation.leave", conversation::LeaveConversationHandler);
    registry.register("conversation.send", conversation::SendMessageHandler);
}

/// Extract a required parameter from the params object.
pub(crate) fn require_param<'a>(
    params: Option<&'a Value>,
    key: &str,
) -> Result<&'a Value, RpcError> {
    params
        .and_then(|p| p.get(key))
        .filter(|v| !v.is_null())
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Missing required parameter: {key}"),
        })
}

/// Extract a required string parameter.
pub(crate) fn require_string_param(params: Option<&Value>, key: &str) -> Result<String, RpcError> {
    require_param(params, key)?
        .as_str()
        .map(ToOwned::to_owned)
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be a string"),
        })
}

/// Extract a required integer parameter.
pub(crate) fn require_i64_param(params: Option<&Value>, key: &str) -> Result<i64, RpcError> {
    require_param(params, key)?
        .as_i64()
        .ok_or_else(|| RpcError::InvalidParams {
            message: format!("Parameter '{key}' must be an integer"),
        })
}

/// Extract a record id given either as a JSON number or a numeric string.
pub(crate) fn require_id_param<T>(params: Option<&Value>, key: &str) -> Result<T, RpcError>
where
    T: FromStr<Err = ArenaError>,
{
    let raw = match require_param(params, key)? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => {
            return Err(RpcError::InvalidParams {
                message: format!("Parameter '{key}' must be an id"),
            });
        }
    };
    raw.parse::<T>().map_err(RpcError::from)
}


#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::ids::LobbyId;
    use serde_json::json;

    #[test]
    fn register_all_populates_registry() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg);
        for method in [
            "system.ping",
            "lobby.join",
            "lobby.leave",
            "lobby.kick",
            "lobby.close",
            "match.start",
            "conversation.join",
            "conversation.leave",
            "conversation.send",
        ] {
            assert!(reg.has_method(method), "{method} not registered");
        }
    }

    #[test]
    fn require_param_missing_or_null() {
        let params = Some(json!({"other": 1, "nothing": null}));
        assert_eq!(require_param(params.as_ref(), "name").unwrap_err().code(), "INVALID_PARAMS");
        assert_eq!(require_param(params.as_ref(), "nothing").unwrap_err().code(), "INVALID_PARAMS");
        assert_eq!(require_param(None, "name").unwrap_err().code(), "INVALID_PARAMS");
    }

    #[test]
    fn require_string_param_wrong_type() {
        let params = Some(json!({"content": 42}));
        let err = require_string_param(params.as_ref(), "content").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn id_param_accepts_number_or_string() {
        let params = Some(json!({"a": 7, "b": "8"}));
        let a: LobbyId = require_id_param(params.as_ref(), "a").unwrap();
        let b: LobbyId = require_id_param(params.as_ref(), "b").unwrap();
        assert_eq!((a.get(), b.get()), (7, 8));
    }

    #[test]
    fn id_param_rejects_malformed_values() {
        let cases = [json!({"id": "abc"}), json!({"id": -1}), json!({"id": 1.5}), json!({"id": [1]})];
        for bad in cases {
            let err = require_id_param::<LobbyId>(Some(&bad), "id").unwrap_err();
            assert_eq!(err.code(), "INVALID_PARAMS");
        }
    }
}
