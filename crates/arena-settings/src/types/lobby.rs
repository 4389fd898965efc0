//! Lobby, match and chat limits.

use serde::{Deserialize, Serialize};

/// Limits applied by the lobby, match and conversation entry points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LobbySettings {
    /// Preparation buffer used when a start request omits one.
    pub default_buffer_sec: u32,
    /// Upper clamp for requested buffers.
    pub max_buffer_sec: u32,
    /// Longest accepted match, in seconds.
    pub max_duration_sec: u32,
    /// Maximum chat message length in characters, after trimming.
    pub max_message_length: usize,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            default_buffer_sec: 5,
            max_buffer_sec: 300,
            max_duration_sec: 4 * 60 * 60,
            max_message_length: 4096,
        }
    }
}
