//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

mod lobby;
mod server;

pub use lobby::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "lobby": { "defaultBufferSec": 10 },
///   "auth": { "allowQueryUser": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArenaSettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// Lobby, match and chat limits.
    pub lobby: LobbySettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Identity resolution for incoming connections.
    pub auth: AuthSettings,
}

impl ArenaSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.heartbeat_interval_secs == 0 {
            return Err(invalid("server.heartbeatIntervalSecs must be at least 1"));
        }
        if s.heartbeat_timeout_secs <= s.heartbeat_interval_secs {
            return Err(invalid(
                "server.heartbeatTimeoutSecs must exceed server.heartbeatIntervalSecs",
            ));
        }
        if s.send_queue_capacity == 0 {
            return Err(invalid("server.sendQueueCapacity must be at least 1"));
        }
        if s.max_connections == 0 {
            return Err(invalid("server.maxConnections must be at least 1"));
        }

        let l = &self.lobby;
        if l.max_buffer_sec == 0 {
            return Err(invalid("lobby.maxBufferSec must be at least 1"));
        }
        if l.default_buffer_sec > l.max_buffer_sec {
            return Err(invalid("lobby.defaultBufferSec exceeds lobby.maxBufferSec"));
        }
        if l.max_message_length == 0 {
            return Err(invalid("lobby.maxMessageLength must be at least 1"));
        }

        if self.auth.user_header.trim().is_empty() {
            return Err(invalid("auth.userHeader must not be empty"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_owned())
}
