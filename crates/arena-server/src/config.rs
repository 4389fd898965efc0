//! Runtime configuration for the HTTP and WebSocket listener.

use std::time::Duration;

use arena_settings::{ArenaSettings, AuthSettings, LobbySettings};
use serde::{Deserialize, Serialize};

/// Configuration for the arena server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Grace period for in-flight sessions on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Identity extraction.
    pub auth: AuthSettings,
    /// Match start and chat limits.
    pub lobby: LobbySettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            shutdown_timeout_secs: 10,
            auth: AuthSettings::default(),
            lobby: LobbySettings::default(),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ArenaSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_connections: server.max_connections,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            heartbeat_timeout_secs: server.heartbeat_timeout_secs,
            max_message_size: server.max_message_size,
            send_queue_capacity: server.send_queue_capacity.max(1),
            shutdown_timeout_secs: server.shutdown_timeout_secs,
            auth: settings.auth.clone(),
            lobby: settings.lobby.clone(),
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat check interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Silence tolerated before a connection is dropped.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_on_ephemeral_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn default_heartbeat() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let cfg = ServerConfig {
            heartbeat_interval_secs: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = ArenaSettings::default();
        settings.server.port = 7070;
        settings.server.max_connections = 3;
        settings.server.send_queue_capacity = 0;
        settings.auth.allow_query_user = true;
        settings.lobby.max_buffer_sec = 60;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 7070);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.send_queue_capacity, 1);
        assert!(cfg.auth.allow_query_user);
        assert_eq!(cfg.lobby.max_buffer_sec, 60);
        assert_eq!(cfg.host, settings.server.host);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_message_size, cfg.max_message_size);
        assert_eq!(back.auth.user_header, "x-user-id");
    }
}
