//! `ArenaServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arena_core::store::ArenaStore;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api;
use crate::claims::{ClaimsResolver, HeaderClaimsResolver, IdentityQuery};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::ArenaHub;
use crate::metrics::WS_CONNECTIONS_REJECTED_TOTAL;
use crate::rpc::handlers::register_all;
use crate::rpc::registry::MethodRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionDeps, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Coordination state.
    pub hub: Arc<ArenaHub>,
    /// RPC method registry.
    pub registry: Arc<MethodRegistry>,
    /// Caller identity extraction.
    pub claims: Arc<dyn ClaimsResolver>,
    /// Listener configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// The arena coordination server.
pub struct ArenaServer {
    config: Arc<ServerConfig>,
    hub: Arc<ArenaHub>,
    registry: Arc<MethodRegistry>,
    claims: Arc<dyn ClaimsResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl ArenaServer {
    /// Create a server over `store` with every RPC method registered.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ArenaStore>,
        metrics: PrometheusHandle,
    ) -> Self {
        let hub = Arc::new(ArenaHub::new(store, &config.lobby));
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        let claims: Arc<dyn ClaimsResolver> =
            Arc::new(HeaderClaimsResolver::from_settings(&config.auth));
        Self {
            config: Arc::new(config),
            hub,
            registry: Arc::new(registry),
            claims,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Replace the identity resolver.
    #[must_use]
    pub fn with_claims(mut self, claims: Arc<dyn ClaimsResolver>) -> Self {
        self.claims = claims;
        self
    }

    fn state(&self) -> AppState {
        AppState {
            hub: Arc::clone(&self.hub),
            registry: Arc::clone(&self.registry),
            claims: Arc::clone(&self.claims),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route("/lobbies/live", get(api::list_live))
            .route("/lobbies/{lobby_id}/start", post(api::start_match))
            .route("/lobbies/{lobby_id}/updated", post(api::lobby_updated))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "arena server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Coordination hub.
    pub fn hub(&self) -> &Arc<ArenaHub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the method registry.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.registry().count(),
        state.hub.membership().lobby_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<IdentityQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = state.claims.resolve(&headers, &query) else {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "unauthenticated").increment(1);
        return (StatusCode::UNAUTHORIZED, "Missing user identity").into_response();
    };
    if state.shutdown.is_shutting_down() {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
    }
    if state.hub.registry().count() >= state.config.max_connections {
        counter!(WS_CONNECTIONS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(max = state.config.max_connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    let deps = SessionDeps {
        hub: Arc::clone(&state.hub),
        registry: Arc::clone(&state.registry),
        config: Arc::clone(&state.config),
        shutdown: state.shutdown.token(),
        start_time: state.start_time,
    };
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _ = run_ws_session(socket, user_id, deps).await;
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::ids::UserId;
    use arena_core::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct Fixture {
        server: ArenaServer,
        store: Arc<MemoryStore>,
        lobby: arena_core::ids::LobbyId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let lobby = store.create_lobby("Arena", UserId::from("a@x.io"), 4);
        let _ = store.add_lobby_participant(lobby, UserId::from("b@x.io"));
        let server = ArenaServer::new(
            ServerConfig::default(),
            Arc::clone(&store) as Arc<dyn ArenaStore>,
            crate::metrics::detached_handle(),
        );
        Fixture { server, store, lobby }
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn start_body() -> Value {
        json!({
            "problemIds": ["0192f0c2-8e9a-7c4d-9b1e-3f6a2d5c8e10"],
            "durationSec": 900,
        })
    }

    #[test]
    fn server_with_default_config() {
        let f = fixture();
        assert_eq!(f.server.config().host, "127.0.0.1");
        assert_eq!(f.server.config().port, 0);
        assert!(!f.server.shutdown().is_shutting_down());
        assert!(f.server.registry().has_method("match.start"));
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let f = fixture();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = f.server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert!(parsed.get("uptime_secs").is_some());
        assert!(parsed.get("lobbies").is_some());
    }

    #[tokio::test]
    async fn metrics_endpoint_is_plain_text() {
        let f = fixture();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = f.server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(ct.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn ws_without_identity_is_rejected() {
        let f = fixture();
        let req = Request::builder()
            .uri("/ws")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = f.server.router().oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let f = fixture();
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = f.server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn live_lobbies_starts_empty() {
        let f = fixture();
        let req = Request::builder().uri("/lobbies/live").body(Body::empty()).unwrap();
        let resp = f.server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["lobbies"], json!([]));
    }

    #[tokio::test]
    async fn host_starts_match_over_http() {
        let f = fixture();
        let uri = format!("/lobbies/{}/start", f.lobby);
        let resp = f
            .server
            .router()
            .oneshot(post_json(&uri, Some("a@x.io"), &start_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let event = body_json(resp).await;
        assert!(event["matchId"].is_string());
        assert_eq!(event["durationSec"], 900);
        assert_eq!(f.store.matches().len(), 1);
    }

    #[tokio::test]
    async fn non_host_start_is_forbidden() {
        let f = fixture();
        let uri = format!("/lobbies/{}/start", f.lobby);
        let resp = f
            .server
            .router()
            .oneshot(post_json(&uri, Some("b@x.io"), &start_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["error"]["code"], "FORBIDDEN");
        assert!(f.store.matches().is_empty());
    }

    #[tokio::test]
    async fn start_without_identity_is_unauthorized() {
        let f = fixture();
        let uri = format!("/lobbies/{}/start", f.lobby);
        let resp = f.server.router().oneshot(post_json(&uri, None, &start_body())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_lobby_id_is_bad_request() {
        let f = fixture();
        let resp = f
            .server
            .router()
            .oneshot(post_json("/lobbies/abc/start", Some("a@x.io"), &start_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "INVALID_PARAMS");
        assert!(body["error"]["message"].as_str().unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn second_start_conflicts() {
        let f = fixture();
        let uri = format!("/lobbies/{}/start", f.lobby);
        let router = f.server.router();
        let first = router
            .clone()
            .oneshot(post_json(&uri, Some("a@x.io"), &start_body()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = router.oneshot(post_json(&uri, Some("a@x.io"), &start_body())).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn lobby_updated_returns_record() {
        let f = fixture();
        let uri = format!("/lobbies/{}/updated", f.lobby);
        let resp = f
            .server
            .router()
            .oneshot(post_json(&uri, Some("svc@x.io"), &json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["lobby"]["name"], "Arena");
    }

    #[tokio::test]
    async fn lobby_updated_unknown_lobby_is_404() {
        let f = fixture();
        let resp = f
            .server
            .router()
            .oneshot(post_json("/lobbies/999/updated", Some("svc@x.io"), &json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn shutdown_propagates_to_coordinator() {
        let f = fixture();
        let shutdown = Arc::clone(f.server.shutdown());
        shutdown.shutdown();
        assert!(f.server.shutdown().is_shutting_down());
    }
}
