use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use pulse_core::{Channel, Credential, HubConfig, Identity};
use pulse_hub::{default_policy, BroadcastHub, CommandExecutor, CommandGateway};

use crate::{connection, poll};

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub hub: HubConfig,
    /// Credential granting admin-level sessions. Connections presenting no
    /// credential get user level; a wrong credential is rejected outright.
    pub admin_credential: Option<Credential>,
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8787,
            hub: HubConfig::default(),
            admin_credential: None,
            ping_interval_secs: 30,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub gateway: Arc<CommandGateway>,
    pub admin_credential: Option<Credential>,
    pub ping_interval: Duration,
}

/// Opaque credential check: no credential means a user-level session, the
/// admin credential means admin, anything else is refused at handshake.
pub fn verify_credential(
    admin: &Option<Credential>,
    presented: Option<&str>,
) -> Option<Identity> {
    match presented {
        None => Some(Identity::user("anonymous")),
        Some(value) => match admin {
            Some(credential) if credential.matches(value) => Some(Identity::admin("operator")),
            _ => None,
        },
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/poll", post(poll::poll_handler))
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .route("/api/metrics/{channel}", get(metrics_handler))
        .route("/api/alerts", get(alerts_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle exposing the hub (for
/// producers) and shutdown.
pub async fn start(
    config: ServerConfig,
    executor: Arc<dyn CommandExecutor>,
) -> Result<ServerHandle, std::io::Error> {
    let hub = Arc::new(
        BroadcastHub::new(config.hub.clone())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?,
    );
    Arc::clone(&hub).start();

    let gateway = Arc::new(CommandGateway::new(
        default_policy(),
        executor,
        Arc::clone(hub.registry()),
        Duration::from_millis(config.hub.command_timeout_ms),
        Arc::clone(hub.stats()),
    ));

    let state = AppState {
        hub: Arc::clone(&hub),
        gateway: Arc::clone(&gateway),
        admin_credential: config.admin_credential.clone(),
        ping_interval: Duration::from_secs(config.ping_interval_secs),
    };

    let router = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "pulse server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        hub,
        gateway,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    hub: Arc<BroadcastHub>,
    gateway: Arc<CommandGateway>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// The hub, for wiring up metric producers.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn gateway(&self) -> &Arc<CommandGateway> {
        &self.gateway
    }

    /// Stop accepting connections, then tear down the hub and every
    /// session.
    pub async fn shutdown(self) {
        self.server.abort();
        self.hub.shutdown().await;
    }
}

// ── WebSocket handshake ──

#[derive(Debug, Deserialize)]
struct WsQuery {
    credential: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(identity) = verify_credential(&state.admin_credential, query.credential.as_deref())
    else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid_credential"})),
        )
            .into_response();
    };

    // The hard session cap rejects at handshake time — clients must treat
    // this as "rejected", not "retry".
    let session = match state.hub.register_session(identity) {
        Ok(session) => session,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": err.kind()})),
            )
                .into_response();
        }
    };

    tracing::info!(session_id = %session.id, "websocket client connected");
    let hub = Arc::clone(&state.hub);
    let gateway = Arc::clone(&state.gateway);
    let ping_interval = state.ping_interval;
    ws.on_upgrade(move |socket| {
        connection::serve_socket(socket, session, hub, gateway, ping_interval)
    })
    .into_response()
}

// ── Snapshot surface (initial page load, before the socket is up) ──

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.hub.session_count(),
        "uptime_ms": state.hub.uptime_ms(),
    }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.hub.session_count(),
        "uptime_ms": state.hub.uptime_ms(),
        "commands": state.gateway.policy().names(),
        "stats": state.hub.stats().snapshot(),
    }))
}

#[derive(Debug, Deserialize)]
struct SinceQuery {
    since: Option<i64>,
}

async fn metrics_handler(
    Path(channel): Path<String>,
    Query(query): Query<SinceQuery>,
    State(state): State<AppState>,
) -> Response {
    let Ok(channel) = channel.parse::<Channel>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("unknown channel: {channel}")})),
        )
            .into_response();
    };

    let records = state
        .hub
        .history_since(channel, query.since.unwrap_or(0));
    Json(serde_json::json!({
        "channel": channel,
        "count": records.len(),
        "records": records,
    }))
    .into_response()
}

async fn alerts_handler(State(state): State<AppState>) -> impl IntoResponse {
    let alerts = state.hub.recent_alerts();
    Json(serde_json::json!({
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pulse_core::record::Payload;
    use pulse_core::{MetricRecord, PermissionLevel};
    use pulse_hub::ExecutionError;

    struct NullExecutor;

    #[async_trait]
    impl CommandExecutor for NullExecutor {
        async fn execute(
            &self,
            command: &str,
            _parameters: &Payload,
        ) -> Result<serde_json::Value, ExecutionError> {
            Ok(serde_json::json!({ "ran": command }))
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0, // random port
            hub: HubConfig {
                // keep the idle sweep out of the way of short-lived tests
                sweep_interval_ms: 60_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn credential_verification() {
        let admin = Some(Credential::new("s3cret"));

        let anon = verify_credential(&admin, None).unwrap();
        assert_eq!(anon.level, PermissionLevel::User);

        let op = verify_credential(&admin, Some("s3cret")).unwrap();
        assert_eq!(op.level, PermissionLevel::Admin);

        assert!(verify_credential(&admin, Some("wrong")).is_none());
        // No admin credential configured: presenting one is refused.
        assert!(verify_credential(&None, Some("anything")).is_none());
        assert!(verify_credential(&None, None).is_some());
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(test_config(), Arc::new(NullExecutor)).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_snapshot_reflects_published_records() {
        let handle = start(test_config(), Arc::new(NullExecutor)).await.unwrap();
        let hub = Arc::clone(handle.hub());

        let mut payload = Payload::new();
        payload.insert("cpu_percent".into(), serde_json::json!(12.0));
        hub.publish(MetricRecord::at(Channel::System, payload, hub.now_ms()));

        let url = format!("http://127.0.0.1:{}/api/metrics/system", handle.port);
        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["records"][0]["payload"]["cpu_percent"], 12.0);

        // Unknown channel is a 404, not a panic.
        let url = format!("http://127.0.0.1:{}/api/metrics/bogus", handle.port);
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 404);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn poll_transport_round_trip() {
        let handle = start(test_config(), Arc::new(NullExecutor)).await.unwrap();
        let hub = Arc::clone(handle.hub());
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/poll", handle.port);

        // First poll: register + subscribe.
        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({
                "messages": [
                    {"type": "subscribe", "channels": ["system"], "rate_tier": "realtime"}
                ]
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let token = body["session_token"].as_str().unwrap().to_string();
        assert!(token.starts_with("tok_"));

        // Publish and let the broadcast tick run.
        hub.publish(MetricRecord::at(Channel::System, Payload::new(), hub.now_ms()));
        tokio::time::sleep(Duration::from_millis(400)).await;

        // Second poll drains the metric frame.
        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({ "session_token": token, "messages": [] }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let frames = body["frames"].as_array().unwrap();
        assert!(
            frames.iter().any(|f| f["type"] == "metric"),
            "expected a metric frame, got: {frames:?}"
        );

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn poll_command_rejection_comes_back_correlated() {
        let handle = start(test_config(), Arc::new(NullExecutor)).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/poll", handle.port);

        let body: serde_json::Value = client
            .post(&url)
            .json(&serde_json::json!({
                "messages": [
                    {"type": "command", "request_id": "r7", "command": "restart_agent",
                     "parameters": {"name": "builder"}}
                ]
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let frames = body["frames"].as_array().unwrap();
        let result = frames
            .iter()
            .find(|f| f["type"] == "command_result")
            .expect("rejection frame present");
        assert_eq!(result["request_id"], "r7");
        assert_eq!(result["success"], false);
        assert_eq!(result["error_kind"], "insufficient_permission");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn session_cap_rejects_at_handshake() {
        let config = ServerConfig {
            port: 0,
            hub: HubConfig {
                max_sessions: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let handle = start(config, Arc::new(NullExecutor)).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/poll", handle.port);

        let first = client
            .post(&url)
            .json(&serde_json::json!({"messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);

        let second = client
            .post(&url)
            .json(&serde_json::json!({"messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 503);
        let body: serde_json::Value = second.json().await.unwrap();
        assert_eq!(body["error"], "capacity_exceeded");

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn poll_with_wrong_credential_is_unauthorized() {
        let config = ServerConfig {
            port: 0,
            admin_credential: Some(Credential::new("s3cret")),
            ..Default::default()
        };
        let handle = start(config, Arc::new(NullExecutor)).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/poll", handle.port);

        let resp = client
            .post(&url)
            .json(&serde_json::json!({"credential": "wrong", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        handle.shutdown().await;
    }

    #[test]
    fn build_router_creates_routes() {
        let hub = Arc::new(BroadcastHub::new(HubConfig::default()).unwrap());
        let gateway = Arc::new(CommandGateway::new(
            default_policy(),
            Arc::new(NullExecutor),
            Arc::clone(hub.registry()),
            Duration::from_secs(5),
            Arc::clone(hub.stats()),
        ));
        let state = AppState {
            hub,
            gateway,
            admin_credential: None,
            ping_interval: Duration::from_secs(30),
        };
        let _router = build_router(state);
    }
}
