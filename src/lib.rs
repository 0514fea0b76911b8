pub mod client;
pub mod config;
pub mod dedup;
pub mod pipeline;
pub mod qr;
pub mod relay;
pub mod session;
pub mod types;

pub use config::Config;

use self::client::{ClientFactory, SidecarFactory};
use self::dedup::DedupCache;
use self::relay::WebhookRelay;
use self::session::SessionRegistry;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::error;

pub const SERVICE_NAME: &str = "wa-gateway";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub started_at: Instant,
    pub pruner: Arc<JoinHandle<()>>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Builds the production app: config from file/env, sidecar-backed clients.
/// Must run inside a tokio runtime (spawns the cache pruner).
pub fn create_app() -> anyhow::Result<(AppState, Router)> {
    let config = config::load_config();
    let http = reqwest::Client::new();
    let factory: Arc<dyn ClientFactory> = Arc::new(SidecarFactory::new(http, &config.sidecar.url));
    Ok(create_app_with(config, factory))
}

pub fn create_app_with(config: Config, factory: Arc<dyn ClientFactory>) -> (AppState, Router) {
    let relay = Arc::new(WebhookRelay::new(reqwest::Client::new(), &config.backend));
    let dedup = Arc::new(DedupCache::with_ttl_seconds(config.dedup.ttl_seconds));
    let registry = SessionRegistry::new(factory, relay, dedup.clone());
    let pruner = dedup::spawn_pruner(
        dedup,
        Duration::from_secs(config.dedup.sweep_interval_seconds),
    );

    let state = AppState {
        config,
        registry,
        started_at: Instant::now(),
        pruner: Arc::new(pruner),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/status/:user_id", get(status))
        .route("/initialize", post(initialize))
        .route("/qr/:user_id", get(qr_code))
        .route("/groups/:user_id", get(groups))
        .route("/logout/:user_id", post(logout))
        .with_state(state.clone());

    (state, app)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

async fn status(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    Json(state.registry.status(&user_id).await)
}

async fn initialize(
    State(state): State<AppState>,
    Json(req): Json<InitializeRequest>,
) -> impl IntoResponse {
    let Some(user_id) = req.user_id.filter(|id| !id.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "userId is required"})),
        )
            .into_response();
    };

    if let Err(err) = state.registry.get_or_create(&user_id) {
        error!(user_id = %user_id, "initialize error: {err:?}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": err.to_string()})),
        )
            .into_response();
    }

    let status = state.registry.status(&user_id).await;
    let qr = state.registry.qr_code(&user_id);
    Json(json!({"status": status, "qr": qr})).into_response()
}

async fn qr_code(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    Json(json!({"qr": state.registry.qr_code(&user_id)}))
}

async fn groups(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    match state.registry.groups(&user_id).await {
        Ok(groups) => Json(json!({"groups": groups})).into_response(),
        Err(err) => {
            error!(user_id = %user_id, "error getting groups: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}

async fn logout(State(state): State<AppState>, Path(user_id): Path<String>) -> impl IntoResponse {
    match state.registry.logout(&user_id).await {
        Ok(()) => Json(json!({"message": "Logged out successfully"})).into_response(),
        Err(err) => {
            error!(user_id = %user_id, "error logging out: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
                .into_response()
        }
    }
}
