//! Warden Server
//!
//! Self-hosted API server for approval-gated turns. This is a library
//! crate — the server is started via `start_server()`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use warden_core::lm::{HttpLm, LmClient, LmError, LmReply, LmRequest};
use warden_core::session::SessionManager;
use warden_core::tools::builtin::register_builtin_tools;
use warden_core::tools::ToolRegistry;
use warden_core::RuntimeConfig;

pub mod error;
pub mod routes;
pub mod types;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Placeholder LM client used when no credentials are configured: the
/// server stays up and every turn fails with `lm_unavailable`.
struct UnconfiguredLm;

#[async_trait::async_trait]
impl LmClient for UnconfiguredLm {
    async fn complete(&self, _request: LmRequest) -> Result<LmReply, LmError> {
        Err(LmError::Unavailable(
            "no language model credentials configured".to_string(),
        ))
    }
}

/// Build the LM client from env; warn and fall back when unconfigured.
fn create_lm_client() -> Arc<dyn LmClient> {
    match HttpLm::from_env() {
        Some(client) => Arc::new(client),
        None => {
            tracing::warn!(
                "No LM credentials found (WARDEN_LM_BASE_URL / WARDEN_LM_API_KEY); \
                 turns will fail until they are configured"
            );
            Arc::new(UnconfiguredLm)
        }
    }
}

/// Build the Axum router and application state.
pub fn build_router(config: RuntimeConfig) -> anyhow::Result<(Router, AppState)> {
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools)?;

    let manager = SessionManager::new(tools, create_lm_client(), config);
    let state = AppState { manager };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok((app, state))
}

/// Start the Warden server and block until shutdown.
pub async fn start_server(config: RuntimeConfig, port: u16) -> anyhow::Result<()> {
    let (app, _state) = build_router(config)?;
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    tracing::info!("Warden server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
