//! Liveness and readiness endpoints for the hosting platform.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;

/// Shared flag flipped once the bots are polling.
pub struct Health {
    running: AtomicBool,
    environment: String,
    started: Instant,
}

impl Health {
    pub fn new(environment: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            environment: environment.into(),
            started: Instant::now(),
        })
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn code(running: bool) -> StatusCode {
    if running { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn health(State(state): State<Arc<Health>>) -> impl IntoResponse {
    let running = state.is_running();
    let body = serde_json::json!({
        "status": if running { "healthy" } else { "starting" },
        "bot_running": running,
        "environment": state.environment,
        "uptime_secs": state.started.elapsed().as_secs(),
    });
    (code(running), Json(body))
}

async fn ready(State(state): State<Arc<Health>>) -> impl IntoResponse {
    let running = state.is_running();
    let status = if running { "ready" } else { "not ready" };
    (code(running), Json(serde_json::json!({ "status": status })))
}

pub fn router(state: Arc<Health>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Bind and serve in the background.
pub async fn serve(addr: SocketAddr, state: Arc<Health>) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!("Health endpoint on {local}");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router(state)).await {
            tracing::error!("Health server error: {e}");
        }
    });
    Ok(local)
}
