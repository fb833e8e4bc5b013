//! HTTP handlers for the presence service.
//!
//! | Method   | Path           | Action                          |
//! |----------|----------------|---------------------------------|
//! | `POST`   | `/online/:id`  | mark online                     |
//! | `DELETE` | `/online/:id`  | mark offline                    |
//! | `GET`    | `/online/:id`  | `{"id": .., "online": bool}`    |
//! | `GET`    | `/online`      | `{"online": [..], "count": n}`  |
//! | `GET`    | `/health`      | liveness                        |

use crate::config::{Config, StoreBackend};
use crate::metrics::{self, LatencyTimer};
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use online_core::{MemoryStore, PresenceStore, PresenceTracker, RedisStore, StoreError, TrackerError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The presence tracker.
    pub tracker: PresenceTracker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, connecting to the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker configuration is invalid or the store
    /// cannot be reached.
    pub async fn new(config: Config) -> Result<Self> {
        let store = connect_store(&config).await?;
        let tracker = PresenceTracker::from_config(
            store,
            config.slice_config()?,
            Arc::new(online_core::SystemClock),
        );

        Ok(Self { tracker, config })
    }
}

async fn connect_store(config: &Config) -> Result<Arc<dyn PresenceStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.url)
                .await
                .with_context(|| format!("Failed to connect to {}", config.store.url))?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory store; presence is not shared between processes");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/online", get(list_handler))
        .route(
            "/online/:id",
            get(status_handler).post(online_handler).delete(offline_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config).await?);
    info!(
        store = ?state.config.store.backend,
        window = state.tracker.window(),
        slice_size = state.tracker.slice_size(),
        "Presence tracker ready"
    );

    let listener = TcpListener::bind(addr).await?;
    info!("Presence server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Tracker failure mapped to an HTTP response.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] TrackerError);

impl ApiError {
    /// HTTP status and `online_errors_total` label for this error.
    fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            TrackerError::InvalidIdentifier => (StatusCode::BAD_REQUEST, "request"),
            TrackerError::Store(StoreError::Unsupported(_)) | TrackerError::InvalidConfig(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config")
            }
            TrackerError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "store"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.classify();

        if status.is_server_error() {
            error!(error = %self.0, error_type, "Request failed");
        }
        metrics::record_error(error_type);

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Mark an identifier online.
async fn online_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _timer = LatencyTimer::start("mark_online");
    state.tracker.mark_online(&id).await?;
    metrics::record_mark("online");
    debug!(id = %id, "Marked online");
    Ok(StatusCode::NO_CONTENT)
}

/// Mark an identifier offline.
async fn offline_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _timer = LatencyTimer::start("mark_offline");
    state.tracker.mark_offline(&id).await?;
    metrics::record_mark("offline");
    debug!(id = %id, "Marked offline");
    Ok(StatusCode::NO_CONTENT)
}

/// Report whether an identifier is online.
async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _timer = LatencyTimer::start("is_online");
    let online = state.tracker.is_online(&id).await?;
    metrics::record_query("is_online");
    Ok(Json(json!({ "id": id, "online": online })))
}

/// List every identifier currently online.
async fn list_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let _timer = LatencyTimer::start("all_online");
    let mut online: Vec<String> = state.tracker.all_online().await?.into_iter().collect();
    online.sort_unstable();

    metrics::record_query("all_online");
    metrics::set_members_listed(online.len());
    Ok(Json(json!({ "count": online.len(), "online": online })))
}
