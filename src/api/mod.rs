//! REST API and WebSocket server of the hub
//!
//! Reporters push status over HTTP or a WebSocket chunk stream; operators
//! read reporter state, recent alerts, and a live event stream.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Hub and storage health
//! - `POST /api/v1/reports` - Submit a complete report
//! - `GET /api/v1/reports/stream` - Submit a chunked report (WebSocket)
//! - `GET /api/v1/reporters` - List reporters with liveness state
//! - `GET /api/v1/reporters/{id}` - One reporter
//! - `GET /api/v1/alerts` - Recent alerts
//! - `WS /api/v1/stream` - Live status events

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod middleware;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{AlertsResponse, HealthResponse, ReporterInfo, ReporterState, ReportersResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(feature = "api")]
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Optional authentication token
    pub auth_token: Option<String>,

    /// Enable CORS for dashboards
    pub enable_cors: bool,
}

impl ApiConfig {
    /// The `FLEETWATCH_API_TOKEN` environment variable overrides the token
    /// from the config file.
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind_addr,
            auth_token: crate::util::get_api_token().or_else(|| settings.auth_token.clone()),
            enable_cors: settings.enable_cors,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            auth_token: None,
            enable_cors: true,
        }
    }
}

/// Build the router with all routes and middleware.
#[cfg(feature = "api")]
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower::ServiceBuilder;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/reports", post(routes::reports::submit_report))
        .route(
            "/api/v1/reports/stream",
            get(websocket::report_stream_handler),
        )
        .route("/api/v1/reporters", get(routes::reporters::list_reporters))
        .route("/api/v1/reporters/:id", get(routes::reporters::get_reporter))
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route("/api/v1/stream", get(websocket::status_stream_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
