//! HTTP/SSE front end for the appforge session engine.
//!
//! Exposes a single streaming endpoint: the client POSTs the full
//! conversation plus the opaque state blob, and receives the session's
//! events over SSE until the stream goes idle. The server holds no
//! session state between requests; everything needed to resume travels
//! in the events themselves.

pub mod error;
pub mod sse;
pub mod stream;

pub use error::{Result, ServerError};
pub use sse::{SseEvent, SseStream};
pub use stream::{session_event_stream, DeadlineStream, HeartbeatStream};

use appforge_core::{Collaborators, Session};
use appforge_protocol::AgentRequest;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Json as AxumJson, State};
use axum::http::StatusCode;
use axum::response::{Json, Response};
use axum::routing::{get, options, post};
use axum::{middleware, Router};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sandbox: String,
    pub available_sandbox_slots: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

/// Configuration for the appforge server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS allowed origins (if None, allows any origin)
    pub cors_origins: Option<Vec<String>>,
    /// Enable request logging
    pub enable_logging: bool,
    /// Transport-level SSE comment keep-alive interval
    pub sse_keepalive_interval: Duration,
    /// Wall-clock cap on a whole message stream. When exceeded, the
    /// session is cancelled and the stream ends with a RUNTIME_ERROR
    /// event.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap_or_else(|_| {
                SocketAddr::from(([127, 0, 0, 1], 3000))
            }),
            enable_cors: true,
            cors_origins: None,
            enable_logging: true,
            sse_keepalive_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(600),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Parse and set the bind address from a string.
    pub fn with_bind_addr_str(mut self, addr: &str) -> Result<Self> {
        self.bind_addr = addr
            .parse()
            .map_err(|e| ServerError::config_error(format!("Invalid bind address: {}", e)))?;
        Ok(self)
    }

    pub fn with_cors(mut self, enable: bool) -> Self {
        self.enable_cors = enable;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_logging(mut self, enable: bool) -> Self {
        self.enable_logging = enable;
        self
    }

    pub fn with_sse_keepalive(mut self, interval: Duration) -> Self {
        self.sse_keepalive_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Shared application state: the session collaborators and server
/// configuration.
#[derive(Clone)]
pub struct AppState {
    pub collaborators: Collaborators,
    pub config: ServerConfig,
}

/// Handler for the /message POST endpoint.
///
/// Request validation failures are rejected before the stream starts;
/// everything after the first event is delivered in-stream, including
/// faults.
async fn message_handler(
    State(app_state): State<AppState>,
    payload: std::result::Result<AxumJson<AgentRequest>, JsonRejection>,
) -> std::result::Result<Response, (StatusCode, Json<serde_json::Value>)> {
    // Body-level failures (bad JSON, missing fields) are malformed
    // requests, not extractor internals: report them as 400 with the
    // same error shape as session validation failures.
    let AxumJson(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            log::warn!("Rejecting malformed message body: {}", rejection);
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_request",
                    "details": rejection.body_text(),
                    "timestamp": chrono::Utc::now()
                })),
            ));
        }
    };

    log::info!(
        "Received message request for application {} (trace {})",
        request.application_id,
        request.trace_id
    );

    let session = match Session::resume(&request, app_state.collaborators.clone()).await {
        Ok(session) => session,
        Err(e) => {
            let error = ServerError::Session(e);
            let status = StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            log::warn!("Rejecting message request: {}", error);
            return Err((
                status,
                Json(json!({
                    "error": error.error_type(),
                    "details": error.to_string(),
                    "timestamp": chrono::Utc::now()
                })),
            ));
        }
    };

    let heartbeat_interval = session.settings().heartbeat_interval();
    let trace_id = session.trace_id().to_string();
    // Deadline innermost so an expired session is dropped (cancelling
    // in-flight work) while heartbeats keep flowing until then.
    let events = HeartbeatStream::new(
        DeadlineStream::new(
            session_event_stream(session),
            app_state.config.request_timeout,
            trace_id.clone(),
        ),
        heartbeat_interval,
        trace_id,
    );

    Ok(sse::create_sse_response(
        events,
        app_state.config.sse_keepalive_interval,
    ))
}

/// Handler for the /health GET endpoint. Probes the sandbox backend so
/// orchestrators see degradation before sessions do.
async fn health_handler(State(app_state): State<AppState>) -> Json<HealthResponse> {
    let sandbox = match app_state.collaborators.sandbox.health().await {
        Ok(()) => "healthy".to_string(),
        Err(e) => {
            log::warn!("Sandbox health probe failed: {}", e);
            format!("unhealthy: {}", e)
        }
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        sandbox,
        available_sandbox_slots: app_state.collaborators.pool.available_slots(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// The appforge SSE server.
pub struct AppServer {
    collaborators: Collaborators,
    config: ServerConfig,
}

impl AppServer {
    /// Create a new server with default configuration.
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            config: ServerConfig::default(),
        }
    }

    /// Create a new server with custom configuration.
    pub fn with_config(collaborators: Collaborators, config: ServerConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the Axum router with all routes and middleware.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            collaborators: self.collaborators.clone(),
            config: self.config.clone(),
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/message", post(message_handler))
            // CORS preflight
            .route("/message", options(|| async { StatusCode::OK }))
            .route("/health", options(|| async { StatusCode::OK }))
            .with_state(state);

        if self.config.enable_logging {
            router = router.layer(middleware::from_fn(
                |request: axum::http::Request<axum::body::Body>,
                 next: axum::middleware::Next| async {
                    let request_id = uuid::Uuid::new_v4().to_string();
                    let method = request.method().clone();
                    let uri = request.uri().clone();
                    log::info!("Request {} {} {}", request_id, method, uri);

                    let start = std::time::Instant::now();
                    let response = next.run(request).await;
                    let duration = start.elapsed();
                    log::info!("Response {} completed in {:?}", request_id, duration);

                    response
                },
            ));
        }

        router = router.layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            let cors_layer = if let Some(ref origins) = self.config.cors_origins {
                let origins: std::result::Result<Vec<_>, _> =
                    origins.iter().map(|s| s.parse()).collect();
                match origins {
                    Ok(origins) => CorsLayer::new()
                        .allow_origin(origins)
                        .allow_methods(Any)
                        .allow_headers(Any),
                    Err(_) => CorsLayer::permissive(),
                }
            } else {
                CorsLayer::permissive()
            };
            router = router.layer(cors_layer);
        }

        router
    }

    /// Start the server and listen for connections.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!("appforge server starting on {}", self.config.bind_addr);
        log::info!("Health check: http://{}/health", self.config.bind_addr);
        log::info!("Message endpoint: http://{}/message", self.config.bind_addr);

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Start the server with graceful shutdown support.
    pub async fn serve_with_shutdown<F>(self, shutdown_signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ServerError::config_error(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        log::info!(
            "appforge server starting on {} with graceful shutdown",
            self.config.bind_addr
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::internal(format!("Server error: {}", e)))?;

        log::info!("appforge server shut down gracefully");
        Ok(())
    }
}

/// Utility function to create a shutdown signal from Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => log::error!("Failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            log::info!("Received SIGTERM, shutting down...");
        },
    }
}
