//! HTTP API server for sightline gateway

pub mod frames;
pub mod health;
pub mod participants;

use std::future::Future;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::daemon::Daemon;
use crate::transport::ChannelLink;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub daemon: Arc<Daemon>,
    /// Fan-out of outgoing stream packets, when the daemon streams in-process
    pub packets: Option<ChannelLink>,
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest(
            "/api/participants",
            participants::router(Arc::clone(&state)).merge(frames::router(state)),
        )
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, host: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            host: host.into(),
            port,
        }
    }

    /// Serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server on {addr}: {e}")))?;

        tracing::info!(%addr, "API server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

/// API errors, rendered as `{"error": {"code", "message"}}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    /// The conversational session could not be opened
    SessionOpen(String),
    /// An upstream service failed or timed out
    Upstream(String),
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        use crate::Error;

        match err {
            Error::Undigestable(_) => Self::BadRequest(err.to_string()),
            Error::UnknownParticipant(_) => Self::NotFound(err.to_string()),
            Error::AlreadyActive(_) | Error::TopicBusy { .. } => Self::Conflict(err.to_string()),
            Error::NotStarted | Error::Cancelled(_) => Self::Unavailable(err.to_string()),
            Error::SessionOpen { .. } => Self::SessionOpen(err.to_string()),
            Error::Engine(_) | Error::Timeout(_) => Self::Upstream(err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::SessionOpen(msg) => (StatusCode::BAD_GATEWAY, "session_open_failed", msg),
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_failed", msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
