//! HTTP and websocket API.
//!
//! Routes are served below `/v1`:
//!
//! - `GET /v1/spec` lists the loaded specs
//! - `GET /v1/info` reports version and sandbox backend
//! - `POST /v1/exec` runs code and returns its collected output
//! - `GET /v1/ws` upgrades to the streaming websocket session

pub mod models;
pub mod rest;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::sandbox::{ErrorKind, Manager, SandboxError};
use crate::size::parse_size;
use models::{ErrorModel, WsError};

/// Shared state of all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Manager,
    /// Maximum combined stdout and stderr length of an exec response.
    pub max_output_len: u64,
    /// Parent token of every execution started through the API.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        manager: Manager,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let max_output_len =
            parse_size(&config.api.max_output_len).map_err(|e| ConfigError::Validation {
                field: "api.max_output_len".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            manager,
            max_output_len,
            shutdown,
        })
    }
}

/// Builds the API router.
pub fn router(state: AppState, cors_enabled: bool) -> Router {
    let v1 = Router::new()
        .route("/spec", get(rest::get_spec))
        .route("/info", get(rest::get_info))
        .route("/exec", post(rest::post_exec))
        .route("/ws", get(ws::websocket_handler));

    let mut app = Router::new().nest("/v1", v1).with_state(state);

    if cors_enabled {
        app = app.layer(ServiceBuilder::new().layer(CorsLayer::permissive()));
    }

    app
}

/// Errors returned by API handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Timeout(String),

    #[error("output len exceeded")]
    OutputLenExceeded,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::OutputLenExceeded => StatusCode::BAD_REQUEST,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SandboxError> for ApiError {
    fn from(e: SandboxError) -> Self {
        match e.kind() {
            ErrorKind::User => ApiError::BadRequest(e.to_string()),
            ErrorKind::Timeout => ApiError::Timeout(e.to_string()),
            ErrorKind::System => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<&SandboxError> for WsError {
    fn from(e: &SandboxError) -> Self {
        let status = match e.kind() {
            ErrorKind::User => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
        };
        WsError::new(status.as_u16(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorModel {
            error: self.to_string(),
            code: status.as_u16(),
            context: None,
        };
        (status, Json(body)).into_response()
    }
}
