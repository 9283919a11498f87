//! HTTP control plane.
//!
//! Operators list connected agents and push command lines to one agent or
//! to all of them. Every failure is answered with a JSON body carrying a
//! machine-readable `reason`.

use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fleetwatch_core::{ConnectionId, ConnectionRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a control-plane request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    MalformedBody,
    MissingFields,
    ConnectionNotFound,
    SendFailed,
}

impl ErrorReason {
    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::MalformedBody | Self::MissingFields => StatusCode::BAD_REQUEST,
            Self::ConnectionNotFound => StatusCode::NOT_FOUND,
            Self::SendFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Control-plane error, rendered as `{status: "error", reason, message}`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub reason: ErrorReason,
    pub message: String,
}

impl ApiError {
    fn new(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(ErrorReason::MalformedBody, rejection.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let reason = match err {
            RegistryError::NotFound(_) => ErrorReason::ConnectionNotFound,
            RegistryError::SendFailed { .. } => ErrorReason::SendFailed,
        };
        Self::new(reason, err.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub reason: ErrorReason,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error".to_string(),
            reason: self.reason,
            message: self.message,
        };
        (self.reason.status_code(), Json(body)).into_response()
    }
}

/// `POST /send` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

/// `POST /broadcast` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: String,
    pub message: String,
    pub delivered: usize,
    pub failed: usize,
}

/// `GET /connections`
pub async fn list_connections(State(registry): State<Arc<ConnectionRegistry>>) -> Json<Vec<ConnectionId>> {
    let mut ids = registry.list_active().await;
    ids.sort();
    Json(ids)
}

/// `POST /send`
///
/// # Errors
/// `malformed_body`/`missing_fields` (400), `connection_not_found` (404),
/// `send_failed` (500).
pub async fn send_to_agent(
    State(registry): State<Arc<ConnectionRegistry>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    let Json(request) = payload?;
    if request.id.is_empty() || request.message.is_empty() {
        return Err(ApiError::new(
            ErrorReason::MissingFields,
            "Both 'id' and 'message' are required",
        ));
    }

    let id = ConnectionId::from(request.id);
    registry.send_to(&id, request.message).await.map_err(|e| {
        tracing::warn!(connection_id = %id, "Control-plane send failed: {e}");
        ApiError::from(e)
    })?;

    tracing::info!(connection_id = %id, "Command sent");
    Ok(Json(SendResponse {
        status: "success".to_string(),
        message: format!("Message sent to {id}"),
    }))
}

/// `POST /broadcast`
///
/// # Errors
/// `malformed_body`/`missing_fields` (400). Per-agent failures are counted,
/// not reported as errors.
pub async fn broadcast(
    State(registry): State<Arc<ConnectionRegistry>>,
    payload: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let Json(request) = payload?;
    if request.message.is_empty() {
        return Err(ApiError::new(ErrorReason::MissingFields, "'message' is required"));
    }

    let report = registry.broadcast(request.message, None).await;
    tracing::info!(delivered = report.delivered, failed = report.failed, "Broadcast sent");
    Ok(Json(BroadcastResponse {
        status: "success".to_string(),
        message: "Broadcast sent".to_string(),
        delivered: report.delivered,
        failed: report.failed,
    }))
}
