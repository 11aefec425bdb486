use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::session::ProtocolVariant;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("session {session_id} uses the {variant} transport and cannot be used for {route}")]
    ProtocolMismatch {
        session_id: String,
        variant: ProtocolVariant,
        route: &'static str,
    },
    #[error("missing session: {message}")]
    MissingSession { message: &'static str },
    #[error("no credential could be resolved for the session")]
    MissingCredential,
    #[error("malformed envelope: {message}")]
    MalformedEnvelope { parse_error: bool, message: String },
    #[error("outbound channel for session {session_id} is closed")]
    ChannelWriteFailure { session_id: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("internal error")]
    Internal { message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    pub fn missing_session(message: &'static str) -> Self {
        Self::MissingSession { message }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            parse_error: false,
            message: message.into(),
        }
    }

    pub fn unparseable(message: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            parse_error: true,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable name of the error kind, surfaced to clients as `data.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound { .. } => "SessionNotFound",
            Self::ProtocolMismatch { .. } => "ProtocolMismatch",
            Self::MissingSession { .. } => "MissingSession",
            Self::MissingCredential => "MissingCredential",
            Self::MalformedEnvelope { .. } => "MalformedEnvelope",
            Self::ChannelWriteFailure { .. } => "ChannelWriteFailure",
            Self::Cancelled => "Cancelled",
            Self::Internal { .. } => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ProtocolMismatch { .. }
            | Self::MissingSession { .. }
            | Self::MalformedEnvelope { .. } => StatusCode::BAD_REQUEST,
            Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::ChannelWriteFailure { .. } => StatusCode::GONE,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            Self::Internal { .. } => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal { message } = &self {
            tracing::error!(error = %message, "request failed with internal error");
        }

        let status = self.status();
        (
            status,
            Json(ErrorResponse {
                code: self.kind().to_string(),
                message: self.public_message(),
                details: json!({}),
            }),
        )
            .into_response()
    }
}
