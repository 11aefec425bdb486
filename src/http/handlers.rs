//! Metadata endpoints
//!
//! Health check and the static capability probe. Neither touches the session
//! registry beyond reading its size.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{MESSAGE_PATH, PRIMARY_PATH, SESSION_HEADER, SESSION_QUERY_PARAM};
use crate::{mcp::server::SUPPORTED_PROTOCOL_VERSIONS, session::ProtocolVariant, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub endpoint: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_endpoint: Option<&'static str>,
    pub session_id: &'static str,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub protocols: Vec<ProtocolDescriptor>,
    pub protocol_versions: &'static [&'static str],
    pub active_sessions: usize,
    pub started_at: DateTime<Utc>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<CapabilityResponse> {
    capability_probe(&state)
}

pub fn capability_probe(state: &AppState) -> Json<CapabilityResponse> {
    Json(CapabilityResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        protocols: vec![
            ProtocolDescriptor {
                name: ProtocolVariant::Modern.as_str(),
                endpoint: PRIMARY_PATH,
                message_endpoint: None,
                session_id: SESSION_HEADER,
                active_sessions: state.sessions.count(ProtocolVariant::Modern),
            },
            ProtocolDescriptor {
                name: ProtocolVariant::Legacy.as_str(),
                endpoint: PRIMARY_PATH,
                message_endpoint: Some(MESSAGE_PATH),
                session_id: SESSION_QUERY_PARAM,
                active_sessions: state.sessions.count(ProtocolVariant::Legacy),
            },
        ],
        protocol_versions: SUPPORTED_PROTOCOL_VERSIONS,
        active_sessions: state.sessions.len(),
        started_at: state.started_at,
    })
}
