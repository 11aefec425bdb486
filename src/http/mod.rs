//! HTTP surface for both transports
//!
//! `router` classifies every inbound request, `streamable` and `legacy` implement
//! the two transports, and `dispatch` is the envelope pipeline they share.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    response::{sse::Event, IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::{errors::AppError, mcp::rpc::Envelope, session::OutboundFrame};

pub mod dispatch;
pub mod handlers;
pub mod legacy;
pub mod router;
pub mod streamable;

pub const PRIMARY_PATH: &str = "/mcp";
pub const MESSAGE_PATH: &str = "/messages";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const SESSION_QUERY_PARAM: &str = "sessionId";
pub const EVENT_STREAM: &str = "text/event-stream";

pub fn error_response(err: AppError, request_id: Option<Value>) -> Response {
    match request_id {
        Some(id) => (err.status(), Json(Envelope::from_app_error(Some(id), &err).to_value()))
            .into_response(),
        None => err.into_response(),
    }
}

pub fn recover_request_id(body: &Bytes) -> Option<Value> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("id")
        .filter(|id| id.is_string() || id.is_number())
        .cloned()
}

pub(crate) fn frame_event(frame: OutboundFrame) -> Result<Event, Infallible> {
    Ok(match frame {
        OutboundFrame::Session(session_id) => Event::default().event("session").data(session_id),
        OutboundFrame::Message(envelope) => Event::default()
            .event("message")
            .data(envelope.to_value().to_string()),
    })
}
