//! Modern (streamable HTTP) transport
//!
//! Each POST is one exchange: a single envelope or an ordered batch in, the
//! matching responses out. The session id travels in the `mcp-session-id`
//! header and is minted on the handshake.

use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    dispatch::{expects_response, process_batch, Exchange},
    error_response, frame_event, recover_request_id,
    router::accepts,
    EVENT_STREAM, SESSION_HEADER,
};
use crate::{
    config::ModernSessionPolicy,
    credential::Credential,
    errors::AppError,
    mcp::rpc::{decode_payload, encode_responses, Envelope, Payload},
    processor::Notifier,
    session::{drain_frames, OutboundChannel, SessionHandle},
    AppState,
};

pub async fn handshake(
    state: &AppState,
    credential_segment: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = recover_request_id(&body);
    let payload = match decode_payload(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into_response(),
    };
    if let Err((id, err)) = validate_single(&payload) {
        return error_response(err, id);
    }

    let policy = state.settings.modern_sessions;
    if policy == ModernSessionPolicy::Strict && !contains_initialize(&payload) {
        return error_response(
            AppError::missing_session("mcp-session-id header is required after initialize"),
            request_id,
        );
    }

    let credential = match state.credentials.resolve(credential_segment, headers) {
        Ok((credential, _)) => credential,
        Err(err) => return error_response(err, request_id),
    };

    if policy == ModernSessionPolicy::Stateless {
        return run_exchange(state, None, credential, headers, payload).await;
    }

    let session = state.sessions.create_modern(credential.clone());
    let mut response = run_exchange(state, Some(&session), credential, headers, payload).await;
    attach_session_header(&mut response, &session.id);
    response
}

pub async fn exchange(
    state: &AppState,
    session: SessionHandle,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = recover_request_id(&body);
    let session = match state.sessions.touch(&session.id) {
        Ok(session) => session,
        Err(err) => return error_response(err, request_id),
    };
    let payload = match decode_payload(&body) {
        Ok(payload) => payload,
        Err(err) => return err.into_response(),
    };
    if let Err((id, err)) = validate_single(&payload) {
        return error_response(err, id);
    }

    let credential = session.credential.clone();
    let mut response = run_exchange(state, Some(&session), credential, headers, payload).await;
    attach_session_header(&mut response, &session.id);
    response
}

async fn run_exchange(
    state: &AppState,
    session: Option<&SessionHandle>,
    credential: Credential,
    headers: &HeaderMap,
    payload: Payload,
) -> Response {
    let (items, batch) = match payload {
        Payload::Single(value) => (vec![value], false),
        Payload::Batch(items) => (items, true),
    };

    // Per-exchange token: child of the session so teardown cancels it too.
    let cancel = session
        .map(|session| session.cancel.child_token())
        .unwrap_or_default();

    if wants_stream(headers) && expects_response(&items) {
        return stream_exchange(state, session, credential, cancel, items);
    }

    let exchange = build_exchange(session, credential, Notifier::discard(), cancel);
    let responses = process_batch(state.processor.as_ref(), &exchange, items).await;
    if responses.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }

    (StatusCode::OK, Json(encode_responses(&responses, batch))).into_response()
}

fn stream_exchange(
    state: &AppState,
    session: Option<&SessionHandle>,
    credential: Credential,
    cancel: CancellationToken,
    items: Vec<Value>,
) -> Response {
    let owner = session
        .map(|session| session.id.clone())
        .unwrap_or_else(|| "stateless".to_string());
    let (channel, rx) = OutboundChannel::new(owner, state.settings.channel_capacity);
    let closed = channel.closed_token();
    let exchange = build_exchange(
        session,
        credential,
        Notifier::new(channel.clone()),
        cancel.clone(),
    );
    let processor = Arc::clone(&state.processor);

    tokio::spawn(async move {
        let responses = process_batch(processor.as_ref(), &exchange, items).await;
        for response in responses {
            if channel.push_envelope(response).await.is_err() {
                break;
            }
        }
        channel.close();
    });

    // Dropping the stream (client went away) cancels the in-flight work.
    let drop_guard = cancel.drop_guard();
    let stream = drain_frames(rx, closed).map(move |frame| {
        let _held = &drop_guard;
        frame_event(frame)
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.settings.keep_alive_interval))
        .into_response()
}

fn build_exchange(
    session: Option<&SessionHandle>,
    credential: Credential,
    notifier: Notifier,
    cancel: CancellationToken,
) -> Exchange {
    match session {
        Some(session) => Exchange::for_session(session, notifier, cancel),
        None => Exchange::stateless(credential, notifier, cancel),
    }
}

// A lone envelope that fails validation is a transport error. Batch items are
// answered one by one instead.
fn validate_single(payload: &Payload) -> Result<(), (Option<Value>, AppError)> {
    match payload {
        Payload::Single(value) => Envelope::parse(value.clone()).map(|_| ()),
        Payload::Batch(_) => Ok(()),
    }
}

fn wants_stream(headers: &HeaderMap) -> bool {
    accepts(headers, EVENT_STREAM) && !accepts(headers, "application/json")
}

fn contains_initialize(payload: &Payload) -> bool {
    let is_initialize = |value: &Value| {
        value.get("id").is_some()
            && value.get("method").and_then(Value::as_str) == Some("initialize")
    };
    match payload {
        Payload::Single(value) => is_initialize(value),
        Payload::Batch(items) => items.iter().any(is_initialize),
    }
}

fn attach_session_header(response: &mut Response, session_id: &str) {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
}
