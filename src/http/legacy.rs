//! Legacy HTTP+SSE transport
//!
//! `GET` opens a long-lived push stream whose first event announces the session
//! id. Client messages arrive on `POST /messages?sessionId=…`, are acknowledged
//! with `202 Accepted`, and their results are pushed onto the same stream.

use std::sync::Arc;

use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use tracing::{info, warn};

use super::{
    dispatch::{process_envelope, Exchange},
    error_response, frame_event,
};
use crate::{
    errors::AppError,
    mcp::rpc::{decode_payload, Envelope, Payload},
    processor::Notifier,
    session::{drain_frames, EndReason, OutboundFrame, SessionHandle, SessionRegistry},
    AppState,
};

struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.registry.destroy(&self.session_id, EndReason::Disconnect);
    }
}

pub async fn open_stream(
    state: &AppState,
    credential_segment: Option<&str>,
    headers: &HeaderMap,
) -> Response {
    let (credential, source) = match state.credentials.resolve(credential_segment, headers) {
        Ok(resolved) => resolved,
        Err(err) => return err.into_response(),
    };

    let (session, rx) = state
        .sessions
        .create_legacy(credential, state.settings.channel_capacity);
    let Some(outbound) = session.outbound.clone() else {
        state.sessions.destroy(&session.id, EndReason::WriteFailure);
        return AppError::internal("legacy session created without a channel").into_response();
    };

    if let Err(err) = outbound
        .push(OutboundFrame::Session(session.id.clone()))
        .await
    {
        state.sessions.destroy(&session.id, EndReason::WriteFailure);
        return err.into_response();
    }
    state.sessions.mark_open(&session.id);

    info!(
        session_id = %session.id,
        credential_source = ?source,
        "sse stream opened"
    );

    let guard = DisconnectGuard {
        registry: Arc::clone(&state.sessions),
        session_id: session.id.clone(),
    };
    let stream = drain_frames(rx, outbound.closed_token()).map(move |frame| {
        let _held = &guard;
        frame_event(frame)
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.settings.keep_alive_interval))
        .into_response()
}

pub async fn submit_message(state: &AppState, session: SessionHandle, body: Bytes) -> Response {
    let request_id = super::recover_request_id(&body);

    let session = match state.sessions.touch(&session.id) {
        Ok(session) => session,
        Err(err) => return error_response(err, request_id),
    };
    let Some(outbound) = session.outbound.clone() else {
        return error_response(
            AppError::internal("legacy session without a channel"),
            request_id,
        );
    };
    if outbound.is_closed() {
        state.sessions.destroy(&session.id, EndReason::WriteFailure);
        return error_response(
            AppError::ChannelWriteFailure {
                session_id: session.id,
            },
            request_id,
        );
    }

    let value = match decode_payload(&body) {
        Ok(Payload::Single(value)) => value,
        Ok(Payload::Batch(_)) => {
            return AppError::malformed("legacy messages carry exactly one envelope")
                .into_response()
        }
        Err(err) => return err.into_response(),
    };
    let envelope = match Envelope::parse(value) {
        Ok(envelope) => envelope,
        Err((id, err)) => return error_response(err, id),
    };

    let exchange = Exchange::for_session(
        &session,
        Notifier::new(outbound.clone()),
        session.cancel.clone(),
    );
    let processor = Arc::clone(&state.processor);
    let registry = Arc::clone(&state.sessions);

    tokio::spawn(async move {
        let Some(response) = process_envelope(processor.as_ref(), &exchange, envelope).await
        else {
            return;
        };
        // A cancelled request has nowhere to go: its stream is already closed.
        if exchange.cancel.is_cancelled() {
            return;
        }
        if let Err(err) = outbound.push_envelope(response).await {
            warn!(session_id = %session.id, error = %err, "failed to push response onto stream");
            registry.destroy(&session.id, EndReason::WriteFailure);
        }
    });

    StatusCode::ACCEPTED.into_response()
}
