//! Protocol router
//!
//! Every request to the primary or message endpoint passes through [`route`],
//! which decides between capability probe, Legacy stream open, Legacy message
//! submit, Modern exchange and explicit teardown, and validates any session id
//! against the registry before a transport handler runs.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::{
    error_response, handlers, legacy, recover_request_id, streamable, EVENT_STREAM, SESSION_HEADER,
};
use crate::{
    errors::AppError,
    session::{EndReason, ProtocolVariant, SessionHandle, SessionRegistry},
    AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Primary,
    Messages,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug)]
pub struct RouteRequest<'a> {
    pub method: &'a Method,
    pub endpoint: Endpoint,
    pub headers: &'a HeaderMap,
    pub query_session: Option<&'a str>,
}

#[derive(Debug)]
pub enum Route {
    CapabilityProbe,
    LegacyOpen,
    LegacyMessage(SessionHandle),
    ModernHandshake,
    ModernExchange(SessionHandle),
    Teardown(SessionHandle),
    Unsupported,
}

impl RouteRequest<'_> {
    fn header_session(&self) -> Option<&str> {
        self.headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn query_session(&self) -> Option<&str> {
        self.query_session
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    accepts(headers, EVENT_STREAM)
}

pub fn accepts(headers: &HeaderMap, media_type: &str) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|part| part.split(';').next())
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(media_type))
}

pub fn route(registry: &SessionRegistry, request: &RouteRequest<'_>) -> Result<Route, AppError> {
    match (request.endpoint, request.method) {
        (Endpoint::Primary, &Method::GET) => {
            if !accepts_event_stream(request.headers) {
                return Ok(Route::CapabilityProbe);
            }

            match request.header_session().or_else(|| request.query_session()) {
                None => Ok(Route::LegacyOpen),
                // Streams are never resumed or shared: an existing id is used
                // against the wrong route whatever its variant.
                Some(id) => {
                    let session = registry.get(id)?;
                    Err(AppError::ProtocolMismatch {
                        session_id: session.id,
                        variant: session.variant,
                        route: "stream open",
                    })
                }
            }
        }
        (Endpoint::Primary, &Method::POST) => match request.header_session() {
            None => Ok(Route::ModernHandshake),
            Some(id) => {
                let session = registry.get(id)?;
                session.expect_variant(ProtocolVariant::Modern, "streamable exchange")?;
                Ok(Route::ModernExchange(session))
            }
        },
        (Endpoint::Primary, &Method::DELETE) => {
            let id = request
                .header_session()
                .ok_or_else(|| AppError::missing_session("teardown requires the mcp-session-id header"))?;
            let session = registry.get(id)?;
            session.expect_variant(ProtocolVariant::Modern, "streamable teardown")?;
            Ok(Route::Teardown(session))
        }
        (Endpoint::Messages, &Method::POST) => {
            let id = request
                .query_session()
                .ok_or_else(|| AppError::missing_session("message submit requires the sessionId query parameter"))?;
            let session = registry.get(id)?;
            session.expect_variant(ProtocolVariant::Legacy, "message submit")?;
            Ok(Route::LegacyMessage(session))
        }
        (Endpoint::Messages, &Method::DELETE) => {
            let id = request
                .query_session()
                .ok_or_else(|| AppError::missing_session("teardown requires the sessionId query parameter"))?;
            let session = registry.get(id)?;
            session.expect_variant(ProtocolVariant::Legacy, "sse teardown")?;
            Ok(Route::Teardown(session))
        }
        _ => Ok(Route::Unsupported),
    }
}

pub async fn primary_endpoint(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    dispatch_route(state, Endpoint::Primary, None, method, headers, query, body).await
}

pub async fn primary_endpoint_with_credential(
    State(state): State<AppState>,
    Path(credential): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    dispatch_route(
        state,
        Endpoint::Primary,
        Some(credential),
        method,
        headers,
        query,
        body,
    )
    .await
}

pub async fn message_endpoint(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    dispatch_route(state, Endpoint::Messages, None, method, headers, query, body).await
}

async fn dispatch_route(
    state: AppState,
    endpoint: Endpoint,
    credential_segment: Option<String>,
    method: Method,
    headers: HeaderMap,
    query: SessionQuery,
    body: Bytes,
) -> Response {
    let request = RouteRequest {
        method: &method,
        endpoint,
        headers: &headers,
        query_session: query.session_id.as_deref(),
    };

    let route = match route(&state.sessions, &request) {
        Ok(route) => route,
        Err(err) => return error_response(err, recover_request_id(&body)),
    };

    match route {
        Route::CapabilityProbe => handlers::capability_probe(&state).into_response(),
        Route::LegacyOpen => {
            legacy::open_stream(&state, credential_segment.as_deref(), &headers).await
        }
        Route::LegacyMessage(session) => legacy::submit_message(&state, session, body).await,
        Route::ModernHandshake => {
            streamable::handshake(&state, credential_segment.as_deref(), &headers, body).await
        }
        Route::ModernExchange(session) => {
            streamable::exchange(&state, session, &headers, body).await
        }
        Route::Teardown(session) => teardown(&state, session),
        Route::Unsupported => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn teardown(state: &AppState, session: SessionHandle) -> Response {
    if state.sessions.destroy(&session.id, EndReason::Teardown) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        AppError::session_not_found(session.id).into_response()
    }
}
