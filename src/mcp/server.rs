//! Default message processor
//!
//! Answers the protocol-level methods every client needs (`initialize`, `ping`)
//! and reports everything else as an unknown method. Deployments plug their own
//! [`MessageProcessor`] in front of the transport instead.

use async_trait::async_trait;
use rust_mcp_sdk::schema::{Implementation, InitializeResult, ServerCapabilities};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::mcp::rpc::{Envelope, RpcError};
use crate::processor::{MessageProcessor, RequestContext};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

#[derive(Debug, Default, Clone)]
pub struct McpProcessor;

impl McpProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageProcessor for McpProcessor {
    async fn handle(&self, request: Envelope, ctx: RequestContext) -> Result<Value, RpcError> {
        let method = request.method_name().to_string();
        let audit_params = redact_audit_params(request.params.as_ref());

        let outcome = match method.as_str() {
            "initialize" => initialize(request.params.as_ref()),
            "ping" => Ok(json!({})),
            _ => Err(RpcError::method_not_found()),
        };

        info!(
            method = %method,
            params = %audit_params,
            session_id = ctx.session_id.as_deref().unwrap_or("-"),
            variant = %ctx.variant,
            outcome = if outcome.is_ok() { "success" } else { "failure" },
            "mcp action audited"
        );

        outcome
    }

    async fn notify(&self, notification: Envelope, ctx: RequestContext) {
        debug!(
            method = %notification.method_name(),
            session_id = ctx.session_id.as_deref().unwrap_or("-"),
            "client notification received"
        );
    }
}

fn initialize(params: Option<&Value>) -> Result<Value, RpcError> {
    let protocol_version = negotiate_protocol_version(params)?;

    let initialize_result = InitializeResult {
        server_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: vec![],
            website_url: None,
        },
        capabilities: ServerCapabilities::default(),
        protocol_version: protocol_version.to_string(),
        instructions: None,
        meta: None,
    };

    serde_json::to_value(initialize_result).map_err(|_| RpcError::internal_error())
}

/// Echo the client's version when supported, otherwise offer the newest one.
pub fn negotiate_protocol_version(params: Option<&Value>) -> Result<&'static str, RpcError> {
    let offered_version = params
        .and_then(Value::as_object)
        .and_then(|object| object.get("protocolVersion"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|version| !version.is_empty())
        .ok_or_else(|| {
            RpcError::invalid_params().with_data(json!({
                "code": "invalid_protocol_version",
                "message": "initialize params.protocolVersion is required"
            }))
        })?;

    Ok(SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|supported| *supported == offered_version)
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0]))
}

const REDACTED: &str = "[REDACTED]";

/// Copy of `params` fit for the audit log: credential-like keys are masked at
/// any depth.
pub fn redact_audit_params(params: Option<&Value>) -> Value {
    let mut copy = params.cloned().unwrap_or(Value::Null);
    mask_sensitive(&mut copy);
    copy
}

fn mask_sensitive(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *item = Value::from(REDACTED);
                } else {
                    mask_sensitive(item);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive),
        _ => {}
    }
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    const EXACT: &[&str] = &["authorization", "bearer", "api_key", "apikey", "x-api-key"];
    const FRAGMENTS: &[&str] = &["token", "secret", "password", "credential"];

    EXACT.contains(&normalized.as_str())
        || FRAGMENTS.iter().any(|fragment| normalized.contains(fragment))
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{credential::Credential, processor::Notifier, session::ProtocolVariant};

    fn ctx() -> RequestContext {
        RequestContext {
            session_id: Some("s-1".to_string()),
            variant: ProtocolVariant::Modern,
            credential: Credential::new("t"),
            notifier: Notifier::discard(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn redacts_sensitive_fields_in_audit_params() {
        let params = json!({
            "name": "lookup",
            "arguments": {
                "zone": "eu-west",
                "token": "should-not-appear",
                "api_key": "should-not-appear",
                "nested": {
                    "client_secret": "should-not-appear"
                }
            }
        });

        let redacted = redact_audit_params(Some(&params));

        assert_eq!(redacted["name"], json!("lookup"));
        assert_eq!(redacted["arguments"]["zone"], json!("eu-west"));
        assert_eq!(redacted["arguments"]["token"], json!("[REDACTED]"));
        assert_eq!(redacted["arguments"]["api_key"], json!("[REDACTED]"));
        assert_eq!(
            redacted["arguments"]["nested"]["client_secret"],
            json!("[REDACTED]")
        );
    }

    #[test]
    fn negotiate_echoes_supported_version() {
        let params = json!({ "protocolVersion": "2024-11-05" });
        assert_eq!(
            negotiate_protocol_version(Some(&params)).expect("supported"),
            "2024-11-05"
        );
    }

    #[test]
    fn negotiate_offers_latest_for_unknown_version() {
        let params = json!({ "protocolVersion": "2031-01-01" });
        assert_eq!(
            negotiate_protocol_version(Some(&params)).expect("fallback"),
            SUPPORTED_PROTOCOL_VERSIONS[0]
        );
    }

    #[test]
    fn negotiate_requires_a_version() {
        let err = negotiate_protocol_version(Some(&json!({}))).expect_err("missing version");
        assert_eq!(err.code, crate::mcp::rpc::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let result = McpProcessor::new()
            .handle(Envelope::request(json!(1), "ping", None), ctx())
            .await
            .expect("ping succeeds");
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let result = McpProcessor::new()
            .handle(
                Envelope::request(
                    json!(1),
                    "initialize",
                    Some(json!({"protocolVersion": "2025-03-26", "capabilities": {}})),
                ),
                ctx(),
            )
            .await
            .expect("initialize succeeds");

        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let err = McpProcessor::new()
            .handle(Envelope::request(json!(1), "tools/list", None), ctx())
            .await
            .expect_err("no tools here");
        assert_eq!(err.code, crate::mcp::rpc::METHOD_NOT_FOUND);
    }
}
