//! JSON-RPC 2.0 envelope representations and validation
//!
//! Transport-independent parsing and formatting of envelopes, plus the mapping of
//! transport errors onto JSON-RPC error objects.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SESSION_NOT_FOUND: i64 = -32001;
pub const PROTOCOL_MISMATCH: i64 = -32002;
pub const MISSING_SESSION: i64 = -32003;
pub const MISSING_CREDENTIAL: i64 = -32004;
pub const CHANNEL_WRITE_FAILURE: i64 = -32005;
pub const REQUEST_CANCELLED: i64 = -32800;

/// A single JSON-RPC 2.0 message.
///
/// `id` distinguishes an absent id (notification) from an explicit `null`, so
/// responses to unidentifiable requests still serialize `"id": null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Notification,
    Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Items stay raw so each can be validated and answered on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Single(Value),
    Batch(Vec<Value>),
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found")
    }

    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS, "Invalid params")
    }

    pub fn internal_error() -> Self {
        Self::new(INTERNAL_ERROR, "Internal error")
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::SessionNotFound { .. } => SESSION_NOT_FOUND,
            AppError::ProtocolMismatch { .. } => PROTOCOL_MISMATCH,
            AppError::MissingSession { .. } => MISSING_SESSION,
            AppError::MissingCredential => MISSING_CREDENTIAL,
            AppError::MalformedEnvelope {
                parse_error: true, ..
            } => PARSE_ERROR,
            AppError::MalformedEnvelope { .. } => INVALID_REQUEST,
            AppError::ChannelWriteFailure { .. } => CHANNEL_WRITE_FAILURE,
            AppError::Cancelled => REQUEST_CANCELLED,
            AppError::Internal { .. } => INTERNAL_ERROR,
        };

        Self::new(code, err.public_message()).with_data(json!({ "kind": err.kind() }))
    }
}

impl Envelope {
    pub fn request(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn result(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.unwrap_or(Value::Null)),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.unwrap_or(Value::Null)),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    pub fn from_app_error(id: Option<Value>, err: &AppError) -> Self {
        Self::error(id, RpcError::from(err))
    }

    pub fn kind(&self) -> EnvelopeKind {
        match (&self.id, &self.method) {
            (Some(_), Some(_)) => EnvelopeKind::Request,
            (None, _) => EnvelopeKind::Notification,
            (Some(_), None) => EnvelopeKind::Response,
        }
    }

    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }

    /// On failure the error carries whatever id could be recovered.
    pub fn parse(value: Value) -> Result<Self, (Option<Value>, AppError)> {
        let Some(object) = value.as_object() else {
            return Err((None, AppError::malformed("envelope must be a JSON object")));
        };

        let recovered_id = object.get("id").filter(|id| is_valid_id(id)).cloned();
        let invalid = |message: &str| (recovered_id.clone(), AppError::malformed(message));

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(invalid("jsonrpc must be \"2.0\""));
        }

        if let Some(id) = object.get("id") {
            if !is_valid_id(id) {
                return Err(invalid("id must be a string, number, or null"));
            }
        }

        if let Some(params) = object.get("params") {
            if !(params.is_object() || params.is_array()) {
                return Err(invalid("params must be an object or array"));
            }
        }

        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|err| (recovered_id.clone(), AppError::malformed(err.to_string())))?;
        envelope.validate_shape().map_err(|message| invalid(message))?;
        Ok(envelope)
    }

    fn validate_shape(&self) -> Result<(), &'static str> {
        let has_outcome = self.result.is_some() || self.error.is_some();
        match &self.method {
            Some(method) => {
                if method.trim().is_empty() {
                    return Err("method must not be empty");
                }
                if has_outcome {
                    return Err("requests must not carry result or error");
                }
            }
            None => {
                if self.id.is_none() {
                    return Err("envelope needs an id or a method");
                }
                if self.result.is_some() == self.error.is_some() {
                    return Err("responses carry exactly one of result or error");
                }
                if self.params.is_some() {
                    return Err("responses must not carry params");
                }
            }
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn is_valid_id(id: &Value) -> bool {
    id.is_string() || id.is_number() || id.is_null()
}

pub fn decode_payload(body: &[u8]) -> Result<Payload, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| AppError::unparseable(format!("body is not valid JSON: {err}")))?;

    match value {
        Value::Array(items) if items.is_empty() => {
            Err(AppError::malformed("batch must contain at least one envelope"))
        }
        Value::Array(items) => Ok(Payload::Batch(items)),
        Value::Object(_) => Ok(Payload::Single(value)),
        _ => Err(AppError::malformed("body must be an object or array")),
    }
}

/// Serialize envelopes the way they were submitted: a bare object for a single
/// envelope, an array for a batch.
pub fn encode_responses(responses: &[Envelope], batch: bool) -> Value {
    if !batch {
        if let [single] = responses {
            return single.to_value();
        }
    }
    Value::Array(responses.iter().map(Envelope::to_value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_request_notification_and_response() {
        let request = Envelope::parse(json!({"jsonrpc":"2.0","id":1,"method":"ping"}))
            .expect("valid request");
        assert_eq!(request.kind(), EnvelopeKind::Request);

        let notification =
            Envelope::parse(json!({"jsonrpc":"2.0","method":"notifications/initialized"}))
                .expect("valid notification");
        assert_eq!(notification.kind(), EnvelopeKind::Notification);

        let response = Envelope::parse(json!({"jsonrpc":"2.0","id":"abc","result":{}}))
            .expect("valid response");
        assert_eq!(response.kind(), EnvelopeKind::Response);
    }

    #[test]
    fn null_id_is_kept_distinct_from_missing_id() {
        let envelope = Envelope::parse(json!({"jsonrpc":"2.0","id":null,"method":"ping"}))
            .expect("null id is allowed");
        assert_eq!(envelope.id, Some(Value::Null));
        assert_eq!(envelope.kind(), EnvelopeKind::Request);
    }

    #[test]
    fn rejects_wrong_version_but_recovers_id() {
        let (id, err) = Envelope::parse(json!({"jsonrpc":"1.0","id":42,"method":"ping"}))
            .expect_err("version must be 2.0");
        assert_eq!(id, Some(json!(42)));
        assert_eq!(err.kind(), "MalformedEnvelope");
    }

    #[test]
    fn rejects_request_carrying_result() {
        let (id, _) = Envelope::parse(json!({"jsonrpc":"2.0","id":7,"method":"ping","result":1}))
            .expect_err("request with result is invalid");
        assert_eq!(id, Some(json!(7)));
    }

    #[test]
    fn rejects_non_object_and_object_ids() {
        assert!(Envelope::parse(json!("ping")).is_err());

        let (id, _) = Envelope::parse(json!({"jsonrpc":"2.0","id":{"x":1},"method":"ping"}))
            .expect_err("object ids are invalid");
        assert_eq!(id, None);
    }

    #[test]
    fn rejects_scalar_params() {
        assert!(Envelope::parse(json!({"jsonrpc":"2.0","id":1,"method":"ping","params":3})).is_err());
    }

    #[test]
    fn error_envelope_serializes_null_id() {
        let value = Envelope::error(None, RpcError::parse_error()).to_value();
        assert_eq!(
            value,
            json!({"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}})
        );
    }

    #[test]
    fn result_echoes_id_verbatim() {
        let value = Envelope::result(Some(json!("req-9")), json!({"ok":true})).to_value();
        assert_eq!(value["id"], "req-9");
        assert_eq!(value["result"]["ok"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn app_errors_map_to_classified_rpc_errors() {
        let rpc = RpcError::from(&AppError::session_not_found("gone"));
        assert_eq!(rpc.code, SESSION_NOT_FOUND);
        assert_eq!(rpc.data, Some(json!({"kind": "SessionNotFound"})));

        let rpc = RpcError::from(&AppError::unparseable("bad json"));
        assert_eq!(rpc.code, PARSE_ERROR);
    }

    #[test]
    fn decode_payload_distinguishes_single_and_batch() {
        assert!(matches!(
            decode_payload(br#"{"jsonrpc":"2.0","method":"x"}"#),
            Ok(Payload::Single(_))
        ));
        assert!(matches!(
            decode_payload(br#"[{"jsonrpc":"2.0","method":"x"}, 3]"#),
            Ok(Payload::Batch(items)) if items.len() == 2
        ));
    }

    #[test]
    fn decode_payload_rejects_garbage_and_empty_batches() {
        let err = decode_payload(b"{not json").expect_err("invalid json");
        assert!(matches!(
            err,
            AppError::MalformedEnvelope {
                parse_error: true,
                ..
            }
        ));

        let err = decode_payload(b"[]").expect_err("empty batch");
        assert!(matches!(
            err,
            AppError::MalformedEnvelope {
                parse_error: false,
                ..
            }
        ));

        assert!(decode_payload(b"12").is_err());
    }

    #[test]
    fn encode_responses_preserves_shape_and_order() {
        let responses = vec![
            Envelope::result(Some(json!(1)), json!("a")),
            Envelope::result(Some(json!(2)), json!("b")),
        ];
        let encoded = encode_responses(&responses, true);
        assert_eq!(encoded[0]["id"], 1);
        assert_eq!(encoded[1]["id"], 2);

        let single = encode_responses(&responses[..1], false);
        assert_eq!(single["id"], 1);
    }
}
