use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    credential::Credential,
    errors::AppError,
    mcp::rpc::{Envelope, EnvelopeKind},
    processor::{MessageProcessor, Notifier, RequestContext},
    session::{ProtocolVariant, SessionHandle},
};

#[derive(Debug, Clone)]
pub struct Exchange {
    pub session_id: Option<String>,
    pub variant: ProtocolVariant,
    pub credential: Credential,
    pub notifier: Notifier,
    pub cancel: CancellationToken,
}

impl Exchange {
    pub fn for_session(session: &SessionHandle, notifier: Notifier, cancel: CancellationToken) -> Self {
        Self {
            session_id: Some(session.id.clone()),
            variant: session.variant,
            credential: session.credential.clone(),
            notifier,
            cancel,
        }
    }

    pub fn stateless(credential: Credential, notifier: Notifier, cancel: CancellationToken) -> Self {
        Self {
            session_id: None,
            variant: ProtocolVariant::Modern,
            credential,
            notifier,
            cancel,
        }
    }

    fn context(&self) -> RequestContext {
        RequestContext {
            session_id: self.session_id.clone(),
            variant: self.variant,
            credential: self.credential.clone(),
            notifier: self.notifier.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

pub async fn process_batch(
    processor: &dyn MessageProcessor,
    exchange: &Exchange,
    items: Vec<Value>,
) -> Vec<Envelope> {
    join_all(
        items
            .into_iter()
            .map(|item| process_value(processor, exchange, item)),
    )
    .await
    .into_iter()
    .flatten()
    .collect()
}

pub async fn process_value(
    processor: &dyn MessageProcessor,
    exchange: &Exchange,
    value: Value,
) -> Option<Envelope> {
    match Envelope::parse(value) {
        Ok(envelope) => process_envelope(processor, exchange, envelope).await,
        Err((id, err)) => Some(Envelope::from_app_error(id, &err)),
    }
}

pub async fn process_envelope(
    processor: &dyn MessageProcessor,
    exchange: &Exchange,
    envelope: Envelope,
) -> Option<Envelope> {
    match envelope.kind() {
        EnvelopeKind::Request => {
            let id = envelope.id.clone();
            let method = envelope.method_name().to_string();
            let outcome = tokio::select! {
                biased;
                _ = exchange.cancel.cancelled() => {
                    warn!(
                        session_id = exchange.session_id.as_deref().unwrap_or("-"),
                        method = %method,
                        "request cancelled before completion"
                    );
                    return Some(Envelope::from_app_error(id, &AppError::Cancelled));
                }
                outcome = processor.handle(envelope, exchange.context()) => outcome,
            };

            Some(match outcome {
                Ok(result) => Envelope::result(id, result),
                Err(error) => Envelope::error(id, error),
            })
        }
        EnvelopeKind::Notification => {
            processor.notify(envelope, exchange.context()).await;
            None
        }
        EnvelopeKind::Response => {
            debug!(
                session_id = exchange.session_id.as_deref().unwrap_or("-"),
                "client response forwarded"
            );
            processor.receive_response(envelope, exchange.context()).await;
            None
        }
    }
}

pub fn expects_response(items: &[Value]) -> bool {
    items.iter().any(|item| {
        !item.is_object() || (item.get("id").is_some() && item.get("method").is_some())
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::mcp::rpc::RpcError;

    struct Echo;

    #[async_trait]
    impl MessageProcessor for Echo {
        async fn handle(&self, request: Envelope, _ctx: RequestContext) -> Result<Value, RpcError> {
            let delay = request
                .params
                .as_ref()
                .and_then(|params| params["delay_ms"].as_u64())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let method = request.method_name().to_string();
            match method.as_str() {
                "fail" => Err(RpcError::invalid_params()),
                "hang" => std::future::pending().await,
                _ => Ok(request.params.unwrap_or(Value::Null)),
            }
        }
    }

    fn exchange() -> Exchange {
        Exchange::stateless(Credential::new("t"), Notifier::discard(), CancellationToken::new())
    }

    #[tokio::test]
    async fn batch_responses_follow_submission_order() {
        let processor = Arc::new(Echo);
        let items = vec![
            json!({"jsonrpc":"2.0","id":1,"method":"echo","params":{"delay_ms":40}}),
            json!({"jsonrpc":"2.0","method":"notifications/progress"}),
            json!({"jsonrpc":"2.0","id":2,"method":"echo","params":{"delay_ms":0}}),
            json!({"jsonrpc":"2.0","id":3,"method":"fail"}),
        ];

        let responses = process_batch(processor.as_ref(), &exchange(), items).await;
        let ids: Vec<Value> = responses.iter().filter_map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        assert!(responses[2].error.is_some());
    }

    #[tokio::test]
    async fn invalid_items_get_individual_errors() {
        let responses = process_batch(
            &Echo,
            &exchange(),
            vec![json!(5), json!({"jsonrpc":"2.0","id":"x","method":""})],
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, Some(Value::Null));
        assert_eq!(responses[1].id, Some(json!("x")));
        assert_eq!(
            responses[1].error.as_ref().map(|error| error.code),
            Some(crate::mcp::rpc::INVALID_REQUEST)
        );
    }

    #[tokio::test]
    async fn cancellation_resolves_request_as_cancelled() {
        let exchange = exchange();
        let cancel = exchange.cancel.clone();
        let pending = tokio::spawn(async move {
            process_envelope(
                &Echo,
                &exchange,
                Envelope::request(json!(9), "hang", None),
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let response = pending
            .await
            .expect("task joins")
            .expect("request gets a response");
        assert_eq!(response.id, Some(json!(9)));
        assert_eq!(
            response.error.map(|error| error.code),
            Some(crate::mcp::rpc::REQUEST_CANCELLED)
        );
    }

    #[test]
    fn expects_response_only_for_requests_or_garbage() {
        assert!(!expects_response(&[json!({"jsonrpc":"2.0","method":"n"})]));
        assert!(expects_response(&[json!({"jsonrpc":"2.0","id":1,"method":"r"})]));
        assert!(expects_response(&[json!(3)]));
    }
}
