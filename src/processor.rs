use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    credential::Credential,
    errors::AppError,
    mcp::rpc::{Envelope, RpcError},
    session::{OutboundChannel, ProtocolVariant},
};

#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn handle(&self, request: Envelope, ctx: RequestContext) -> Result<Value, RpcError>;

    async fn notify(&self, _notification: Envelope, _ctx: RequestContext) {}

    async fn receive_response(&self, _response: Envelope, _ctx: RequestContext) {}
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session_id: Option<String>,
    pub variant: ProtocolVariant,
    pub credential: Credential,
    pub notifier: Notifier,
    // Fires when the session is destroyed or the client goes away.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
pub struct Notifier {
    channel: Option<OutboundChannel>,
}

impl Notifier {
    pub fn new(channel: OutboundChannel) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    pub fn discard() -> Self {
        Self::default()
    }

    pub fn can_push(&self) -> bool {
        self.channel
            .as_ref()
            .is_some_and(|channel| !channel.is_closed())
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), AppError> {
        match &self.channel {
            Some(channel) => {
                channel
                    .push_envelope(Envelope::notification(method, params))
                    .await
            }
            None => {
                debug!(method = %method, "no push channel for exchange, notification dropped");
                Ok(())
            }
        }
    }
}
