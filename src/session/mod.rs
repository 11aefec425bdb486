//! Session records and lifecycle
//!
//! A session is server-side state bound to one client connection. The registry
//! owns every live record; handlers only ever hold a [`SessionHandle`] snapshot
//! so that no map lock is held across an await point.

mod channel;
mod registry;

pub use channel::{drain_frames, OutboundChannel, OutboundFrame};
pub use registry::{spawn_session_sweeper, EndReason, SessionRegistry};

use std::{fmt, time::Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::{credential::Credential, errors::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVariant {
    Modern,
    Legacy,
}

impl ProtocolVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modern => "streamable",
            Self::Legacy => "sse",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A closed session is simply absent from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Opening,
    Open,
    Closing,
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub variant: ProtocolVariant,
    pub credential: Credential,
    pub created_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub state: StreamState,
    pub outbound: Option<OutboundChannel>,
    cancel: CancellationToken,
}

impl Session {
    fn new(
        id: String,
        variant: ProtocolVariant,
        credential: Credential,
        outbound: Option<OutboundChannel>,
    ) -> Self {
        let cancel = outbound
            .as_ref()
            .map(OutboundChannel::closed_token)
            .unwrap_or_default();

        Self {
            id,
            variant,
            credential,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            state: if variant == ProtocolVariant::Legacy {
                StreamState::Opening
            } else {
                StreamState::Open
            },
            outbound,
            cancel,
        }
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn close(&mut self) {
        self.state = StreamState::Closing;
        if let Some(outbound) = &self.outbound {
            outbound.close();
        }
        self.cancel.cancel();
    }

    fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            variant: self.variant,
            credential: self.credential.clone(),
            outbound: self.outbound.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    pub variant: ProtocolVariant,
    pub credential: Credential,
    pub outbound: Option<OutboundChannel>,
    pub cancel: CancellationToken,
}

impl SessionHandle {
    pub fn expect_variant(&self, expected: ProtocolVariant, route: &'static str) -> Result<(), AppError> {
        if self.variant == expected {
            return Ok(());
        }

        Err(AppError::ProtocolMismatch {
            session_id: self.id.clone(),
            variant: self.variant,
            route,
        })
    }
}
