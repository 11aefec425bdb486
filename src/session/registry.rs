//! In-memory session registry
//!
//! The only shared mutable structure in the server. `DashMap` shards give
//! per-id serialization of create/touch/destroy while unrelated sessions
//! proceed in parallel.

use std::{fmt, sync::Arc, time::Duration};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{OutboundChannel, OutboundFrame, ProtocolVariant, Session, SessionHandle, StreamState};
use crate::{credential::Credential, errors::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Teardown,
    Disconnect,
    Idle,
    WriteFailure,
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Teardown => "teardown",
            Self::Disconnect => "disconnect",
            Self::Idle => "idle",
            Self::WriteFailure => "write_failure",
            Self::Shutdown => "shutdown",
        })
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn create_modern(&self, credential: Credential) -> SessionHandle {
        let id = mint_session_id();
        self.insert(Session::new(id, ProtocolVariant::Modern, credential, None))
    }

    pub fn create_legacy(
        &self,
        credential: Credential,
        capacity: usize,
    ) -> (SessionHandle, mpsc::Receiver<OutboundFrame>) {
        let id = mint_session_id();
        let (outbound, rx) = OutboundChannel::new(id.clone(), capacity);
        let handle = self.insert(Session::new(
            id,
            ProtocolVariant::Legacy,
            credential,
            Some(outbound),
        ));
        (handle, rx)
    }

    fn insert(&self, session: Session) -> SessionHandle {
        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => {
                error!(session_id = %session.id, "session id collision");
                panic!("session id collision: {}", session.id);
            }
            Entry::Vacant(vacant) => {
                let handle = session.handle();
                vacant.insert(session);
                info!(
                    session_id = %handle.id,
                    variant = %handle.variant,
                    "session created"
                );
                handle
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<SessionHandle, AppError> {
        self.sessions
            .get(id)
            .map(|session| session.handle())
            .ok_or_else(|| AppError::session_not_found(id))
    }

    pub fn touch(&self, id: &str) -> Result<SessionHandle, AppError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| AppError::session_not_found(id))?;
        session.touch();
        Ok(session.handle())
    }

    pub fn mark_open(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            if session.state == StreamState::Opening {
                session.state = StreamState::Open;
                debug!(session_id = %id, "stream open");
            }
        }
    }

    pub fn state(&self, id: &str) -> Option<StreamState> {
        self.sessions.get(id).map(|session| session.state)
    }

    // Close and remove happen under one entry lock.
    pub fn destroy(&self, id: &str, reason: EndReason) -> bool {
        let Entry::Occupied(mut entry) = self.sessions.entry(id.to_string()) else {
            return false;
        };

        entry.get_mut().close();
        let (_, session) = entry.remove_entry();
        info!(
            session_id = %id,
            variant = %session.variant,
            reason = %reason,
            age_secs = (chrono::Utc::now() - session.created_at).num_seconds(),
            "session destroyed"
        );
        true
    }

    pub fn sweep(&self, max_idle: Duration) -> usize {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_duration() > max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in candidates {
            // Re-check under the entry lock: a touch may have raced the scan.
            let Entry::Occupied(mut entry) = self.sessions.entry(id) else {
                continue;
            };
            if entry.get().idle_duration() <= max_idle {
                continue;
            }
            entry.get_mut().close();
            let (id, session) = entry.remove_entry();
            info!(
                session_id = %id,
                variant = %session.variant,
                reason = %EndReason::Idle,
                "session destroyed"
            );
            evicted += 1;
        }

        if evicted > 0 {
            info!(
                evicted,
                remaining = self.sessions.len(),
                "idle session sweep completed"
            );
        }

        evicted
    }

    pub fn close_all(&self, reason: EndReason) -> usize {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter().filter(|id| self.destroy(id, reason)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn count(&self, variant: ProtocolVariant) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().variant == variant)
            .count()
    }
}

fn mint_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn spawn_session_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_idle: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("session sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    registry.sweep(max_idle);
                }
            }
        }
    })
}
