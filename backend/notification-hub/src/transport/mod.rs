/// Session transport
///
/// The outbound edge of the fan-out: `push(session, payload)`. Delivery is
/// fire-and-forget from the dispatcher's perspective; a push either hands the
/// message to the session's outbound buffer or fails immediately.
use crate::models::{NotificationPayload, SessionHandle};
use crate::websocket::WebSocketMessage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Failure of a single session push
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("session {0} has no attached channel")]
    UnknownSession(SessionHandle),

    #[error("session {0} outbound buffer is full")]
    SessionBusy(SessionHandle),

    #[error("session {0} channel is closed")]
    Closed(SessionHandle),

    #[error("push to session {0} timed out after {1:?}")]
    Timeout(SessionHandle, Duration),
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn push(
        &self,
        session: SessionHandle,
        payload: &NotificationPayload,
    ) -> Result<(), PushError>;
}

/// Channel-backed transport
///
/// Each live session owns the receiving half of a bounded channel and drains
/// it onto its socket. A full buffer means the session is not keeping up and
/// the push fails instead of waiting.
#[derive(Clone)]
pub struct ChannelTransport {
    senders: Arc<DashMap<SessionHandle, mpsc::Sender<WebSocketMessage>>>,
    capacity: usize,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open the outbound channel for a session
    ///
    /// Re-attaching replaces the previous sender, closing the old receiver.
    pub fn attach(&self, session: SessionHandle) -> mpsc::Receiver<WebSocketMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.senders.insert(session, tx);
        rx
    }

    pub fn detach(&self, session: SessionHandle) {
        self.senders.remove(&session);
    }

    pub fn attached_count(&self) -> usize {
        self.senders.len()
    }

    /// Queue a raw message for one session
    pub fn send_message(
        &self,
        session: SessionHandle,
        message: WebSocketMessage,
    ) -> Result<(), PushError> {
        let sender = self
            .senders
            .get(&session)
            .map(|entry| entry.value().clone())
            .ok_or(PushError::UnknownSession(session))?;

        sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => PushError::SessionBusy(session),
            TrySendError::Closed(_) => {
                self.senders.remove_if(&session, |_, tx| tx.is_closed());
                PushError::Closed(session)
            }
        })
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    async fn push(
        &self,
        session: SessionHandle,
        payload: &NotificationPayload,
    ) -> Result<(), PushError> {
        self.send_message(session, WebSocketMessage::from(payload))
    }
}
