/// Connection Registry
///
/// Owns the recipient -> live sessions membership. Every mutation goes through
/// `join`/`leave`; readers only ever receive owned snapshots.
///
/// Invariants:
/// - a session handle is bound to at most one recipient at any instant
/// - a recipient with no sessions has no entry
use crate::error::{AppError, Result};
use crate::models::{RecipientId, SessionHandle};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Default)]
struct Membership {
    /// recipient -> sessions
    sessions: HashMap<RecipientId, HashSet<SessionHandle>>,
    /// session -> owning recipient (reverse index)
    owners: HashMap<SessionHandle, RecipientId>,
    shut_down: bool,
}

/// Thread-safe registry of live sessions.
///
/// Both maps live behind one lock so a join or leave is applied to the forward
/// and reverse index atomically.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Membership>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session` to `recipient`
    ///
    /// Joining an already-present pair is a no-op. Fails with
    /// `InvalidSession` if the session is bound to a different recipient.
    pub async fn join(&self, recipient: RecipientId, session: SessionHandle) -> Result<()> {
        let mut guard = self.inner.write().await;

        if guard.shut_down {
            return Err(AppError::ShuttingDown);
        }

        match guard.owners.get(&session) {
            Some(owner) if *owner == recipient => {
                debug!("Session {} already joined under {}", session, recipient);
                return Ok(());
            }
            Some(owner) => {
                let owner = *owner;
                warn!(
                    "Rejected join: session {} is bound to {}, claimed by {}",
                    session, owner, recipient
                );
                return Err(AppError::InvalidSession {
                    session,
                    owner,
                    claimed_by: recipient,
                });
            }
            None => {}
        }

        guard.owners.insert(session, recipient);
        let sessions = guard.sessions.entry(recipient).or_default();
        sessions.insert(session);

        debug!(
            "Session {} joined recipient {}, live sessions: {}",
            session,
            recipient,
            sessions.len()
        );

        Ok(())
    }

    /// Unbind `session` from `recipient`
    ///
    /// Absent pairs are ignored: disconnect signals can be duplicated or race
    /// with each other.
    pub async fn leave(&self, recipient: RecipientId, session: SessionHandle) {
        let mut guard = self.inner.write().await;

        if guard.owners.get(&session) != Some(&recipient) {
            debug!(
                "Ignoring leave for session {} under {}: not bound there",
                session, recipient
            );
            return;
        }

        guard.owners.remove(&session);

        if let Some(sessions) = guard.sessions.get_mut(&recipient) {
            sessions.remove(&session);
            let remaining = sessions.len();

            debug!(
                "Session {} left recipient {}, remaining: {}",
                session, recipient, remaining
            );

            if remaining == 0 {
                guard.sessions.remove(&recipient);
                debug!("Removed empty entry for recipient {}", recipient);
            }
        }
    }

    /// Point-in-time snapshot of a recipient's live sessions
    pub async fn sessions_for(&self, recipient: RecipientId) -> HashSet<SessionHandle> {
        let guard = self.inner.read().await;
        guard.sessions.get(&recipient).cloned().unwrap_or_default()
    }

    /// Point-in-time snapshot of recipients with at least one live session
    pub async fn all_recipients(&self) -> HashSet<RecipientId> {
        let guard = self.inner.read().await;
        guard.sessions.keys().copied().collect()
    }

    /// Recipient currently owning `session`, if any
    pub async fn owner_of(&self, session: SessionHandle) -> Option<RecipientId> {
        let guard = self.inner.read().await;
        guard.owners.get(&session).copied()
    }

    /// Number of live sessions for a recipient
    pub async fn connection_count(&self, recipient: RecipientId) -> usize {
        let guard = self.inner.read().await;
        guard.sessions.get(&recipient).map(|s| s.len()).unwrap_or(0)
    }

    pub async fn total_sessions(&self) -> usize {
        let guard = self.inner.read().await;
        guard.owners.len()
    }

    pub async fn connected_recipients_count(&self) -> usize {
        let guard = self.inner.read().await;
        guard.sessions.len()
    }

    /// Full membership snapshot taken under a single read lock
    pub async fn snapshot(&self) -> HashMap<RecipientId, HashSet<SessionHandle>> {
        let guard = self.inner.read().await;
        guard.sessions.clone()
    }

    /// Stop accepting joins
    ///
    /// Existing membership stays readable and `leave` keeps working so
    /// sessions can drain during shutdown.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.write().await;
        guard.shut_down = true;
        debug!(
            "Registry shut down with {} live sessions",
            guard.owners.len()
        );
    }

    pub async fn is_shut_down(&self) -> bool {
        self.inner.read().await.shut_down
    }
}
