/// Session Lifecycle Handler
///
/// Translates transport connect/disconnect signals into registry membership.
///
/// Per-session state machine: `Connecting -> Connected -> Disconnected`.
/// `Disconnected` is terminal; a reconnect arrives with a new handle.
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{DisconnectCause, RecipientId, SessionHandle, SessionState};
use crate::registry::ConnectionRegistry;
use crate::transport::ChannelTransport;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_TOMBSTONE_CAPACITY: usize = 10_000;

/// Bounded memory of disconnected handles
///
/// Lets late duplicate signals for a dead session be recognized without
/// keeping every handle ever seen.
struct Tombstones {
    order: VecDeque<SessionHandle>,
    members: HashSet<SessionHandle>,
    capacity: usize,
}

impl Tombstones {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, session: SessionHandle) {
        if !self.members.insert(session) {
            return;
        }
        self.order.push_back(session);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    fn contains(&self, session: &SessionHandle) -> bool {
        self.members.contains(session)
    }
}

struct LifecycleState {
    active: HashMap<SessionHandle, SessionState>,
    retired: Tombstones,
}

#[derive(Clone)]
pub struct SessionLifecycle {
    registry: ConnectionRegistry,
    transport: Option<ChannelTransport>,
    state: Arc<Mutex<LifecycleState>>,
}

impl SessionLifecycle {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self::with_tombstone_capacity(registry, DEFAULT_TOMBSTONE_CAPACITY)
    }

    pub fn with_tombstone_capacity(registry: ConnectionRegistry, capacity: usize) -> Self {
        Self {
            registry,
            transport: None,
            state: Arc::new(Mutex::new(LifecycleState {
                active: HashMap::new(),
                retired: Tombstones::new(capacity),
            })),
        }
    }

    /// Detach the session's outbound channel on disconnect
    pub fn with_transport(mut self, transport: ChannelTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// A transport session was established for `recipient`
    ///
    /// Duplicate signals for a connected session are absorbed. On failure the
    /// session is retired and the connect must be aborted by the caller.
    pub async fn on_connect(&self, session: SessionHandle, recipient: RecipientId) -> Result<()> {
        {
            let mut state = self.state.lock().await;

            if state.retired.contains(&session) {
                warn!(
                    "Rejected connect for retired session {} (recipient {})",
                    session, recipient
                );
                return Err(AppError::SessionRetired(session));
            }

            match state.active.get(&session) {
                Some(SessionState::Connected) | Some(SessionState::Connecting) => {
                    debug!("Duplicate connect for session {}", session);
                }
                _ => {
                    state.active.insert(session, SessionState::Connecting);
                }
            }
        }

        // Registry join is idempotent for the same pair, so a duplicate connect
        // still resolves to the same membership.
        match self.registry.join(recipient, session).await {
            Ok(()) => {
                let mut state = self.state.lock().await;
                if state.retired.contains(&session) {
                    // Disconnect raced ahead of the join completing.
                    drop(state);
                    self.registry.leave(recipient, session).await;
                    return Err(AppError::SessionRetired(session));
                }
                let previous = state.active.insert(session, SessionState::Connected);
                if previous != Some(SessionState::Connected) {
                    metrics::session_connected();
                    info!("Session {} connected for recipient {}", session, recipient);
                }
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                // A failed duplicate must not tear down an already connected session.
                if state.active.get(&session) == Some(&SessionState::Connecting) {
                    state.active.remove(&session);
                    state.retired.insert(session);
                }
                warn!("Connect aborted for session {}: {}", session, e);
                Err(e)
            }
        }
    }

    /// A transport session ended
    ///
    /// Always removes membership immediately, whatever the cause. Repeated
    /// signals are no-ops. Membership is removed under the session's actual
    /// owner, even when the signal names another recipient.
    pub async fn on_disconnect(
        &self,
        session: SessionHandle,
        recipient: RecipientId,
        cause: DisconnectCause,
    ) {
        let owner = match self.registry.owner_of(session).await {
            Some(owner) if owner != recipient => {
                warn!(
                    "Disconnect for session {} names {}, but it is bound to {}",
                    session, recipient, owner
                );
                owner
            }
            _ => recipient,
        };
        self.registry.leave(owner, session).await;

        if let Some(transport) = &self.transport {
            transport.detach(session);
        }

        let mut state = self.state.lock().await;
        let previous = state.active.remove(&session);
        state.retired.insert(session);
        drop(state);

        match previous {
            Some(SessionState::Connected) => {
                metrics::session_disconnected();
                info!(
                    "Session {} disconnected for recipient {} ({})",
                    session,
                    recipient,
                    cause.as_str()
                );
            }
            Some(_) => {
                debug!("Session {} disconnected before connect completed", session);
            }
            None => {
                debug!("Duplicate disconnect for session {}", session);
            }
        }

        if let DisconnectCause::Error(reason) = &cause {
            debug!("Session {} error detail: {}", session, reason);
        }
    }

    /// Current lifecycle state, `None` for handles never seen (or long forgotten)
    pub async fn state_of(&self, session: SessionHandle) -> Option<SessionState> {
        let state = self.state.lock().await;
        if let Some(s) = state.active.get(&session) {
            return Some(*s);
        }
        if state.retired.contains(&session) {
            return Some(SessionState::Disconnected);
        }
        None
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}
