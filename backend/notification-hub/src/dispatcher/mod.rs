/// Dispatcher
///
/// Routes a payload to the live sessions of the selected recipients.
///
/// Recipients are resolved first, then each recipient's sessions are
/// snapshotted right before its pushes start. A session that joins after that
/// snapshot misses this push; the durable record covers it on next fetch.
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::{DeliveryOutcome, DeliveryTarget, NotificationPayload, RecipientId, SessionHandle};
use crate::registry::ConnectionRegistry;
use crate::store::NotificationStore;
use crate::transport::{PushError, SessionTransport};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound for one detached `mark_delivered` call
pub const MARK_DELIVERED_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    registry: ConnectionRegistry,
    transport: Arc<dyn SessionTransport>,
    store: Option<Arc<dyn NotificationStore>>,
    push_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: ConnectionRegistry, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            registry,
            transport,
            store: None,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }

    /// Attach the store used for the `mark_delivered` bookkeeping hook
    pub fn with_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_push_timeout(mut self, push_timeout: Duration) -> Self {
        self.push_timeout = push_timeout;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Deliver one payload to every live session of the target's recipients
    pub async fn deliver(
        &self,
        target: DeliveryTarget,
        payload: NotificationPayload,
    ) -> Result<DeliveryOutcome> {
        if self.registry.is_shut_down().await {
            return Err(AppError::ShuttingDown);
        }

        let kind = target.kind();
        let recipients = self.resolve(target).await;

        let outcomes = join_all(
            recipients
                .into_iter()
                .map(|recipient| self.deliver_to_recipient(recipient, &payload)),
        )
        .await;

        Ok(self.summarize(kind, outcomes))
    }

    /// Deliver a distinct payload to each recipient
    ///
    /// Used when every recipient has its own durable record. `kind` is the
    /// target kind the recipients were resolved from, for metrics.
    pub async fn deliver_each(
        &self,
        kind: &'static str,
        deliveries: Vec<(RecipientId, NotificationPayload)>,
    ) -> Result<DeliveryOutcome> {
        if self.registry.is_shut_down().await {
            return Err(AppError::ShuttingDown);
        }

        let mut seen = HashSet::new();
        let outcomes = join_all(
            deliveries
                .iter()
                .filter(|(recipient, _)| seen.insert(*recipient))
                .map(|(recipient, payload)| self.deliver_to_recipient(*recipient, payload)),
        )
        .await;

        Ok(self.summarize(kind, outcomes))
    }

    async fn resolve(&self, target: DeliveryTarget) -> HashSet<RecipientId> {
        match target {
            DeliveryTarget::Single { recipient_id } => HashSet::from([recipient_id]),
            DeliveryTarget::Multiple { recipient_ids } => recipient_ids,
            DeliveryTarget::Broadcast => self.registry.all_recipients().await,
        }
    }

    async fn deliver_to_recipient(
        &self,
        recipient: RecipientId,
        payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        let sessions = self.registry.sessions_for(recipient).await;

        if sessions.is_empty() {
            debug!("Recipient {} has no live sessions", recipient);
            return DeliveryOutcome {
                unreachable: 1,
                ..Default::default()
            };
        }

        let results = join_all(
            sessions
                .iter()
                .map(|session| self.push_one(*session, payload)),
        )
        .await;

        let mut outcome = DeliveryOutcome::default();
        for result in results {
            match result {
                Ok(()) => outcome.pushed += 1,
                Err(e) => {
                    warn!("Push to recipient {} failed: {}", recipient, e);
                    outcome.push_failures += 1;
                }
            }
        }

        if outcome.pushed > 0 {
            outcome.reachable = 1;
            self.record_delivery(recipient, payload);
        }

        outcome
    }

    /// Push to one session, bounded by the push timeout
    async fn push_one(
        &self,
        session: SessionHandle,
        payload: &NotificationPayload,
    ) -> std::result::Result<(), PushError> {
        match tokio::time::timeout(self.push_timeout, self.transport.push(session, payload)).await {
            Ok(result) => result,
            Err(_) => Err(PushError::Timeout(session, self.push_timeout)),
        }
    }

    /// Fire the `mark_delivered` hook without holding up the delivery
    fn record_delivery(&self, recipient: RecipientId, payload: &NotificationPayload) {
        let (Some(store), Some(id)) = (&self.store, payload.notification_id) else {
            return;
        };
        let store = store.clone();

        tokio::spawn(async move {
            match tokio::time::timeout(MARK_DELIVERED_TIMEOUT, store.mark_delivered(id, recipient))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(
                    "mark_delivered for notification {} / {} failed: {}",
                    id, recipient, e
                ),
                Err(_) => debug!(
                    "mark_delivered for notification {} / {} timed out",
                    id, recipient
                ),
            }
        });
    }

    fn summarize(&self, kind: &str, outcomes: Vec<DeliveryOutcome>) -> DeliveryOutcome {
        let mut total = DeliveryOutcome::default();
        for outcome in outcomes {
            total.merge(outcome);
        }

        metrics::observe_delivery(kind, &total);
        info!(
            target_kind = kind,
            reachable = total.reachable,
            unreachable = total.unreachable,
            push_failures = total.push_failures,
            "Delivery complete"
        );

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationType;
    use crate::store::InMemoryNotificationStore;
    use crate::transport::ChannelTransport;
    use crate::websocket::WebSocketMessage;
    use async_trait::async_trait;

    fn payload(title: &str) -> NotificationPayload {
        NotificationPayload::transient(NotificationType::System, title, "")
    }

    fn setup() -> (ConnectionRegistry, ChannelTransport, Dispatcher) {
        let registry = ConnectionRegistry::new();
        let transport = ChannelTransport::new(8);
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(transport.clone()));
        (registry, transport, dispatcher)
    }

    fn title_of(msg: WebSocketMessage) -> String {
        match msg {
            WebSocketMessage::Notification { title, .. } => title,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_reaches_every_session() {
        let (registry, transport, dispatcher) = setup();
        let recipient = RecipientId::new();
        let s1 = SessionHandle::new();
        let s2 = SessionHandle::new();
        let mut rx1 = transport.attach(s1);
        let mut rx2 = transport.attach(s2);
        registry.join(recipient, s1).await.unwrap();
        registry.join(recipient, s2).await.unwrap();

        let outcome = dispatcher
            .deliver(DeliveryTarget::single(recipient), payload("hi"))
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 1);
        assert_eq!(outcome.unreachable, 0);
        assert_eq!(outcome.pushed, 2);
        assert_eq!(title_of(rx1.recv().await.unwrap()), "hi");
        assert_eq!(title_of(rx2.recv().await.unwrap()), "hi");
    }

    #[tokio::test]
    async fn test_single_offline_recipient() {
        let (_registry, transport, dispatcher) = setup();

        let outcome = dispatcher
            .deliver(DeliveryTarget::single(RecipientId::new()), payload("hi"))
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 0);
        assert_eq!(outcome.unreachable, 1);
        assert_eq!(outcome.pushed, 0);
        assert_eq!(transport.attached_count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_counts_offline_separately() {
        let (registry, transport, dispatcher) = setup();
        let online = RecipientId::new();
        let offline = RecipientId::new();
        let session = SessionHandle::new();
        let _rx = transport.attach(session);
        registry.join(online, session).await.unwrap();

        let outcome = dispatcher
            .deliver(DeliveryTarget::multiple([online, offline, online]), payload("x"))
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 1);
        assert_eq!(outcome.unreachable, 1);
    }

    #[tokio::test]
    async fn test_broadcast_only_connected() {
        let (registry, transport, dispatcher) = setup();
        let a = RecipientId::new();
        let b = RecipientId::new();
        let c = RecipientId::new();
        let (sa, sb, sc) = (SessionHandle::new(), SessionHandle::new(), SessionHandle::new());
        let mut rxa = transport.attach(sa);
        let mut rxb = transport.attach(sb);
        let mut rxc = transport.attach(sc);
        registry.join(a, sa).await.unwrap();
        registry.join(b, sb).await.unwrap();
        registry.join(c, sc).await.unwrap();
        registry.leave(c, sc).await;

        let outcome = dispatcher
            .deliver(DeliveryTarget::Broadcast, payload("all"))
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 2);
        assert_eq!(outcome.unreachable, 0);
        assert!(rxa.try_recv().is_ok());
        assert!(rxb.try_recv().is_ok());
        assert!(rxc.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_session_isolated() {
        let (registry, transport, dispatcher) = setup();
        let recipient = RecipientId::new();
        let live = SessionHandle::new();
        let dead = SessionHandle::new();
        let mut rx_live = transport.attach(live);
        drop(transport.attach(dead));
        registry.join(recipient, live).await.unwrap();
        registry.join(recipient, dead).await.unwrap();

        let outcome = dispatcher
            .deliver(DeliveryTarget::single(recipient), payload("y"))
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 1);
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.push_failures, 1);
        assert!(rx_live.try_recv().is_ok());
    }

    struct HangingTransport {
        hung: SessionHandle,
        inner: ChannelTransport,
    }

    #[async_trait]
    impl SessionTransport for HangingTransport {
        async fn push(
            &self,
            session: SessionHandle,
            payload: &NotificationPayload,
        ) -> std::result::Result<(), PushError> {
            if session == self.hung {
                futures::future::pending::<()>().await;
            }
            self.inner.push(session, payload).await
        }
    }

    #[tokio::test]
    async fn test_hung_session_times_out_without_blocking_others() {
        let registry = ConnectionRegistry::new();
        let inner = ChannelTransport::new(8);
        let hung = SessionHandle::new();
        let healthy = SessionHandle::new();
        let mut rx = inner.attach(healthy);
        let transport = Arc::new(HangingTransport { hung, inner });
        let dispatcher = Dispatcher::new(registry.clone(), transport)
            .with_push_timeout(Duration::from_millis(50));

        let slow_user = RecipientId::new();
        let fast_user = RecipientId::new();
        registry.join(slow_user, hung).await.unwrap();
        registry.join(fast_user, healthy).await.unwrap();

        let started = std::time::Instant::now();
        let outcome = dispatcher
            .deliver(DeliveryTarget::Broadcast, payload("z"))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(outcome.reachable, 1);
        assert_eq!(outcome.push_failures, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_mark_delivered_for_reached_recipient() {
        let registry = ConnectionRegistry::new();
        let transport = ChannelTransport::new(8);
        let store = InMemoryNotificationStore::new();
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(transport.clone()))
            .with_store(Arc::new(store.clone()));

        let recipient = RecipientId::new();
        let session = SessionHandle::new();
        let _rx = transport.attach(session);
        registry.join(recipient, session).await.unwrap();

        let record = crate::models::NotificationDraft::new(NotificationType::System, "t", "b")
            .record_for(recipient);
        store.persist(&record).await.unwrap();

        dispatcher
            .deliver(
                DeliveryTarget::single(recipient),
                NotificationPayload::from(&record),
            )
            .await
            .unwrap();

        assert!(
            store
                .wait_until_delivered(record.id, recipient, Duration::from_secs(1))
                .await
        );
    }

    struct HangingStore;

    #[async_trait]
    impl NotificationStore for HangingStore {
        async fn persist(
            &self,
            record: &crate::models::NotificationRecord,
        ) -> Result<crate::models::NotificationId> {
            Ok(record.id)
        }

        async fn mark_delivered(
            &self,
            _id: crate::models::NotificationId,
            _recipient: RecipientId,
        ) -> Result<()> {
            futures::future::pending::<()>().await;
            Ok(())
        }

        async fn list_unread(
            &self,
            _recipient: RecipientId,
            _limit: usize,
        ) -> Result<Vec<crate::models::NotificationRecord>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_hung_store_does_not_block_delivery() {
        let registry = ConnectionRegistry::new();
        let transport = ChannelTransport::new(8);
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(transport.clone()))
            .with_store(Arc::new(HangingStore));

        let recipient = RecipientId::new();
        let session = SessionHandle::new();
        let mut rx = transport.attach(session);
        registry.join(recipient, session).await.unwrap();

        let record = crate::models::NotificationDraft::new(NotificationType::System, "t", "b")
            .record_for(recipient);

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            dispatcher.deliver(
                DeliveryTarget::single(recipient),
                NotificationPayload::from(&record),
            ),
        )
        .await
        .expect("deliver waited on mark_delivered")
        .unwrap();

        assert_eq!(outcome.reachable, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_deliver_each_uses_own_payload() {
        let (registry, transport, dispatcher) = setup();
        let a = RecipientId::new();
        let b = RecipientId::new();
        let (sa, sb) = (SessionHandle::new(), SessionHandle::new());
        let mut rxa = transport.attach(sa);
        let mut rxb = transport.attach(sb);
        registry.join(a, sa).await.unwrap();
        registry.join(b, sb).await.unwrap();

        let outcome = dispatcher
            .deliver_each("multiple", vec![(a, payload("for a")), (b, payload("for b"))])
            .await
            .unwrap();

        assert_eq!(outcome.reachable, 2);
        assert_eq!(title_of(rxa.recv().await.unwrap()), "for a");
        assert_eq!(title_of(rxb.recv().await.unwrap()), "for b");
    }

    #[tokio::test]
    async fn test_deliver_after_shutdown() {
        let (registry, _transport, dispatcher) = setup();
        registry.shutdown().await;

        let result = dispatcher
            .deliver(DeliveryTarget::Broadcast, payload("late"))
            .await;
        assert!(matches!(result, Err(AppError::ShuttingDown)));
    }
}
