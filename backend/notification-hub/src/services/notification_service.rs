/// Notification publishing flow
///
/// Domain services (assignments, submissions, reviews, course announcements)
/// hand a draft and a target to `publish`:
/// 1. one durable record is built per recipient and persisted
/// 2. if any write fails, nothing is pushed and `PersistenceUnavailable` is returned
/// 3. each recipient's live sessions receive a payload carrying its own record id
use crate::dispatcher::Dispatcher;
use crate::error::{AppError, Result};
use crate::models::{
    DeliveryOutcome, DeliveryTarget, NotificationDraft, NotificationId, NotificationPayload,
    NotificationRecord, RecipientId,
};
use crate::store::NotificationStore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Result of a publish call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishReport {
    pub notification_ids: Vec<NotificationId>,
    pub outcome: DeliveryOutcome,
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Persist then deliver a notification
    ///
    /// `Broadcast` is resolved against the recipients connected right now;
    /// each of them gets a record, then exactly those recipients are targeted.
    pub async fn publish(
        &self,
        draft: NotificationDraft,
        target: DeliveryTarget,
    ) -> Result<PublishReport> {
        // Nothing is persisted once shutdown began
        if self.dispatcher.registry().is_shut_down().await {
            return Err(AppError::ShuttingDown);
        }

        let kind = target.kind();
        let recipients: Vec<RecipientId> = match target {
            DeliveryTarget::Single { recipient_id } => vec![recipient_id],
            DeliveryTarget::Multiple { recipient_ids } => {
                let mut ids: Vec<RecipientId> = recipient_ids.into_iter().collect();
                ids.sort();
                ids
            }
            DeliveryTarget::Broadcast => {
                let mut ids: Vec<RecipientId> =
                    self.dispatcher.registry().all_recipients().await.into_iter().collect();
                ids.sort();
                ids
            }
        };

        if recipients.is_empty() {
            return Ok(PublishReport {
                notification_ids: Vec::new(),
                outcome: DeliveryOutcome::default(),
            });
        }

        let records: Vec<NotificationRecord> =
            recipients.iter().map(|r| draft.record_for(*r)).collect();

        let notification_ids = self.persist_all(&records).await?;

        let deliveries = records
            .iter()
            .map(|record| (record.recipient_id, NotificationPayload::from(record)))
            .collect();
        let outcome = self.dispatcher.deliver_each(kind, deliveries).await?;

        info!(
            "Published {} notification(s) of type {}: reachable={}, unreachable={}",
            notification_ids.len(),
            draft.notification_type.as_str(),
            outcome.reachable,
            outcome.unreachable
        );

        Ok(PublishReport {
            notification_ids,
            outcome,
        })
    }

    /// Unread notifications for a recipient, newest first
    pub async fn unread_for(
        &self,
        recipient: RecipientId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        self.store.list_unread(recipient, limit).await
    }

    async fn persist_all(&self, records: &[NotificationRecord]) -> Result<Vec<NotificationId>> {
        let results = join_all(records.iter().map(|r| self.store.persist(r))).await;

        let mut ids = Vec::with_capacity(results.len());
        let mut failures = HashSet::new();
        for result in results {
            match result {
                Ok(id) => ids.push(id),
                Err(e) => {
                    failures.insert(e.to_string());
                }
            }
        }

        if !failures.is_empty() {
            let reason = failures.into_iter().collect::<Vec<_>>().join("; ");
            error!(
                "Persisting notification failed for {} of {} recipient(s): {}",
                records.len() - ids.len(),
                records.len(),
                reason
            );
            return Err(AppError::PersistenceUnavailable(reason));
        }

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationType, SessionHandle};
    use crate::registry::ConnectionRegistry;
    use crate::store::InMemoryNotificationStore;
    use crate::transport::ChannelTransport;

    struct Harness {
        registry: ConnectionRegistry,
        transport: ChannelTransport,
        store: InMemoryNotificationStore,
        service: NotificationService,
    }

    fn harness() -> Harness {
        let registry = ConnectionRegistry::new();
        let transport = ChannelTransport::new(8);
        let store = InMemoryNotificationStore::new();
        let dispatcher = Arc::new(
            Dispatcher::new(registry.clone(), Arc::new(transport.clone()))
                .with_store(Arc::new(store.clone())),
        );
        let service = NotificationService::new(Arc::new(store.clone()), dispatcher);
        Harness {
            registry,
            transport,
            store,
            service,
        }
    }

    fn draft() -> NotificationDraft {
        NotificationDraft::new(
            NotificationType::ReviewCompleted,
            "Review completed",
            "Your submission has been reviewed",
        )
    }

    #[tokio::test]
    async fn test_publish_persists_then_delivers() {
        let h = harness();
        let recipient = RecipientId::new();
        let session = SessionHandle::new();
        let mut rx = h.transport.attach(session);
        h.registry.join(recipient, session).await.unwrap();

        let report = h
            .service
            .publish(draft(), DeliveryTarget::single(recipient))
            .await
            .unwrap();

        assert_eq!(report.notification_ids.len(), 1);
        assert_eq!(report.outcome.reachable, 1);
        assert_eq!(h.store.records().await.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(
            h.store
                .wait_until_delivered(
                    report.notification_ids[0],
                    recipient,
                    std::time::Duration::from_secs(1)
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_publish_labels_delivery_with_target_kind() {
        let h = harness();
        let recipient = RecipientId::new();
        let session = SessionHandle::new();
        let _rx = h.transport.attach(session);
        h.registry.join(recipient, session).await.unwrap();

        let single_before = crate::metrics::deliveries_count("single");
        let broadcast_before = crate::metrics::deliveries_count("broadcast");

        h.service
            .publish(draft(), DeliveryTarget::single(recipient))
            .await
            .unwrap();
        h.service
            .publish(draft(), DeliveryTarget::Broadcast)
            .await
            .unwrap();

        assert!(crate::metrics::deliveries_count("single") > single_before);
        assert!(crate::metrics::deliveries_count("broadcast") > broadcast_before);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_persists_nothing() {
        let h = harness();
        h.registry.shutdown().await;

        let result = h
            .service
            .publish(draft(), DeliveryTarget::single(RecipientId::new()))
            .await;

        assert!(matches!(result, Err(AppError::ShuttingDown)));
        assert!(h.store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_blocks_delivery() {
        let h = harness();
        let recipient = RecipientId::new();
        let session = SessionHandle::new();
        let mut rx = h.transport.attach(session);
        h.registry.join(recipient, session).await.unwrap();
        h.store.set_available(false);

        let result = h
            .service
            .publish(draft(), DeliveryTarget::single(recipient))
            .await;

        assert!(matches!(result, Err(AppError::PersistenceUnavailable(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_recipient_still_gets_record() {
        let h = harness();
        let offline = RecipientId::new();

        let report = h
            .service
            .publish(draft(), DeliveryTarget::single(offline))
            .await
            .unwrap();

        assert_eq!(report.outcome.unreachable, 1);
        let unread = h.service.unread_for(offline, 10).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, report.notification_ids[0]);
    }

    #[tokio::test]
    async fn test_multiple_creates_record_per_recipient() {
        let h = harness();
        let recipients: Vec<RecipientId> = (0..3).map(|_| RecipientId::new()).collect();

        let report = h
            .service
            .publish(draft(), DeliveryTarget::multiple(recipients.clone()))
            .await
            .unwrap();

        assert_eq!(report.notification_ids.len(), 3);
        assert_eq!(report.outcome.unreachable, 3);
        let stored: HashSet<RecipientId> = h
            .store
            .records()
            .await
            .iter()
            .map(|r| r.recipient_id)
            .collect();
        assert_eq!(stored, recipients.into_iter().collect());
    }

    #[tokio::test]
    async fn test_broadcast_records_connected_recipients_only() {
        let h = harness();
        let online = RecipientId::new();
        let session = SessionHandle::new();
        let _rx = h.transport.attach(session);
        h.registry.join(online, session).await.unwrap();

        let report = h
            .service
            .publish(draft(), DeliveryTarget::Broadcast)
            .await
            .unwrap();

        assert_eq!(report.notification_ids.len(), 1);
        assert_eq!(report.outcome.reachable, 1);
        assert_eq!(h.store.records().await[0].recipient_id, online);
    }

    #[tokio::test]
    async fn test_broadcast_with_nobody_connected() {
        let h = harness();

        let report = h
            .service
            .publish(draft(), DeliveryTarget::Broadcast)
            .await
            .unwrap();

        assert!(report.notification_ids.is_empty());
        assert_eq!(report.outcome, DeliveryOutcome::default());
    }
}
