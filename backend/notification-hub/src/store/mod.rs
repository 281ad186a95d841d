/// Notification Store Gateway
///
/// Boundary to the persistence collaborator. The fan-out core records a
/// notification here before dispatching it, so recipients that were offline
/// can fetch it later through `list_unread`.
use crate::error::{AppError, Result};
use crate::models::{
    Correlation, CorrelationKind, NotificationId, NotificationRecord, NotificationType, RecipientId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Durably record a notification
    async fn persist(&self, record: &NotificationRecord) -> Result<NotificationId>;

    /// Bookkeeping hook after a successful live push. Informational only.
    async fn mark_delivered(&self, id: NotificationId, recipient: RecipientId) -> Result<()>;

    /// Newest-first unread notifications for a recipient
    async fn list_unread(
        &self,
        recipient: RecipientId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>>;
}

/// Postgres-backed store
pub struct PgNotificationStore {
    db: PgPool,
}

impl PgNotificationStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> NotificationRecord {
        let notification_type: String = row.get("notification_type");
        let object_type: Option<String> = row.get("object_type");
        let object_id: Option<Uuid> = row.get("object_id");
        let recipient_id: Uuid = row.get("recipient_id");
        let sender_id: Option<Uuid> = row.get("sender_id");

        let correlation = match (object_type.as_deref().and_then(CorrelationKind::parse), object_id) {
            (Some(kind), Some(object_id)) => Some(Correlation { kind, object_id }),
            _ => None,
        };

        NotificationRecord {
            id: row.get("id"),
            recipient_id: recipient_id.into(),
            sender_id: sender_id.map(RecipientId::from),
            correlation,
            title: row.get("title"),
            body: row.get("body"),
            notification_type: NotificationType::parse(&notification_type),
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn persist(&self, record: &NotificationRecord) -> Result<NotificationId> {
        let query = r#"
            INSERT INTO notifications (
                id, recipient_id, sender_id, notification_type, title, body,
                object_type, object_id, is_read, created_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            )
            RETURNING id
        "#;

        let row = sqlx::query(query)
            .bind(record.id)
            .bind(record.recipient_id.as_uuid())
            .bind(record.sender_id.map(|s| s.as_uuid()))
            .bind(record.notification_type.as_str())
            .bind(&record.title)
            .bind(&record.body)
            .bind(record.correlation.map(|c| c.kind.as_str()))
            .bind(record.correlation.map(|c| c.object_id))
            .bind(record.is_read)
            .bind(record.created_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                error!("Failed to persist notification {}: {}", record.id, e);
                AppError::PersistenceUnavailable(e.to_string())
            })?;

        let id: Uuid = row.get("id");
        info!(
            "Persisted notification: {} for user: {}",
            id, record.recipient_id
        );
        Ok(id)
    }

    async fn mark_delivered(&self, id: NotificationId, recipient: RecipientId) -> Result<()> {
        let query = r#"
            UPDATE notifications
            SET delivered_at = COALESCE(delivered_at, $1)
            WHERE id = $2 AND recipient_id = $3
        "#;

        sqlx::query(query)
            .bind(Utc::now())
            .bind(id)
            .bind(recipient.as_uuid())
            .execute(&self.db)
            .await?;

        debug!("Marked notification {} delivered to {}", id, recipient);
        Ok(())
    }

    async fn list_unread(
        &self,
        recipient: RecipientId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        let query = r#"
            SELECT id, recipient_id, sender_id, notification_type, title, body,
                   object_type, object_id, is_read, created_at
            FROM notifications
            WHERE recipient_id = $1 AND is_read = false
            ORDER BY created_at DESC
            LIMIT $2
        "#;

        let rows = sqlx::query(query)
            .bind(recipient.as_uuid())
            .bind(limit as i64)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }
}

/// In-process store for tests and database-less local runs
///
/// `set_available(false)` makes every call fail with
/// `PersistenceUnavailable`, emulating an unreachable collaborator.
#[derive(Clone)]
pub struct InMemoryNotificationStore {
    records: Arc<RwLock<Vec<NotificationRecord>>>,
    delivered: Arc<RwLock<HashMap<(NotificationId, RecipientId), DateTime<Utc>>>>,
    available: Arc<AtomicBool>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            delivered: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::PersistenceUnavailable(
                "in-memory store disabled".to_string(),
            ))
        }
    }

    pub async fn records(&self) -> Vec<NotificationRecord> {
        self.records.read().await.clone()
    }

    pub async fn is_delivered(&self, id: NotificationId, recipient: RecipientId) -> bool {
        self.delivered.read().await.contains_key(&(id, recipient))
    }

    /// Poll until the `mark_delivered` hook landed, up to `within`
    ///
    /// The dispatcher fires that hook in a detached task.
    pub async fn wait_until_delivered(
        &self,
        id: NotificationId,
        recipient: RecipientId,
        within: std::time::Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.is_delivered(id, recipient).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Stand-in for the external "mark read" action
    pub async fn mark_read(&self, id: NotificationId) {
        let mut records = self.records.write().await;
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.is_read = true;
        }
    }
}

impl Default for InMemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn persist(&self, record: &NotificationRecord) -> Result<NotificationId> {
        self.check_available()?;
        self.records.write().await.push(record.clone());
        debug!("Stored notification {} in memory", record.id);
        Ok(record.id)
    }

    async fn mark_delivered(&self, id: NotificationId, recipient: RecipientId) -> Result<()> {
        self.check_available()?;
        self.delivered
            .write()
            .await
            .entry((id, recipient))
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn list_unread(
        &self,
        recipient: RecipientId,
        limit: usize,
    ) -> Result<Vec<NotificationRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut unread: Vec<NotificationRecord> = records
            .iter()
            .filter(|r| r.recipient_id == recipient && !r.is_read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        unread.truncate(limit);
        Ok(unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationDraft;

    fn draft() -> NotificationDraft {
        NotificationDraft::new(
            NotificationType::AssignmentCreated,
            "New assignment",
            "Lab 3 has been published",
        )
    }

    #[tokio::test]
    async fn test_persist_and_list_unread() {
        let store = InMemoryNotificationStore::new();
        let recipient = RecipientId::new();
        let other = RecipientId::new();

        let record = draft().record_for(recipient);
        let id = store.persist(&record).await.unwrap();
        store.persist(&draft().record_for(other)).await.unwrap();

        assert_eq!(id, record.id);
        let unread = store.list_unread(recipient, 10).await.unwrap();
        assert_eq!(unread, vec![record]);
    }

    #[tokio::test]
    async fn test_list_unread_skips_read_and_respects_limit() {
        let store = InMemoryNotificationStore::new();
        let recipient = RecipientId::new();

        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(store.persist(&draft().record_for(recipient)).await.unwrap());
        }
        store.mark_read(ids[0]).await;

        assert_eq!(store.list_unread(recipient, 10).await.unwrap().len(), 3);
        assert_eq!(store.list_unread(recipient, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryNotificationStore::new();
        store.set_available(false);

        let result = store.persist(&draft().record_for(RecipientId::new())).await;
        assert!(matches!(result, Err(AppError::PersistenceUnavailable(_))));
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_delivered() {
        let store = InMemoryNotificationStore::new();
        let recipient = RecipientId::new();
        let id = store.persist(&draft().record_for(recipient)).await.unwrap();

        assert!(!store.is_delivered(id, recipient).await);
        store.mark_delivered(id, recipient).await.unwrap();
        store.mark_delivered(id, recipient).await.unwrap();
        assert!(store.is_delivered(id, recipient).await);
    }
}
