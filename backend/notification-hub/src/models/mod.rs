use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Logical user receiving notifications, stable across reconnects and devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(Uuid);

impl RecipientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RecipientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One live transport connection
///
/// Handles are minted per connection and never reused after disconnect,
/// so the only public constructor draws a fresh random id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub type NotificationId = Uuid;

/// Notification type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// A new assignment was published in a course instance
    AssignmentCreated,
    /// A student handed in a submission
    SubmissionReceived,
    /// A peer review was assigned to the recipient
    ReviewAssigned,
    /// A review of the recipient's submission was completed
    ReviewCompleted,
    /// Course-wide announcement
    CourseAnnouncement,
    /// System notification
    System,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::AssignmentCreated => "assignment_created",
            NotificationType::SubmissionReceived => "submission_received",
            NotificationType::ReviewAssigned => "review_assigned",
            NotificationType::ReviewCompleted => "review_completed",
            NotificationType::CourseAnnouncement => "course_announcement",
            NotificationType::System => "system",
        }
    }

    /// Unknown tags fall back to `System`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "assignment_created" => NotificationType::AssignmentCreated,
            "submission_received" => NotificationType::SubmissionReceived,
            "review_assigned" => NotificationType::ReviewAssigned,
            "review_completed" => NotificationType::ReviewCompleted,
            "course_announcement" => NotificationType::CourseAnnouncement,
            _ => NotificationType::System,
        }
    }
}

/// Kind of domain object a notification points at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Assignment,
    Submission,
    Review,
    CourseInstance,
}

impl CorrelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationKind::Assignment => "assignment",
            CorrelationKind::Submission => "submission",
            CorrelationKind::Review => "review",
            CorrelationKind::CourseInstance => "course_instance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assignment" => Some(CorrelationKind::Assignment),
            "submission" => Some(CorrelationKind::Submission),
            "review" => Some(CorrelationKind::Review),
            "course_instance" => Some(CorrelationKind::CourseInstance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Correlation {
    pub kind: CorrelationKind,
    pub object_id: Uuid,
}

/// Durable notification entity
///
/// Immutable once built, apart from `is_read`, which only the external
/// "mark read" action changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: NotificationId,

    /// Recipient user ID
    pub recipient_id: RecipientId,

    /// Sender user ID (if applicable)
    pub sender_id: Option<RecipientId>,

    /// Associated assignment/submission/review/course instance
    pub correlation: Option<Correlation>,

    pub title: String,

    pub body: String,

    pub notification_type: NotificationType,

    pub is_read: bool,

    pub created_at: DateTime<Utc>,
}

/// Recipient-independent part of a notification, as supplied by a domain service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationDraft {
    pub sender_id: Option<RecipientId>,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub correlation: Option<Correlation>,
}

impl NotificationDraft {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: None,
            notification_type,
            title: title.into(),
            body: body.into(),
            correlation: None,
        }
    }

    pub fn with_sender(mut self, sender_id: RecipientId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn with_correlation(mut self, kind: CorrelationKind, object_id: Uuid) -> Self {
        self.correlation = Some(Correlation { kind, object_id });
        self
    }

    /// Build the durable record addressed to one recipient
    pub fn record_for(&self, recipient_id: RecipientId) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::new_v4(),
            recipient_id,
            sender_id: self.sender_id,
            correlation: self.correlation,
            title: self.title.clone(),
            body: self.body.clone(),
            notification_type: self.notification_type,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// What gets pushed to a live session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    /// Durable record id, when the payload was persisted first
    pub notification_id: Option<NotificationId>,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub correlation: Option<Correlation>,
    pub timestamp: i64,
}

impl NotificationPayload {
    /// Ad-hoc payload with no durable record behind it
    pub fn transient(
        notification_type: NotificationType,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: None,
            notification_type,
            title: title.into(),
            body: body.into(),
            correlation: None,
            timestamp: Utc::now().timestamp(),
        }
    }
}

impl From<&NotificationRecord> for NotificationPayload {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            notification_id: Some(record.id),
            notification_type: record.notification_type,
            title: record.title.clone(),
            body: record.body.clone(),
            correlation: record.correlation,
            timestamp: record.created_at.timestamp(),
        }
    }
}

/// Recipient selection for one dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryTarget {
    Single { recipient_id: RecipientId },
    Multiple { recipient_ids: HashSet<RecipientId> },
    /// Everyone with at least one live session at delivery time
    Broadcast,
}

impl DeliveryTarget {
    pub fn single(recipient_id: RecipientId) -> Self {
        DeliveryTarget::Single { recipient_id }
    }

    pub fn multiple(recipient_ids: impl IntoIterator<Item = RecipientId>) -> Self {
        DeliveryTarget::Multiple {
            recipient_ids: recipient_ids.into_iter().collect(),
        }
    }

    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryTarget::Single { .. } => "single",
            DeliveryTarget::Multiple { .. } => "multiple",
            DeliveryTarget::Broadcast => "broadcast",
        }
    }
}

/// Aggregate result of one `deliver` call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Recipients with at least one successful push
    pub reachable: usize,
    /// Recipients with zero live sessions at push time
    pub unreachable: usize,
    /// Individual session pushes that failed or timed out
    pub push_failures: usize,
    /// Individual session pushes that succeeded
    pub pushed: usize,
}

impl DeliveryOutcome {
    pub fn merge(&mut self, other: DeliveryOutcome) {
        self.reachable += other.reachable;
        self.unreachable += other.unreachable;
        self.push_failures += other.push_failures;
        self.pushed += other.pushed;
    }
}

/// Why a transport session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum DisconnectCause {
    Normal,
    Timeout,
    Error(String),
}

impl DisconnectCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectCause::Normal => "normal",
            DisconnectCause::Timeout => "timeout",
            DisconnectCause::Error(_) => "error",
        }
    }
}

/// Per-session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Connected,
    /// Terminal
    Disconnected,
}
