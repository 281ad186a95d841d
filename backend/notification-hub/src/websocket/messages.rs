/// WebSocket message types for real-time notifications
use crate::models::{
    Correlation, NotificationId, NotificationPayload, NotificationRecord, NotificationType,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for WebSocket communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum WebSocketMessage {
    /// Server pushes a notification to client
    Notification {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<NotificationId>,
        notification_type: NotificationType,
        title: String,
        body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation: Option<Correlation>,
        timestamp: i64,
    },

    /// Heartbeat/ping from server
    Ping { timestamp: i64 },

    /// Client responds to ping
    Pong { timestamp: i64 },

    /// Error message from server
    Error { code: String, message: String },

    /// Connection established confirmation
    Connected {
        session_id: Uuid,
        unread: usize,
        timestamp: i64,
    },
}

impl WebSocketMessage {
    /// Create a ping message
    pub fn ping() -> Self {
        WebSocketMessage::Ping {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Create a pong message
    pub fn pong(timestamp: i64) -> Self {
        WebSocketMessage::Pong { timestamp }
    }

    /// Create an error message
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        WebSocketMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a connected message
    pub fn connected(session_id: Uuid, unread: usize) -> Self {
        WebSocketMessage::Connected {
            session_id,
            unread,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<&NotificationPayload> for WebSocketMessage {
    fn from(payload: &NotificationPayload) -> Self {
        WebSocketMessage::Notification {
            id: payload.notification_id,
            notification_type: payload.notification_type,
            title: payload.title.clone(),
            body: payload.body.clone(),
            correlation: payload.correlation,
            timestamp: payload.timestamp,
        }
    }
}

impl From<&NotificationRecord> for WebSocketMessage {
    fn from(record: &NotificationRecord) -> Self {
        WebSocketMessage::from(&NotificationPayload::from(record))
    }
}
