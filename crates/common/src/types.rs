use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HeraldError;

/// Opaque notification payload, handed to the delivery handler unmodified.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kinds of notifications the queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ChatMessage,
    PagePublish,
}

impl NotificationType {
    pub const ALL: [NotificationType; 2] =
        [NotificationType::ChatMessage, NotificationType::PagePublish];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ChatMessage => "chat_message",
            NotificationType::PagePublish => "page_publish",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = HeraldError;

    /// Parses a notification type, also accepting the legacy names
    /// `slack_message` and `static_page_push`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat_message" | "slack_message" => Ok(NotificationType::ChatMessage),
            "page_publish" | "static_page_push" => Ok(NotificationType::PagePublish),
            other => {
                let valid: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                Err(HeraldError::Validation(format!(
                    "Invalid notification_type: '{}'. Must be one of: {}",
                    other,
                    valid.join(", ")
                )))
            }
        }
    }
}

/// Delivery status of a notification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    /// Permanent failure: the retry ceiling was reached.
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted unit of deliverable work (`pending_notifications` row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub target: String,
    #[sqlx(json)]
    pub payload: Payload,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    /// `None` means eligible now.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl NotificationRecord {
    /// Build a fresh pending record. Ids are UUIDv7 so they sort by creation time.
    pub fn new(
        notification_type: NotificationType,
        target: impl Into<String>,
        payload: Payload,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            notification_type,
            target: target.into(),
            payload,
            status: NotificationStatus::Pending,
            created_at,
            next_retry_at: None,
            retry_count: 0,
            delivered_at: None,
            error_message: None,
        }
    }

    /// Pending and either never deferred or deferred until at most `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending
            && self.next_retry_at.is_none_or(|at| at <= now)
    }
}

/// Record counts per status, for operations dashboards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub delivered: u64,
    pub failed: u64,
}
