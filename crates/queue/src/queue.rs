//! Notification queue service: enqueue, fetch-ready, mark-delivered,
//! mark-failed.
//!
//! Lifecycle of a record:
//! 1. `enqueue` creates it as `pending` with no retry deadline
//! 2. the worker picks it up through `fetch_ready` while it is due
//! 3. `mark_delivered` ends it as `delivered`, or `mark_failed` either defers
//!    it along the backoff schedule or ends it as permanently `failed`
//!
//! Every transition emits one mutation event with actor `system`.

use std::sync::Arc;

use uuid::Uuid;

use herald_common::clock::Clock;
use herald_common::mutation_log::{MutationEvent, MutationSink};
use herald_common::types::{
    NotificationRecord, NotificationStatus, NotificationType, Payload, QueueCounts,
};
use herald_common::{HeraldError, HeraldResult};

use crate::retry::RetryPolicy;
use crate::store::NotificationStore;

/// Default number of notifications fetched per poll cycle.
pub const DEFAULT_BATCH_SIZE: usize = 100;

pub struct NotificationQueue {
    store: Arc<dyn NotificationStore>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    mutations: Arc<dyn MutationSink>,
}

impl NotificationQueue {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        mutations: Arc<dyn MutationSink>,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            mutations,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Insert a notification for background delivery.
    ///
    /// `notification_type` must name one of the known types; anything else is
    /// rejected with a validation error and nothing is stored.
    pub async fn enqueue(
        &self,
        notification_type: &str,
        target: &str,
        payload: Payload,
    ) -> HeraldResult<NotificationRecord> {
        let notification_type: NotificationType = notification_type.parse()?;
        let record =
            NotificationRecord::new(notification_type, target, payload, self.clock.now());
        self.store.insert(&record).await?;

        self.emit(
            "notification.queued",
            serde_json::json!({
                "id": record.id,
                "type": record.notification_type,
                "target": record.target,
            }),
        );
        tracing::info!(
            notification_id = %record.id,
            notification_type = %record.notification_type,
            target = %record.target,
            "Notification queued"
        );

        Ok(record)
    }

    /// Notifications due for delivery now, oldest first, at most `batch_size`.
    pub async fn fetch_ready(&self, batch_size: usize) -> HeraldResult<Vec<NotificationRecord>> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }
        self.store.fetch_ready(self.clock.now(), batch_size).await
    }

    pub async fn get(&self, id: Uuid) -> HeraldResult<NotificationRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| HeraldError::NotFound(format!("Notification {id} not found")))
    }

    pub async fn counts(&self) -> HeraldResult<QueueCounts> {
        self.store.counts().await
    }

    /// Mark a notification as successfully delivered.
    pub async fn mark_delivered(&self, id: Uuid) -> HeraldResult<NotificationRecord> {
        let mut record = self.load_pending(id).await?;
        record.status = NotificationStatus::Delivered;
        record.delivered_at = Some(self.clock.now());
        self.persist(&record).await?;

        self.emit(
            "notification.delivered",
            serde_json::json!({
                "id": record.id,
                "type": record.notification_type,
                "target": record.target,
            }),
        );

        Ok(record)
    }

    /// Record a failed delivery attempt.
    ///
    /// Increments `retry_count`. Once the retry ceiling is reached the record
    /// becomes permanently `failed`; otherwise it stays `pending` and is
    /// deferred by the backoff delay for its retry count.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
    ) -> HeraldResult<NotificationRecord> {
        let mut record = self.load_pending(id).await?;
        let now = self.clock.now();
        record.retry_count += 1;
        record.error_message = Some(error_message.to_string());
        let retry_count = u32::try_from(record.retry_count).unwrap_or(u32::MAX);

        if self.policy.is_exhausted(retry_count) {
            record.status = NotificationStatus::Failed;
            record.next_retry_at = None;
            self.persist(&record).await?;

            self.emit(
                "notification.permanently_failed",
                serde_json::json!({
                    "id": record.id,
                    "type": record.notification_type,
                    "target": record.target,
                    "retry_count": record.retry_count,
                    "error": error_message,
                }),
            );
            tracing::warn!(
                notification_id = %record.id,
                retry_count = record.retry_count,
                error = %error_message,
                "Notification permanently failed"
            );

            return Ok(record);
        }

        let delay = self.policy.delay_for(retry_count);
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| HeraldError::Config(format!("Backoff delay out of range: {e}")))?;
        let next_retry_at = now + delay;
        record.next_retry_at = Some(next_retry_at);
        self.persist(&record).await?;

        self.emit(
            "notification.failed",
            serde_json::json!({
                "id": record.id,
                "type": record.notification_type,
                "target": record.target,
                "retry_count": record.retry_count,
                "error": error_message,
                "next_retry_at": next_retry_at.to_rfc3339(),
            }),
        );

        Ok(record)
    }

    /// Load a record that may still change state.
    async fn load_pending(&self, id: Uuid) -> HeraldResult<NotificationRecord> {
        let record = self.get(id).await?;
        if record.status.is_terminal() {
            return Err(HeraldError::Validation(format!(
                "Notification {id} is already {}",
                record.status
            )));
        }
        Ok(record)
    }

    async fn persist(&self, record: &NotificationRecord) -> HeraldResult<()> {
        if !self.store.update_pending(record).await? {
            return Err(HeraldError::Validation(format!(
                "Notification {} is no longer pending",
                record.id
            )));
        }
        Ok(())
    }

    fn emit(&self, event_name: &str, data: serde_json::Value) {
        self.mutations
            .emit(&MutationEvent::system(event_name, data, self.clock.now()));
    }
}
