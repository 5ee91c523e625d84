use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use herald_common::types::{NotificationRecord, NotificationStatus, QueueCounts};
use herald_common::{HeraldError, HeraldResult};

use super::NotificationStore;

/// In-process store. Records are kept in insertion order, which doubles as the
/// tie-breaker for equal `created_at` values.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<NotificationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn insert(&self, record: &NotificationRecord) -> HeraldResult<()> {
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.id == record.id) {
            return Err(HeraldError::Validation(format!(
                "Notification {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> HeraldResult<Option<NotificationRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn fetch_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> HeraldResult<Vec<NotificationRecord>> {
        let records = self.records.lock().await;
        let mut ready: Vec<NotificationRecord> =
            records.iter().filter(|r| r.is_ready(now)).cloned().collect();
        // stable: equal timestamps keep insertion order
        ready.sort_by_key(|r| r.created_at);
        ready.truncate(limit);
        Ok(ready)
    }

    async fn update_pending(&self, record: &NotificationRecord) -> HeraldResult<bool> {
        let mut records = self.records.lock().await;
        let Some(stored) = records.iter_mut().find(|r| r.id == record.id) else {
            return Ok(false);
        };
        if stored.status != NotificationStatus::Pending {
            return Ok(false);
        }
        stored.status = record.status;
        stored.retry_count = record.retry_count;
        stored.next_retry_at = record.next_retry_at;
        stored.delivered_at = record.delivered_at;
        stored.error_message = record.error_message.clone();
        Ok(true)
    }

    async fn counts(&self) -> HeraldResult<QueueCounts> {
        let records = self.records.lock().await;
        let mut counts = QueueCounts::default();
        for record in records.iter() {
            match record.status {
                NotificationStatus::Pending => counts.pending += 1,
                NotificationStatus::Delivered => counts.delivered += 1,
                NotificationStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
