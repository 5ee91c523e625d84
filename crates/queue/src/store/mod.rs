//! Persistence port for notification records.
//!
//! Stores only persist; deciding the next status is `NotificationQueue`'s job.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgNotificationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use herald_common::HeraldResult;
use herald_common::types::{NotificationRecord, QueueCounts};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a newly created record.
    async fn insert(&self, record: &NotificationRecord) -> HeraldResult<()>;

    async fn get(&self, id: Uuid) -> HeraldResult<Option<NotificationRecord>>;

    /// Pending records due at `now`, oldest `created_at` first, at most `limit`.
    async fn fetch_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> HeraldResult<Vec<NotificationRecord>>;

    /// Write the mutable fields of `record`, but only if the stored row is
    /// still `pending`. Returns `false` when nothing was written.
    async fn update_pending(&self, record: &NotificationRecord) -> HeraldResult<bool>;

    async fn counts(&self) -> HeraldResult<QueueCounts>;
}
