use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use herald_common::HeraldResult;
use herald_common::types::{NotificationRecord, NotificationStatus, QueueCounts};

use super::NotificationStore;

/// PostgreSQL-backed store over the `pending_notifications` table.
///
/// Assumes a single active worker: `fetch_ready` does not claim rows, so two
/// workers polling the same table can deliver a notification twice.
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert(&self, record: &NotificationRecord) -> HeraldResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_notifications
                (id, notification_type, target, payload, status, created_at,
                 next_retry_at, retry_count, delivered_at, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.notification_type)
        .bind(&record.target)
        .bind(Json(&record.payload))
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.next_retry_at)
        .bind(record.retry_count)
        .bind(record.delivered_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> HeraldResult<Option<NotificationRecord>> {
        let record = sqlx::query_as::<_, NotificationRecord>(
            "SELECT * FROM pending_notifications WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn fetch_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> HeraldResult<Vec<NotificationRecord>> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT * FROM pending_notifications
            WHERE status = $1
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(NotificationStatus::Pending)
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn update_pending(&self, record: &NotificationRecord) -> HeraldResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pending_notifications
            SET status = $2,
                retry_count = $3,
                next_retry_at = $4,
                delivered_at = $5,
                error_message = $6
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.retry_count)
        .bind(record.next_retry_at)
        .bind(record.delivered_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn counts(&self) -> HeraldResult<QueueCounts> {
        let rows: Vec<(NotificationStatus, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM pending_notifications GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status {
                NotificationStatus::Pending => counts.pending = count,
                NotificationStatus::Delivered => counts.delivered = count,
                NotificationStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
