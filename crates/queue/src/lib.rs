//! Durable notification queue.
//!
//! - `store`: persistence port plus in-memory and PostgreSQL implementations
//! - `retry`: per-notification retry ceiling and backoff schedule
//! - `queue`: `NotificationQueue`, the only place record status changes

pub mod queue;
pub mod retry;
pub mod store;

pub use queue::{DEFAULT_BATCH_SIZE, NotificationQueue};
pub use retry::RetryPolicy;
pub use store::{InMemoryStore, NotificationStore, PgNotificationStore};
