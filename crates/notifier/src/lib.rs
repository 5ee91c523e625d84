//! Notification delivery worker.
//!
//! Polls the queue, dispatches each due notification to the handler for its
//! type, and records the outcome (delivered, deferred or permanently failed).

pub mod dispatcher;
pub mod handler;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use handler::{ChatClient, ChatMessageHandler, DeliveryHandler, PagePublishHandler};
pub use worker::{NotificationWorker, WorkerConfig, WorkerState, WorkerStats};
