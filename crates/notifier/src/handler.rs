//! Delivery handlers, one per notification type.
//!
//! A handler performs exactly one delivery attempt and reports success or
//! failure. It never touches queue state; the worker records the outcome.

use std::sync::Arc;

use async_trait::async_trait;

use herald_common::types::{NotificationRecord, Payload};
use herald_common::{HeraldError, HeraldResult};
use herald_publisher::PagePublisher;

#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, record: &NotificationRecord) -> HeraldResult<()>;
}

/// Chat platform message API boundary.
///
/// Implementations must report any non-success response as an error.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_message(&self, channel: &str, payload: &Payload) -> HeraldResult<()>;
}

/// Placeholder client used until a chat platform integration is wired in.
/// Every attempt fails, so chat notifications retry and eventually fail
/// permanently instead of being silently dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredChatClient;

#[async_trait]
impl ChatClient for UnconfiguredChatClient {
    async fn post_message(&self, _channel: &str, _payload: &Payload) -> HeraldResult<()> {
        Err(HeraldError::Delivery(
            "Chat message delivery not implemented".to_string(),
        ))
    }
}

/// Posts `payload` to the channel named by the record's `target`.
pub struct ChatMessageHandler {
    client: Arc<dyn ChatClient>,
}

impl ChatMessageHandler {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeliveryHandler for ChatMessageHandler {
    async fn deliver(&self, record: &NotificationRecord) -> HeraldResult<()> {
        self.client
            .post_message(&record.target, &record.payload)
            .await
    }
}

/// Regenerates and publishes the status page.
///
/// A non-empty record `target` overrides the configured push target.
pub struct PagePublishHandler {
    publisher: Arc<PagePublisher>,
}

impl PagePublishHandler {
    pub fn new(publisher: Arc<PagePublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl DeliveryHandler for PagePublishHandler {
    async fn deliver(&self, record: &NotificationRecord) -> HeraldResult<()> {
        if record.target.is_empty() {
            self.publisher.generate_and_push().await
        } else {
            self.publisher.generate_and_push_to(&record.target).await
        }
    }
}
