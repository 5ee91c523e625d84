use std::collections::HashMap;
use std::sync::Arc;

use herald_common::types::{NotificationRecord, NotificationType};
use herald_common::{HeraldError, HeraldResult};

use crate::handler::DeliveryHandler;

/// Registry of delivery handlers keyed by notification type.
///
/// Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<NotificationType, Arc<dyn DeliveryHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `notification_type`. Registering a type twice
    /// is a configuration error.
    pub fn register(
        &mut self,
        notification_type: NotificationType,
        handler: Arc<dyn DeliveryHandler>,
    ) -> HeraldResult<()> {
        if self.handlers.contains_key(&notification_type) {
            return Err(HeraldError::Config(format!(
                "Duplicate handler for notification type '{notification_type}'"
            )));
        }
        self.handlers.insert(notification_type, handler);
        Ok(())
    }

    /// Types that have no registered handler.
    pub fn missing_types(&self) -> Vec<NotificationType> {
        NotificationType::ALL
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }

    /// Run the handler for `record.notification_type`.
    ///
    /// A missing handler is a configuration bug, but it is still returned as
    /// an ordinary error so the worker retries and eventually fails the record.
    pub async fn dispatch(&self, record: &NotificationRecord) -> HeraldResult<()> {
        let handler = self.handlers.get(&record.notification_type).ok_or_else(|| {
            HeraldError::Config(format!(
                "Unknown notification type: '{}'",
                record.notification_type
            ))
        })?;

        tracing::debug!(
            notification_id = %record.id,
            notification_type = %record.notification_type,
            "Dispatching notification"
        );
        handler.deliver(record).await
    }
}
