//! Mutation log: one structured event per state-changing operation.
//!
//! Events are `{timestamp, event_name, actor, data}` and are appended to a
//! sink. The production sink writes JSON lines to stdout. Payload contents are
//! never logged here, but nothing is filtered either: keep secrets out of `data`.

use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Actor recorded for every mutation performed by the queue and the worker.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub timestamp: DateTime<Utc>,
    pub event_name: String,
    pub actor: String,
    pub data: serde_json::Value,
}

impl MutationEvent {
    pub fn system(
        event_name: impl Into<String>,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            event_name: event_name.into(),
            actor: SYSTEM_ACTOR.to_string(),
            data,
        }
    }
}

/// Append-only destination for mutation events.
pub trait MutationSink: Send + Sync {
    fn emit(&self, event: &MutationEvent);
}

/// Writes each event as a single JSON line to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutMutationSink;

impl MutationSink for StdoutMutationSink {
    fn emit(&self, event: &MutationEvent) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if let Err(e) = writeln!(out, "{line}") {
                    tracing::warn!(
                        error = %e,
                        event = %event.event_name,
                        "Failed to write mutation event"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    event = %event.event_name,
                    "Failed to serialize mutation event"
                );
            }
        }
    }
}

/// Keeps events in memory. Used by tests and embedding callers that want to
/// inspect what happened.
#[derive(Debug, Default)]
pub struct MemoryMutationSink {
    events: Mutex<Vec<MutationEvent>>,
}

impl MemoryMutationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MutationEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|e| e.event_name)
            .collect()
    }
}

impl MutationSink for MemoryMutationSink {
    fn emit(&self, event: &MutationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
