//! Page publisher: render the status page and push it to its destination.

use std::collections::HashMap;
use std::sync::Arc;

use herald_common::clock::Clock;
use herald_common::mutation_log::{MutationEvent, MutationSink};
use herald_common::{HeraldError, HeraldResult};

use crate::backend::{HTML_CONTENT_TYPE, NO_CACHE, ObjectStore, ObjectUpload, write_local};
use crate::render::render_page;
use crate::snapshot::SnapshotProvider;
use crate::target::{ObjectTarget, PushMethod};

pub struct PagePublisher {
    method: String,
    target: String,
    snapshots: Arc<dyn SnapshotProvider>,
    object_stores: HashMap<PushMethod, Arc<dyn ObjectStore>>,
    clock: Arc<dyn Clock>,
    mutations: Arc<dyn MutationSink>,
}

impl PagePublisher {
    /// `method` and `target` are the configured defaults
    /// (`STATIC_PAGE_PUSH_METHOD` / `STATIC_PAGE_PUSH_TARGET`). They are
    /// validated on each push, not here.
    pub fn new(
        method: impl Into<String>,
        target: impl Into<String>,
        snapshots: Arc<dyn SnapshotProvider>,
        clock: Arc<dyn Clock>,
        mutations: Arc<dyn MutationSink>,
    ) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            snapshots,
            object_stores: HashMap::new(),
            clock,
            mutations,
        }
    }

    /// Register the client used for an object-storage push method.
    pub fn with_object_store(mut self, method: PushMethod, store: Arc<dyn ObjectStore>) -> Self {
        self.object_stores.insert(method, store);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Render the current snapshot as a self-contained HTML page.
    pub async fn render(&self) -> HeraldResult<String> {
        let snapshot = self.snapshots.snapshot().await?;
        Ok(render_page(&snapshot, self.clock.now()))
    }

    /// Push `html` using `method` to `target`.
    ///
    /// An empty target or unknown method is rejected before any I/O.
    pub async fn push(&self, html: &str, method: &str, target: &str) -> HeraldResult<()> {
        if target.is_empty() {
            return Err(HeraldError::Config(
                "STATIC_PAGE_PUSH_TARGET is not configured".to_string(),
            ));
        }
        let push_method: PushMethod = method.parse()?;

        match push_method {
            PushMethod::Local => {
                write_local(html, target).await?;
            }
            PushMethod::S3 | PushMethod::Gcs => {
                let object = ObjectTarget::parse(push_method, target)?;
                let store = self.object_stores.get(&push_method).ok_or_else(|| {
                    HeraldError::Config(format!(
                        "No {push_method} client configured for STATIC_PAGE_PUSH_METHOD '{push_method}'"
                    ))
                })?;
                store
                    .put_object(ObjectUpload {
                        bucket: &object.bucket,
                        key: &object.key,
                        body: html.as_bytes(),
                        content_type: HTML_CONTENT_TYPE,
                        cache_control: NO_CACHE,
                    })
                    .await?;
            }
        }

        self.mutations.emit(&MutationEvent::system(
            "static_page.pushed",
            serde_json::json!({
                "method": push_method.as_str(),
                "target": target,
            }),
            self.clock.now(),
        ));
        tracing::info!(method = %push_method, target, "Static page pushed");

        Ok(())
    }

    /// Render and push with the configured method and target.
    pub async fn generate_and_push(&self) -> HeraldResult<()> {
        self.generate_and_push_to(&self.target).await
    }

    /// Render and push with the configured method to `target`.
    pub async fn generate_and_push_to(&self, target: &str) -> HeraldResult<()> {
        let html = self.render().await?;
        self.push(&html, &self.method, target).await
    }
}
