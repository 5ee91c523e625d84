//! Status page publisher.
//!
//! Renders the equipment status snapshot into a self-contained HTML page and
//! pushes it to the configured destination: a local directory, an S3 bucket
//! or a GCS bucket.

pub mod backend;
pub mod publisher;
pub mod render;
pub mod snapshot;
pub mod target;

pub use backend::{ObjectStore, ObjectUpload};
pub use publisher::PagePublisher;
pub use snapshot::{SnapshotProvider, StatusSnapshot};
pub use target::{ObjectTarget, PushMethod};
