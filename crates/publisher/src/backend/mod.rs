//! Push backends: local filesystem plus object-storage uploads.

mod gcs;
mod local;
mod s3;
#[cfg(test)]
mod test_server;

pub use gcs::{GcsObjectStore, GcsTokenSource};
pub use local::write_local;
pub use s3::S3ObjectStore;

use async_trait::async_trait;

use herald_common::HeraldResult;

/// Content type of the published page.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Published pages must never be served stale from a cache.
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// One object upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectUpload<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub body: &'a [u8],
    pub content_type: &'a str,
    pub cache_control: &'a str,
}

/// Object-storage client boundary.
///
/// Implementations fold credential, permission and API failures into
/// `HeraldError::Delivery`, distinguished by message.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, upload: ObjectUpload<'_>) -> HeraldResult<()>;
}
