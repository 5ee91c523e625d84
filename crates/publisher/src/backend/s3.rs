use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;

use herald_common::{HeraldError, HeraldResult};

use super::{ObjectStore, ObjectUpload};

/// Amazon S3 uploads through the AWS SDK default credential chain.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Build a client from the environment (region, credentials, profile),
    /// with every operation bounded by `operation_timeout`.
    pub async fn from_env(operation_timeout: Duration) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(operation_timeout)
                    .build(),
            )
            .load()
            .await;

        Self {
            client: aws_sdk_s3::Client::new(&config),
        }
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, upload: ObjectUpload<'_>) -> HeraldResult<()> {
        let result = self
            .client
            .put_object()
            .bucket(upload.bucket)
            .key(upload.key)
            .body(ByteStream::from(upload.body.to_vec()))
            .content_type(upload.content_type)
            .cache_control(upload.cache_control)
            .send()
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    bucket = upload.bucket,
                    key = upload.key,
                    "Static page uploaded to S3"
                );
                Ok(())
            }
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    return Err(HeraldError::Delivery(format!(
                        "S3 upload failed ({}): {}",
                        service_err.code().unwrap_or("Unknown"),
                        service_err.message().unwrap_or("no message"),
                    )));
                }
                Err(transport_error(DisplayErrorContext(&err).to_string()))
            }
        }
    }
}

/// Failures that never reached S3: missing credentials, DNS, timeouts.
fn transport_error(detail: String) -> HeraldError {
    if detail.to_lowercase().contains("credential") {
        return HeraldError::Delivery("AWS credentials not configured for S3 push".to_string());
    }
    HeraldError::Delivery(format!("S3 upload failed: {detail}"))
}
