use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use herald_common::{HeraldError, HeraldResult};

use super::{ObjectStore, ObjectUpload};

const UPLOAD_BASE_URL: &str = "https://storage.googleapis.com/upload/storage/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where the OAuth bearer token for uploads comes from.
#[derive(Debug, Clone)]
pub enum GcsTokenSource {
    /// A pre-minted access token (e.g. `gcloud auth print-access-token`).
    Static(String),
    /// The GCE/GKE/Cloud Run metadata server.
    MetadataServer,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Google Cloud Storage uploads via the JSON API multipart upload endpoint.
#[derive(Clone)]
pub struct GcsObjectStore {
    http: reqwest::Client,
    token_source: GcsTokenSource,
    base_url: String,
}

impl GcsObjectStore {
    pub fn new(token_source: GcsTokenSource, timeout: Duration) -> HeraldResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HeraldError::Config(format!("Failed to build GCS HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_source,
            base_url: UPLOAD_BASE_URL.to_string(),
        })
    }

    /// Point uploads at a different endpoint (emulators, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn access_token(&self) -> HeraldResult<String> {
        let credentials_missing = || {
            HeraldError::Delivery(
                "Google Cloud credentials not configured for GCS push".to_string(),
            )
        };

        match &self.token_source {
            GcsTokenSource::Static(token) if !token.is_empty() => Ok(token.clone()),
            GcsTokenSource::Static(_) => Err(credentials_missing()),
            GcsTokenSource::MetadataServer => {
                let response = self
                    .http
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::debug!(error = %e, "GCS metadata token request failed");
                        credentials_missing()
                    })?;
                if !response.status().is_success() {
                    tracing::debug!(
                        status = %response.status(),
                        "GCS metadata server refused token request"
                    );
                    return Err(credentials_missing());
                }
                let token: MetadataToken =
                    response.json().await.map_err(|_| credentials_missing())?;
                Ok(token.access_token)
            }
        }
    }
}

/// Build a `multipart/related` body carrying object metadata and content.
fn multipart_body(upload: &ObjectUpload<'_>, boundary: &str) -> Vec<u8> {
    let metadata = serde_json::json!({
        "name": upload.key,
        "contentType": upload.content_type,
        "cacheControl": upload.cache_control,
    });

    let mut body = Vec::with_capacity(upload.body.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: {}\r\n\r\n", upload.content_type).as_bytes(),
    );
    body.extend_from_slice(upload.body);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put_object(&self, upload: ObjectUpload<'_>) -> HeraldResult<()> {
        let token = self.access_token().await?;
        let boundary = format!("herald-{}", uuid::Uuid::new_v4().simple());
        let url = format!("{}/b/{}/o?uploadType=multipart", self.base_url, upload.bucket);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(multipart_body(&upload, &boundary))
            .send()
            .await
            .map_err(|e| HeraldError::Delivery(format!("GCS upload failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(HeraldError::Delivery(format!(
                "GCS upload failed: {status} {}",
                detail.trim()
            )));
        }

        tracing::info!(bucket = upload.bucket, key = upload.key, "Static page uploaded to GCS");
        Ok(())
    }
}
