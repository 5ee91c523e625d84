//! Push method selection and `bucket[/key]` target parsing.

use std::str::FromStr;

use herald_common::HeraldError;

/// Object key used when the target names only a bucket or a prefix.
pub const DEFAULT_OBJECT_KEY: &str = "index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushMethod {
    /// Write `{target}/index.html` on the local filesystem.
    Local,
    S3,
    Gcs,
}

impl PushMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushMethod::Local => "local",
            PushMethod::S3 => "s3",
            PushMethod::Gcs => "gcs",
        }
    }

    /// Label used in error messages for object-storage targets.
    fn label(&self) -> &'static str {
        match self {
            PushMethod::Local => "local",
            PushMethod::S3 => "S3",
            PushMethod::Gcs => "GCS",
        }
    }
}

impl std::fmt::Display for PushMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushMethod {
    type Err = HeraldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(PushMethod::Local),
            "s3" => Ok(PushMethod::S3),
            "gcs" => Ok(PushMethod::Gcs),
            other => Err(HeraldError::Config(format!(
                "Unknown STATIC_PAGE_PUSH_METHOD: '{other}'"
            ))),
        }
    }
}

/// A parsed `bucket[/key]` object-storage destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
}

impl ObjectTarget {
    /// Parse `bucket[/key]`.
    ///
    /// A missing or empty key becomes `index.html`; a key ending in `/` is
    /// treated as a prefix and gets `index.html` appended.
    pub fn parse(method: PushMethod, target: &str) -> Result<Self, HeraldError> {
        let (bucket, key) = match target.split_once('/') {
            Some((bucket, key)) => (bucket, key),
            None => (target, ""),
        };
        if bucket.is_empty() {
            return Err(HeraldError::Config(format!(
                "Invalid {} target '{target}': bucket name is empty",
                method.label()
            )));
        }
        let key = if key.is_empty() {
            DEFAULT_OBJECT_KEY.to_string()
        } else if key.ends_with('/') {
            format!("{key}{DEFAULT_OBJECT_KEY}")
        } else {
            key.to_string()
        };
        Ok(Self {
            bucket: bucket.to_string(),
            key,
        })
    }
}
