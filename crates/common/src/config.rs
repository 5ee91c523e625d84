use std::path::PathBuf;

use serde::Deserialize;

/// Global worker configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string. When unset the worker runs against an
    /// in-memory store (development only; nothing survives a restart).
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Static page push method: `local`, `s3` or `gcs` (default: local)
    pub static_page_push_method: String,

    /// Push target, interpreted per method (directory or `bucket/key`)
    pub static_page_push_target: String,

    /// Seconds between poll cycles (default: 30)
    pub poll_interval_secs: u64,

    /// Maximum notifications fetched per poll cycle (default: 100)
    pub batch_size: usize,

    /// Failed attempts before a notification is permanently failed (default: 10)
    pub max_retries: u32,

    /// Upper bound on a single delivery attempt, in seconds (default: 60)
    pub delivery_timeout_secs: u64,

    /// JSON file holding the equipment status snapshot for the status page
    pub status_snapshot_path: Option<PathBuf>,

    /// OAuth access token for GCS uploads; falls back to the metadata server
    pub gcs_access_token: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: non_empty_var("DATABASE_URL"),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            static_page_push_method: std::env::var("STATIC_PAGE_PUSH_METHOD")
                .unwrap_or_else(|_| "local".to_string()),
            static_page_push_target: std::env::var("STATIC_PAGE_PUSH_TARGET").unwrap_or_default(),
            poll_interval_secs: std::env::var("HERALD_POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HERALD_POLL_INTERVAL_SECS must be a valid u64"))?,
            batch_size: std::env::var("HERALD_BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HERALD_BATCH_SIZE must be a valid usize"))?,
            max_retries: std::env::var("HERALD_MAX_RETRIES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HERALD_MAX_RETRIES must be a valid u32"))?,
            delivery_timeout_secs: std::env::var("HERALD_DELIVERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("HERALD_DELIVERY_TIMEOUT_SECS must be a valid u64"))?,
            status_snapshot_path: non_empty_var("STATUS_SNAPSHOT_PATH").map(PathBuf::from),
            gcs_access_token: non_empty_var("GCS_ACCESS_TOKEN"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the worker: a zero batch never
    /// delivers anything and a zero interval busy-polls the store.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("Poll interval must be at least 1 second");
        }
        if self.batch_size == 0 {
            anyhow::bail!("HERALD_BATCH_SIZE must be at least 1");
        }
        Ok(())
    }

    /// Apply `--poll-interval <secs>` (or `--poll-interval=<secs>`) from the
    /// command line on top of the environment.
    pub fn apply_args<I>(mut self, args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let value = if arg == "--poll-interval" {
                args.next()
                    .ok_or_else(|| anyhow::anyhow!("--poll-interval requires a value"))?
            } else if let Some(v) = arg.strip_prefix("--poll-interval=") {
                v.to_string()
            } else {
                anyhow::bail!("Unknown argument: {arg}");
            };
            self.poll_interval_secs = value
                .parse()
                .map_err(|_| anyhow::anyhow!("--poll-interval must be a whole number of seconds"))?;
        }
        self.validate()?;
        Ok(self)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 20,
            static_page_push_method: "local".to_string(),
            static_page_push_target: String::new(),
            poll_interval_secs: 30,
            batch_size: 100,
            max_retries: 10,
            delivery_timeout_secs: 60,
            status_snapshot_path: None,
            gcs_access_token: None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_poll_interval_override() {
        let config = AppConfig::default()
            .apply_args(args(&["--poll-interval", "5"]))
            .unwrap();
        assert_eq!(config.poll_interval_secs, 5);

        let config = AppConfig::default()
            .apply_args(args(&["--poll-interval=12"]))
            .unwrap();
        assert_eq!(config.poll_interval_secs, 12);
    }

    #[test]
    fn test_no_args_keeps_defaults() {
        let config = AppConfig::default().apply_args(Vec::new()).unwrap();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn test_bad_args_rejected() {
        assert!(AppConfig::default().apply_args(args(&["--poll-interval"])).is_err());
        assert!(AppConfig::default().apply_args(args(&["--poll-interval", "soon"])).is_err());
        assert!(AppConfig::default().apply_args(args(&["--verbose"])).is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = AppConfig::default()
            .apply_args(args(&["--poll-interval", "0"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Poll interval must be at least 1 second");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = AppConfig {
            batch_size: 0,
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "HERALD_BATCH_SIZE must be at least 1");
        assert!(AppConfig::default().validate().is_ok());
    }
}
