use std::env;
use std::path::PathBuf;
use std::time::Duration;

use podium_core::upload::{DEFAULT_MAX_UPLOAD_BYTES, RetryPolicy};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Database file path (default: ./podium.db)
    pub database_path: PathBuf,
    /// Directory for files waiting to be uploaded (default: ./storage/temp-uploads)
    pub temp_upload_dir: PathBuf,
    /// Public fallback storage directory (default: ./storage/public)
    pub public_storage_dir: PathBuf,
    /// URL the public storage directory is served under
    pub public_base_url: String,
    /// Primary object storage, disabled when `S3_BUCKET` is unset
    pub s3: Option<S3Config>,
    /// Upload worker pool settings
    pub uploads: UploadConfig,
    /// Largest accepted block image in bytes (default: 10 MiB)
    pub max_upload_bytes: usize,
    /// CORS allowed origins (comma-separated, empty allows any)
    pub cors_origins: Vec<String>,
}

/// S3 (or S3-compatible) primary storage
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO and friends
    pub endpoint: Option<String>,
    /// Base URL objects are publicly reachable under
    pub public_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// Public URL of an object key.
    pub fn object_url(&self, key: &str) -> String {
        match &self.public_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

/// Upload worker settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Number of concurrent upload workers (default: 2)
    pub workers: usize,
    /// Attempts per task before it fails permanently (default: 3)
    pub max_attempts: u32,
    /// Wall-clock budget of one attempt (default: 300s)
    pub timeout: Duration,
    /// Base backoff between attempts (default: 1000ms)
    pub backoff: Duration,
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.backoff,
            max_delay: self.backoff.saturating_mul(30),
            timeout: self.timeout,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("HOST", "0.0.0.0");
        let port = var("PORT", "3040")
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_path = PathBuf::from(var("DATABASE_PATH", "./podium.db"));
        let temp_upload_dir = PathBuf::from(var("TEMP_UPLOAD_DIR", "./storage/temp-uploads"));
        let public_storage_dir = PathBuf::from(var("PUBLIC_STORAGE_DIR", "./storage/public"));
        let public_base_url = var("PUBLIC_BASE_URL", &format!("http://localhost:{}/storage", port))
            .trim_end_matches('/')
            .to_string();

        let s3 = lookup("S3_BUCKET")
            .filter(|bucket| !bucket.is_empty())
            .map(|bucket| S3Config {
                bucket,
                region: var("S3_REGION", "us-east-1"),
                endpoint: lookup("S3_ENDPOINT").filter(|s| !s.is_empty()),
                public_url: lookup("S3_PUBLIC_URL").filter(|s| !s.is_empty()),
                access_key_id: lookup("AWS_ACCESS_KEY_ID").filter(|s| !s.is_empty()),
                secret_access_key: lookup("AWS_SECRET_ACCESS_KEY").filter(|s| !s.is_empty()),
            });

        let uploads = UploadConfig {
            workers: var("UPLOAD_WORKERS", "2")
                .parse()
                .map_err(|_| ConfigError::Invalid("UPLOAD_WORKERS"))?,
            max_attempts: var("UPLOAD_MAX_ATTEMPTS", "3")
                .parse()
                .map_err(|_| ConfigError::Invalid("UPLOAD_MAX_ATTEMPTS"))?,
            timeout: Duration::from_secs(
                var("UPLOAD_TIMEOUT_SECS", "300")
                    .parse()
                    .map_err(|_| ConfigError::Invalid("UPLOAD_TIMEOUT_SECS"))?,
            ),
            backoff: Duration::from_millis(
                var("UPLOAD_BACKOFF_MS", "1000")
                    .parse()
                    .map_err(|_| ConfigError::Invalid("UPLOAD_BACKOFF_MS"))?,
            ),
        };
        if uploads.workers == 0 {
            return Err(ConfigError::Invalid("UPLOAD_WORKERS"));
        }

        let max_upload_bytes = var("MAX_UPLOAD_BYTES", &DEFAULT_MAX_UPLOAD_BYTES.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("MAX_UPLOAD_BYTES"))?;

        let cors_origins = var("CORS_ORIGINS", "")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            database_path,
            temp_upload_dir,
            public_storage_dir,
            public_base_url,
            s3,
            uploads,
            max_upload_bytes,
            cors_origins,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::Invalid(key) => write!(f, "Invalid {} environment variable", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server_addr(), "0.0.0.0:3040");
        assert_eq!(config.public_base_url, "http://localhost:3040/storage");
        assert!(config.s3.is_none());
        assert_eq!(config.uploads.workers, 2);
        assert_eq!(config.uploads.max_attempts, 3);
        assert_eq!(config.uploads.timeout, Duration::from_secs(300));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_s3_enabled_by_bucket() {
        let config = config(&[
            ("S3_BUCKET", "podium-assets"),
            ("S3_REGION", "eu-west-1"),
            ("CORS_ORIGINS", "http://a.test, http://b.test"),
        ])
        .unwrap();
        let s3 = config.s3.unwrap();
        assert_eq!(s3.bucket, "podium-assets");
        assert_eq!(
            s3.object_url("blocks/1/2/x.png"),
            "https://podium-assets.s3.eu-west-1.amazonaws.com/blocks/1/2/x.png"
        );
        assert_eq!(config.cors_origins.len(), 2);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(config(&[("PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            config(&[("UPLOAD_WORKERS", "0")]),
            Err(ConfigError::Invalid("UPLOAD_WORKERS"))
        ));
    }
}
