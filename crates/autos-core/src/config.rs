//! Configuration module
//!
//! Environment-driven configuration for the acquisition pipeline: database,
//! storage backend, upstream source client, worker pool, rate limiting, and
//! webhook delivery settings.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryLimits;

// Common defaults
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const QUEUE_MAX_WORKERS: usize = 4;
const QUEUE_POLL_INTERVAL_MS: u64 = 1000;
const BATCH_SIZE: usize = 5;
const BATCH_PAUSE_MS: u64 = 1000;
const MAX_CONCURRENT_CHUNKS: usize = 4;
const MAX_CONCURRENT_DOWNLOADS_PER_ACTOR: usize = 3;
const RATE_LIMIT_MAX_REQUESTS: u32 = 100;
const RATE_LIMIT_WINDOW_SECS: u64 = 60;
const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
const RETRY_MAX_ATTEMPTS_CEILING: u32 = 10;
const RETRY_MAX_DELAY_CEILING_SECS: u64 = 300;
const PRESIGN_EXPIRY_SECS: u64 = 3600;

/// Deployment tier. Selects timeout defaults and the webhook validation
/// profile; everything else is overridable per variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentTier {
    Development,
    Staging,
    Production,
    Testing,
}

impl EnvironmentTier {
    pub fn is_production(&self) -> bool {
        matches!(self, EnvironmentTier::Production)
    }

    /// Per-attempt timeout for upstream metadata/listing requests.
    pub fn request_timeout(&self) -> Duration {
        match self {
            EnvironmentTier::Production => Duration::from_secs(30),
            EnvironmentTier::Staging => Duration::from_secs(45),
            EnvironmentTier::Development => Duration::from_secs(60),
            EnvironmentTier::Testing => Duration::from_secs(5),
        }
    }

    /// Overall timeout for a single document download.
    pub fn download_timeout(&self) -> Duration {
        match self {
            EnvironmentTier::Production => Duration::from_secs(300),
            EnvironmentTier::Staging => Duration::from_secs(300),
            EnvironmentTier::Development => Duration::from_secs(600),
            EnvironmentTier::Testing => Duration::from_secs(10),
        }
    }

    /// Pause between document batches.
    pub fn batch_pause(&self) -> Duration {
        match self {
            EnvironmentTier::Testing => Duration::from_millis(10),
            _ => Duration::from_millis(BATCH_PAUSE_MS),
        }
    }
}

impl FromStr for EnvironmentTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(EnvironmentTier::Development),
            "staging" => Ok(EnvironmentTier::Staging),
            "production" | "prod" => Ok(EnvironmentTier::Production),
            "testing" | "test" => Ok(EnvironmentTier::Testing),
            other => Err(anyhow::anyhow!("Invalid environment tier: {}", other)),
        }
    }
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    S3,
    Local,
}

/// Application configuration, read once at daemon startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: EnvironmentTier,
    // Database
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Upstream source
    pub upstream_base_url: String,
    pub upstream_api_key: Option<String>,
    // Storage
    pub storage_backend: StorageBackendKind,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub presign_expiry_seconds: u64,
    // Worker pool / batching
    pub queue_max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub batch_size: usize,
    pub max_concurrent_chunks: usize,
    pub max_concurrent_downloads_per_actor: usize,
    // Rate limiting
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub trusted_proxy_count: usize,
    // Webhook delivery
    pub webhook_max_attempts: u32,
    // Retry ceilings
    pub retry_max_attempts_ceiling: u32,
    pub retry_max_delay_ceiling_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment: EnvironmentTier = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .parse()?;

        let storage_backend = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StorageBackendKind::S3,
            "local" => StorageBackendKind::Local,
            other => return Err(anyhow::anyhow!("Invalid STORAGE_BACKEND: {}", other)),
        };

        let config = Config {
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            upstream_base_url: env::var("UPSTREAM_BASE_URL")
                .map_err(|_| anyhow::anyhow!("UPSTREAM_BASE_URL must be set"))?,
            upstream_api_key: env::var("UPSTREAM_API_KEY").ok().filter(|s| !s.is_empty()),
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok().or_else(|| env::var("AWS_REGION").ok()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            aws_access_key_id: env::var("AWS_ACCESS_KEY_ID").ok(),
            aws_secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            presign_expiry_seconds: env::var("PRESIGN_EXPIRY_SECONDS")
                .unwrap_or_else(|_| PRESIGN_EXPIRY_SECS.to_string())
                .parse()
                .unwrap_or(PRESIGN_EXPIRY_SECS),
            queue_max_workers: env::var("QUEUE_MAX_WORKERS")
                .unwrap_or_else(|_| QUEUE_MAX_WORKERS.to_string())
                .parse()
                .unwrap_or(QUEUE_MAX_WORKERS),
            queue_poll_interval_ms: env::var("QUEUE_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| QUEUE_POLL_INTERVAL_MS.to_string())
                .parse()
                .unwrap_or(QUEUE_POLL_INTERVAL_MS),
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| BATCH_SIZE.to_string())
                .parse()
                .unwrap_or(BATCH_SIZE),
            max_concurrent_chunks: env::var("MAX_CONCURRENT_CHUNKS")
                .unwrap_or_else(|_| MAX_CONCURRENT_CHUNKS.to_string())
                .parse()
                .unwrap_or(MAX_CONCURRENT_CHUNKS),
            max_concurrent_downloads_per_actor: env::var("MAX_CONCURRENT_DOWNLOADS_PER_ACTOR")
                .unwrap_or_else(|_| MAX_CONCURRENT_DOWNLOADS_PER_ACTOR.to_string())
                .parse()
                .unwrap_or(MAX_CONCURRENT_DOWNLOADS_PER_ACTOR),
            rate_limit_max_requests: env::var("RATE_LIMIT_MAX_REQUESTS")
                .unwrap_or_else(|_| RATE_LIMIT_MAX_REQUESTS.to_string())
                .parse()
                .unwrap_or(RATE_LIMIT_MAX_REQUESTS),
            rate_limit_window_seconds: env::var("RATE_LIMIT_WINDOW_SECONDS")
                .unwrap_or_else(|_| RATE_LIMIT_WINDOW_SECS.to_string())
                .parse()
                .unwrap_or(RATE_LIMIT_WINDOW_SECS),
            trusted_proxy_count: env::var("TRUSTED_PROXY_COUNT")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            webhook_max_attempts: env::var("WEBHOOK_MAX_ATTEMPTS")
                .unwrap_or_else(|_| WEBHOOK_MAX_ATTEMPTS.to_string())
                .parse()
                .unwrap_or(WEBHOOK_MAX_ATTEMPTS),
            retry_max_attempts_ceiling: env::var("RETRY_MAX_ATTEMPTS_CEILING")
                .unwrap_or_else(|_| RETRY_MAX_ATTEMPTS_CEILING.to_string())
                .parse()
                .unwrap_or(RETRY_MAX_ATTEMPTS_CEILING),
            retry_max_delay_ceiling_secs: env::var("RETRY_MAX_DELAY_CEILING_SECS")
                .unwrap_or_else(|_| RETRY_MAX_DELAY_CEILING_SECS.to_string())
                .parse()
                .unwrap_or(RETRY_MAX_DELAY_CEILING_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend {
            StorageBackendKind::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackendKind::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("BATCH_SIZE must be at least 1"));
        }
        if self.queue_max_workers == 0 {
            return Err(anyhow::anyhow!("QUEUE_MAX_WORKERS must be at least 1"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.is_production()
    }

    pub fn retry_limits(&self) -> RetryLimits {
        RetryLimits {
            max_attempts_ceiling: self.retry_max_attempts_ceiling,
            max_delay_ceiling: Duration::from_secs(self.retry_max_delay_ceiling_secs),
        }
    }
}
