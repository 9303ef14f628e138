use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Seconds between dispatch batches
    #[serde(default = "default_worker_interval")]
    pub interval_seconds: u64,
    /// Maximum messages processed per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the chat platform's send API
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// Timeout for a single transport call in seconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry in seconds
    #[serde(default = "default_retry_initial_delay")]
    pub initial_delay_seconds: u64,
    /// Upper bound on the retry delay in seconds
    #[serde(default = "default_retry_max_delay")]
    pub max_delay_seconds: u64,
    /// Multiplier for exponential growth
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_retry_jitter")]
    pub jitter_factor: f64,
    /// Attempts after which a message is marked dead instead of re-queued
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Credential sources tried in order; first complete match wins
    #[serde(default = "default_source_order")]
    pub source_order: Vec<String>,
}

fn default_database_url() -> String {
    "sqlite://canal.db".to_string()
}

fn default_worker_interval() -> u64 {
    60 // 1 minute
}

fn default_batch_size() -> u32 {
    50
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v12.0".to_string()
}

fn default_transport_timeout() -> u64 {
    20 // 20 seconds
}

fn default_retry_initial_delay() -> u64 {
    60 // 1 minute
}

fn default_retry_max_delay() -> u64 {
    3600 // 1 hour
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_retry_jitter() -> f64 {
    0.1 // 10% jitter
}

fn default_max_attempts() -> u32 {
    5
}

fn default_source_order() -> Vec<String> {
    vec!["settings".to_string(), "legacy".to_string()]
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("database.url", default_database_url())?
            .set_default("worker.interval_seconds", 60)?
            .set_default("worker.batch_size", 50)?
            .set_default("transport.graph_base_url", default_graph_base_url())?
            .set_default("transport.timeout_seconds", 20)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables. Section and key are split by
            // a double underscore so multi-word keys survive:
            // DATABASE__URL, WORKER__INTERVAL_SECONDS, RETRY__MAX_ATTEMPTS, etc.
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_worker_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            graph_base_url: default_graph_base_url(),
            timeout_seconds: default_transport_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: default_retry_initial_delay(),
            max_delay_seconds: default_retry_max_delay(),
            multiplier: default_retry_multiplier(),
            jitter_factor: default_retry_jitter(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            source_order: default_source_order(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryConfig::default(),
            credentials: CredentialsConfig::default(),
        }
    }
}
