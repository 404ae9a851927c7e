//! Configuration management for the medallion streaming engine
//!
//! Configuration is layered with figment: the bundled clickstream
//! definition first, then an optional YAML file, then `MEDALLION_`
//! environment variables (nested keys split on `__`).

pub mod pipeline;

use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub use pipeline::{
    AggregationDefinition, AggregationKind, DerivedDefinition, ExpectationDefinition,
    ExpectationPolicy, NodeDefinition, PipelineDefinition, WindowDefinition,
};

/// Bundled configuration reproducing the clickstream medallion pipeline
pub const CLICKSTREAM_CONFIG: &str = include_str!("../pipelines/clickstream.yaml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MedallionConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub pipeline: PipelineDefinition,
}

impl MedallionConfig {
    /// Load configuration from the bundled defaults, an optional file and the
    /// environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Yaml::string(CLICKSTREAM_CONFIG));

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed("MEDALLION_").split("__"));

        figment
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// The bundled clickstream configuration with no overrides
    pub fn clickstream() -> Result<Self> {
        Figment::from(Yaml::string(CLICKSTREAM_CONFIG))
            .extract()
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate ranges before startup. Graph-level checks (cycles, unknown
    /// upstreams, predicate syntax) happen when the pipeline is built.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.source.validate()?;

        if self.storage.backend == StorageBackendKind::Sled
            && self.storage.path.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "storage.path is required for the sled backend".to_string(),
            ));
        }

        if self.pipeline.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "pipeline must define at least one node".to_string(),
            ));
        }

        for node in &self.pipeline.nodes {
            if let Some(window) = &node.window {
                if window.duration_ms == 0 {
                    return Err(ConfigError::ValidationError(format!(
                        "node '{}': window.duration_ms must be greater than 0",
                        node.name
                    )));
                }
                if node.aggregations.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "node '{}': windowed nodes need at least one aggregation",
                        node.name
                    )));
                }
            } else if !node.aggregations.is_empty() || !node.derived.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "node '{}': aggregations require a window",
                    node.name
                )));
            }
        }

        Ok(())
    }
}

/// Micro-batch engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay between ticks of the run loop
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Upper bound on records pulled per node per tick
    #[serde(default = "default_max_batch_rows")]
    pub max_batch_rows: usize,

    /// Timeout applied to every source and storage call
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Allowed lateness for windows that do not set their own
    #[serde(default = "default_allowed_lateness_ms")]
    pub default_allowed_lateness_ms: u64,

    /// Cap on open groups per window for windows that do not set their own
    #[serde(default = "default_max_groups_per_window")]
    pub max_groups_per_window: usize,

    /// Delete intermediate table rows once every downstream has consumed them
    #[serde(default = "default_true")]
    pub truncate_consumed: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_batch_rows: default_max_batch_rows(),
            io_timeout_ms: default_io_timeout_ms(),
            default_allowed_lateness_ms: default_allowed_lateness_ms(),
            max_groups_per_window: default_max_groups_per_window(),
            truncate_consumed: true,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_rows == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_batch_rows must be greater than 0".to_string(),
            ));
        }
        if self.io_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "engine.io_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_groups_per_window == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_groups_per_window must be greater than 0".to_string(),
            ));
        }
        self.retry.validate()
    }
}

/// Exponential backoff with jitter for transient I/O failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per micro-batch, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0-1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-based); zero for the first attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        let jitter = delay_ms * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay_ms = (delay_ms + jitter).max(0.0);

        Duration::from_millis(final_delay_ms as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "engine.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "engine.retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::ValidationError(
                "engine.retry.jitter_factor must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Synthetic clickstream source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_rows_per_second")]
    pub rows_per_second: f64,

    /// Seed for the per-offset record generator
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Event time of offset 0. Restarts only replay identical records when
    /// this is pinned; unset means "now" at startup.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Fraction of records generated with a null amount
    #[serde(default)]
    pub null_amount_ratio: f64,

    /// Maximum random backwards shift of event times, to exercise lateness
    #[serde(default)]
    pub max_out_of_order_ms: u64,

    /// Enforce the wall-clock production rate
    #[serde(default = "default_true")]
    pub throttle: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            rows_per_second: default_rows_per_second(),
            seed: default_seed(),
            start_time: None,
            null_amount_ratio: 0.0,
            max_out_of_order_ms: 0,
            throttle: true,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rows_per_second > 0.0) {
            return Err(ConfigError::ValidationError(
                "source.rows_per_second must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.null_amount_ratio) {
            return Err(ConfigError::ValidationError(
                "source.null_amount_ratio must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackendKind,

    /// Database directory for the sled backend
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: u64,

    /// Flush to disk after every commit
    #[serde(default = "default_true")]
    pub flush_on_commit: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
            cache_capacity_bytes: default_cache_capacity(),
            flush_on_commit: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Print the Prometheus exposition after each run
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_enabled: true,
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_max_batch_rows() -> usize {
    10_000
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

fn default_allowed_lateness_ms() -> u64 {
    60_000
}

fn default_max_groups_per_window() -> usize {
    100_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_rows_per_second() -> f64 {
    10.0
}

fn default_seed() -> u64 {
    42
}

fn default_backend() -> StorageBackendKind {
    StorageBackendKind::Memory
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/medallion")
}

fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}

fn default_log_level() -> String {
    "medallion=info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_true() -> bool {
    true
}
