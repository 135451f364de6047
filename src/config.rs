//! Configuration management for Gatewarden.
//!
//! Process-wide tunables live here. Per-policy limiter definitions are
//! loaded separately through [`PolicySet`](crate::ratelimit::PolicySet).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GatewardenError, Result};

/// Prefix for environment variable overrides, e.g.
/// `GATEWARDEN_LIMITER__MAX_SLEEP_THREADS=8`.
pub const ENV_PREFIX: &str = "GATEWARDEN";

/// Main configuration for a Gatewarden node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewardenConfig {
    /// Node-wide limiter tunables
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Path to the YAML file holding limiter policy definitions
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Node-wide tunables shared by every counter and policy node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// How often the cleaner sweeps idle counters, in milliseconds
    #[serde(default = "default_cleaner_period")]
    pub cleaner_period_ms: u64,

    /// How long a counter must sit idle before the cleaner may evict it
    #[serde(default = "default_counter_retention")]
    pub counter_retention_ms: u64,

    /// Maximum number of calls that may be blocked shaping at once
    #[serde(default = "default_max_sleep_threads")]
    pub max_sleep_threads: usize,

    /// Upper bound on the total delay a single call may spend shaping
    #[serde(default = "default_max_shaping_delay")]
    pub max_shaping_delay_ms: u64,

    /// Log every rejection at INFO
    #[serde(default = "default_audit_rejections")]
    pub audit_rejections: bool,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            cleaner_period_ms: default_cleaner_period(),
            counter_retention_ms: default_counter_retention(),
            max_sleep_threads: default_max_sleep_threads(),
            max_shaping_delay_ms: default_max_shaping_delay(),
            audit_rejections: default_audit_rejections(),
        }
    }
}

impl LimiterSettings {
    pub fn cleaner_period(&self) -> Duration {
        Duration::from_millis(self.cleaner_period_ms)
    }

    pub fn counter_retention(&self) -> Duration {
        Duration::from_millis(self.counter_retention_ms)
    }

    pub fn max_shaping_delay(&self) -> Duration {
        Duration::from_millis(self.max_shaping_delay_ms)
    }
}

fn default_cleaner_period() -> u64 {
    60_000
}

fn default_counter_retention() -> u64 {
    300_000
}

fn default_max_sleep_threads() -> usize {
    20
}

fn default_max_shaping_delay() -> u64 {
    5_000
}

fn default_audit_rejections() -> bool {
    true
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// `GATEWARDEN_` then `__` between nested keys.
fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl GatewardenConfig {
    /// Load configuration from an optional YAML file layered under
    /// `GATEWARDEN_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&str>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        let settings = builder.add_source(env).build()?;

        let config: GatewardenConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| GatewardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limiter.cleaner_period_ms == 0 {
            return Err(GatewardenError::Config(
                "limiter.cleaner_period_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
