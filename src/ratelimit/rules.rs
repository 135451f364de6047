//! Limiter definitions and policy file loading.
//!
//! Each policy node that attaches a rate limiter carries one immutable
//! [`RateLimiterConfig`]. Nodes that name the same counter pool one budget.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatewardenError, Result};

use super::counter::WINDOW;

/// Longest accounting window a limiter may configure.
pub const MAX_WINDOW_SIZE: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest blackout a limiter may configure.
pub const MAX_BLACKOUT_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Validated, immutable limiter settings for one policy node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    counter_name: String,
    max_requests_per_second: u64,
    max_concurrency: u64,
    hard_limit: bool,
    shape_requests: bool,
    log_only: bool,
    blackout_period: Option<Duration>,
    window_size: Duration,
}

impl RateLimiterConfig {
    /// Start building a limiter for `counter_name`.
    pub fn builder(counter_name: impl Into<String>) -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder {
            counter_name: counter_name.into(),
            max_requests_per_second: 0,
            max_concurrency: 0,
            hard_limit: false,
            shape_requests: false,
            log_only: false,
            blackout_period: None,
            window_size: WINDOW,
        }
    }

    pub fn counter_name(&self) -> &str {
        &self.counter_name
    }

    pub fn max_requests_per_second(&self) -> u64 {
        self.max_requests_per_second
    }

    /// Zero means no concurrency cap.
    pub fn max_concurrency(&self) -> u64 {
        self.max_concurrency
    }

    pub fn hard_limit(&self) -> bool {
        self.hard_limit
    }

    pub fn shape_requests(&self) -> bool {
        self.shape_requests
    }

    pub fn log_only(&self) -> bool {
        self.log_only
    }

    pub fn blackout_period(&self) -> Option<Duration> {
        self.blackout_period
    }

    /// Length of one accounting window, one second unless configured.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Admissions allowed per window: the per-second rate times the window length.
    pub fn window_budget(&self) -> u64 {
        self.max_requests_per_second
            .saturating_mul(self.window_size.as_secs())
    }

    /// Whether an over-budget call may wait for the next window.
    pub(crate) fn shaping_enabled(&self) -> bool {
        self.shape_requests && !self.hard_limit
    }
}

/// Builder for [`RateLimiterConfig`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RateLimiterConfigBuilder {
    counter_name: String,
    max_requests_per_second: u64,
    max_concurrency: u64,
    hard_limit: bool,
    shape_requests: bool,
    log_only: bool,
    blackout_period: Option<Duration>,
    window_size: Duration,
}

impl RateLimiterConfigBuilder {
    pub fn max_requests_per_second(mut self, rps: u64) -> Self {
        self.max_requests_per_second = rps;
        self
    }

    pub fn max_concurrency(mut self, max: u64) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn hard_limit(mut self, hard: bool) -> Self {
        self.hard_limit = hard;
        self
    }

    pub fn shape_requests(mut self, shape: bool) -> Self {
        self.shape_requests = shape;
        self
    }

    pub fn log_only(mut self, log_only: bool) -> Self {
        self.log_only = log_only;
        self
    }

    pub fn blackout_period(mut self, period: Duration) -> Self {
        self.blackout_period = Some(period);
        self
    }

    pub fn window_secs(mut self, secs: u64) -> Self {
        self.window_size = Duration::from_secs(secs);
        self
    }

    pub fn build(self) -> Result<RateLimiterConfig> {
        if self.counter_name.trim().is_empty() {
            return Err(GatewardenError::invalid_limiter(
                &self.counter_name,
                "counter name must not be empty",
            ));
        }
        if self.max_requests_per_second == 0 {
            return Err(GatewardenError::invalid_limiter(
                &self.counter_name,
                "max_requests_per_second must be greater than zero",
            ));
        }
        if self.window_size.is_zero() || self.window_size > MAX_WINDOW_SIZE {
            return Err(GatewardenError::invalid_limiter(
                &self.counter_name,
                format!(
                    "window size must be between 1 and {} seconds",
                    MAX_WINDOW_SIZE.as_secs()
                ),
            ));
        }
        if let Some(period) = self.blackout_period {
            if period.is_zero() || period > MAX_BLACKOUT_PERIOD {
                return Err(GatewardenError::invalid_limiter(
                    &self.counter_name,
                    format!(
                        "blackout period must be between 1 and {} seconds",
                        MAX_BLACKOUT_PERIOD.as_secs()
                    ),
                ));
            }
        }

        Ok(RateLimiterConfig {
            counter_name: self.counter_name,
            max_requests_per_second: self.max_requests_per_second,
            max_concurrency: self.max_concurrency,
            hard_limit: self.hard_limit,
            shape_requests: self.shape_requests,
            log_only: self.log_only,
            blackout_period: self.blackout_period,
            window_size: self.window_size,
        })
    }
}

/// A limiter definition as written in a policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterRule {
    /// Identifier of the policy node this limiter belongs to
    pub policy: String,
    /// Shared budget name; defaults to the policy identifier
    #[serde(default)]
    pub counter_name: Option<String>,
    pub max_requests_per_second: u64,
    #[serde(default)]
    pub max_concurrency: u64,
    #[serde(default)]
    pub hard_limit: bool,
    #[serde(default)]
    pub shape_requests: bool,
    #[serde(default)]
    pub log_only: bool,
    #[serde(default)]
    pub blackout_secs: Option<u64>,
    /// Accounting window length; one second when absent
    #[serde(default)]
    pub window_secs: Option<u64>,
}

impl LimiterRule {
    pub fn to_config(&self) -> Result<RateLimiterConfig> {
        let name = self.counter_name.as_deref().unwrap_or(&self.policy);
        let mut builder = RateLimiterConfig::builder(name)
            .max_requests_per_second(self.max_requests_per_second)
            .max_concurrency(self.max_concurrency)
            .hard_limit(self.hard_limit)
            .shape_requests(self.shape_requests)
            .log_only(self.log_only);
        if let Some(secs) = self.blackout_secs {
            builder = builder.blackout_period(Duration::from_secs(secs));
        }
        if let Some(secs) = self.window_secs {
            builder = builder.window_secs(secs);
        }
        builder.build()
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    limiters: Vec<LimiterRule>,
}

/// The validated limiter configuration of every policy node on this gateway.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    limiters: Vec<(String, RateLimiterConfig)>,
}

impl PolicySet {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load policies from a YAML string. Any invalid limiter fails the whole load.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(yaml).map_err(|e| {
            GatewardenError::Config(format!("Failed to parse limiter policies: {}", e))
        })?;
        Self::from_rules(&file.limiters)
    }

    pub fn from_rules(rules: &[LimiterRule]) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut limiters = Vec::with_capacity(rules.len());
        for rule in rules {
            if !seen.insert(rule.policy.as_str()) {
                return Err(GatewardenError::Config(format!(
                    "Duplicate limiter policy '{}'",
                    rule.policy
                )));
            }
            limiters.push((rule.policy.clone(), rule.to_config()?));
        }
        Ok(Self { limiters })
    }

    /// Limiter configuration for a policy node.
    pub fn get(&self, policy: &str) -> Option<&RateLimiterConfig> {
        self.limiters
            .iter()
            .find(|(id, _)| id == policy)
            .map(|(_, config)| config)
    }

    /// Every policy node and its limiter configuration, in file order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RateLimiterConfig)> {
        self.limiters.iter().map(|(id, config)| (id.as_str(), config))
    }

    /// Distinct counter names referenced by the policies.
    pub fn counter_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .limiters
            .iter()
            .map(|(_, config)| config.counter_name())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}
