//! Admission decisions for named counters.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace};

use crate::config::LimiterSettings;

use super::clock::Clock;
use super::counter::Counter;
use super::registry::CounterRegistry;
use super::rules::RateLimiterConfig;
use super::scope::CallScope;
use super::sleep_pool::SleepSlotPool;
use super::stats::{AdmissionStats, StatsSnapshot};

/// Why a call was turned away.
///
/// Callers only act on [`Decision::Allowed`] versus [`Decision::Rejected`];
/// the reason exists for logs and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Too many calls outstanding against the counter
    ConcurrencyExceeded,
    /// Window budget spent and the limiter does not wait
    RateExceeded,
    /// Window budget spent and every node-wide sleep slot is taken
    SleepQuotaExhausted,
    /// Waiting again would push the call past the maximum shaping delay
    ShapingDelayExceeded,
    /// The counter is refusing calls after an earlier rate failure
    BlackedOut,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ConcurrencyExceeded => "concurrency_exceeded",
            RejectReason::RateExceeded => "rate_exceeded",
            RejectReason::SleepQuotaExhausted => "sleep_quota_exhausted",
            RejectReason::ShapingDelayExceeded => "shaping_delay_exceeded",
            RejectReason::BlackedOut => "blacked_out",
        }
    }

    /// Rejections that start a blackout period.
    fn is_rate_failure(&self) -> bool {
        matches!(
            self,
            RejectReason::RateExceeded
                | RejectReason::SleepQuotaExhausted
                | RejectReason::ShapingDelayExceeded
        )
    }

    fn audit_message(&self) -> &'static str {
        match self {
            RejectReason::ConcurrencyExceeded => "Concurrency limit exceeded",
            RejectReason::RateExceeded => "Rate limit exceeded",
            RejectReason::SleepQuotaExhausted => {
                "Cannot delay request, node-wide queued thread limit reached"
            }
            RejectReason::ShapingDelayExceeded => {
                "Cannot delay request further, maximum shaping delay reached"
            }
            RejectReason::BlackedOut => "Counter blacked out after an earlier rate failure",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected(RejectReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Decision::Allowed => None,
            Decision::Rejected(reason) => Some(*reason),
        }
    }
}

/// Read-only view of a counter, as seen by one limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub counter_name: String,
    /// Calls currently holding a concurrency slot
    pub concurrency: u64,
    /// Budget left in the current window for this configuration's limit
    pub requests_remaining: u64,
    /// Time left in an active blackout
    pub blackout_remaining: Option<Duration>,
}

/// Decides whether calls may proceed under their limiter configuration.
///
/// One controller serves every policy node on a gateway. It owns no global
/// state: the counter registry, sleep quota and clock are injected, so
/// independent instances never interfere.
pub struct AdmissionController {
    registry: Arc<CounterRegistry>,
    sleep_slots: Arc<SleepSlotPool>,
    clock: Arc<dyn Clock>,
    max_shaping_delay: Duration,
    audit_rejections: bool,
    stats: AdmissionStats,
}

impl AdmissionController {
    /// Create a controller with its own registry and sleep quota.
    pub fn new(settings: &LimiterSettings, clock: Arc<dyn Clock>) -> Self {
        Self::with_parts(
            Arc::new(CounterRegistry::new()),
            Arc::new(SleepSlotPool::new(settings.max_sleep_threads)),
            clock,
            settings,
        )
    }

    /// Create a controller over an existing registry and sleep quota.
    pub fn with_parts(
        registry: Arc<CounterRegistry>,
        sleep_slots: Arc<SleepSlotPool>,
        clock: Arc<dyn Clock>,
        settings: &LimiterSettings,
    ) -> Self {
        Self {
            registry,
            sleep_slots,
            clock,
            max_shaping_delay: settings.max_shaping_delay(),
            audit_rejections: settings.audit_rejections,
            stats: AdmissionStats::new(),
        }
    }

    /// Decide whether one call may proceed.
    ///
    /// When the configuration caps concurrency, a slot is taken and its
    /// release is bound to `scope`, whatever the decision. A rejected call
    /// keeps its slot until the caller closes the scope.
    ///
    /// May block the calling thread while shaping, for at most the
    /// configured maximum shaping delay.
    pub fn check_request(&self, config: &RateLimiterConfig, scope: &CallScope) -> Decision {
        let now = self.clock.now();
        let counter = self.registry.get_or_create(config.counter_name(), now);

        trace!(counter = %config.counter_name(), "Checking admission");

        if config.max_concurrency() > 0 {
            let outstanding = counter.acquire_concurrency();
            let held = Arc::clone(&counter);
            scope.on_release(move || held.release_concurrency());

            if outstanding > config.max_concurrency() {
                return self.refuse(config, &counter, RejectReason::ConcurrencyExceeded, now);
            }
        }

        if counter.blacked_out_until(now).is_some() {
            return self.refuse(config, &counter, RejectReason::BlackedOut, now);
        }

        self.check_rate(config, &counter)
    }

    /// Rate check, waiting for later windows when shaping is allowed.
    fn check_rate(&self, config: &RateLimiterConfig, counter: &Counter) -> Decision {
        let limit = config.window_budget();
        let window = config.window_size();
        let mut slept = Duration::ZERO;

        loop {
            let now = self.clock.now();
            if counter.try_consume(now, limit, window) {
                self.stats.record_allowed(!slept.is_zero());
                trace!(
                    counter = %counter.name(),
                    slept_ms = slept.as_millis() as u64,
                    "Request admitted"
                );
                return Decision::Allowed;
            }

            if config.log_only() || !config.shaping_enabled() {
                return self.refuse(config, counter, RejectReason::RateExceeded, now);
            }

            let delay = counter.delay_until_reset(now, window);
            if delay.is_zero() {
                continue;
            }
            if slept + delay > self.max_shaping_delay {
                return self.refuse(config, counter, RejectReason::ShapingDelayExceeded, now);
            }

            // Held across the sleep, released before the next attempt
            let Some(_slot) = self.sleep_slots.acquire_slot() else {
                return self.refuse(config, counter, RejectReason::SleepQuotaExhausted, now);
            };

            trace!(
                counter = %counter.name(),
                delay_ms = delay.as_millis() as u64,
                "Delaying over-budget request"
            );
            self.clock.sleep(delay);
            slept += delay;
        }
    }

    /// Turn a call away, or let it through if the limiter only logs.
    fn refuse(
        &self,
        config: &RateLimiterConfig,
        counter: &Counter,
        reason: RejectReason,
        now: Instant,
    ) -> Decision {
        if self.audit_rejections {
            info!(
                counter = %counter.name(),
                reason = %reason,
                log_only = config.log_only(),
                "{}",
                reason.audit_message()
            );
        }

        if config.log_only() {
            self.stats.record_log_only();
            return Decision::Allowed;
        }

        if reason.is_rate_failure() {
            if let Some(period) = config.blackout_period() {
                counter.black_out(now, period);
            }
        }

        self.stats.record_rejected(reason);
        Decision::Rejected(reason)
    }

    /// Inspect the counter behind `config` without consuming budget.
    pub fn query(&self, config: &RateLimiterConfig) -> CounterSnapshot {
        let now = self.clock.now();
        let limit = config.window_budget();

        match self.registry.get(config.counter_name()) {
            Some(counter) => CounterSnapshot {
                counter_name: config.counter_name().to_string(),
                concurrency: counter.concurrency(),
                requests_remaining: counter.remaining(now, limit, config.window_size()),
                blackout_remaining: counter
                    .blacked_out_until(now)
                    .map(|until| until.saturating_duration_since(now)),
            },
            None => CounterSnapshot {
                counter_name: config.counter_name().to_string(),
                concurrency: 0,
                requests_remaining: limit,
                blackout_remaining: None,
            },
        }
    }

    /// Change the node-wide sleep quota. Calls already sleeping keep their slots.
    pub fn set_max_sleep_threads(&self, max: usize) {
        info!(max_sleep_threads = max, "Updating node-wide sleep quota");
        self.sleep_slots.set_limit(max);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &Arc<CounterRegistry> {
        &self.registry
    }

    pub fn sleep_slots(&self) -> &Arc<SleepSlotPool> {
        &self.sleep_slots
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("counters", &self.registry.len())
            .field("sleep_slots", &self.sleep_slots)
            .field("max_shaping_delay", &self.max_shaping_delay)
            .finish()
    }
}
