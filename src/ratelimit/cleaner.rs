//! Background eviction of idle counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::LimiterSettings;

use super::clock::Clock;
use super::limiter::AdmissionController;
use super::registry::CounterRegistry;

/// Periodically removes counters that hold no concurrency and have been
/// idle longer than the retention threshold.
///
/// Eviction is best effort. A name that comes back after eviction simply
/// gets a fresh counter.
pub struct Cleaner {
    registry: Arc<CounterRegistry>,
    clock: Arc<dyn Clock>,
    period: Duration,
    retention: Duration,
}

impl Cleaner {
    pub fn new(
        registry: Arc<CounterRegistry>,
        clock: Arc<dyn Clock>,
        settings: &LimiterSettings,
    ) -> Self {
        Self {
            registry,
            clock,
            period: settings.cleaner_period(),
            retention: settings.counter_retention(),
        }
    }

    /// A cleaner for the counters behind `controller`.
    pub fn for_controller(controller: &AdmissionController, settings: &LimiterSettings) -> Self {
        Self::new(
            Arc::clone(controller.registry()),
            Arc::clone(controller.clock()),
            settings,
        )
    }

    /// Run one pass now. Returns the number of counters evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let evicted = self.registry.evict_idle(now, self.retention);
        debug!(
            evicted = evicted,
            remaining = self.registry.len(),
            "Counter sweep finished"
        );
        evicted
    }

    /// Sweep every period on the current tokio runtime until shut down.
    pub fn spawn(self) -> CleanerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            period_ms = self.period.as_millis() as u64,
            retention_ms = self.retention.as_millis() as u64,
            "Starting counter cleaner"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.period.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Counter cleaner shutting down");
                        break;
                    }
                }
            }
        });

        CleanerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`Cleaner`] task.
pub struct CleanerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CleanerHandle {
    /// Stop the cleaner and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Counter cleaner task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::{CallScope, RateLimiterConfig};

    fn settings(period_ms: u64, retention_ms: u64) -> LimiterSettings {
        LimiterSettings {
            cleaner_period_ms: period_ms,
            counter_retention_ms: retention_ms,
            audit_rejections: false,
            ..LimiterSettings::default()
        }
    }

    #[test]
    fn test_sweep_evicts_only_idle_released_counters() {
        let clock = Arc::new(ManualClock::new());
        let settings = settings(1_000, 60_000);
        let controller = AdmissionController::new(&settings, clock.clone());
        let cleaner = Cleaner::for_controller(&controller, &settings);

        let idle = RateLimiterConfig::builder("idle")
            .max_requests_per_second(10)
            .build()
            .unwrap();
        let busy = RateLimiterConfig::builder("busy")
            .max_requests_per_second(10)
            .max_concurrency(5)
            .build()
            .unwrap();

        controller.check_request(&idle, &CallScope::new());
        let open = CallScope::new();
        controller.check_request(&busy, &open);

        assert_eq!(cleaner.sweep(), 0);

        clock.advance_millis(61_000);
        assert_eq!(cleaner.sweep(), 1);
        assert!(controller.registry().get("idle").is_none());
        assert!(controller.registry().get("busy").is_some());

        open.close();
        assert_eq!(cleaner.sweep(), 1);
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_evicted_name_starts_with_fresh_budget() {
        let clock = Arc::new(ManualClock::new());
        let settings = settings(1_000, 5_000);
        let controller = AdmissionController::new(&settings, clock.clone());
        let cleaner = Cleaner::for_controller(&controller, &settings);
        let config = RateLimiterConfig::builder("returning")
            .max_requests_per_second(1)
            .build()
            .unwrap();

        assert!(controller.check_request(&config, &CallScope::new()).is_allowed());
        clock.advance_millis(10_000);
        assert_eq!(cleaner.sweep(), 1);

        assert!(controller.check_request(&config, &CallScope::new()).is_allowed());
        assert_eq!(controller.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_cleaner_sweeps_and_shuts_down() {
        let clock = Arc::new(ManualClock::new());
        let settings = settings(10, 1_000);
        let controller = AdmissionController::new(&settings, clock.clone());
        let config = RateLimiterConfig::builder("background")
            .max_requests_per_second(10)
            .build()
            .unwrap();

        controller.check_request(&config, &CallScope::new());
        let handle = Cleaner::for_controller(&controller, &settings).spawn();

        clock.advance_millis(2_000);
        for _ in 0..200 {
            if controller.registry().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(controller.registry().is_empty());

        handle.shutdown().await;
    }
}
