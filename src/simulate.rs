//! Synthetic load driver.
//!
//! Runs request handlers on tokio's blocking pool, one call per iteration,
//! so the limiter sees the thread-per-request traffic it is built for.

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{GatewardenError, Result};
use crate::ratelimit::{AdmissionController, CallScope, RateLimiterConfig, StatsSnapshot};

/// What to drive through the limiter.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    /// Concurrent request threads
    pub threads: usize,
    /// Calls issued by each thread
    pub requests_per_thread: usize,
    /// Limiters to pick from at random for each call
    pub limiters: Vec<RateLimiterConfig>,
    /// Time an admitted call spends holding its scope open
    pub work: Duration,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub counters: usize,
    pub stats: StatsSnapshot,
}

impl SimulationReport {
    /// Admitted calls per second of wall time.
    pub fn admitted_per_second(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return self.stats.allowed as f64;
        }
        self.stats.allowed as f64 * 1000.0 / self.elapsed_ms as f64
    }
}

/// Drive `plan` through `controller` and report what happened.
pub async fn run(
    controller: Arc<AdmissionController>,
    plan: SimulationPlan,
) -> Result<SimulationReport> {
    if plan.limiters.is_empty() {
        return Err(GatewardenError::Config(
            "simulation needs at least one limiter".to_string(),
        ));
    }

    info!(
        threads = plan.threads,
        requests_per_thread = plan.requests_per_thread,
        limiters = plan.limiters.len(),
        "Starting simulation"
    );

    let limiters = Arc::new(plan.limiters);
    let started = Instant::now();

    let workers: Vec<_> = (0..plan.threads)
        .map(|worker| {
            let controller = Arc::clone(&controller);
            let limiters = Arc::clone(&limiters);
            let requests = plan.requests_per_thread;
            let work = plan.work;
            tokio::task::spawn_blocking(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..requests {
                    let config = &limiters[rng.gen_range(0..limiters.len())];
                    let scope = CallScope::new();
                    if controller.check_request(config, &scope).is_allowed() && !work.is_zero() {
                        std::thread::sleep(work);
                    }
                }
                debug!(worker = worker, "Simulation worker finished");
            })
        })
        .collect();

    for worker in workers {
        worker.await?;
    }

    let report = SimulationReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        counters: controller.registry().len(),
        stats: controller.stats(),
    };
    info!(
        allowed = report.stats.allowed,
        rejected = report.stats.rejected(),
        elapsed_ms = report.elapsed_ms,
        "Simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterSettings;
    use crate::ratelimit::SystemClock;

    fn controller() -> Arc<AdmissionController> {
        let settings = LimiterSettings {
            audit_rejections: false,
            ..LimiterSettings::default()
        };
        Arc::new(AdmissionController::new(&settings, Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn test_run_counts_every_call() {
        let plan = SimulationPlan {
            threads: 4,
            requests_per_thread: 25,
            limiters: vec![RateLimiterConfig::builder("sim")
                .max_requests_per_second(1_000_000)
                .build()
                .unwrap()],
            work: Duration::ZERO,
        };

        let report = run(controller(), plan).await.unwrap();
        assert_eq!(report.stats.total(), 100);
        assert_eq!(report.stats.allowed, 100);
        assert_eq!(report.counters, 1);
    }

    #[tokio::test]
    async fn test_run_enforces_limit() {
        let plan = SimulationPlan {
            threads: 4,
            requests_per_thread: 50,
            limiters: vec![RateLimiterConfig::builder("tight")
                .max_requests_per_second(10)
                .hard_limit(true)
                .build()
                .unwrap()],
            work: Duration::ZERO,
        };

        let report = run(controller(), plan).await.unwrap();
        assert_eq!(report.stats.total(), 200);
        assert!(report.stats.rate_exceeded > 0);
    }

    #[tokio::test]
    async fn test_run_requires_limiters() {
        let plan = SimulationPlan {
            threads: 1,
            requests_per_thread: 1,
            limiters: Vec::new(),
            work: Duration::ZERO,
        };
        assert!(run(controller(), plan).await.is_err());
    }
}
