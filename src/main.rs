use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatewarden::config::{GatewardenConfig, LogFormat};
use gatewarden::ratelimit::{
    AdmissionController, Cleaner, PolicySet, RateLimiterConfig, SystemClock,
};
use gatewarden::simulate::{self, SimulationPlan};

#[derive(Debug, Parser)]
#[command(
    name = "gatewarden",
    version,
    about = "Named-counter rate limiter and admission controller"
)]
struct Args {
    /// YAML configuration file; GATEWARDEN_* variables override it,
    /// e.g. GATEWARDEN_LIMITER__MAX_SLEEP_THREADS=8
    #[arg(long, short, global = true)]
    config: Option<String>,

    /// Limiter policy file, overriding `policies_path` from the configuration
    #[arg(long, short, global = true)]
    policies: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<FormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Plain,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate the configuration and policies
    Check,
    /// Drive synthetic traffic through the configured limiters
    Simulate {
        /// Concurrent request threads
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Calls per thread
        #[arg(long, default_value_t = 1000)]
        requests: usize,
        /// Only exercise limiters on this counter
        #[arg(long)]
        counter: Option<String>,
        /// Milliseconds an admitted call holds its scope open
        #[arg(long, default_value_t = 0)]
        work_ms: u64,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewardenConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(format) = args.log_format {
        config.log.format = match format {
            FormatArg::Plain => LogFormat::Plain,
            FormatArg::Json => LogFormat::Json,
        };
    }
    init_tracing(&config);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let policies = match args.policies.as_deref().or(config.policies_path.as_deref()) {
        Some(path) => PolicySet::from_file(path).context("Failed to load limiter policies")?,
        None => PolicySet::new(),
    };
    info!(policies = policies.len(), "Limiter policies loaded");

    match args.command {
        Command::Check => {
            for (policy, limiter) in policies.iter() {
                println!(
                    "{policy}: counter={} rps={} window={}s concurrency={} hard={} shape={} log_only={}",
                    limiter.counter_name(),
                    limiter.max_requests_per_second(),
                    limiter.window_size().as_secs(),
                    limiter.max_concurrency(),
                    limiter.hard_limit(),
                    limiter.shape_requests(),
                    limiter.log_only(),
                );
            }
            println!(
                "{} policies over {} counters OK",
                policies.len(),
                policies.counter_names().len()
            );
            Ok(())
        }
        Command::Simulate {
            threads,
            requests,
            counter,
            work_ms,
            json,
        } => {
            let limiters: Vec<RateLimiterConfig> = policies
                .iter()
                .map(|(_, limiter)| limiter)
                .filter(|limiter| counter.as_deref().map_or(true, |c| limiter.counter_name() == c))
                .cloned()
                .collect();
            if limiters.is_empty() {
                bail!("No limiter policies to simulate; pass --policies");
            }

            let controller = Arc::new(AdmissionController::new(
                &config.limiter,
                Arc::new(SystemClock),
            ));
            let cleaner = Cleaner::for_controller(&controller, &config.limiter).spawn();

            let plan = SimulationPlan {
                threads,
                requests_per_thread: requests,
                limiters,
                work: Duration::from_millis(work_ms),
            };

            let report = tokio::select! {
                report = simulate::run(Arc::clone(&controller), plan) => report?,
                _ = shutdown_signal() => {
                    cleaner.shutdown().await;
                    bail!("Simulation interrupted");
                }
            };
            cleaner.shutdown().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let stats = &report.stats;
                println!("elapsed:                {} ms", report.elapsed_ms);
                println!(
                    "allowed:                {} ({} shaped, {} log-only)",
                    stats.allowed, stats.shaped, stats.log_only_passed
                );
                println!("rejected:               {}", stats.rejected());
                println!(
                    "  concurrency exceeded: {}",
                    stats.concurrency_exceeded
                );
                println!("  rate exceeded:        {}", stats.rate_exceeded);
                println!(
                    "  sleep quota:          {}",
                    stats.sleep_quota_exhausted
                );
                println!(
                    "  shaping delay:        {}",
                    stats.shaping_delay_exceeded
                );
                println!("  blacked out:          {}", stats.blacked_out);
                println!(
                    "admitted/sec:           {:.1}",
                    report.admitted_per_second()
                );
            }
            Ok(())
        }
    }
}

fn init_tracing(config: &GatewardenConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match config.log.format {
        LogFormat::Plain => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
