//! Named-counter rate limiting and admission control.

mod cleaner;
mod clock;
mod counter;
mod limiter;
mod registry;
mod rules;
mod scope;
mod sleep_pool;
mod stats;

pub use cleaner::{Cleaner, CleanerHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{Counter, WINDOW};
pub use limiter::{AdmissionController, CounterSnapshot, Decision, RejectReason};
pub use registry::CounterRegistry;
pub use rules::{
    LimiterRule, PolicySet, RateLimiterConfig, RateLimiterConfigBuilder, MAX_BLACKOUT_PERIOD,
    MAX_WINDOW_SIZE,
};
pub use scope::CallScope;
pub use sleep_pool::{SleepSlot, SleepSlotPool};
pub use stats::{AdmissionStats, StatsSnapshot};
