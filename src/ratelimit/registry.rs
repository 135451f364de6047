//! Concurrent name-to-counter map.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::counter::Counter;

/// Get-or-create map from counter name to [`Counter`].
///
/// Backed by a sharded map so lookups for unrelated names do not contend.
/// Each counter carries its own lock; the map lock is only held while
/// resolving the entry.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, Arc<Counter>>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the counter for `name`, creating it on first reference.
    ///
    /// Concurrent first lookups of the same name get the same instance. The
    /// counter is touched while the map entry is still locked, so a sweep
    /// running at the same moment sees it as freshly used.
    pub fn get_or_create(&self, name: &str, now: Instant) -> Arc<Counter> {
        if let Some(existing) = self.counters.get(name) {
            existing.touch(now);
            return Arc::clone(existing.value());
        }

        let entry = self.counters.entry(name.to_string()).or_insert_with(|| {
            debug!(counter = %name, "Creating rate limit counter");
            Arc::new(Counter::new(name, now))
        });
        entry.touch(now);
        Arc::clone(entry.value())
    }

    /// Look up a counter without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Remove counters that hold no concurrency and have been idle for at
    /// least `retention`. Returns how many were removed.
    pub fn evict_idle(&self, now: Instant, retention: Duration) -> usize {
        let before = self.counters.len();
        self.counters.retain(|name, counter| {
            let evict = counter.concurrency() == 0 && counter.idle_for(now) >= retention;
            if evict {
                debug!(counter = %name, "Evicting idle rate limit counter");
            }
            !evict
        });
        before.saturating_sub(self.counters.len())
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
