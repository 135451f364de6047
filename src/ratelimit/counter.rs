//! Per-name rate and concurrency state.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Length of an accounting window unless a limiter configures its own.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Everything guarded by the counter's lock.
#[derive(Debug)]
struct WindowState {
    /// When the current window started
    start: Instant,
    /// Requests admitted in the current window
    count: u64,
    /// Last time any call referenced this counter
    last_touched: Instant,
    /// Calls are refused until this instant, if set
    blackout_until: Option<Instant>,
}

impl WindowState {
    fn reset_if_expired(&mut self, now: Instant, window: Duration) {
        if now.saturating_duration_since(self.start) >= window {
            self.start = now;
            self.count = 0;
        }
    }
}

/// Mutable state for one named budget.
///
/// The window start and count always change together under a single mutex,
/// so no caller can observe a torn pair. The concurrency count is a plain
/// atomic because it is adjusted independently of the window.
#[derive(Debug)]
pub struct Counter {
    name: String,
    window: Mutex<WindowState>,
    concurrent: AtomicU64,
}

impl Counter {
    /// Create a counter whose first window starts at `now`.
    pub fn new(name: impl Into<String>, now: Instant) -> Self {
        Self {
            name: name.into(),
            window: Mutex::new(WindowState {
                start: now,
                count: 0,
                last_touched: now,
                blackout_until: None,
            }),
            concurrent: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a new window if a full `window` has elapsed since the current one began.
    pub fn reset_if_expired(&self, now: Instant, window: Duration) {
        self.window.lock().reset_if_expired(now, window);
    }

    /// Take one unit of budget from the current window.
    ///
    /// Returns `false` without changing anything if the window already holds
    /// `limit` admissions.
    pub fn try_consume(&self, now: Instant, limit: u64, window: Duration) -> bool {
        let mut state = self.window.lock();
        state.reset_if_expired(now, window);
        state.last_touched = state.last_touched.max(now);

        if state.count < limit {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Time until the current window rolls over, zero if it already has.
    pub fn delay_until_reset(&self, now: Instant, window: Duration) -> Duration {
        let state = self.window.lock();
        window.saturating_sub(now.saturating_duration_since(state.start))
    }

    /// Admissions counted in the window that is current at `now`.
    pub fn count_in_window(&self, now: Instant, window: Duration) -> u64 {
        let state = self.window.lock();
        if now.saturating_duration_since(state.start) >= window {
            0
        } else {
            state.count
        }
    }

    /// Budget left in the window that is current at `now`.
    pub fn remaining(&self, now: Instant, limit: u64, window: Duration) -> u64 {
        limit.saturating_sub(self.count_in_window(now, window))
    }

    /// Record activity for the cleaner.
    pub fn touch(&self, now: Instant) {
        let mut state = self.window.lock();
        state.last_touched = state.last_touched.max(now);
    }

    /// How long the counter has gone unreferenced.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window.lock().last_touched)
    }

    /// The end of the active blackout, if one is in effect at `now`.
    pub fn blacked_out_until(&self, now: Instant) -> Option<Instant> {
        self.window.lock().blackout_until.filter(|until| now < *until)
    }

    /// Refuse calls until `now + period`. An active blackout is left as is.
    pub fn black_out(&self, now: Instant, period: Duration) {
        let mut state = self.window.lock();
        if matches!(state.blackout_until, Some(until) if now < until) {
            return;
        }
        match now.checked_add(period) {
            Some(until) => state.blackout_until = Some(until),
            None => {
                warn!(
                    counter = %self.name,
                    period_secs = period.as_secs(),
                    "Blackout period out of range; not blacking out"
                );
            }
        }
    }

    /// Take a concurrency slot, returning the count including this call.
    pub fn acquire_concurrency(&self) -> u64 {
        self.concurrent.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Give back a concurrency slot.
    pub fn release_concurrency(&self) {
        let released = self
            .concurrent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released.is_err() {
            warn!(counter = %self.name, "Concurrency released below zero; ignoring");
        }
    }

    /// Calls currently holding a concurrency slot.
    pub fn concurrency(&self) -> u64 {
        self.concurrent.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_within_limit() {
        let now = Instant::now();
        let counter = Counter::new("orders", now);

        for _ in 0..5 {
            assert!(counter.try_consume(now, 5, WINDOW));
        }
        assert_eq!(counter.count_in_window(now, WINDOW), 5);
        assert_eq!(counter.remaining(now, 5, WINDOW), 0);
    }

    #[test]
    fn test_consume_exceeds_limit() {
        let now = Instant::now();
        let counter = Counter::new("orders", now);

        for _ in 0..3 {
            assert!(counter.try_consume(now, 3, WINDOW));
        }
        assert!(!counter.try_consume(now, 3, WINDOW));
        // A refused call does not count
        assert_eq!(counter.count_in_window(now, WINDOW), 3);
    }

    #[test]
    fn test_window_rolls_over_after_one_second() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        assert!(counter.try_consume(start, 1, WINDOW));
        assert!(!counter.try_consume(start + Duration::from_millis(999), 1, WINDOW));
        assert!(counter.try_consume(start + WINDOW, 1, WINDOW));
        assert!(!counter.try_consume(start + WINDOW, 1, WINDOW));
    }

    #[test]
    fn test_window_is_fixed_not_sliding() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        // Consuming late in the window does not push the boundary out
        assert!(counter.try_consume(start + Duration::from_millis(900), 1, WINDOW));
        assert!(counter.try_consume(start + Duration::from_millis(1000), 1, WINDOW));
    }

    #[test]
    fn test_delay_until_reset() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        assert_eq!(
            counter.delay_until_reset(start + Duration::from_millis(300), WINDOW),
            Duration::from_millis(700)
        );
        assert_eq!(counter.delay_until_reset(start + WINDOW * 2, WINDOW), Duration::ZERO);
    }

    #[test]
    fn test_clock_running_backwards_does_not_reset() {
        let start = Instant::now() + Duration::from_secs(10);
        let counter = Counter::new("orders", start);

        assert!(counter.try_consume(start, 1, WINDOW));
        assert!(!counter.try_consume(start - Duration::from_secs(5), 1, WINDOW));
    }

    #[test]
    fn test_reset_if_expired() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);
        counter.try_consume(start, 10, WINDOW);

        counter.reset_if_expired(start + Duration::from_millis(500), WINDOW);
        assert_eq!(counter.count_in_window(start + Duration::from_millis(500), WINDOW), 1);

        let later = start + Duration::from_millis(1500);
        counter.reset_if_expired(later, WINDOW);
        assert_eq!(counter.count_in_window(later, WINDOW), 0);
        assert_eq!(counter.delay_until_reset(later, WINDOW), WINDOW);
    }

    #[test]
    fn test_concurrency_acquire_release() {
        let counter = Counter::new("orders", Instant::now());

        assert_eq!(counter.acquire_concurrency(), 1);
        assert_eq!(counter.acquire_concurrency(), 2);
        counter.release_concurrency();
        assert_eq!(counter.concurrency(), 1);
        counter.release_concurrency();
        counter.release_concurrency();
        assert_eq!(counter.concurrency(), 0);
    }

    #[test]
    fn test_blackout_is_not_extended() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        counter.black_out(start, Duration::from_secs(5));
        counter.black_out(start + Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(
            counter.blacked_out_until(start + Duration::from_secs(1)),
            Some(start + Duration::from_secs(5))
        );
        assert_eq!(counter.blacked_out_until(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn test_longer_window_holds_budget_until_it_ends() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);
        let window = Duration::from_secs(10);

        assert!(counter.try_consume(start, 1, window));
        assert!(!counter.try_consume(start + Duration::from_secs(9), 1, window));
        assert_eq!(
            counter.delay_until_reset(start + Duration::from_secs(4), window),
            Duration::from_secs(6)
        );
        assert!(counter.try_consume(start + window, 1, window));
    }

    #[test]
    fn test_blackout_past_clock_range_is_ignored() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        counter.black_out(start, Duration::from_secs(u64::MAX));
        assert_eq!(counter.blacked_out_until(start), None);
    }

    #[test]
    fn test_idle_tracking() {
        let start = Instant::now();
        let counter = Counter::new("orders", start);

        assert_eq!(counter.idle_for(start + Duration::from_secs(3)), Duration::from_secs(3));
        counter.touch(start + Duration::from_secs(3));
        assert_eq!(counter.idle_for(start + Duration::from_secs(4)), Duration::from_secs(1));
    }
}
