//! Refresh clock deciding when a poll cycle starts.
//!
//! The monitor calls [`RefreshScheduler::tick`] on a fixed period. A cycle is
//! started when the countdown is about to reach zero, i.e. the remaining time
//! falls into the last tick-wide window before the due time. A tick that is
//! delayed past that window would miss it, so a watchdog also starts a cycle
//! once the due time has passed by more than the overdue margin.
//!
//! Only one cycle is ever in flight. `currently_fetching` is raised when a
//! cycle starts and lowered by [`RefreshScheduler::finish`] once every poll
//! of that cycle has settled; until then every trigger is ignored.

use std::time::Duration;

use tokio::time::Instant;

/// Shared refresh context.
///
/// Owned and written only by the monitor task.
#[derive(Debug, Clone)]
pub struct RefreshState {
    /// When the last cycle settled (or the monitor started). Written by
    /// `finish`.
    pub last_fetch: Instant,
    /// Target time between cycles. Written by `set_interval`.
    pub interval: Duration,
    /// A cycle is in flight. Raised by `tick`/`try_begin`, lowered by
    /// `finish`.
    pub currently_fetching: bool,
}

/// Progress towards the next cycle, for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Countdown {
    pub elapsed: Duration,
    /// Saturates at zero.
    pub remaining: Duration,
    /// 0 to 100.
    pub progress_percent: f64,
}

/// Why a cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Remaining time entered the window just before the due time.
    Due,
    /// The due time passed by more than the overdue margin.
    Overdue,
}

#[derive(Debug)]
pub struct RefreshScheduler {
    state: RefreshState,
    tick: Duration,
    overdue_margin: Duration,
}

impl RefreshScheduler {
    pub fn new(interval: Duration, tick: Duration, overdue_margin: Duration, now: Instant) -> Self {
        Self {
            state: RefreshState {
                last_fetch: now,
                interval,
                currently_fetching: false,
            },
            tick,
            overdue_margin,
        }
    }

    pub fn state(&self) -> &RefreshState {
        &self.state
    }

    pub fn interval(&self) -> Duration {
        self.state.interval
    }

    pub fn is_fetching(&self) -> bool {
        self.state.currently_fetching
    }

    /// Takes effect from the next tick; the current countdown is not reset.
    pub fn set_interval(&mut self, interval: Duration) {
        self.state.interval = interval;
    }

    pub fn countdown(&self, now: Instant) -> Countdown {
        let elapsed = now.saturating_duration_since(self.state.last_fetch);
        let remaining = self.state.interval.saturating_sub(elapsed);
        let progress_percent = if self.state.interval.is_zero() {
            100.0
        } else {
            (elapsed.as_secs_f64() / self.state.interval.as_secs_f64() * 100.0).min(100.0)
        };

        Countdown {
            elapsed,
            remaining,
            progress_percent,
        }
    }

    /// Whether a cycle should start at `now`, ignoring any cycle in flight.
    pub fn trigger(&self, now: Instant) -> Option<Trigger> {
        let elapsed = now.saturating_duration_since(self.state.last_fetch);

        if elapsed > self.state.interval + self.overdue_margin {
            return Some(Trigger::Overdue);
        }

        // Remaining before clamping; zero and negative values are outside
        // the window.
        let remaining = self.state.interval.checked_sub(elapsed)?;
        if !remaining.is_zero() && remaining <= self.tick {
            Some(Trigger::Due)
        } else {
            None
        }
    }

    /// Evaluate the clock at `now` and start a cycle if one is due and none
    /// is in flight.
    pub fn tick(&mut self, now: Instant) -> Option<Trigger> {
        if self.state.currently_fetching {
            return None;
        }
        let trigger = self.trigger(now)?;
        self.state.currently_fetching = true;
        Some(trigger)
    }

    /// Start a cycle outside the clock. Fails if one is already in flight.
    pub fn try_begin(&mut self) -> bool {
        if self.state.currently_fetching {
            false
        } else {
            self.state.currently_fetching = true;
            true
        }
    }

    /// Mark the in-flight cycle settled at `now` and restart the countdown.
    pub fn finish(&mut self, now: Instant) {
        self.state.currently_fetching = false;
        self.state.last_fetch = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);
    const MARGIN: Duration = Duration::from_millis(2000);

    fn scheduler(interval_ms: u64) -> (RefreshScheduler, Instant) {
        let now = Instant::now();
        (
            RefreshScheduler::new(Duration::from_millis(interval_ms), TICK, MARGIN, now),
            now,
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn countdown_progress() {
        let (s, t0) = scheduler(10_000);

        let c = s.countdown(t0 + ms(2_500));
        assert_eq!(c.elapsed, ms(2_500));
        assert_eq!(c.remaining, ms(7_500));
        assert!((c.progress_percent - 25.0).abs() < 1e-9);

        let c = s.countdown(t0 + ms(12_000));
        assert_eq!(c.remaining, Duration::ZERO);
        assert_eq!(c.progress_percent, 100.0);
    }

    #[test]
    fn fires_only_inside_the_window_before_due() {
        let (s, t0) = scheduler(10_000);

        assert_eq!(s.trigger(t0 + ms(9_850)), None);
        assert_eq!(s.trigger(t0 + ms(9_900)), Some(Trigger::Due));
        assert_eq!(s.trigger(t0 + ms(9_950)), Some(Trigger::Due));
        // Exactly due and shortly after are outside the window.
        assert_eq!(s.trigger(t0 + ms(10_000)), None);
        assert_eq!(s.trigger(t0 + ms(11_000)), None);
        assert_eq!(s.trigger(t0 + ms(12_000)), None);
    }

    #[test]
    fn watchdog_fires_once_overdue() {
        let (s, t0) = scheduler(10_000);
        assert_eq!(s.trigger(t0 + ms(12_001)), Some(Trigger::Overdue));
        assert_eq!(s.trigger(t0 + ms(60_000)), Some(Trigger::Overdue));
    }

    #[test]
    fn overlapping_cycle_is_rejected() {
        let (mut s, t0) = scheduler(10_000);

        assert_eq!(s.tick(t0 + ms(9_950)), Some(Trigger::Due));
        assert!(s.is_fetching());

        // Still in flight: neither the clock nor a manual request may start
        // another one.
        assert_eq!(s.tick(t0 + ms(30_000)), None);
        assert!(!s.try_begin());

        s.finish(t0 + ms(10_500));
        assert!(!s.is_fetching());
        assert!(s.try_begin());
    }

    #[test]
    fn finish_restarts_the_countdown() {
        let (mut s, t0) = scheduler(10_000);
        assert!(s.try_begin());
        s.finish(t0 + ms(10_400));

        assert_eq!(s.countdown(t0 + ms(10_400)).remaining, ms(10_000));
        assert_eq!(s.state().last_fetch, t0 + ms(10_400));
        assert_eq!(s.trigger(t0 + ms(20_000)), None);
        assert_eq!(s.trigger(t0 + ms(20_350)), Some(Trigger::Due));
    }

    #[test]
    fn new_interval_applies_to_running_countdown() {
        let (mut s, t0) = scheduler(10_000);
        s.set_interval(ms(5_000));
        assert_eq!(s.interval(), ms(5_000));
        assert_eq!(s.trigger(t0 + ms(4_950)), Some(Trigger::Due));
    }
}
