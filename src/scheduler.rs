//! When to scan.
//!
//! Pure bookkeeping over `tokio::time::Instant`; the controller owns the
//! actual timer and asks [`RefreshScheduler::next_due`] how long to sleep.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RefreshScheduler {
    base: Duration,
    ceiling: Duration,
    visible: bool,
    suspended: bool,
    in_flight: bool,
    consecutive_failures: u32,
    next_due: Option<Instant>,
}

impl Default for RefreshScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_INTERVAL, DEFAULT_MAX_INTERVAL)
    }
}

impl RefreshScheduler {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            visible: false,
            suspended: false,
            in_flight: false,
            consecutive_failures: 0,
            next_due: None,
        }
    }

    /// Delay before the next periodic scan, doubled per consecutive failure
    pub fn interval(&self) -> Duration {
        let factor = 1u32 << self.consecutive_failures.min(16);
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// When the next periodic scan should start, if one is scheduled
    pub fn next_due(&self) -> Option<Instant> {
        if !self.visible || self.suspended || self.in_flight {
            return None;
        }
        self.next_due
    }

    /// Returns true when the screen just became visible and a scan should
    /// start immediately.
    pub fn set_visible(&mut self, visible: bool, now: Instant) -> bool {
        let regained = visible && !self.visible;
        self.visible = visible;
        if regained {
            debug!("Screen visible; refreshing now");
            self.next_due = Some(now);
        } else if !visible {
            self.next_due = None;
        }
        regained
    }

    /// Stop periodic scans (tethering) or resume them
    pub fn set_suspended(&mut self, suspended: bool, now: Instant) {
        if self.suspended == suspended {
            return;
        }
        self.suspended = suspended;
        if !suspended && self.visible {
            self.next_due = Some(now);
        }
    }

    /// Claim the single scan slot. A request while a scan is outstanding,
    /// while hidden or while suspended is dropped.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if !self.visible || self.suspended {
            trace!("Refresh dropped: screen hidden or scanning suspended");
            return false;
        }
        if self.in_flight {
            trace!("Refresh dropped: scan already in flight");
            return false;
        }
        self.in_flight = true;
        self.next_due = None;
        trace!("Scan started at {:?}", now);
        true
    }

    pub fn finish(&mut self, success: bool, now: Instant) {
        self.in_flight = false;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        let interval = self.interval();
        if !success {
            debug!(
                "Scan failed {} time(s) in a row; next in {:?}",
                self.consecutive_failures, interval
            );
        }
        self.next_due = Some(now + interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visible_scheduler(now: Instant) -> RefreshScheduler {
        let mut scheduler =
            RefreshScheduler::new(Duration::from_secs(5), Duration::from_secs(60));
        scheduler.set_visible(true, now);
        scheduler
    }

    #[test]
    fn backoff_grows_to_ceiling_and_resets() {
        let now = Instant::now();
        let mut scheduler = visible_scheduler(now);
        assert_eq!(scheduler.interval(), Duration::from_secs(5));

        let mut previous = scheduler.interval();
        for _ in 0..3 {
            assert!(scheduler.try_begin(now));
            scheduler.finish(false, now);
            assert!(scheduler.interval() > previous);
            previous = scheduler.interval();
        }
        assert_eq!(previous, Duration::from_secs(40));

        for _ in 0..10 {
            assert!(scheduler.try_begin(now));
            scheduler.finish(false, now);
        }
        assert_eq!(scheduler.interval(), Duration::from_secs(60));

        assert!(scheduler.try_begin(now));
        scheduler.finish(true, now);
        assert_eq!(scheduler.interval(), Duration::from_secs(5));
        assert_eq!(scheduler.next_due(), Some(now + Duration::from_secs(5)));
    }

    #[test]
    fn only_one_scan_in_flight() {
        let now = Instant::now();
        let mut scheduler = visible_scheduler(now);
        assert!(scheduler.try_begin(now));
        assert!(!scheduler.try_begin(now));
        assert_eq!(scheduler.next_due(), None);
        scheduler.finish(true, now);
        assert!(scheduler.try_begin(now));
    }

    #[test]
    fn hidden_screen_does_not_scan() {
        let now = Instant::now();
        let mut scheduler = RefreshScheduler::default();
        assert!(!scheduler.try_begin(now));
        assert_eq!(scheduler.next_due(), None);

        assert!(scheduler.set_visible(true, now));
        assert_eq!(scheduler.next_due(), Some(now));
        // Already visible: no second immediate refresh
        assert!(!scheduler.set_visible(true, now));

        scheduler.set_visible(false, now);
        assert_eq!(scheduler.next_due(), None);
        assert!(!scheduler.try_begin(now));
    }

    #[test]
    fn suspension_blocks_scans_until_lifted() {
        let now = Instant::now();
        let mut scheduler = visible_scheduler(now);
        scheduler.set_suspended(true, now);
        assert!(!scheduler.try_begin(now));
        assert_eq!(scheduler.next_due(), None);

        let later = now + Duration::from_secs(30);
        scheduler.set_suspended(false, later);
        assert_eq!(scheduler.next_due(), Some(later));
    }
}
