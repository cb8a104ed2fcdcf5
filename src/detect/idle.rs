//! Idle detection: one notification per quiet period.
//!
//! The detector is deadline-polled rather than timer-driven: the host
//! calls [`IdleDetector::record_event`] for every captured interaction
//! and [`IdleDetector::poll`] from its tick loop. All times are epoch
//! milliseconds, which keeps every quiet-period property testable with
//! a synthetic clock.

use serde::{Deserialize, Serialize};

use crate::config;

/// Configuration for idle detection.
#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    /// Quiet time after the last event before the detector fires.
    pub idle_threshold_ms: i64,
    /// Minimum actual elapsed quiet time; shorter windows are suppressed.
    pub min_idle_duration_ms: i64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            idle_threshold_ms: config::DEFAULT_IDLE_THRESHOLD_MS,
            min_idle_duration_ms: config::DEFAULT_MIN_IDLE_DURATION_MS,
        }
    }
}

/// One detected quiet period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdleEpisode {
    /// Timestamp of the last event before the quiet period.
    pub started_at: i64,
    /// Quiet time actually elapsed when the episode fired.
    pub duration_ms: i64,
    /// Kind of the last event before the quiet period.
    pub last_event_kind: String,
}

/// Fires at most once per quiet period exceeding both thresholds.
#[derive(Debug)]
pub struct IdleDetector {
    config: IdleConfig,
    active: bool,
    fired: bool,
    last_event_at: Option<i64>,
    last_event_kind: String,
}

impl IdleDetector {
    pub fn new(config: IdleConfig) -> Self {
        Self {
            config,
            active: false,
            fired: false,
            last_event_at: None,
            last_event_kind: String::new(),
        }
    }

    /// Arm detection. Nothing fires until at least one event has been
    /// recorded after this call.
    pub fn start(&mut self) {
        self.active = true;
    }

    /// Cancel any pending deadline and prevent further firing until the
    /// detector is restarted and re-armed with a new event.
    pub fn stop(&mut self) {
        self.active = false;
        self.fired = false;
        self.last_event_at = None;
        self.last_event_kind.clear();
    }

    /// Stamp the last-event time/kind and reset the quiet-period
    /// deadline. Also re-arms firing after a previous episode.
    pub fn record_event(&mut self, kind: &str, now: i64) {
        if !self.active {
            return;
        }
        self.last_event_at = Some(now);
        self.last_event_kind = kind.to_string();
        self.fired = false;
    }

    /// Check the deadline. Returns the episode exactly once per quiet
    /// period; windows shorter than the minimum duration are consumed
    /// silently.
    pub fn poll(&mut self, now: i64) -> Option<IdleEpisode> {
        if !self.active || self.fired {
            return None;
        }
        let last = self.last_event_at?;
        let elapsed = now - last;
        if elapsed < self.config.idle_threshold_ms {
            return None;
        }
        self.fired = true;
        if elapsed < self.config.min_idle_duration_ms {
            return None;
        }
        Some(IdleEpisode {
            started_at: last,
            duration_ms: elapsed,
            last_event_kind: self.last_event_kind.clone(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> IdleDetector {
        let mut d = IdleDetector::new(IdleConfig {
            idle_threshold_ms: 2000,
            min_idle_duration_ms: 800,
        });
        d.start();
        d
    }

    #[test]
    fn test_fires_exactly_once_after_threshold() {
        let mut d = detector();
        d.record_event("click", 10_000);

        assert_eq!(d.poll(11_999), None);
        let episode = d.poll(12_000).expect("should fire at threshold");
        assert_eq!(episode.started_at, 10_000);
        assert_eq!(episode.duration_ms, 2000);
        assert_eq!(episode.last_event_kind, "click");

        // No re-fire without a new event, no matter how long we wait.
        assert_eq!(d.poll(12_001), None);
        assert_eq!(d.poll(50_000), None);
    }

    #[test]
    fn test_new_event_rearms() {
        let mut d = detector();
        d.record_event("click", 0);
        assert!(d.poll(2000).is_some());

        d.record_event("scroll", 3000);
        assert_eq!(d.poll(4999), None);
        let episode = d.poll(5000).expect("re-armed by the new event");
        assert_eq!(episode.last_event_kind, "scroll");
    }

    #[test]
    fn test_does_not_fire_before_any_event() {
        let mut d = detector();
        assert_eq!(d.poll(100_000), None);
    }

    #[test]
    fn test_event_resets_deadline() {
        let mut d = detector();
        d.record_event("click", 0);
        d.record_event("input", 1500);
        assert_eq!(d.poll(2000), None);
        assert_eq!(d.poll(3499), None);
        assert!(d.poll(3500).is_some());
    }

    #[test]
    fn test_stop_cancels_pending_deadline() {
        let mut d = detector();
        d.record_event("click", 0);
        d.stop();
        assert_eq!(d.poll(10_000), None);

        // Restart alone is not enough; a new event must re-arm.
        d.start();
        assert_eq!(d.poll(20_000), None);
        d.record_event("click", 20_000);
        assert!(d.poll(22_000).is_some());
    }

    #[test]
    fn test_short_window_suppressed() {
        let mut d = IdleDetector::new(IdleConfig {
            idle_threshold_ms: 500,
            min_idle_duration_ms: 800,
        });
        d.start();
        d.record_event("click", 0);
        // Threshold reached but below the minimum duration: suppressed,
        // and the guard is consumed.
        assert_eq!(d.poll(500), None);
        assert_eq!(d.poll(5000), None);
        d.record_event("click", 6000);
        assert!(d.poll(6900).is_some());
    }

    #[test]
    fn test_record_event_ignored_when_stopped() {
        let mut d = IdleDetector::new(IdleConfig::default());
        d.record_event("click", 0);
        d.start();
        assert_eq!(d.poll(100_000), None);
    }
}
