// Transport timeline tracking - measure/beat snapshots and beat-edge detection
// The countdown is driven by observed beat edges, never wall-clock time, so
// tempo changes and host pause/resume are honored for free

use serde::{Deserialize, Serialize};

/// Where the host transport is in musical time, as of one poll
/// Measures are 1-based (matching the host's display); the beat within the
/// measure is 0-based and fractional
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSnapshot {
    pub measure: i64,
    pub beat_in_measure: f64,
    pub beats_per_measure: u32,
}

impl TimingSnapshot {
    /// The whole-beat index used for edge detection
    pub fn whole_beat(&self) -> i64 {
        self.beat_in_measure.floor() as i64
    }
}

impl Default for TimingSnapshot {
    fn default() -> Self {
        TimingSnapshot {
            measure: 1,
            beat_in_measure: 0.0,
            beats_per_measure: 4,
        }
    }
}

/// Detects beat edges between consecutive polls
/// An edge is any change of the integer beat or the measure number; a host
/// that is stopped reports the same position every poll and produces none
#[derive(Debug, Default)]
pub struct BeatTracker {
    last: Option<(i64, i64)>,
}

impl BeatTracker {
    pub fn new() -> Self {
        BeatTracker { last: None }
    }

    /// Feed one snapshot; returns true if a beat edge occurred since the
    /// previous call. The very first observation is never an edge.
    pub fn observe(&mut self, snapshot: &TimingSnapshot) -> bool {
        let current = (snapshot.measure, snapshot.whole_beat());
        let edge = match self.last {
            Some(previous) => previous != current,
            None => false,
        };
        self.last = Some(current);
        edge
    }

    /// Forget the previous position, e.g. after a seek
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(measure: i64, beat: f64) -> TimingSnapshot {
        TimingSnapshot {
            measure,
            beat_in_measure: beat,
            beats_per_measure: 4,
        }
    }

    #[test]
    fn test_first_observation_is_not_an_edge() {
        let mut tracker = BeatTracker::new();
        assert!(!tracker.observe(&snap(1, 0.0)));
    }

    #[test]
    fn test_edge_on_beat_change() {
        let mut tracker = BeatTracker::new();
        tracker.observe(&snap(1, 0.2));
        assert!(!tracker.observe(&snap(1, 0.9))); // same beat, no edge
        assert!(tracker.observe(&snap(1, 1.1))); // beat 0 -> 1
        assert!(!tracker.observe(&snap(1, 1.8)));
    }

    #[test]
    fn test_edge_on_measure_change() {
        let mut tracker = BeatTracker::new();
        tracker.observe(&snap(1, 3.9));
        // New measure, beat index wraps back to 0
        assert!(tracker.observe(&snap(2, 0.05)));
    }

    #[test]
    fn test_stopped_host_produces_no_edges() {
        let mut tracker = BeatTracker::new();
        tracker.observe(&snap(5, 2.5));
        for _ in 0..100 {
            assert!(!tracker.observe(&snap(5, 2.5)));
        }
    }

    #[test]
    fn test_reset_swallows_next_edge() {
        let mut tracker = BeatTracker::new();
        tracker.observe(&snap(1, 0.0));
        tracker.reset();
        assert!(!tracker.observe(&snap(9, 3.0)));
    }

    #[test]
    fn test_whole_beat() {
        assert_eq!(snap(1, 0.0).whole_beat(), 0);
        assert_eq!(snap(1, 2.99).whole_beat(), 2);
    }
}
