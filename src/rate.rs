// Playrate value types - bounds, clamping, and rounding
// Every rate that reaches the host goes through clamp + round2 first

use serde::{Deserialize, Serialize};

/// Allowed playrate range for a session
/// Invariant: min < default < max
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBounds {
    /// Lowest playrate viewers can push the session to
    pub min: f64,

    /// Highest playrate viewers can push the session to
    pub max: f64,

    /// The "home" playrate the session returns to on reset (normally 1.0)
    pub default: f64,
}

impl RateBounds {
    /// Create bounds, enforcing min < default < max
    /// Returns None for inverted or degenerate ranges
    pub fn new(min: f64, max: f64, default: f64) -> Option<Self> {
        if !min.is_finite() || !max.is_finite() || !default.is_finite() {
            return None;
        }
        if min < default && default < max {
            Some(RateBounds { min, max, default })
        } else {
            None
        }
    }

    /// Clamp a rate into this range and round to 2 decimal places
    /// This is the canonical form for every rate applied or compared
    pub fn clamp(&self, rate: f64) -> f64 {
        if !rate.is_finite() {
            return self.default;
        }
        round2(rate.clamp(self.min, self.max))
    }

    /// Whether a rate (in canonical form) can still move up
    pub fn has_headroom(&self, rate: f64) -> bool {
        round2(rate) < round2(self.max)
    }

    /// Whether a rate (in canonical form) can still move down
    pub fn has_floor_room(&self, rate: f64) -> bool {
        round2(rate) > round2(self.min)
    }
}

impl Default for RateBounds {
    fn default() -> Self {
        RateBounds {
            min: 0.5,
            max: 4.0,
            default: 1.0,
        }
    }
}

/// Round to 2 decimal places (canonical playrate precision)
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to 3 decimal places (used for tempo-scaled increments)
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_invariant() {
        assert!(RateBounds::new(0.5, 4.0, 1.0).is_some());
        assert!(RateBounds::new(1.0, 1.0, 1.0).is_none());
        assert!(RateBounds::new(2.0, 0.5, 1.0).is_none());
        assert!(RateBounds::new(0.5, 4.0, 5.0).is_none());
        assert!(RateBounds::new(f64::NAN, 4.0, 1.0).is_none());
    }

    #[test]
    fn test_clamp_always_in_range() {
        let bounds = RateBounds::default();

        for rate in [-10.0, 0.0, 0.49, 0.5, 1.234, 3.999, 4.0, 100.0] {
            let clamped = bounds.clamp(rate);
            assert!(clamped >= bounds.min && clamped <= bounds.max);
            // Exactly 2 decimal places
            assert!((clamped * 100.0 - (clamped * 100.0).round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_clamp_non_finite_falls_back_to_default() {
        let bounds = RateBounds::default();
        assert_eq!(bounds.clamp(f64::NAN), 1.0);
        assert_eq!(bounds.clamp(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_clamp_idempotent() {
        let bounds = RateBounds::default();
        let once = bounds.clamp(1.23456);
        let twice = bounds.clamp(once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_headroom_predicates() {
        let bounds = RateBounds::default();
        assert!(bounds.has_headroom(1.0));
        assert!(!bounds.has_headroom(4.0));
        assert!(bounds.has_floor_room(1.0));
        assert!(!bounds.has_floor_room(0.5));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round2(1.006), 1.01);
        assert_eq!(round2(1.004), 1.0);
        assert_eq!(round3(0.12345), 0.123);
    }
}
