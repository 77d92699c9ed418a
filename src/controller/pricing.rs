// Dynamic reward pricing
// Costs track the session's distance from the default 1.0x rate: pushing
// further out grows super-linearly, coming back home gets discounted.
// Recomputes are throttled so the external reward API is synced at most
// once per window.

use chrono::{DateTime, Duration, Utc};

use crate::config::PricingConfig;
use super::ActionKind;

/// One price change destined for the external reward-management API
/// The push itself is owned by the collaborator consuming these
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    pub kind: ActionKind,
    pub cost: u32,
}

pub struct PricingEngine {
    config: PricingConfig,
    last_sync_at: Option<DateTime<Utc>>,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        PricingEngine {
            config,
            last_sync_at: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current cost of an action at the given rate
    /// Distance from default drives the asymmetry: moving further from 1.0x
    /// costs distance^1.5 more, moving back toward it is discounted
    pub fn cost_for(&self, kind: ActionKind, rate: f64) -> u32 {
        let distance = (rate - 1.0).abs();

        let cost = match kind {
            ActionKind::SpeedUp => {
                scaled(self.config.speed_up_base, distance, rate > 1.0)
            }
            ActionKind::SlowDown => {
                scaled(self.config.slow_down_base, distance, rate < 1.0)
            }
            // Chaos is chaos at any rate
            ActionKind::Chaos => self.config.chaos_base as f64,
            // Reset always moves toward default, so it only gets cheaper
            ActionKind::Reset | ActionKind::SetExact => {
                scaled(self.config.reset_base, distance, false)
            }
        };

        (cost.round() as u32).clamp(self.config.min_cost, self.config.max_cost)
    }

    /// Recompute all costs for the reward API, throttled to one sync per
    /// window; returns None while throttled or when pricing is disabled
    pub fn recompute(&mut self, rate: f64, now: DateTime<Utc>) -> Option<Vec<PriceUpdate>> {
        if !self.config.enabled {
            return None;
        }

        if let Some(last) = self.last_sync_at {
            let window = Duration::seconds(self.config.sync_window_secs);
            if now.signed_duration_since(last) < window {
                return None;
            }
        }

        self.last_sync_at = Some(now);
        Some(
            [
                ActionKind::SpeedUp,
                ActionKind::SlowDown,
                ActionKind::Chaos,
                ActionKind::Reset,
            ]
            .into_iter()
            .map(|kind| PriceUpdate {
                kind,
                cost: self.cost_for(kind, rate),
            })
            .collect(),
        )
    }
}

/// Apply the asymmetric distance curve to a base cost
/// `away` is true when the action would push the rate further from default
fn scaled(base: u32, distance: f64, away: bool) -> f64 {
    let base = base as f64;
    if away {
        base * (1.0 + distance.powf(1.5))
    } else {
        base / (1.0 + distance)
    }
}
