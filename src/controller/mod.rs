// Rate controller - the policy side (process A)
// Decides what rate an action produces and whether it is allowed right now:
// game toggle, global cooldown, bounds, proportional scaling, pricing.
// The actual application is deferred to the timing coordinator via the
// command mailbox; this module never touches the transport directly.

pub mod announce;
pub mod pricing;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::ipc::mailbox::ChannelHealth;
use crate::ipc::messages::Status;
use crate::rate::{round2, round3, RateBounds};
use announce::AnnounceContext;
use pricing::{PriceUpdate, PricingEngine};

/// The triggerable action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SpeedUp,
    SlowDown,
    Chaos,
    Reset,
    SetExact,
}

/// Where the trigger came from (recorded in history, shown in announcements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    ChannelPoints,
    Donation,
    #[default]
    Chat,
}

/// Per-call options from the reward source
#[derive(Debug, Clone, Default)]
pub struct ActionOptions {
    pub source: ActionSource,

    /// Donation amount, validated against the current price when pricing
    /// is enabled
    pub amount: Option<f64>,

    /// Required for SetExact, ignored otherwise
    pub exact_rate: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("The rate game is off")]
    Disabled,

    #[error("On cooldown: {remaining_secs}s remaining")]
    OnCooldown { remaining_secs: i64 },

    #[error("Rate is already pinned at {at}x")]
    BoundReached { at: f64 },

    #[error("setExact needs a rate")]
    MissingRate,

    #[error("Rate must be a finite number")]
    InvalidRate,

    #[error("Costs {required} right now")]
    InsufficientAmount { required: u32 },
}

/// One successful action, most-recent-first in the bounded history
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub kind: ActionKind,
    pub source: ActionSource,
    pub old_rate: f64,
    pub new_rate: f64,
}

/// What a successful action hands back to the caller
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// The canonical (clamped, rounded) rate the action produced
    pub new_rate: f64,

    /// Rendered announcement for chat/overlay
    pub announcement: String,

    /// Throttled price refresh for the reward API, when due
    pub price_updates: Option<Vec<PriceUpdate>>,
}

/// Point-in-time view for display collaborators
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSummary {
    pub enabled: bool,
    pub current_rate: f64,
    pub bounds: RateBounds,
    pub cooldown_remaining_secs: i64,

    /// Freshness of the coordinator's status file; anything but Live means
    /// queued changes will sit unseen until the host bridge is back
    pub coordinator_health: ChannelHealth,

    /// Whether host feedback datagrams arrived within the grace window
    pub host_connected: bool,

    /// Seconds the coordinator has been stuck awaiting the count-in, once
    /// past the warning threshold
    pub stalled_for_secs: Option<i64>,

    pub recent: Vec<ActionRecord>,
}

pub struct RateController {
    bounds: RateBounds,
    config: crate::config::ControllerConfig,
    announce: crate::config::AnnounceConfig,
    pricing: PricingEngine,
    stall_warn_secs: i64,

    enabled: bool,

    /// Local view of the session rate; optimistic after an action, corrected
    /// by transport feedback
    current_rate: f64,

    /// Session tempo from feedback, used for proportional scaling
    current_bpm: f64,

    last_action_at: Option<DateTime<Utc>>,

    /// Auto-reset deadline; re-armed on every success, checked by tick
    reset_at: Option<DateTime<Utc>>,

    /// When the coordinator entered the pre-count await, per status
    awaiting_since: Option<DateTime<Utc>>,

    /// Last observed connectivity to the two channels; policy still accepts
    /// actions while disconnected, they just have no observable effect
    coordinator_health: ChannelHealth,
    host_connected: bool,

    history: VecDeque<ActionRecord>,
    rng: StdRng,
}

impl RateController {
    pub fn new(config: &Config) -> Self {
        RateController {
            bounds: config.bounds,
            config: config.controller.clone(),
            announce: config.announce.clone(),
            pricing: PricingEngine::new(config.pricing.clone()),
            stall_warn_secs: config.ipc.stall_warn_secs,
            enabled: config.controller.enabled,
            current_rate: config.bounds.default,
            current_bpm: config.controller.reference_bpm,
            last_action_at: None,
            reset_at: None,
            awaiting_since: None,
            coordinator_health: ChannelHealth::Missing,
            host_connected: false,
            history: VecDeque::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic chaos draws for tests
    #[cfg(test)]
    pub fn with_seed(config: &Config, seed: u64) -> Self {
        let mut controller = Self::new(config);
        controller.rng = StdRng::seed_from_u64(seed);
        controller
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        log::info!("Rate game {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    /// Ingest the playrate last reported by the transport
    pub fn observe_rate(&mut self, rate: f64) {
        self.current_rate = round2(rate);
    }

    /// Ingest the session tempo last reported by the transport
    pub fn observe_bpm(&mut self, bpm: f64) {
        if bpm > 0.0 {
            self.current_bpm = bpm;
        }
    }

    /// Ingest channel connectivity for the summary's flags
    pub fn observe_connectivity(&mut self, coordinator: ChannelHealth, host_connected: bool) {
        self.coordinator_health = coordinator;
        self.host_connected = host_connected;
    }

    /// Track coordinator status for stall detection
    pub fn observe_status(&mut self, status: &Status, now: DateTime<Utc>) {
        if status.awaiting_pre_count {
            if self.awaiting_since.is_none() {
                self.awaiting_since = Some(now);
            }
        } else {
            self.awaiting_since = None;
        }
    }

    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> i64 {
        match self.last_action_at {
            Some(last) => {
                let elapsed = now.signed_duration_since(last).num_seconds();
                (self.config.cooldown_secs - elapsed).max(0)
            }
            None => 0,
        }
    }

    /// The single policy gate every reward source goes through
    pub fn process_action(
        &mut self,
        kind: ActionKind,
        actor: &str,
        options: ActionOptions,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, ActionError> {
        if !self.enabled {
            return Err(ActionError::Disabled);
        }

        let remaining_secs = self.cooldown_remaining(now);
        if remaining_secs > 0 {
            return Err(ActionError::OnCooldown { remaining_secs });
        }

        let old_rate = self.current_rate;
        let new_rate = self.compute_rate(kind, &options)?;

        // Donations must cover the current price when pricing is on
        if self.pricing.enabled() {
            if let Some(amount) = options.amount {
                let required = self.pricing.cost_for(kind, old_rate);
                if amount < required as f64 {
                    return Err(ActionError::InsufficientAmount { required });
                }
            }
        }

        self.last_action_at = Some(now);
        self.reset_at = self
            .config
            .auto_reset_secs
            .map(|secs| now + Duration::seconds(secs));
        self.current_rate = new_rate;

        self.history.push_front(ActionRecord {
            id: Uuid::new_v4(),
            at: now,
            actor: actor.to_string(),
            kind,
            source: options.source,
            old_rate,
            new_rate,
        });
        self.history.truncate(self.config.history_cap);

        let announcement = announce::render(
            announce::template_for(&self.announce, kind),
            &AnnounceContext {
                user: actor,
                rate: new_rate,
                pre_count_bars: self.config.pre_count_bars,
            },
        );

        let price_updates = self.pricing.recompute(new_rate, now);

        log::info!(
            "{:?} by {} ({:?}): {}x -> {}x",
            kind,
            actor,
            options.source,
            old_rate,
            new_rate
        );

        Ok(ActionOutcome {
            new_rate,
            announcement,
            price_updates,
        })
    }

    fn compute_rate(&mut self, kind: ActionKind, options: &ActionOptions) -> Result<f64, ActionError> {
        let rate = match kind {
            ActionKind::SpeedUp => {
                if !self.bounds.has_headroom(self.current_rate) {
                    return Err(ActionError::BoundReached { at: self.current_rate });
                }
                self.current_rate + self.step()
            }
            ActionKind::SlowDown => {
                if !self.bounds.has_floor_room(self.current_rate) {
                    return Err(ActionError::BoundReached { at: self.current_rate });
                }
                self.current_rate - self.step()
            }
            ActionKind::Chaos => self.rng.gen_range(self.bounds.min..=self.bounds.max),
            ActionKind::Reset => self.bounds.default,
            ActionKind::SetExact => {
                let rate = options.exact_rate.ok_or(ActionError::MissingRate)?;
                if !rate.is_finite() {
                    return Err(ActionError::InvalidRate);
                }
                rate
            }
        };

        Ok(self.bounds.clamp(rate))
    }

    /// The nominal increment, optionally rescaled so the musical "feel" of
    /// one step is tempo-independent
    fn step(&self) -> f64 {
        if self.config.proportional_scaling && self.current_bpm > 0.0 {
            round3(self.config.increment * self.config.reference_bpm / self.current_bpm)
        } else {
            self.config.increment
        }
    }

    /// Deadline pass; returns the default rate when the auto-reset fires
    /// The caller force-sets that rate (a later action would have re-armed
    /// the deadline and prevented this)
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<f64> {
        match self.reset_at {
            Some(fire_at) if now >= fire_at => {
                self.reset_at = None;
                self.current_rate = self.bounds.default;
                log::info!("Auto-reset fired, returning to {}x", self.bounds.default);
                Some(self.bounds.default)
            }
            _ => None,
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &ActionRecord> {
        self.history.iter()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> ControllerSummary {
        let stalled_for_secs = self.awaiting_since.and_then(|since| {
            let stuck = now.signed_duration_since(since).num_seconds();
            (stuck >= self.stall_warn_secs).then_some(stuck)
        });

        ControllerSummary {
            enabled: self.enabled,
            current_rate: self.current_rate,
            bounds: self.bounds,
            cooldown_remaining_secs: self.cooldown_remaining(now),
            coordinator_health: self.coordinator_health,
            host_connected: self.host_connected,
            stalled_for_secs,
            recent: self.history.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        let mut config = Config::default();
        config.controller.enabled = true;
        config.controller.proportional_scaling = false;
        config
    }

    fn controller() -> RateController {
        RateController::with_seed(&base_config(), 7)
    }

    #[test]
    fn test_disabled_rejects_everything() {
        let mut config = base_config();
        config.controller.enabled = false;
        let mut rc = RateController::with_seed(&config, 7);

        let err = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, ActionError::Disabled);
    }

    #[test]
    fn test_speed_up_from_default() {
        let mut rc = controller();
        let now = Utc::now();

        let outcome = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), now)
            .unwrap();

        assert_eq!(outcome.new_rate, 1.1);
        // Still below max, and the cooldown is armed
        assert!(rc.bounds.has_headroom(rc.current_rate()));
        assert!(rc.cooldown_remaining(now) > 0);
    }

    #[test]
    fn test_cooldown_blocks_second_action() {
        let mut rc = controller();
        let t0 = Utc::now();

        rc.process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), t0)
            .unwrap();

        let err = rc
            .process_action(
                ActionKind::SlowDown,
                "bob",
                ActionOptions::default(),
                t0 + Duration::seconds(10),
            )
            .unwrap_err();
        match err {
            ActionError::OnCooldown { remaining_secs } => {
                assert!(remaining_secs > 0 && remaining_secs <= 60);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cooldown_expires() {
        let mut rc = controller();
        let t0 = Utc::now();

        rc.process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), t0)
            .unwrap();
        assert!(rc
            .process_action(
                ActionKind::SpeedUp,
                "bob",
                ActionOptions::default(),
                t0 + Duration::seconds(61),
            )
            .is_ok());
    }

    #[test]
    fn test_cooldown_is_global_across_kinds() {
        let mut rc = controller();
        let t0 = Utc::now();

        rc.process_action(ActionKind::Chaos, "alice", ActionOptions::default(), t0)
            .unwrap();
        // A different kind from a different actor is still on cooldown
        assert!(matches!(
            rc.process_action(ActionKind::Reset, "bob", ActionOptions::default(), t0),
            Err(ActionError::OnCooldown { .. })
        ));
    }

    #[test]
    fn test_bound_reached() {
        let mut rc = controller();
        rc.observe_rate(4.0);

        let err = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err, ActionError::BoundReached { at: 4.0 });

        rc.observe_rate(0.5);
        assert!(matches!(
            rc.process_action(ActionKind::SlowDown, "alice", ActionOptions::default(), Utc::now()),
            Err(ActionError::BoundReached { .. })
        ));
    }

    #[test]
    fn test_proportional_scaling_halves_step_at_double_tempo() {
        let mut config = base_config();
        config.controller.proportional_scaling = true;
        let mut rc = RateController::with_seed(&config, 7);

        // Session runs at 240 BPM against a 120 BPM reference
        rc.observe_bpm(240.0);
        let outcome = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(outcome.new_rate, 1.05);
    }

    #[test]
    fn test_chaos_stays_in_bounds() {
        let mut rc = controller();
        let mut t = Utc::now();

        for _ in 0..20 {
            let outcome = rc
                .process_action(ActionKind::Chaos, "alice", ActionOptions::default(), t)
                .unwrap();
            assert!(outcome.new_rate >= 0.5 && outcome.new_rate <= 4.0);
            t += Duration::seconds(61);
        }
    }

    #[test]
    fn test_reset_returns_to_default() {
        let mut rc = controller();
        rc.observe_rate(3.0);

        let outcome = rc
            .process_action(ActionKind::Reset, "alice", ActionOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(outcome.new_rate, 1.0);
    }

    #[test]
    fn test_set_exact() {
        let mut rc = controller();
        let mut t = Utc::now();

        let opts = ActionOptions {
            exact_rate: Some(2.345),
            ..ActionOptions::default()
        };
        let outcome = rc
            .process_action(ActionKind::SetExact, "alice", opts, t)
            .unwrap();
        assert_eq!(outcome.new_rate, 2.35);

        t += Duration::seconds(61);
        // Out of bounds clamps rather than failing
        let opts = ActionOptions {
            exact_rate: Some(9.0),
            ..ActionOptions::default()
        };
        assert_eq!(
            rc.process_action(ActionKind::SetExact, "alice", opts, t)
                .unwrap()
                .new_rate,
            4.0
        );

        t += Duration::seconds(61);
        assert_eq!(
            rc.process_action(ActionKind::SetExact, "alice", ActionOptions::default(), t)
                .unwrap_err(),
            ActionError::MissingRate
        );

        let opts = ActionOptions {
            exact_rate: Some(f64::NAN),
            ..ActionOptions::default()
        };
        assert_eq!(
            rc.process_action(ActionKind::SetExact, "alice", opts, t)
                .unwrap_err(),
            ActionError::InvalidRate
        );
    }

    #[test]
    fn test_history_most_recent_first_and_capped() {
        let mut config = base_config();
        config.controller.history_cap = 3;
        config.controller.cooldown_secs = 0;
        let mut rc = RateController::with_seed(&config, 7);
        let t0 = Utc::now();

        for i in 0..5 {
            rc.process_action(
                ActionKind::SpeedUp,
                &format!("user{}", i),
                ActionOptions::default(),
                t0 + Duration::seconds(i),
            )
            .unwrap();
        }

        let actors: Vec<_> = rc.history().map(|r| r.actor.clone()).collect();
        assert_eq!(actors, vec!["user4", "user3", "user2"]);
    }

    #[test]
    fn test_auto_reset_deadline() {
        let mut config = base_config();
        config.controller.auto_reset_secs = Some(10);
        let mut rc = RateController::with_seed(&config, 7);
        let t0 = Utc::now();

        rc.process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), t0)
            .unwrap();
        assert_eq!(rc.current_rate(), 1.1);

        assert!(rc.tick(t0 + Duration::seconds(5)).is_none());
        assert_eq!(rc.tick(t0 + Duration::seconds(11)), Some(1.0));
        assert_eq!(rc.current_rate(), 1.0);
        // Single-shot: it does not fire again
        assert!(rc.tick(t0 + Duration::seconds(20)).is_none());
    }

    #[test]
    fn test_new_action_rearms_auto_reset() {
        let mut config = base_config();
        config.controller.auto_reset_secs = Some(10);
        config.controller.cooldown_secs = 0;
        let mut rc = RateController::with_seed(&config, 7);
        let t0 = Utc::now();

        rc.process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), t0)
            .unwrap();
        rc.process_action(
            ActionKind::SpeedUp,
            "bob",
            ActionOptions::default(),
            t0 + Duration::seconds(8),
        )
        .unwrap();

        // The first deadline was displaced by the second action
        assert!(rc.tick(t0 + Duration::seconds(11)).is_none());
        assert_eq!(rc.tick(t0 + Duration::seconds(18)), Some(1.0));
    }

    #[test]
    fn test_insufficient_donation() {
        let mut config = base_config();
        config.pricing.enabled = true;
        let mut rc = RateController::with_seed(&config, 7);
        rc.observe_rate(2.0);

        let opts = ActionOptions {
            source: ActionSource::Donation,
            amount: Some(10.0),
            ..ActionOptions::default()
        };
        assert!(matches!(
            rc.process_action(ActionKind::SpeedUp, "alice", opts, Utc::now()),
            Err(ActionError::InsufficientAmount { .. })
        ));
    }

    #[test]
    fn test_announcement_substitution() {
        let mut rc = controller();
        let outcome = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), Utc::now())
            .unwrap();
        assert!(outcome.announcement.contains("alice"));
        assert!(outcome.announcement.contains("1.1"));
    }

    #[test]
    fn test_price_updates_emitted_once_per_window() {
        let mut config = base_config();
        config.pricing.enabled = true;
        config.controller.cooldown_secs = 0;
        let mut rc = RateController::with_seed(&config, 7);
        let t0 = Utc::now();

        let first = rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), t0)
            .unwrap();
        assert!(first.price_updates.is_some());

        let second = rc
            .process_action(
                ActionKind::SpeedUp,
                "bob",
                ActionOptions::default(),
                t0 + Duration::seconds(1),
            )
            .unwrap();
        assert!(second.price_updates.is_none());
    }

    #[test]
    fn test_summary_surfaces_connectivity() {
        let mut rc = controller();
        let now = Utc::now();

        // Before any observation both channels read as down
        let summary = rc.summary(now);
        assert_eq!(summary.coordinator_health, ChannelHealth::Missing);
        assert!(!summary.host_connected);

        rc.observe_connectivity(ChannelHealth::Live, true);
        let summary = rc.summary(now);
        assert_eq!(summary.coordinator_health, ChannelHealth::Live);
        assert!(summary.host_connected);

        // A stale status file flips the flag but policy still accepts
        // actions (they just have no observable effect until reconnect)
        rc.observe_connectivity(ChannelHealth::Stale, false);
        assert_eq!(rc.summary(now).coordinator_health, ChannelHealth::Stale);
        assert!(rc
            .process_action(ActionKind::SpeedUp, "alice", ActionOptions::default(), now)
            .is_ok());
    }

    #[test]
    fn test_stall_detection_in_summary() {
        let mut rc = controller();
        let t0 = Utc::now();

        let mut status = Status::initial(t0);
        status.awaiting_pre_count = true;
        rc.observe_status(&status, t0);

        // Under the threshold: no warning
        assert!(rc.summary(t0 + Duration::seconds(10)).stalled_for_secs.is_none());
        // Past it: surfaced
        let stalled = rc.summary(t0 + Duration::seconds(45)).stalled_for_secs;
        assert_eq!(stalled, Some(45));

        // Resuming clears it
        status.awaiting_pre_count = false;
        rc.observe_status(&status, t0 + Duration::seconds(50));
        assert!(rc.summary(t0 + Duration::seconds(60)).stalled_for_secs.is_none());
    }
}
