// Configuration for both processes
// Loaded from a JSON file under the user config directory; missing file
// falls back to defaults, malformed file is a hard error

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::rate::RateBounds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rate bounds: min {min}, max {max}, default {default}")]
    InvalidBounds { min: f64, max: f64, default: f64 },
}

/// Policy settings for the rate controller (process A)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Whether the rate game starts enabled
    pub enabled: bool,

    /// Nominal rate step for speed-up / slow-down actions
    pub increment: f64,

    /// Rescale the increment by reference_bpm / current_bpm so the change
    /// "feels" the same at any session tempo
    pub proportional_scaling: bool,

    /// BPM at which the nominal increment applies unscaled
    pub reference_bpm: f64,

    /// Global cooldown shared by all action kinds, in seconds
    pub cooldown_secs: i64,

    /// Seconds after the last action before the rate snaps back to default
    /// None disables auto-reset
    pub auto_reset_secs: Option<i64>,

    /// Maximum entries kept in the most-recent-first action history
    pub history_cap: usize,

    /// Warning beats requested for queued changes
    pub warning_beats: u32,

    /// Count-in bars requested for queued changes
    pub pre_count_bars: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            enabled: false,
            increment: 0.1,
            proportional_scaling: true,
            reference_bpm: 120.0,
            cooldown_secs: 60,
            auto_reset_secs: None,
            history_cap: 50,
            warning_beats: 4,
            pre_count_bars: 1,
        }
    }
}

/// Dynamic pricing settings for reward costs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub enabled: bool,

    /// Base cost of each paid action at the default (1.0x) rate
    pub speed_up_base: u32,
    pub slow_down_base: u32,
    pub chaos_base: u32,
    pub reset_base: u32,

    /// Hard limits for every computed cost
    pub min_cost: u32,
    pub max_cost: u32,

    /// Minimum seconds between price syncs to the reward API
    pub sync_window_secs: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            enabled: false,
            speed_up_base: 500,
            slow_down_base: 500,
            chaos_base: 1000,
            reset_base: 250,
            min_cost: 50,
            max_cost: 10_000,
            sync_window_secs: 2,
        }
    }
}

/// Announcement templates; placeholders: {user}, {rate}, {percent}, {bars}
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnounceConfig {
    pub speed_up: String,
    pub slow_down: String,
    pub chaos: String,
    pub reset: String,
    pub set_exact: String,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        AnnounceConfig {
            speed_up: "{user} cranked it up to {rate}x ({percent}%)!".to_string(),
            slow_down: "{user} dragged it down to {rate}x ({percent}%)...".to_string(),
            chaos: "{user} rolled the dice: {rate}x!".to_string(),
            reset: "{user} brought it back to {rate}x.".to_string(),
            set_exact: "{user} set the rate to {rate}x.".to_string(),
        }
    }
}

/// File mailbox paths and polling cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Single-slot command file (controller writes, host bridge consumes)
    pub command_path: PathBuf,

    /// Status file (host bridge overwrites, controller reads)
    pub status_path: PathBuf,

    /// How often the host bridge checks for a new command, in milliseconds
    pub command_poll_ms: u64,

    /// Status older than this is treated as a disconnected coordinator
    pub status_grace_secs: i64,

    /// Seconds stuck awaiting the count-in before the controller flags a stall
    pub stall_warn_secs: i64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        let base = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("barline");
        IpcConfig {
            command_path: base.join("command.json"),
            status_path: base.join("status.json"),
            command_poll_ms: 50,
            status_grace_secs: 3,
            stall_warn_secs: 30,
        }
    }
}

/// Datagram control protocol endpoints and the host's slider span
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    /// Where the host listens for control messages
    pub host_addr: String,

    /// Controller-side address for unsolicited feedback datagrams
    pub bind_addr: String,

    /// Host-bridge-side feedback address (the two processes each need their
    /// own socket)
    pub bridge_bind_addr: String,

    /// The host maps its normalized [0,1] playrate control onto this span
    pub slider_min: f64,
    pub slider_max: f64,
}

impl Default for OscConfig {
    fn default() -> Self {
        OscConfig {
            host_addr: "127.0.0.1:8000".to_string(),
            bind_addr: "0.0.0.0:9000".to_string(),
            bridge_bind_addr: "0.0.0.0:9001".to_string(),
            slider_min: 0.25,
            slider_max: 4.0,
        }
    }
}

/// Timing coordinator cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How often the host transport position is polled, in milliseconds
    pub transport_poll_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            transport_poll_ms: 33,
        }
    }
}

/// Top-level configuration shared by both binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bounds: RateBounds,
    pub controller: ControllerConfig,
    pub pricing: PricingConfig,
    pub announce: AnnounceConfig,
    pub ipc: IpcConfig,
    pub osc: OscConfig,
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Default on-disk location: <config_dir>/barline/config.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("barline")
            .join("config.json")
    }

    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path())
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs whose bounds violate min < default < max
    fn validate(&self) -> Result<(), ConfigError> {
        if RateBounds::new(self.bounds.min, self.bounds.max, self.bounds.default).is_none() {
            return Err(ConfigError::InvalidBounds {
                min: self.bounds.min,
                max: self.bounds.max,
                default: self.bounds.default,
            });
        }
        Ok(())
    }
}
