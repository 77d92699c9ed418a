// Wire types for the command and status mailboxes
// Plain JSON objects; camelCase keys to match the display layers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single command from the rate controller to the timing coordinator
/// Exactly one lives in the command mailbox at a time; writing a new one
/// replaces an unread predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Turn the coordinator on (no-op if already enabled)
    Enable,

    /// Turn the coordinator off, dropping any pending change
    Disable,

    /// Install a new pending rate change and start the countdown
    #[serde(rename_all = "camelCase")]
    Queue {
        new_rate: f64,
        warning_beats: u32,
        pre_count_bars: u32,
    },

    /// Drop the pending change while it is still counting down or waiting
    /// for the measure boundary
    Cancel,

    /// Skip the countdown and measure wait; execute immediately
    ExecuteNow,

    /// Resume transport after the external count-in has finished
    StartPlayback,
}

/// Coordinator status, periodically overwritten by the host bridge
/// The controller treats a stale or missing file as a disconnected host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Whether the coordinator is processing countdowns at all
    pub enabled: bool,

    /// Current transport position (1-based measure, 0-based fractional beat)
    pub measure: i64,
    pub beat: f64,
    pub beats_per_measure: u32,

    /// Beats left on the active countdown, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<u32>,

    /// Whether a change is queued, and to what rate
    pub change_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_rate: Option<f64>,

    /// Set once the stop/retune/seek has happened and the coordinator is
    /// waiting for startPlayback
    pub awaiting_pre_count: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_count_bars: Option<u32>,

    /// Host transport state as last observed
    pub playing: bool,
    pub playrate: f64,

    /// Written true exactly once, on clean coordinator exit
    pub shutdown: bool,

    pub updated_at: DateTime<Utc>,
}

impl Status {
    /// A neutral status for a freshly started, disabled coordinator
    pub fn initial(now: DateTime<Utc>) -> Self {
        Status {
            enabled: false,
            measure: 1,
            beat: 0.0,
            beats_per_measure: 4,
            countdown_remaining: None,
            change_pending: false,
            target_rate: None,
            awaiting_pre_count: false,
            pre_count_bars: None,
            playing: false,
            playrate: 1.0,
            shutdown: false,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_value(&Command::Enable).unwrap();
        assert_eq!(json["action"], "enable");

        let json = serde_json::to_value(&Command::Queue {
            new_rate: 1.5,
            warning_beats: 4,
            pre_count_bars: 1,
        })
        .unwrap();
        assert_eq!(json["action"], "queue");
        assert_eq!(json["newRate"], 1.5);
        assert_eq!(json["warningBeats"], 4);
        assert_eq!(json["preCountBars"], 1);

        let json = serde_json::to_value(&Command::StartPlayback).unwrap();
        assert_eq!(json["action"], "startPlayback");
    }

    #[test]
    fn test_command_parses_from_wire() {
        let cmd: Command = serde_json::from_str(
            r#"{"action":"queue","newRate":2.0,"warningBeats":8,"preCountBars":2}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            Command::Queue {
                new_rate: 2.0,
                warning_beats: 8,
                pre_count_bars: 2
            }
        );

        let cmd: Command = serde_json::from_str(r#"{"action":"executeNow"}"#).unwrap();
        assert_eq!(cmd, Command::ExecuteNow);
    }

    #[test]
    fn test_status_omits_absent_optionals() {
        let status = Status::initial(Utc::now());
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("countdownRemaining").is_none());
        assert!(json.get("targetRate").is_none());
        assert_eq!(json["changePending"], false);
    }
}
