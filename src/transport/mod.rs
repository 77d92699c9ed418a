// Transport proxy - talks the datagram control protocol to the host
// Sends are fire-and-forget; everything we "know" about the host comes from
// unsolicited feedback datagrams and may be stale

pub mod osc;

use chrono::{DateTime, Duration, Utc};
use std::net::UdpSocket;
use thiserror::Error;

use crate::coordinator::timeline::TimingSnapshot;
use crate::rate::{round2, RateBounds};
use osc::{OscArg, OscMessage, OscError};

/// Control addresses sent to the host
pub const ADDR_PLAYRATE_ROTARY: &str = "/playrate/rotary";
pub const ADDR_PLAYRATE_RAW: &str = "/playrate/raw";
pub const ADDR_PLAY: &str = "/play";
pub const ADDR_STOP: &str = "/stop";
pub const ADDR_GOTO_MEASURE: &str = "/goto/measure";

/// Feedback addresses the host pushes back
pub const FB_PLAYRATE_RAW: &str = "/playrate/raw";
pub const FB_TEMPO_RAW: &str = "/tempo/raw";
pub const FB_PLAY: &str = "/play";
pub const FB_BEAT_STR: &str = "/beat/str";
pub const FB_TIMESIG_STR: &str = "/timesig/str";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control protocol error: {0}")]
    Osc(#[from] OscError),

    #[error("Invalid host address: {0}")]
    BadHostAddr(String),
}

/// Map a rate onto the host's normalized [0,1] playrate control
/// The host's slider spans [slider_min, slider_max] linearly
pub fn normalize_rate(rate: f64, slider_min: f64, slider_max: f64) -> f32 {
    if slider_max <= slider_min {
        return 0.0;
    }
    (((rate - slider_min) / (slider_max - slider_min)).clamp(0.0, 1.0)) as f32
}

/// Parse the host's "measure.beat.percent" position string, e.g. "33.2.75"
/// Measures and beats arrive 1-based; the returned beat is 0-based fractional
pub fn parse_beat_str(s: &str, beats_per_measure: u32) -> Option<TimingSnapshot> {
    let mut parts = s.split('.');
    let measure: i64 = parts.next()?.trim().parse().ok()?;
    let beat: i64 = parts.next()?.trim().parse().ok()?;
    let percent: f64 = match parts.next() {
        Some(p) => p.trim().parse().ok()?,
        None => 0.0,
    };

    if measure < 1 || beat < 1 {
        return None;
    }

    Some(TimingSnapshot {
        measure,
        beat_in_measure: (beat - 1) as f64 + percent / 100.0,
        beats_per_measure,
    })
}

/// Last-known host state, updated only from feedback datagrams
#[derive(Debug, Clone)]
struct HostFeedback {
    rate: f64,
    tempo_bpm: f64,
    playing: bool,
    snapshot: TimingSnapshot,
    last_seen: Option<DateTime<Utc>>,
}

impl Default for HostFeedback {
    fn default() -> Self {
        HostFeedback {
            rate: 1.0,
            tempo_bpm: 120.0,
            playing: false,
            snapshot: TimingSnapshot::default(),
            last_seen: None,
        }
    }
}

/// The datagram transport proxy
/// One per process; owns its feedback socket and the last-known host state
pub struct OscTransport {
    socket: UdpSocket,
    host_addr: String,
    slider_min: f64,
    slider_max: f64,
    bounds: RateBounds,
    feedback: HostFeedback,
}

impl OscTransport {
    /// Bind the feedback socket and point sends at the host
    pub fn connect(
        bind_addr: &str,
        host_addr: &str,
        slider_min: f64,
        slider_max: f64,
        bounds: RateBounds,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        Ok(OscTransport {
            socket,
            host_addr: host_addr.to_string(),
            slider_min,
            slider_max,
            bounds,
            feedback: HostFeedback::default(),
        })
    }

    fn send(&self, message: &OscMessage) -> Result<(), TransportError> {
        let bytes = message.encode()?;
        self.socket.send_to(&bytes, &self.host_addr)?;
        Ok(())
    }

    /// Clamp, round, map onto the normalized control, and fire
    /// Returns the canonical rate that was requested; the host may apply it
    /// a little later (or not at all) - this is not an acknowledgement
    pub fn set_rate(&self, rate: f64) -> Result<f64, TransportError> {
        let applied = self.bounds.clamp(rate);
        let normalized = normalize_rate(applied, self.slider_min, self.slider_max);
        self.send(&OscMessage::float(ADDR_PLAYRATE_ROTARY, normalized))?;
        log::debug!("set_rate {} -> rotary {:.4}", applied, normalized);
        Ok(applied)
    }

    /// Set the rate through the host's native (non-normalized) control
    /// Used at execution time so no slider-span quantization creeps in
    pub fn set_rate_native(&self, rate: f64) -> Result<f64, TransportError> {
        let applied = self.bounds.clamp(rate);
        self.send(&OscMessage::float(ADDR_PLAYRATE_RAW, applied as f32))?;
        Ok(applied)
    }

    pub fn play(&self) -> Result<(), TransportError> {
        self.send(&OscMessage::float(ADDR_PLAY, 1.0))
    }

    pub fn stop(&self) -> Result<(), TransportError> {
        self.send(&OscMessage::float(ADDR_STOP, 1.0))
    }

    /// Jump the edit cursor to the start of a measure
    pub fn goto_measure(&self, measure: i64) -> Result<(), TransportError> {
        self.send(&OscMessage::new(
            ADDR_GOTO_MEASURE,
            vec![OscArg::Int(measure as i32)],
        ))
    }

    /// Drain pending feedback datagrams into the last-known state
    /// Malformed packets are logged and dropped; nothing here blocks
    pub fn pump_feedback(&mut self, now: DateTime<Utc>) {
        let mut buf = [0u8; 1024];
        loop {
            let len = match self.socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("Feedback socket error: {}", e);
                    break;
                }
            };

            let message = match OscMessage::decode(&buf[..len]) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("Discarding malformed feedback: {}", e);
                    continue;
                }
            };

            self.apply_feedback(&message);
            self.feedback.last_seen = Some(now);
        }
    }

    fn apply_feedback(&mut self, message: &OscMessage) {
        match message.addr.as_str() {
            FB_PLAYRATE_RAW => {
                if let Some(rate) = message.arg_as_f32() {
                    self.feedback.rate = round2(rate as f64);
                }
            }
            FB_TEMPO_RAW => {
                if let Some(bpm) = message.arg_as_f32() {
                    if bpm > 0.0 {
                        self.feedback.tempo_bpm = bpm as f64;
                    }
                }
            }
            FB_PLAY => {
                if let Some(v) = message.arg_as_f32() {
                    self.feedback.playing = v > 0.5;
                }
            }
            FB_BEAT_STR => {
                if let Some(s) = message.arg_as_str() {
                    match parse_beat_str(s, self.feedback.snapshot.beats_per_measure) {
                        Some(snapshot) => self.feedback.snapshot = snapshot,
                        None => log::warn!("Unparsable beat position: {:?}", s),
                    }
                }
            }
            FB_TIMESIG_STR => {
                // "4/4" -> numerator is beats per measure
                if let Some(s) = message.arg_as_str() {
                    if let Some(numerator) = s.split('/').next().and_then(|n| n.parse().ok()) {
                        if numerator > 0 {
                            self.feedback.snapshot.beats_per_measure = numerator;
                        }
                    }
                }
            }
            other => log::trace!("Ignoring feedback for {}", other),
        }
    }

    /// Last-known playrate; non-blocking, possibly stale
    pub fn rate(&self) -> f64 {
        self.feedback.rate
    }

    /// Last-known session tempo in BPM; non-blocking, possibly stale
    pub fn tempo_bpm(&self) -> f64 {
        self.feedback.tempo_bpm
    }

    pub fn is_playing(&self) -> bool {
        self.feedback.playing
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        self.feedback.snapshot
    }

    pub fn can_speed_up(&self) -> bool {
        self.bounds.has_headroom(self.feedback.rate)
    }

    pub fn can_slow_down(&self) -> bool {
        self.bounds.has_floor_room(self.feedback.rate)
    }

    /// Whether feedback has arrived within the grace window
    pub fn is_connected(&self, now: DateTime<Utc>, grace_secs: i64) -> bool {
        match self.feedback.last_seen {
            Some(seen) => now.signed_duration_since(seen) <= Duration::seconds(grace_secs),
            None => false,
        }
    }
}
