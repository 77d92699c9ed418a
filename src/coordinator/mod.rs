// Timing coordinator - the measure-synchronized rate-change state machine
// Runs beside the host transport (process B), fed by the command mailbox.
// Countdown advances on observed beat edges only; execution waits for the
// next measure boundary, then stop -> retune -> seek -> await the count-in.

pub mod timeline;

use chrono::{DateTime, Utc};

use crate::ipc::messages::{Command, Status};
use crate::rate::RateBounds;
use crate::transport::{OscTransport, TransportError};
use timeline::{BeatTracker, TimingSnapshot};

/// Host transport operations the coordinator needs
/// The production implementation speaks the datagram control protocol;
/// tests drive the state machine with a fake
pub trait HostTransport {
    /// Last-known transport position (non-blocking, possibly stale)
    fn snapshot(&self) -> TimingSnapshot;

    /// Last-known play state
    fn is_playing(&self) -> bool;

    fn stop(&mut self) -> Result<(), TransportError>;

    fn play(&mut self) -> Result<(), TransportError>;

    /// Apply a playrate through the host's native rate control
    fn set_playrate(&mut self, rate: f64) -> Result<(), TransportError>;

    /// Move the edit cursor to the start of a measure
    fn seek_to_measure(&mut self, measure: i64) -> Result<(), TransportError>;
}

impl HostTransport for OscTransport {
    fn snapshot(&self) -> TimingSnapshot {
        OscTransport::snapshot(self)
    }

    fn is_playing(&self) -> bool {
        OscTransport::is_playing(self)
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        OscTransport::stop(self)
    }

    fn play(&mut self) -> Result<(), TransportError> {
        OscTransport::play(self)
    }

    fn set_playrate(&mut self, rate: f64) -> Result<(), TransportError> {
        self.set_rate_native(rate).map(|_| ())
    }

    fn seek_to_measure(&mut self, measure: i64) -> Result<(), TransportError> {
        self.goto_measure(measure)
    }
}

/// The one queued rate change (at most one exists system-wide)
/// A later queue silently replaces it; there is no merging
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange {
    /// Rate to apply, already clamped into bounds
    pub target_rate: f64,

    /// Beat edges still to count down
    pub warning_beats: u32,

    /// Beat edges originally requested
    pub total_beats: u32,

    /// Count-in bars to publish once the change executes
    pub pre_count_bars: u32,

    pub queued_at: DateTime<Utc>,
}

/// Coordinator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial state; commands other than enable/queue are ignored
    Disabled,

    /// Enabled, nothing queued
    Idle,

    /// A pending change exists; each beat edge decrements the countdown
    CountingDown,

    /// Countdown done; waiting for the measure number to pass the one the
    /// countdown finished in
    WaitingForMeasureEnd,

    /// Stop/retune/seek happened; transport stays halted until an external
    /// startPlayback arrives (the count-in runs on someone else's clock)
    AwaitingPreCount,
}

pub struct Coordinator {
    bounds: RateBounds,
    phase: Phase,
    pending: Option<PendingChange>,

    /// Measure in which the countdown hit zero
    trigger_measure: Option<i64>,

    tracker: BeatTracker,
    snapshot: TimingSnapshot,
    playing: bool,

    /// Rate last applied by an executed change
    playrate: f64,

    /// Count-in bars of the change now awaiting playback
    pre_count_bars: Option<u32>,
}

impl Coordinator {
    pub fn new(bounds: RateBounds) -> Self {
        Coordinator {
            playrate: bounds.default,
            bounds,
            phase: Phase::Disabled,
            pending: None,
            trigger_measure: None,
            tracker: BeatTracker::new(),
            snapshot: TimingSnapshot::default(),
            playing: false,
            pre_count_bars: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PendingChange> {
        self.pending.as_ref()
    }

    /// Handle one command from the mailbox
    /// Always called before the same pass's poll, so a queue and the next
    /// beat edge cannot race within a pass
    pub fn apply_command(
        &mut self,
        command: Command,
        host: &mut dyn HostTransport,
        now: DateTime<Utc>,
    ) -> Result<(), TransportError> {
        match command {
            Command::Enable => {
                if self.phase == Phase::Disabled {
                    self.phase = Phase::Idle;
                    log::info!("Coordinator enabled");
                }
            }

            Command::Disable => {
                self.clear_pending();
                self.pre_count_bars = None;
                self.phase = Phase::Disabled;
                log::info!("Coordinator disabled, pending change dropped");
            }

            Command::Queue {
                new_rate,
                warning_beats,
                pre_count_bars,
            } => self.queue(new_rate, warning_beats, pre_count_bars, now),

            Command::Cancel => match self.phase {
                Phase::CountingDown | Phase::WaitingForMeasureEnd => {
                    self.clear_pending();
                    self.phase = Phase::Idle;
                    log::info!("Pending change cancelled");
                }
                Phase::AwaitingPreCount => {
                    // The stop/retune/seek already happened; there is no
                    // un-stop. Recovery is startPlayback at the new rate.
                    log::info!("Cancel ignored while awaiting pre-count");
                }
                _ => log::debug!("Cancel with nothing pending"),
            },

            Command::ExecuteNow => match self.phase {
                Phase::CountingDown | Phase::WaitingForMeasureEnd => {
                    log::info!("Executing queued change immediately");
                    self.execute(host)?;
                }
                _ => log::debug!("executeNow with nothing pending"),
            },

            Command::StartPlayback => {
                if self.phase == Phase::AwaitingPreCount {
                    host.play()?;
                    self.playing = true;
                    self.pre_count_bars = None;
                    self.phase = Phase::Idle;
                    log::info!("Playback resumed at {}x", self.playrate);
                } else {
                    log::debug!("startPlayback outside pre-count await, ignored");
                }
            }
        }

        Ok(())
    }

    /// Install a new pending change, replacing any existing one
    /// Queueing while disabled auto-enables: a queue is intent to run
    fn queue(&mut self, new_rate: f64, warning_beats: u32, pre_count_bars: u32, now: DateTime<Utc>) {
        let target_rate = self.bounds.clamp(new_rate);
        if self.pending.is_some() {
            log::info!("Replacing pending change with {}x", target_rate);
        }

        self.pending = Some(PendingChange {
            target_rate,
            warning_beats,
            total_beats: warning_beats,
            pre_count_bars,
            queued_at: now,
        });
        self.trigger_measure = None;
        self.phase = Phase::CountingDown;
        log::info!(
            "Queued {}x after {} warning beats ({} bar count-in)",
            target_rate,
            warning_beats,
            pre_count_bars
        );
    }

    /// One timing pass: refresh the position and run the phase logic
    /// No beat edges occur while the host is stopped, so a countdown simply
    /// holds until playback moves again
    pub fn poll(&mut self, host: &mut dyn HostTransport) -> Result<(), TransportError> {
        self.playing = host.is_playing();
        self.snapshot = host.snapshot();

        // Edge detection runs in every phase to keep position continuity
        let edge = self.tracker.observe(&self.snapshot);

        match self.phase {
            Phase::CountingDown => {
                let remaining = match self.pending.as_mut() {
                    Some(pending) => {
                        if edge && pending.warning_beats > 0 {
                            pending.warning_beats -= 1;
                            log::debug!("Countdown: {} beats left", pending.warning_beats);
                        }
                        pending.warning_beats
                    }
                    // Countdown phase with nothing queued is unreachable
                    // through commands; recover to idle
                    None => {
                        self.phase = Phase::Idle;
                        return Ok(());
                    }
                };

                if remaining == 0 {
                    self.trigger_measure = Some(self.snapshot.measure);
                    self.phase = Phase::WaitingForMeasureEnd;
                    log::info!(
                        "Countdown finished in measure {}, waiting for the barline",
                        self.snapshot.measure
                    );
                }
            }

            Phase::WaitingForMeasureEnd => {
                let past_boundary = self
                    .trigger_measure
                    .map(|trigger| self.snapshot.measure > trigger)
                    .unwrap_or(true);
                if past_boundary {
                    self.execute(host)?;
                }
            }

            Phase::Disabled | Phase::Idle | Phase::AwaitingPreCount => {}
        }

        Ok(())
    }

    /// The stop/retune/seek sequence
    /// Host calls happen before any state is cleared, so a send failure
    /// leaves the change queued for the next pass
    fn execute(&mut self, host: &mut dyn HostTransport) -> Result<(), TransportError> {
        let (target_rate, pre_count_bars) = match &self.pending {
            Some(p) => (p.target_rate, p.pre_count_bars),
            None => return Ok(()),
        };

        let measure = self.snapshot.measure;
        host.stop()?;
        host.set_playrate(target_rate)?;
        host.seek_to_measure(measure)?;

        self.pending = None;
        self.trigger_measure = None;
        self.playing = false;
        self.playrate = target_rate;
        self.pre_count_bars = Some(pre_count_bars);
        self.tracker.reset();
        self.phase = Phase::AwaitingPreCount;

        log::info!(
            "Executed rate change to {}x at measure {}, awaiting count-in",
            target_rate,
            measure
        );
        Ok(())
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.trigger_measure = None;
    }

    /// Current status for the status mailbox
    pub fn status(&self, now: DateTime<Utc>) -> Status {
        Status {
            enabled: self.phase != Phase::Disabled,
            measure: self.snapshot.measure,
            beat: self.snapshot.beat_in_measure,
            beats_per_measure: self.snapshot.beats_per_measure,
            countdown_remaining: self.pending.as_ref().map(|p| p.warning_beats),
            change_pending: self.pending.is_some(),
            target_rate: self.pending.as_ref().map(|p| p.target_rate),
            awaiting_pre_count: self.phase == Phase::AwaitingPreCount,
            pre_count_bars: self.pre_count_bars,
            playing: self.playing,
            playrate: self.playrate,
            shutdown: false,
            updated_at: now,
        }
    }
}
