//! Timing primitives for the automation engines.
//!
//! This module provides the conversions between wall-clock time and
//! musical time used throughout beatfade:
//!
//! - [`TimeSignature`] - Musical time signature (e.g., 4/4, 3/4)
//! - [`SongPosition`] - Song time, bar and beat as reported by the host
//! - [`TransportState`] - Tempo-aware view of the host transport
//! - [`WallClock`] - Source of wall-clock seconds ([`SystemClock`], [`ManualClock`])

use crate::error::{AutomationError, Result};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Wall-clock time in seconds.
pub type WallTime = f64;

/// Wrapper type for beats (floating-point).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beats(pub f64);

impl Beats {
    /// Get the beat value as f64.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

/// Wrapper type for bars (floating-point).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bars(pub f64);

impl Bars {
    /// Convert bars to beats using the given time signature.
    pub fn to_beats(self, signature: TimeSignature) -> Beats {
        Beats(self.0 * signature.beats_per_bar())
    }
}

/// Musical time signature (numerator/denominator).
///
/// The numerator indicates beats per bar, and the denominator indicates
/// the note value that gets one beat (4 = quarter note, 8 = eighth note).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    ///
    /// For 4/4: 4 beats per bar
    /// For 6/8: 3 beats per bar (6 eighth notes = 3 quarter notes)
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Seconds per quarter-note beat at the given tempo.
#[inline]
pub fn seconds_per_beat(bpm: f64) -> f64 {
    60.0 / bpm
}

/// Song position as reported by the host's song-time notification.
///
/// Bars and beats are 1-based, matching what the host displays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SongPosition {
    /// Absolute song time in beats.
    pub song_time: f64,
    pub bar: i64,
    pub beat: u32,
}

impl SongPosition {
    pub fn new(song_time: f64, bar: i64, beat: u32) -> Self {
        Self {
            song_time,
            bar,
            beat,
        }
    }

    /// Derive bar and beat from an absolute song time in beats.
    ///
    /// Bars are [`TimeSignature::beats_per_bar`] long, the same length used
    /// for fade durations. Only the whole beat counts: song time 5.9 in 4/4
    /// is bar 2, beat 2.
    pub fn from_song_time(song_time: f64, signature: TimeSignature) -> Self {
        let bar_length = signature.beats_per_bar();
        let bar_index = (song_time / bar_length).floor();
        let into_bar = song_time - bar_index * bar_length;
        Self {
            song_time,
            bar: bar_index as i64 + 1,
            beat: into_bar.floor().max(0.0) as u32 + 1,
        }
    }

    /// Whole-beat index, used to detect beat boundaries.
    pub fn whole_beat(&self) -> i64 {
        self.song_time.floor() as i64
    }
}

impl Default for SongPosition {
    fn default() -> Self {
        Self::new(0.0, 1, 1)
    }
}

/// Tempo-aware view of the host transport.
///
/// Holds the last tempo, signature and song position the host reported.
/// Tempo changes only affect values computed after the change.
#[derive(Clone, Debug)]
pub struct TransportState {
    bpm: f64,
    signature: TimeSignature,
    position: SongPosition,
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new(120.0, TimeSignature::default())
    }
}

impl TransportState {
    pub fn new(bpm: f64, signature: TimeSignature) -> Self {
        Self {
            bpm: bpm.clamp(1.0, 999.0),
            signature,
            position: SongPosition::default(),
        }
    }

    /// Set the tempo reported by the host.
    ///
    /// Non-positive or non-finite tempos are rejected; the previous tempo stays.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(AutomationError::InvalidTempo { bpm });
        }
        self.bpm = bpm.clamp(1.0, 999.0);
        Ok(())
    }

    /// Get the current BPM.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.signature
    }

    pub fn seconds_per_beat(&self) -> f64 {
        seconds_per_beat(self.bpm)
    }

    /// Wall-clock length of the given number of bars at the current tempo.
    pub fn bars_to_seconds(&self, bars: Bars) -> f64 {
        bars.to_beats(self.signature).as_f64() * self.seconds_per_beat()
    }

    pub fn position(&self) -> SongPosition {
        self.position
    }

    pub fn set_position(&mut self, position: SongPosition) {
        self.position = position;
    }
}

/// Source of wall-clock seconds.
pub trait WallClock {
    fn now(&self) -> WallTime;
}

/// Monotonic clock measuring seconds since it was created.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> WallTime {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Settable clock for tests and simulations.
///
/// Clones share the same time, so a test can keep one copy and hand
/// another to the session.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start: WallTime) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, now: WallTime) {
        self.now.set(now);
    }

    pub fn advance(&self, seconds: f64) -> WallTime {
        let next = self.now.get() + seconds;
        self.now.set(next);
        next
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> WallTime {
        self.now.get()
    }
}
