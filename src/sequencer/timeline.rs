// Timeline - Musical time in ticks
// Tempo, time signature and the tick arithmetic shared by patterns, the clock and the song timeline

use std::fmt;

/// Default resolution (ticks per quarter note)
pub const DEFAULT_PPQN: u32 = 192;

/// Largest beats-per-measure value the engine accepts
pub const MAX_BEATS_PER_MEASURE: u32 = 16;

/// Fastest tempo the engine accepts
pub const MAX_BPM: f64 = 999.0;

/// Errors produced when building tempo or time signature values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimingError {
    #[error("Tempo must be above 0 and at most 999 BPM, got {0}")]
    InvalidTempo(f64),

    #[error("Invalid time signature {beats_per_measure}/{beat_width}")]
    InvalidTimeSignature {
        beats_per_measure: u32,
        beat_width: u32,
    },
}

/// Time signature (beats per measure / beat width)
/// Example: 6/8 = TimeSignature { beats_per_measure: 6, beat_width: 8 }
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSignature {
    pub beats_per_measure: u32,
    pub beat_width: u32, // 1, 2, 4, 8 or 16
}

impl TimeSignature {
    /// Creates a new time signature
    pub fn new(beats_per_measure: u32, beat_width: u32) -> Result<Self, TimingError> {
        if !Self::is_valid_beats_per_measure(beats_per_measure)
            || !Self::is_valid_beat_width(beat_width)
        {
            return Err(TimingError::InvalidTimeSignature {
                beats_per_measure,
                beat_width,
            });
        }
        Ok(Self {
            beats_per_measure,
            beat_width,
        })
    }

    /// Common 4/4 time signature
    pub fn four_four() -> Self {
        Self {
            beats_per_measure: 4,
            beat_width: 4,
        }
    }

    pub fn is_valid_beats_per_measure(beats_per_measure: u32) -> bool {
        (1..=MAX_BEATS_PER_MEASURE).contains(&beats_per_measure)
    }

    pub fn is_valid_beat_width(beat_width: u32) -> bool {
        beat_width.is_power_of_two() && beat_width <= 16
    }

    /// Ticks in one beat at the given resolution
    pub fn ticks_per_beat(&self, ppqn: u32) -> u64 {
        ticks_per_beat(ppqn, self.beat_width)
    }

    /// Ticks in one measure at the given resolution
    pub fn ticks_per_measure(&self, ppqn: u32) -> u64 {
        self.ticks_per_beat(ppqn) * self.beats_per_measure as u64
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::four_four()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.beats_per_measure, self.beat_width)
    }
}

/// Ticks in one beat of the given width
/// A quarter note is `ppqn` ticks, a beat of width `w` is `ppqn * 4 / w`
pub fn ticks_per_beat(ppqn: u32, beat_width: u32) -> u64 {
    (ppqn as u64 * 4) / beat_width.max(1) as u64
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    bpm: f64,
}

impl Tempo {
    /// Creates a new tempo in `(0, MAX_BPM]`
    pub fn new(bpm: f64) -> Result<Self, TimingError> {
        if !bpm.is_finite() || bpm <= 0.0 || bpm > MAX_BPM {
            return Err(TimingError::InvalidTempo(bpm));
        }
        Ok(Self { bpm })
    }

    /// Get BPM value
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Duration of one quarter note in seconds
    pub fn beat_duration_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Clock rate at the given resolution
    pub fn ticks_per_second(&self, ppqn: u32) -> f64 {
        self.bpm / 60.0 * ppqn as f64
    }

    /// Convert a frame position of an external transport into ticks
    pub fn frames_to_ticks(&self, frame: u64, frame_rate: u32, ppqn: u32) -> u64 {
        if frame_rate == 0 {
            return 0;
        }
        let seconds = frame as f64 / frame_rate as f64;
        (seconds * self.ticks_per_second(ppqn)).round() as u64
    }

    /// Convert ticks into a frame position of an external transport
    pub fn ticks_to_frames(&self, tick: u64, frame_rate: u32, ppqn: u32) -> u64 {
        let seconds = tick as f64 / self.ticks_per_second(ppqn);
        (seconds * frame_rate as f64).round() as u64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: 120.0 }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} BPM", self.bpm)
    }
}

/// Round a tick to the nearest multiple of `snap`
/// A snap of 0 or 1 leaves the tick unchanged
pub fn snap_to_nearest(tick: u64, snap: u64) -> u64 {
    if snap <= 1 {
        return tick;
    }
    ((tick + snap / 2) / snap) * snap
}

/// Position of a tick expressed as measure and beat (both 0-based)
/// Used by beat indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BeatPosition {
    pub measure: u64,
    pub beat: u32,
}

impl BeatPosition {
    pub fn from_tick(tick: u64, time_signature: &TimeSignature, ppqn: u32) -> Self {
        let beat_ticks = time_signature.ticks_per_beat(ppqn).max(1);
        let total_beats = tick / beat_ticks;
        let beats_per_measure = time_signature.beats_per_measure.max(1) as u64;

        Self {
            measure: total_beats / beats_per_measure,
            beat: (total_beats % beats_per_measure) as u32,
        }
    }

    /// True on the first beat of a measure
    pub fn is_downbeat(&self) -> bool {
        self.beat == 0
    }
}

impl fmt::Display for BeatPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.measure + 1, self.beat + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature() {
        let ts = TimeSignature::four_four();
        assert_eq!(ts.beats_per_measure, 4);
        assert_eq!(ts.beat_width, 4);
        assert_eq!(ts.to_string(), "4/4");
        assert_eq!(ts.ticks_per_beat(192), 192);
        assert_eq!(ts.ticks_per_measure(192), 768);
    }

    #[test]
    fn test_time_signature_validation() {
        assert!(TimeSignature::new(7, 8).is_ok());
        assert!(TimeSignature::new(0, 4).is_err());
        assert!(TimeSignature::new(17, 4).is_err());
        assert!(TimeSignature::new(4, 3).is_err());
        assert!(TimeSignature::new(4, 32).is_err());
    }

    #[test]
    fn test_ticks_per_beat_by_width() {
        // Eighth-note beats are half a quarter
        assert_eq!(ticks_per_beat(192, 8), 96);
        assert_eq!(ticks_per_beat(192, 2), 384);
        assert_eq!(ticks_per_beat(16, 4), 16);
    }

    #[test]
    fn test_tempo() {
        let tempo = Tempo::new(120.0).unwrap();
        assert_eq!(tempo.bpm(), 120.0);
        assert_eq!(tempo.beat_duration_seconds(), 0.5);
        assert_eq!(tempo.ticks_per_second(192), 384.0);
    }

    #[test]
    fn test_tempo_rejects_invalid_values() {
        assert_eq!(Tempo::new(0.0), Err(TimingError::InvalidTempo(0.0)));
        assert!(Tempo::new(-10.0).is_err());
        assert!(Tempo::new(f64::NAN).is_err());
        assert!(Tempo::new(f64::INFINITY).is_err());
        assert!(Tempo::new(1e300).is_err());
        assert!(Tempo::new(MAX_BPM).is_ok());
    }

    #[test]
    fn test_frame_conversion() {
        let tempo = Tempo::new(120.0).unwrap();

        // One second at 48kHz is two beats at 120 BPM
        assert_eq!(tempo.frames_to_ticks(48_000, 48_000, 192), 384);
        assert_eq!(tempo.ticks_to_frames(384, 48_000, 192), 48_000);
        assert_eq!(tempo.frames_to_ticks(1000, 0, 192), 0);
    }

    #[test]
    fn test_snap_to_nearest() {
        assert_eq!(snap_to_nearest(17, 16), 16);
        assert_eq!(snap_to_nearest(24, 16), 32);
        assert_eq!(snap_to_nearest(23, 16), 16);
        assert_eq!(snap_to_nearest(5, 0), 5);
        assert_eq!(snap_to_nearest(5, 1), 5);
    }

    #[test]
    fn test_beat_position() {
        let ts = TimeSignature::new(3, 4).unwrap();

        let pos = BeatPosition::from_tick(0, &ts, 192);
        assert_eq!(pos, BeatPosition { measure: 0, beat: 0 });
        assert!(pos.is_downbeat());

        // Beat 3 of measure 1
        let pos = BeatPosition::from_tick(2 * 192 + 10, &ts, 192);
        assert_eq!(pos, BeatPosition { measure: 0, beat: 2 });

        // First beat of measure 2
        let pos = BeatPosition::from_tick(3 * 192, &ts, 192);
        assert_eq!(pos, BeatPosition { measure: 1, beat: 0 });
        assert_eq!(pos.to_string(), "2:1");
    }
}
