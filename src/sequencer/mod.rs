// Sequencer module
// Patterns, musical time, the playback clock and the song timeline

pub mod clock;
pub mod pattern;
pub mod run_mode;
pub mod song;
pub mod timeline;

pub use clock::PlaybackClock;
pub use pattern::{Pattern, PatternEvent};
pub use run_mode::{InvalidTransition, RunMode, SharedClockState};
pub use song::{SongTimeline, Trigger, TriggersDue};
pub use timeline::{BeatPosition, DEFAULT_PPQN, Tempo, TimeSignature, TimingError};
