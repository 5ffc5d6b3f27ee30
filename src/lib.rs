// MyMusic Live - Pattern-based live performance sequencer

pub mod config;
pub mod messaging;
pub mod midi;
pub mod performance;
pub mod sequencer;
pub mod sync;

// Re-export commonly used types for convenience
pub use config::{ConfigError, RecentFiles, Settings, TransportSettings};
pub use messaging::{create_notification_channel, create_output_channel};
pub use midi::{ChannelSink, MidiEvent, MidiSink, NullSink, OutputEvent};
pub use performance::{
    ClockRunner, DisplaySnapshot, GridLayout, Performance, PerformanceError, PerformanceOptions,
};
pub use sequencer::{
    BeatPosition, Pattern, PlaybackClock, RunMode, SongTimeline, Tempo, TimeSignature, Trigger,
};
pub use sync::{ExternalTransport, LinkStatus, SharedTransport, SyncRole, TransportError};
