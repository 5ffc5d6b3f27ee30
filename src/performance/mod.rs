// Performance - Slot grid, banks, run mode and transport sync behind one handle
//
// `Performance` is a cheap cloneable handle. The clock thread, the display layer and
// the editors all hold a clone; every call takes the engine lock exactly once.
// Run mode, tick, tempo and sync status can also be polled lock-free.

mod bank;
mod engine;
mod grid;
mod runner;
mod snapshot;

pub use bank::{Bank, normalize_bank_index};
pub use grid::{GridLayout, SlotGrid};
pub use runner::ClockRunner;
pub use snapshot::{DisplaySnapshot, SlotView};

use crate::config::Settings;
use crate::messaging::NotificationProducer;
use crate::midi::{MidiSink, NullSink};
use crate::sequencer::{
    BeatPosition, DEFAULT_PPQN, Pattern, RunMode, SharedClockState, Tempo, TimeSignature,
    TimingError, Trigger,
};
use crate::sync::{ExternalTransport, LinkStatus, SyncRole, SyncStatus, TransportError};
use engine::{Advance, Engine};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Performance error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PerformanceError {
    #[error("Slot {0} already holds a pattern")]
    SlotOccupied(usize),

    #[error("Pattern in slot {0} is being edited")]
    SlotInEdit(usize),

    #[error("Slot {0} is empty")]
    SlotEmpty(usize),

    #[error("Slot {0} is out of range")]
    InvalidSlot(usize),

    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("Invalid bank index: {0}")]
    InvalidBankIndex(i64),

    #[error("Invalid time signature {beats_per_measure}/{beat_width}")]
    InvalidTimeSignature {
        beats_per_measure: u32,
        beat_width: u32,
    },

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),
}

impl From<TimingError> for PerformanceError {
    fn from(error: TimingError) -> Self {
        match error {
            TimingError::InvalidTempo(bpm) => PerformanceError::InvalidTempo(bpm),
            TimingError::InvalidTimeSignature {
                beats_per_measure,
                beat_width,
            } => PerformanceError::InvalidTimeSignature {
                beats_per_measure,
                beat_width,
            },
        }
    }
}

impl From<TransportError> for PerformanceError {
    fn from(error: TransportError) -> Self {
        PerformanceError::TransportUnavailable(error.to_string())
    }
}

/// Construction parameters fixed for the lifetime of a performance
#[derive(Debug, Clone)]
pub struct PerformanceOptions {
    pub layout: GridLayout,
    pub ppqn: u32,
    pub tempo: Tempo,
    /// Name registered on the external transport
    pub client_name: String,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            layout: GridLayout::default(),
            ppqn: DEFAULT_PPQN,
            tempo: Tempo::default(),
            client_name: "mymusic_live".to_string(),
        }
    }
}

/// Shared handle on the performance engine
#[derive(Clone)]
pub struct Performance {
    engine: Arc<Mutex<Engine>>,
    clock_state: Arc<SharedClockState>,
    sync_status: SyncStatus,
    layout: GridLayout,
}

impl Performance {
    /// Performance whose output is discarded
    pub fn new(options: PerformanceOptions, settings: &Settings) -> Self {
        Self::with_sink(options, settings, Box::new(NullSink))
    }

    pub fn with_sink(
        options: PerformanceOptions,
        settings: &Settings,
        sink: Box<dyn MidiSink>,
    ) -> Self {
        let clock_state = SharedClockState::new(options.tempo.bpm());
        let engine = Engine::new(&options, settings, sink, Arc::clone(&clock_state));
        let sync_status = engine.sync().status();

        Self {
            engine: Arc::new(Mutex::new(engine)),
            clock_state,
            sync_status,
            layout: options.layout,
        }
    }

    fn engine(&self) -> MutexGuard<'_, Engine> {
        // A panic in another holder leaves the state consistent between operations
        self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Route engine notifications (bank changes, transport loss) to the display layer
    pub fn set_notification_sender(&self, producer: NotificationProducer) {
        self.engine().set_notification_sender(producer);
    }

    // -------------------------------
    // Queries
    // -------------------------------

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn total_slots(&self) -> usize {
        self.layout.total_slots()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.engine().grid().is_active(slot)
    }

    /// Copy of the pattern in `slot`
    pub fn pattern(&self, slot: usize) -> Option<Pattern> {
        self.engine().grid().get(slot).cloned()
    }

    /// Read access without copying the pattern
    pub fn with_pattern<R>(&self, slot: usize, f: impl FnOnce(&Pattern) -> R) -> Option<R> {
        self.engine().grid().get(slot).map(f)
    }

    /// Copies of every pattern with its slot, for writers exporting the performance
    pub fn active_patterns(&self) -> Vec<(usize, Pattern)> {
        self.engine()
            .grid()
            .iter_active()
            .map(|(slot, pattern)| (slot, pattern.clone()))
            .collect()
    }

    pub fn current_bank(&self) -> usize {
        self.engine().current_bank()
    }

    pub fn bank_name(&self, index: i64) -> String {
        self.engine().bank(index).name.clone()
    }

    pub fn bank_notepad(&self, index: i64) -> String {
        self.engine().bank(index).notepad.clone()
    }

    pub fn tempo(&self) -> f64 {
        self.clock_state.bpm()
    }

    pub fn run_mode(&self) -> RunMode {
        self.clock_state.run_mode()
    }

    pub fn current_tick(&self) -> u64 {
        self.clock_state.tick()
    }

    pub fn is_running(&self) -> bool {
        self.run_mode().is_running()
    }

    pub fn is_modified(&self) -> bool {
        self.engine().is_modified()
    }

    pub fn ppqn(&self) -> u32 {
        self.engine().ppqn()
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.engine().time_signature()
    }

    /// Measure and beat of the current tick, for beat indicators
    pub fn beat_position(&self) -> BeatPosition {
        self.engine().beat_position()
    }

    pub fn snap_ticks(&self) -> u64 {
        self.engine().snap_ticks()
    }

    pub fn playback_mode(&self) -> bool {
        self.engine().playback_mode()
    }

    pub fn is_song_recording(&self) -> bool {
        self.engine().is_song_recording()
    }

    pub fn song_record_snap(&self) -> bool {
        self.engine().song_record_snap()
    }

    pub fn resume_note_ons(&self) -> bool {
        self.engine().resume_note_ons()
    }

    pub fn editor_key_height(&self) -> u32 {
        self.engine().editor_key_height()
    }

    pub fn song_triggers(&self) -> Vec<Trigger> {
        self.engine().song().iter().copied().collect()
    }

    pub fn sync_role(&self) -> SyncRole {
        self.sync_status.role()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.sync_status.link()
    }

    /// Everything the display needs, read under one lock
    pub fn refresh(&self) -> DisplaySnapshot {
        self.engine().snapshot()
    }

    // -------------------------------
    // Slot grid
    // -------------------------------

    /// Create a pattern in an empty slot, empty or copied from `template`
    pub fn create(&self, slot: usize, template: Option<&Pattern>) -> Result<(), PerformanceError> {
        self.engine().create(slot, template)
    }

    /// Release the pattern in `slot`. No-op on an empty slot
    pub fn destroy(&self, slot: usize) -> Result<(), PerformanceError> {
        self.engine().destroy(slot)
    }

    /// Move the pattern in `src` to `dst`. An occupied `dst` is swapped into `src`
    pub fn move_pattern(&self, src: usize, dst: usize) -> Result<(), PerformanceError> {
        self.engine().move_pattern(src, dst)
    }

    /// Destroy every pattern, clear the song and reset bank metadata
    pub fn clear_all(&self) {
        self.engine().clear_all();
    }

    /// Mutable access for editors. Marks the performance modified
    pub fn with_pattern_mut<R>(
        &self,
        slot: usize,
        f: impl FnOnce(&mut Pattern) -> R,
    ) -> Result<R, PerformanceError> {
        self.engine().with_pattern_mut(slot, f)
    }

    pub fn set_in_edit(&self, slot: usize, in_edit: bool) -> Result<(), PerformanceError> {
        self.engine().set_in_edit(slot, in_edit)
    }

    /// Flip the play state of `slot`
    ///
    /// Stopped: applied at once. LiveRunning: applied by the next tick pass, a second
    /// toggle before then retargets it. SongRunning: applied at once until the next
    /// trigger for the slot, and recorded as a trigger while song recording is on.
    ///
    /// Returns the target play state.
    pub fn toggle_playing(&self, slot: usize) -> Result<bool, PerformanceError> {
        self.engine().toggle_playing(slot)
    }

    // -------------------------------
    // Banks
    // -------------------------------

    /// Switch banks (wrapping) and return the new bank's notepad
    pub fn set_bank(&self, index: i64) -> String {
        self.engine().set_bank(index)
    }

    pub fn rename_bank(&self, index: i64, name: impl Into<String>) {
        self.engine().rename_bank(index, name.into());
    }

    pub fn set_bank_notepad(&self, index: i64, notepad: impl Into<String>) {
        self.engine().set_bank_notepad(index, notepad.into());
    }

    // -------------------------------
    // Run mode
    // -------------------------------

    /// Start playing from the transport position (or tick 0). No-op while running
    pub fn start(&self, song_mode: bool) {
        self.engine().start(song_mode);
    }

    /// Stop from any state
    pub fn stop(&self) {
        self.engine().stop();
    }

    /// Move the playback position, and the shared transport when engaged
    ///
    /// Held notes are released and the skipped span is not played. In song mode the
    /// play states are rebuilt from the triggers before `tick`.
    pub fn locate(&self, tick: u64) {
        self.engine().locate(tick);
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<(), PerformanceError> {
        self.engine().set_bpm(bpm)
    }

    pub fn set_beats_per_measure(
        &self,
        beats_per_measure: u32,
    ) -> Result<(), PerformanceError> {
        self.engine().set_beats_per_measure(beats_per_measure)
    }

    pub fn set_beat_width(&self, beat_width: u32) -> Result<(), PerformanceError> {
        self.engine().set_beat_width(beat_width)
    }

    pub fn set_snap_ticks(&self, ticks: u64) {
        self.engine().set_snap_ticks(ticks);
    }

    /// Mode entered when an external transport start arrives
    pub fn set_playback_mode(&self, song_mode: bool) {
        self.engine().set_playback_mode(song_mode);
    }

    pub fn set_song_recording(&self, recording: bool) {
        self.engine().set_song_recording(recording);
    }

    pub fn set_song_record_snap(&self, snap: bool) {
        self.engine().set_song_record_snap(snap);
    }

    pub fn set_resume_note_ons(&self, resume: bool) {
        self.engine().set_resume_note_ons(resume);
    }

    pub fn set_editor_key_height(&self, height: u32) {
        self.engine().set_editor_key_height(height);
    }

    pub fn mark_saved(&self) {
        self.engine().mark_saved();
    }

    // -------------------------------
    // Song timeline
    // -------------------------------

    pub fn record_trigger(
        &self,
        tick: u64,
        slot: usize,
        on: bool,
    ) -> Result<(), PerformanceError> {
        self.engine().record_trigger(tick, slot, on)
    }

    pub fn clear_song(&self) {
        self.engine().clear_song();
    }

    // -------------------------------
    // Transport sync
    // -------------------------------

    /// Attach the transport used by `init_transport`
    pub fn set_transport(&self, transport: Box<dyn ExternalTransport>) {
        self.engine().set_transport(transport);
    }

    /// Engage the transport per settings. Idempotent
    pub fn init_transport(&self) -> Result<SyncRole, PerformanceError> {
        self.engine().init_transport()
    }

    /// Release the transport. Playback continues on the internal clock
    pub fn deinit_transport(&self) -> Result<(), PerformanceError> {
        self.engine().deinit_transport()
    }

    /// Take performance-owned preferences and transport flags from `settings`
    /// Transport flags apply on the next `init_transport`
    pub fn apply_settings(&self, settings: &Settings) {
        self.engine().apply_settings(settings);
    }

    /// Write performance-owned preferences back into `settings`
    pub fn store_settings(&self, settings: &mut Settings) {
        self.engine().store_settings(settings);
    }

    // -------------------------------
    // Clock
    // -------------------------------

    /// One tick pass covering `elapsed` wall-clock time
    pub fn advance(&self, elapsed: Duration) {
        self.engine().advance(Advance::Elapsed(elapsed));
    }

    /// One tick pass covering exactly `ticks` ticks
    pub fn step(&self, ticks: u64) {
        self.engine().advance(Advance::Ticks(ticks));
    }
}
