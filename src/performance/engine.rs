// Performance engine - State guarded by the performance lock
// Every public operation and every tick pass runs with the lock held, so a pass
// only ever observes whole operations

use super::bank::{Bank, default_banks, normalize_bank_index};
use super::grid::SlotGrid;
use super::snapshot::{DisplaySnapshot, SlotView};
use super::{PerformanceError, PerformanceOptions};
use crate::config::Settings;
use crate::messaging::{
    Notification, NotificationCategory, NotificationLevel, NotificationProducer,
};
use crate::midi::{MidiEvent, MidiSink, OutputEvent};
use crate::sequencer::timeline::snap_to_nearest;
use crate::sequencer::{
    BeatPosition, Pattern, PlaybackClock, RunMode, SharedClockState, SongTimeline, Tempo,
    TimeSignature, Trigger,
};
use crate::sync::{ExternalTransport, SyncRole, TransportError, TransportSync};
use ringbuf::traits::Producer;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// A follower jump further ahead than this many beats is a relocation, not playback
const RELOCATE_BEATS: u64 = 8;

/// How far one tick pass moves the clock
#[derive(Debug, Clone, Copy)]
pub(crate) enum Advance {
    Elapsed(Duration),
    Ticks(u64),
}

/// NoteOff events for everything `pattern` holds, stamped at `tick`
fn notes_off(
    slot: usize,
    tick: u64,
    pattern: &mut Pattern,
) -> impl Iterator<Item = OutputEvent> + use<> {
    let channel = pattern.channel();
    pattern
        .all_notes_off()
        .into_iter()
        .map(move |event| OutputEvent {
            tick,
            slot,
            channel,
            event,
        })
}

pub(crate) struct Engine {
    grid: SlotGrid,
    banks: Vec<Bank>,
    current_bank: usize,
    song: SongTimeline,
    clock: PlaybackClock,
    mode: RunMode,

    time_signature: TimeSignature,
    /// Song-record snap size, None = one beat
    snap_ticks: Option<u64>,
    /// Mode entered when an external transport start arrives
    playback_song_mode: bool,
    song_recording: bool,
    song_record_snap: bool,
    resume_note_ons: bool,
    editor_key_height: u32,
    modified: bool,

    sync: TransportSync,
    sink: Box<dyn MidiSink>,
    notifications: Option<NotificationProducer>,
    shared: Arc<SharedClockState>,

    /// NoteOffs owed by patterns that left the grid
    orphan_offs: Vec<OutputEvent>,
    render_buf: Vec<(u64, MidiEvent)>,
    out_buf: Vec<OutputEvent>,
    trigger_buf: Vec<Trigger>,
}

impl Engine {
    pub fn new(
        options: &PerformanceOptions,
        settings: &Settings,
        sink: Box<dyn MidiSink>,
        shared: Arc<SharedClockState>,
    ) -> Self {
        shared.set_bpm(options.tempo.bpm());
        shared.set_run_mode(RunMode::Stopped);
        shared.set_tick(0);

        Self {
            grid: SlotGrid::new(options.layout),
            banks: default_banks(options.layout.bank_count()),
            current_bank: 0,
            song: SongTimeline::new(),
            clock: PlaybackClock::new(options.tempo, options.ppqn),
            mode: RunMode::Stopped,
            time_signature: TimeSignature::four_four(),
            snap_ticks: None,
            playback_song_mode: false,
            song_recording: false,
            song_record_snap: true,
            resume_note_ons: settings.resume_note_ons,
            editor_key_height: settings.editor_key_height,
            modified: false,
            sync: TransportSync::new(settings, options.client_name.clone()),
            sink,
            notifications: None,
            shared,
            orphan_offs: Vec::new(),
            render_buf: Vec::with_capacity(256),
            out_buf: Vec::with_capacity(256),
            trigger_buf: Vec::new(),
        }
    }

    /// Post a notification stamped with the current tick
    fn notify(
        &mut self,
        level: NotificationLevel,
        category: NotificationCategory,
        message: String,
    ) {
        let tick = self.clock.tick();
        if let Some(producer) = self.notifications.as_mut() {
            let notification = Notification::new(level, category, message, tick);
            if producer.try_push(notification).is_err() {
                log::trace!("Notification channel full, dropping notification");
            }
        }
    }

    fn transport_lost(&mut self, error: TransportError) {
        self.sync.degrade(&error);
        self.notify(
            NotificationLevel::Error,
            NotificationCategory::Transport,
            format!("Transport lost ({}), playing on internal clock", error),
        );
    }

    pub fn set_notification_sender(&mut self, producer: NotificationProducer) {
        self.notifications = Some(producer);
    }

    // -------------------------------
    // Queries
    // -------------------------------

    pub fn grid(&self) -> &SlotGrid {
        &self.grid
    }

    pub fn song(&self) -> &SongTimeline {
        &self.song
    }

    pub fn current_bank(&self) -> usize {
        self.current_bank
    }

    pub fn bank(&self, index: i64) -> &Bank {
        &self.banks[normalize_bank_index(index, self.banks.len())]
    }

    pub fn ppqn(&self) -> u32 {
        self.clock.ppqn()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn beat_position(&self) -> BeatPosition {
        BeatPosition::from_tick(self.clock.tick(), &self.time_signature, self.clock.ppqn())
    }

    /// Effective song-record snap size
    pub fn snap_ticks(&self) -> u64 {
        self.snap_ticks
            .unwrap_or_else(|| self.time_signature.ticks_per_beat(self.clock.ppqn()))
    }

    pub fn playback_mode(&self) -> bool {
        self.playback_song_mode
    }

    pub fn is_song_recording(&self) -> bool {
        self.song_recording
    }

    pub fn song_record_snap(&self) -> bool {
        self.song_record_snap
    }

    pub fn resume_note_ons(&self) -> bool {
        self.resume_note_ons
    }

    pub fn editor_key_height(&self) -> u32 {
        self.editor_key_height
    }

    pub fn sync(&self) -> &TransportSync {
        &self.sync
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        let bank = &self.banks[self.current_bank];
        let slots = self
            .grid
            .layout()
            .bank_slots(self.current_bank)
            .map(|slot| {
                self.grid.get(slot).map(|pattern| SlotView {
                    slot,
                    name: pattern.name.clone(),
                    playing: pattern.is_playing(),
                    pending: pattern.pending_toggle(),
                    in_edit: pattern.is_in_edit(),
                    length_ticks: pattern.length_ticks(),
                })
            })
            .collect();

        DisplaySnapshot {
            run_mode: self.mode,
            tick: self.clock.tick(),
            bpm: self.clock.tempo().bpm(),
            beat: self.beat_position(),
            current_bank: self.current_bank,
            bank_name: bank.name.clone(),
            bank_notepad: bank.notepad.clone(),
            slots,
            song_recording: self.song_recording,
            modified: self.modified,
            sync_role: self.sync.role(),
            link_status: self.sync.status().link(),
        }
    }

    // -------------------------------
    // Slot grid
    // -------------------------------

    pub fn create(
        &mut self,
        slot: usize,
        template: Option<&Pattern>,
    ) -> Result<(), PerformanceError> {
        let pattern = match template {
            Some(template) => Pattern::from_template(template),
            None => Pattern::new(
                format!("Pattern {}", slot + 1),
                self.time_signature,
                self.clock.ppqn(),
            ),
        };
        self.grid.create(slot, pattern)?;
        self.modified = true;
        log::debug!("Created pattern in slot {}", slot);
        Ok(())
    }

    pub fn destroy(&mut self, slot: usize) -> Result<(), PerformanceError> {
        let Some(mut pattern) = self.grid.destroy(slot)? else {
            return Ok(());
        };
        let tick = self.clock.tick();
        self.orphan_offs.extend(notes_off(slot, tick, &mut pattern));
        self.song.remove_slot(slot);
        self.modified = true;
        log::debug!("Destroyed pattern '{}' in slot {}", pattern.name, slot);
        Ok(())
    }

    pub fn move_pattern(&mut self, src: usize, dst: usize) -> Result<(), PerformanceError> {
        self.grid.move_pattern(src, dst)?;
        if src != dst {
            self.song.swap_slots(src, dst);
            self.modified = true;
            log::debug!("Moved slot {} to slot {}", src, dst);
        }
        Ok(())
    }

    pub fn clear_all(&mut self) {
        let tick = self.clock.tick();
        for (slot, mut pattern) in self.grid.clear() {
            self.orphan_offs.extend(notes_off(slot, tick, &mut pattern));
        }
        self.song.clear();
        self.banks = default_banks(self.grid.layout().bank_count());
        self.modified = true;
        log::info!("Cleared every slot, bank and song trigger");
    }

    pub fn with_pattern_mut<R>(
        &mut self,
        slot: usize,
        f: impl FnOnce(&mut Pattern) -> R,
    ) -> Result<R, PerformanceError> {
        self.grid.check(slot)?;
        let tick = self.clock.tick();
        let pattern = self.grid.get_mut(slot).ok_or(PerformanceError::SlotEmpty(slot))?;
        let length = pattern.length_ticks();
        let result = f(pattern);

        // A shortened pattern may have dropped the NoteOffs of held notes
        if pattern.length_ticks() < length {
            self.orphan_offs.extend(notes_off(slot, tick, pattern));
        }
        self.modified = true;
        Ok(result)
    }

    pub fn set_in_edit(&mut self, slot: usize, in_edit: bool) -> Result<(), PerformanceError> {
        self.grid.check(slot)?;
        self.grid
            .get_mut(slot)
            .ok_or(PerformanceError::SlotEmpty(slot))?
            .set_in_edit(in_edit);
        Ok(())
    }

    /// Returns the target play state
    pub fn toggle_playing(&mut self, slot: usize) -> Result<bool, PerformanceError> {
        self.grid.check(slot)?;
        let mode = self.mode;
        let pattern = self.grid.get_mut(slot).ok_or(PerformanceError::SlotEmpty(slot))?;

        let target = match mode {
            RunMode::Stopped | RunMode::SongRunning => {
                let target = !pattern.effective_playing();
                pattern.set_playing(target);
                target
            }
            // Applied by the next tick pass
            RunMode::LiveRunning => pattern.request_toggle(),
        };

        if mode == RunMode::SongRunning && self.song_recording {
            let mut tick = self.clock.tick();
            if self.song_record_snap {
                tick = snap_to_nearest(tick, self.snap_ticks());
            }
            self.song.record_trigger(tick, slot, target);
            self.modified = true;
            log::debug!(
                "Recorded trigger at tick {}: slot {} {}",
                tick,
                slot,
                if target { "on" } else { "off" }
            );
        }

        Ok(target)
    }

    // -------------------------------
    // Banks
    // -------------------------------

    /// Returns the notepad of the new current bank
    pub fn set_bank(&mut self, index: i64) -> String {
        self.current_bank = normalize_bank_index(index, self.banks.len());
        let bank = &self.banks[self.current_bank];
        let notepad = bank.notepad.clone();
        let message = if notepad.is_empty() {
            bank.name.clone()
        } else {
            format!("{}: {}", bank.name, notepad)
        };

        log::debug!("Current bank is now {}", self.current_bank);
        self.notify(NotificationLevel::Info, NotificationCategory::Bank, message);
        notepad
    }

    pub fn rename_bank(&mut self, index: i64, name: String) {
        let index = normalize_bank_index(index, self.banks.len());
        self.banks[index].name = name;
        self.modified = true;
    }

    pub fn set_bank_notepad(&mut self, index: i64, notepad: String) {
        let index = normalize_bank_index(index, self.banks.len());
        self.banks[index].notepad = notepad;
        self.modified = true;
    }

    // -------------------------------
    // Run mode
    // -------------------------------

    pub fn start(&mut self, song_mode: bool) {
        if self.mode.is_running() {
            return;
        }
        let Ok(mode) = self.mode.transition(RunMode::running(song_mode)) else {
            return;
        };

        let start_tick = match self.sync.position_ticks(self.clock.ppqn(), self.clock.tempo()) {
            Ok(tick) => tick.unwrap_or(0),
            Err(e) => {
                self.transport_lost(e);
                0
            }
        };

        self.clock.reset(start_tick);
        self.clock.start();
        self.mode = mode;
        if song_mode {
            self.rebuild_song_state(start_tick);
        }
        if let Err(e) = self.sync.start() {
            self.transport_lost(e);
        }

        self.shared.set_tick(start_tick);
        self.shared.set_run_mode(mode);
        log::info!("Started {:?} at tick {}", mode, start_tick);
    }

    pub fn stop(&mut self) {
        let was_running = self.mode.is_running();
        self.clock.stop();
        self.mode = RunMode::Stopped;

        let tick = self.clock.tick();
        for (slot, pattern) in self.grid.iter_active_mut() {
            pattern.resolve_pending();
            if !self.resume_note_ons {
                for event in notes_off(slot, tick, pattern) {
                    self.sink.send(event);
                }
            }
        }
        for event in self.orphan_offs.drain(..) {
            self.sink.send(event);
        }

        if was_running {
            if let Err(e) = self.sync.stop() {
                self.transport_lost(e);
            }
            log::info!("Stopped at tick {}", tick);
        }
        self.shared.set_run_mode(RunMode::Stopped);
    }

    pub fn locate(&mut self, tick: u64) {
        self.relocate(tick);
        let (tempo, ppqn) = (self.clock.tempo(), self.clock.ppqn());
        if let Err(e) = self.sync.locate(tick, tempo, ppqn) {
            self.transport_lost(e);
        }
        self.shared.set_tick(tick);
    }

    /// Play flags as left by every trigger before `tick`
    fn rebuild_song_state(&mut self, tick: u64) {
        for (slot, pattern) in self.grid.iter_active_mut() {
            pattern.set_playing(self.song.state_at(slot, tick).unwrap_or(false));
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), PerformanceError> {
        let tempo = Tempo::new(bpm)?;
        self.clock.set_tempo(tempo);
        self.shared.set_bpm(tempo.bpm());
        self.modified = true;
        log::debug!("Tempo set to {}", tempo);
        Ok(())
    }

    fn apply_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
        for (_, pattern) in self.grid.iter_active_mut() {
            pattern.set_time_signature(time_signature);
        }
        self.modified = true;
        log::debug!("Time signature set to {}", time_signature);
    }

    pub fn set_beats_per_measure(
        &mut self,
        beats_per_measure: u32,
    ) -> Result<(), PerformanceError> {
        let time_signature =
            TimeSignature::new(beats_per_measure, self.time_signature.beat_width)?;
        self.apply_time_signature(time_signature);
        Ok(())
    }

    pub fn set_beat_width(&mut self, beat_width: u32) -> Result<(), PerformanceError> {
        let time_signature =
            TimeSignature::new(self.time_signature.beats_per_measure, beat_width)?;
        self.apply_time_signature(time_signature);
        Ok(())
    }

    /// 0 restores the default of one beat
    pub fn set_snap_ticks(&mut self, ticks: u64) {
        self.snap_ticks = (ticks > 0).then_some(ticks);
    }

    pub fn set_playback_mode(&mut self, song_mode: bool) {
        self.playback_song_mode = song_mode;
    }

    pub fn set_song_recording(&mut self, recording: bool) {
        self.song_recording = recording;
    }

    pub fn set_song_record_snap(&mut self, snap: bool) {
        self.song_record_snap = snap;
    }

    pub fn set_resume_note_ons(&mut self, resume: bool) {
        self.resume_note_ons = resume;
    }

    pub fn set_editor_key_height(&mut self, height: u32) {
        self.editor_key_height = height;
    }

    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    // -------------------------------
    // Song timeline
    // -------------------------------

    pub fn record_trigger(
        &mut self,
        tick: u64,
        slot: usize,
        on: bool,
    ) -> Result<(), PerformanceError> {
        self.grid.check(slot)?;
        self.song.record_trigger(tick, slot, on);
        self.modified = true;
        Ok(())
    }

    pub fn clear_song(&mut self) {
        if !self.song.is_empty() {
            self.song.clear();
            self.modified = true;
        }
    }

    // -------------------------------
    // Transport and settings
    // -------------------------------

    pub fn set_transport(&mut self, transport: Box<dyn ExternalTransport>) {
        self.sync.set_transport(transport);
    }

    pub fn init_transport(&mut self) -> Result<SyncRole, PerformanceError> {
        self.sync.init().map_err(|e| {
            self.notify(
                NotificationLevel::Error,
                NotificationCategory::Transport,
                format!("Transport unavailable: {}", e),
            );
            e.into()
        })
    }

    pub fn deinit_transport(&mut self) -> Result<(), PerformanceError> {
        Ok(self.sync.deinit()?)
    }

    pub fn apply_settings(&mut self, settings: &Settings) {
        self.resume_note_ons = settings.resume_note_ons;
        self.editor_key_height = settings.editor_key_height;
        self.sync.update_settings(&settings.transport);
    }

    pub fn store_settings(&self, settings: &mut Settings) {
        settings.resume_note_ons = self.resume_note_ons;
        settings.editor_key_height = self.editor_key_height;
        settings.transport = *self.sync.settings();
    }

    // -------------------------------
    // Tick pass
    // -------------------------------

    pub fn advance(&mut self, advance: Advance) {
        let window = self.follow_transport().unwrap_or_else(|| match advance {
            Advance::Elapsed(elapsed) => self.clock.advance(elapsed),
            Advance::Ticks(ticks) => self.clock.advance_ticks(ticks),
        });

        self.process_window(window);
        self.publish_transport();
        self.shared.set_tick(self.clock.tick());
    }

    /// Follower poll. None when the internal clock drives the pass
    fn follow_transport(&mut self) -> Option<Range<u64>> {
        let update = match self.sync.follow(self.clock.ppqn(), self.clock.tempo()) {
            Ok(update) => update?,
            Err(e) => {
                self.transport_lost(e);
                return None;
            }
        };

        let running = self.mode.is_running();
        if update.rolling && !running {
            self.start(self.playback_song_mode);
        } else if !update.rolling && running {
            self.stop();
        }

        let from = self.clock.tick();
        if !self.mode.is_running() {
            return Some(from..from);
        }

        let limit = from + RELOCATE_BEATS * self.time_signature.ticks_per_beat(self.clock.ppqn());
        if update.tick < from || update.tick > limit {
            self.relocate(update.tick);
            return Some(update.tick..update.tick);
        }
        Some(self.clock.jump_to(update.tick))
    }

    /// Jump without playing the ticks in between
    fn relocate(&mut self, tick: u64) {
        let from = self.clock.tick();
        log::debug!("Relocated from tick {} to {}", from, tick);

        for (slot, pattern) in self.grid.iter_active_mut() {
            for event in notes_off(slot, from, pattern) {
                self.sink.send(event);
            }
        }
        self.clock.reset(tick);
        if self.mode.is_song() {
            self.rebuild_song_state(tick);
        }
    }

    fn process_window(&mut self, window: Range<u64>) {
        let Range { start: from, end: to } = window;
        let advancing = self.mode.is_running() && to > from;
        log::trace!("Tick pass [{}, {})", from, to);

        if advancing {
            for (_, pattern) in self.grid.iter_active_mut() {
                pattern.resolve_pending();
            }
        }
        self.flush_stopped(from);

        if advancing {
            let mut cursor = from;
            if self.mode.is_song() {
                let mut due = std::mem::take(&mut self.trigger_buf);
                due.clear();
                due.extend(self.song.triggers_due(from, to));

                for trigger in &due {
                    self.render_segment(cursor, trigger.tick);
                    cursor = cursor.max(trigger.tick);
                    if let Some(pattern) = self.grid.get_mut(trigger.slot) {
                        pattern.set_playing(trigger.on);
                    }
                    self.flush_stopped(trigger.tick);
                }
                self.trigger_buf = due;
            }
            self.render_segment(cursor, to);
        }

        for event in self.orphan_offs.drain(..) {
            self.sink.send(event);
        }
        self.out_buf.sort_by_key(|e| e.tick);
        for event in self.out_buf.drain(..) {
            self.sink.send(event);
        }
    }

    /// Queue NoteOffs for patterns that stopped while holding notes
    fn flush_stopped(&mut self, tick: u64) {
        for (slot, pattern) in self.grid.iter_active_mut() {
            if !pattern.is_playing() && pattern.has_sounding_notes() {
                self.out_buf.extend(notes_off(slot, tick, pattern));
            }
        }
    }

    fn render_segment(&mut self, from: u64, to: u64) {
        if from >= to {
            return;
        }
        for (slot, pattern) in self.grid.iter_active_mut() {
            if !pattern.is_playing() {
                continue;
            }
            self.render_buf.clear();
            pattern.render(from, to, &mut self.render_buf);

            let channel = pattern.channel();
            self.out_buf
                .extend(self.render_buf.drain(..).map(|(tick, event)| OutputEvent {
                    tick,
                    slot,
                    channel,
                    event,
                }));
        }
    }

    /// Master duties: yield if another client took the role, otherwise publish
    fn publish_transport(&mut self) {
        if self.sync.role() != SyncRole::Master {
            return;
        }
        match self.sync.check_master() {
            Ok(SyncRole::Master) => {}
            Ok(_) => {
                self.notify(
                    NotificationLevel::Warning,
                    NotificationCategory::Transport,
                    "Another application took the transport master role".to_string(),
                );
                return;
            }
            Err(e) => {
                self.transport_lost(e);
                return;
            }
        }

        let (tick, tempo, ppqn) = (self.clock.tick(), self.clock.tempo(), self.clock.ppqn());
        if let Err(e) = self.sync.publish(tick, tempo, ppqn, self.mode.is_running()) {
            self.transport_lost(e);
        }
    }
}
