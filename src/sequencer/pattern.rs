// Pattern - Independently playable loop of MIDI events
// A pattern lives in exactly one slot of the grid

use crate::midi::event::MidiEvent;
use crate::sequencer::timeline::{TimeSignature, TimingError};

/// A MIDI event at a tick offset inside the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternEvent {
    pub tick: u64,
    pub event: MidiEvent,
}

/// Bitset of the 128 MIDI notes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NoteSet(u128);

impl NoteSet {
    fn insert(&mut self, note: u8) {
        self.0 |= 1u128 << (note & 0x7F);
    }

    fn remove(&mut self, note: u8) {
        self.0 &= !(1u128 << (note & 0x7F));
    }

    fn contains(&self, note: u8) -> bool {
        self.0 & (1u128 << (note & 0x7F)) != 0
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..128).filter(move |n| self.contains(*n))
    }
}

/// A loop of MIDI events with its own length and play state
///
/// The length in ticks is always `measures × beats_per_measure × ticks_per_beat(beat_width)`.
/// Changing the time signature never drops events: events past the end are kept
/// until the next explicit resize with [`Pattern::set_measures`]. NoteOns past the end
/// are not played; NoteOffs past the end wrap around to `tick % length`.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Display name
    pub name: String,

    /// MIDI channel used for output (0-15)
    channel: u8,

    /// Events sorted by tick, insertion order kept on ties
    events: Vec<PatternEvent>,

    /// NoteOffs at or past the end, folded into the loop and sorted
    wrapped_offs: Vec<PatternEvent>,

    measures: u32,
    time_signature: TimeSignature,
    ppqn: u32,
    length_ticks: u64,

    playing: bool,

    /// Target play state waiting for the next tick boundary
    pending: Option<bool>,

    /// Set while an editor has the pattern open
    in_edit: bool,

    /// Notes currently held by this pattern (NoteOn sent, NoteOff not yet)
    sounding: NoteSet,
}

impl Pattern {
    /// Create an empty, stopped, one-measure pattern
    pub fn new(name: impl Into<String>, time_signature: TimeSignature, ppqn: u32) -> Self {
        let mut pattern = Self {
            name: name.into(),
            channel: 0,
            events: Vec::new(),
            wrapped_offs: Vec::new(),
            measures: 1,
            time_signature,
            ppqn,
            length_ticks: 0,
            playing: false,
            pending: None,
            in_edit: false,
            sounding: NoteSet::default(),
        };
        pattern.recompute_length();
        pattern
    }

    /// Copy of `template`'s musical content with fresh runtime state
    pub fn from_template(template: &Pattern) -> Self {
        let mut pattern = template.clone();
        pattern.reset_runtime_state();
        pattern
    }

    /// Clear play, pending, edit and sounding state
    pub fn reset_runtime_state(&mut self) {
        self.playing = false;
        self.pending = None;
        self.in_edit = false;
        self.sounding = NoteSet::default();
    }

    fn recompute_length(&mut self) {
        self.length_ticks = self.measures as u64 * self.time_signature.ticks_per_measure(self.ppqn);
        self.rebuild_wrapped_offs();
    }

    fn rebuild_wrapped_offs(&mut self) {
        let length = self.length_ticks;
        self.wrapped_offs.clear();
        if length == 0 {
            return;
        }
        let end = self.events.partition_point(|e| e.tick < length);
        self.wrapped_offs.extend(
            self.events[end..]
                .iter()
                .filter(|e| matches!(e.event, MidiEvent::NoteOff { .. }))
                .map(|e| PatternEvent {
                    tick: e.tick % length,
                    event: e.event,
                }),
        );
        // Stable: ties keep insertion order
        self.wrapped_offs.sort_by_key(|e| e.tick);
    }

    // -------------------------------
    // Length and time signature
    // -------------------------------

    pub fn length_ticks(&self) -> u64 {
        self.length_ticks
    }

    pub fn measures(&self) -> u32 {
        self.measures
    }

    pub fn ppqn(&self) -> u32 {
        self.ppqn
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.time_signature.beats_per_measure
    }

    pub fn beat_width(&self) -> u32 {
        self.time_signature.beat_width
    }

    /// Explicit resize. Events at or past the new end are dropped, except the
    /// NoteOffs closing notes that start before it
    pub fn set_measures(&mut self, measures: u32) {
        self.measures = measures.max(1);
        let length = self.measures as u64 * self.time_signature.ticks_per_measure(self.ppqn);

        let mut open = [0u32; 128];
        self.events.retain(|e| match e.event {
            MidiEvent::NoteOn { note, .. } if e.tick < length => {
                open[(note & 0x7F) as usize] += 1;
                true
            }
            MidiEvent::NoteOff { note } => {
                let count = &mut open[(note & 0x7F) as usize];
                let closes = *count > 0;
                *count = count.saturating_sub(1);
                closes || e.tick < length
            }
            _ => e.tick < length,
        });
        self.recompute_length();
    }

    pub fn set_beats_per_measure(&mut self, beats_per_measure: u32) -> Result<(), TimingError> {
        self.set_time_signature(TimeSignature::new(
            beats_per_measure,
            self.time_signature.beat_width,
        )?);
        Ok(())
    }

    pub fn set_beat_width(&mut self, beat_width: u32) -> Result<(), TimingError> {
        self.set_time_signature(TimeSignature::new(
            self.time_signature.beats_per_measure,
            beat_width,
        )?);
        Ok(())
    }

    /// Recompute the length from the stored measure count
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
        self.recompute_length();
    }

    // -------------------------------
    // Events
    // -------------------------------

    pub fn events(&self) -> &[PatternEvent] {
        &self.events
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert an event, keeping the list sorted by tick
    pub fn add_event(&mut self, tick: u64, event: MidiEvent) {
        // Insert after existing events at the same tick
        let insert_pos = self.events.partition_point(|e| e.tick <= tick);
        self.events.insert(insert_pos, PatternEvent { tick, event });
        if tick >= self.length_ticks {
            self.rebuild_wrapped_offs();
        }
    }

    /// Insert a NoteOn/NoteOff pair
    pub fn add_note(&mut self, tick: u64, duration: u64, note: u8, velocity: u8) {
        self.add_event(tick, MidiEvent::NoteOn { note, velocity });
        self.add_event(tick + duration.max(1), MidiEvent::NoteOff { note });
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel & 0x0F;
    }

    // -------------------------------
    // Play state
    // -------------------------------

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Apply a play state immediately
    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
        self.pending = None;
    }

    /// Play state once pending transitions are resolved
    pub fn effective_playing(&self) -> bool {
        self.pending.unwrap_or(self.playing)
    }

    pub fn pending_toggle(&self) -> Option<bool> {
        self.pending
    }

    /// Queue a flip of the play state for the next tick boundary
    /// A second request before that boundary retargets the same transition
    pub fn request_toggle(&mut self) -> bool {
        let target = !self.effective_playing();
        self.pending = Some(target);
        target
    }

    /// Apply and clear the pending transition. Returns true if the play state changed
    pub fn resolve_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(target) if target != self.playing => {
                self.playing = target;
                true
            }
            _ => false,
        }
    }

    pub fn is_in_edit(&self) -> bool {
        self.in_edit
    }

    pub fn set_in_edit(&mut self, in_edit: bool) {
        self.in_edit = in_edit;
    }

    // -------------------------------
    // Playback
    // -------------------------------

    pub fn has_sounding_notes(&self) -> bool {
        !self.sounding.is_empty()
    }

    pub fn is_sounding(&self, note: u8) -> bool {
        self.sounding.contains(note)
    }

    /// NoteOff for every held note. Clears the held set
    pub fn all_notes_off(&mut self) -> Vec<MidiEvent> {
        let offs = self
            .sounding
            .iter()
            .map(|note| MidiEvent::NoteOff { note })
            .collect();
        self.sounding = NoteSet::default();
        offs
    }

    /// Collect the events falling in the absolute tick window `[from, to)`
    ///
    /// The pattern loops every `length_ticks`. Pushed events carry absolute ticks.
    /// Held notes are tracked so they can be flushed on stop: a NoteOff is only sent
    /// for a held note, and a NoteOn for a held note is preceded by its NoteOff.
    pub fn render(&mut self, from: u64, to: u64, out: &mut Vec<(u64, MidiEvent)>) {
        let length = self.length_ticks;
        if length == 0 || from >= to || self.events.is_empty() {
            return;
        }
        let end = self.events.partition_point(|e| e.tick < length);

        let mut start = from;
        while start < to {
            let loop_start = start - start % length;
            let segment_end = to.min(loop_start + length);
            let (rel_from, rel_to) = (start - loop_start, segment_end - loop_start);

            let mut i = self.events[..end].partition_point(|e| e.tick < rel_from);
            let mut w = self.wrapped_offs.partition_point(|e| e.tick < rel_from);
            loop {
                let regular = self.events[..end].get(i).copied().filter(|e| e.tick < rel_to);
                let wrapped = self.wrapped_offs.get(w).copied().filter(|e| e.tick < rel_to);

                // Wrapped NoteOffs close the previous loop, so they go first on ties
                let event = match (regular, wrapped) {
                    (Some(r), Some(x)) if r.tick < x.tick => {
                        i += 1;
                        r
                    }
                    (_, Some(x)) => {
                        w += 1;
                        x
                    }
                    (Some(r), None) => {
                        i += 1;
                        r
                    }
                    (None, None) => break,
                };
                self.emit(loop_start + event.tick, event.event, out);
            }

            start = segment_end;
        }
    }

    fn emit(&mut self, tick: u64, event: MidiEvent, out: &mut Vec<(u64, MidiEvent)>) {
        match event {
            MidiEvent::NoteOn { note, .. } => {
                if self.sounding.contains(note) {
                    out.push((tick, MidiEvent::NoteOff { note }));
                }
                self.sounding.insert(note);
            }
            MidiEvent::NoteOff { note } => {
                if !self.sounding.contains(note) {
                    return;
                }
                self.sounding.remove(note);
            }
            _ => {}
        }
        out.push((tick, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(ppqn: u32) -> Pattern {
        Pattern::new("Test", TimeSignature::four_four(), ppqn)
    }

    #[test]
    fn test_pattern_creation() {
        let pattern = pattern(192);

        assert_eq!(pattern.name, "Test");
        assert_eq!(pattern.measures(), 1);
        assert_eq!(pattern.length_ticks(), 768);
        assert!(pattern.is_empty());
        assert!(!pattern.is_playing());
        assert_eq!(pattern.pending_toggle(), None);
        assert!(!pattern.is_in_edit());
    }

    #[test]
    fn test_events_sorted_with_stable_ties() {
        let mut pattern = pattern(192);
        pattern.add_event(96, MidiEvent::NoteOn { note: 64, velocity: 1 });
        pattern.add_event(0, MidiEvent::NoteOn { note: 60, velocity: 1 });
        pattern.add_event(96, MidiEvent::NoteOn { note: 67, velocity: 1 });

        let notes: Vec<_> = pattern.events().iter().map(|e| e.event.note()).collect();
        assert_eq!(notes, vec![Some(60), Some(64), Some(67)]);
    }

    #[test]
    fn test_time_signature_change_keeps_events() {
        let mut pattern = pattern(192);
        pattern.set_measures(2);
        pattern.add_note(1400, 10, 60, 100);
        assert_eq!(pattern.length_ticks(), 1536);

        // 2 measures of 2/4 = 768 ticks, events past the end stay
        pattern.set_beats_per_measure(2).unwrap();
        assert_eq!(pattern.length_ticks(), 768);
        assert_eq!(pattern.event_count(), 2);

        // Eighth-note beats halve the beat length
        pattern.set_beat_width(8).unwrap();
        assert_eq!(pattern.length_ticks(), 384);
        assert_eq!(pattern.measures(), 2);

        // The explicit resize drops them
        pattern.set_measures(2);
        assert!(pattern.is_empty());
    }

    #[test]
    fn test_resize_keeps_note_off_of_crossing_note() {
        let mut pattern = pattern(16);
        pattern.set_measures(2);
        pattern.add_note(56, 16, 60, 100); // Crosses the first measure
        pattern.add_note(80, 8, 62, 100);

        pattern.set_measures(1);
        assert_eq!(
            pattern.events(),
            &[
                PatternEvent { tick: 56, event: MidiEvent::NoteOn { note: 60, velocity: 100 } },
                PatternEvent { tick: 72, event: MidiEvent::NoteOff { note: 60 } },
            ]
        );

        let mut out = Vec::new();
        pattern.render(56, 130, &mut out);
        assert_eq!(out[1], (72, MidiEvent::NoteOff { note: 60 }));
    }

    #[test]
    fn test_invalid_time_signature_is_rejected() {
        let mut pattern = pattern(192);
        assert!(pattern.set_beat_width(3).is_err());
        assert!(pattern.set_beats_per_measure(0).is_err());
        assert_eq!(pattern.time_signature(), TimeSignature::four_four());
    }

    #[test]
    fn test_pending_toggle_is_depth_one() {
        let mut pattern = pattern(192);

        assert!(pattern.request_toggle());
        assert!(!pattern.is_playing());
        assert_eq!(pattern.pending_toggle(), Some(true));

        // Second request before the boundary retargets
        assert!(!pattern.request_toggle());
        assert!(!pattern.resolve_pending());
        assert!(!pattern.is_playing());
        assert_eq!(pattern.pending_toggle(), None);

        pattern.request_toggle();
        assert!(pattern.resolve_pending());
        assert!(pattern.is_playing());
    }

    #[test]
    fn test_render_loops_and_tracks_notes() {
        let mut pattern = pattern(16); // 64 ticks per measure
        pattern.add_note(0, 8, 60, 100);
        pattern.add_note(32, 40, 62, 100); // NoteOff at 72 wraps to 8

        // The wrapped NoteOff has nothing to close in the first loop
        let mut out = Vec::new();
        pattern.render(0, 16, &mut out);
        assert_eq!(out.len(), 2);
        assert!(!pattern.is_sounding(60));

        out.clear();
        pattern.render(16, 64, &mut out);
        assert_eq!(out, vec![(32, MidiEvent::NoteOn { note: 62, velocity: 100 })]);
        assert!(pattern.is_sounding(62));

        // Second loop starts at 64
        out.clear();
        pattern.render(60, 70, &mut out);
        assert_eq!(out, vec![(64, MidiEvent::NoteOn { note: 60, velocity: 100 })]);

        out.clear();
        pattern.render(70, 80, &mut out);
        assert_eq!(
            out,
            vec![
                (72, MidiEvent::NoteOff { note: 62 }),
                (72, MidiEvent::NoteOff { note: 60 }),
            ]
        );
        assert!(!pattern.has_sounding_notes());
    }

    #[test]
    fn test_note_crossing_the_loop_end_is_released() {
        let mut pattern = pattern(16);
        pattern.add_note(56, 16, 60, 100); // NoteOff at 72

        let mut out = Vec::new();
        for tick in 0..256 {
            pattern.render(tick, tick + 1, &mut out);
        }
        let ons = out.iter().filter(|(_, e)| matches!(e, MidiEvent::NoteOn { .. })).count();
        let offs = out.iter().filter(|(_, e)| matches!(e, MidiEvent::NoteOff { .. })).count();
        assert_eq!(ons, 4);
        assert_eq!(offs, 3);
        assert_eq!(out[1], (72, MidiEvent::NoteOff { note: 60 }));
        assert!(pattern.is_sounding(60));
    }

    #[test]
    fn test_retrigger_sends_note_off_first() {
        let mut pattern = pattern(16);
        pattern.add_event(0, MidiEvent::NoteOn { note: 48, velocity: 90 });

        let mut out = Vec::new();
        pattern.render(0, 65, &mut out);
        assert_eq!(
            out,
            vec![
                (0, MidiEvent::NoteOn { note: 48, velocity: 90 }),
                (64, MidiEvent::NoteOff { note: 48 }),
                (64, MidiEvent::NoteOn { note: 48, velocity: 90 }),
            ]
        );
    }

    #[test]
    fn test_shrunk_pattern_releases_note_past_new_end() {
        let mut pattern = pattern(16);
        pattern.add_note(40, 20, 60, 100); // NoteOff at 60

        let mut out = Vec::new();
        pattern.render(0, 50, &mut out);
        assert!(pattern.is_sounding(60));

        // 3/4: 48 ticks, the NoteOff at 60 folds to 12
        pattern.set_beats_per_measure(3).unwrap();
        out.clear();
        pattern.render(50, 110, &mut out);
        assert_eq!(
            out,
            vec![
                (60, MidiEvent::NoteOff { note: 60 }),
                (88, MidiEvent::NoteOn { note: 60, velocity: 100 }),
                (108, MidiEvent::NoteOff { note: 60 }),
            ]
        );
        assert!(!pattern.has_sounding_notes());
    }

    #[test]
    fn test_all_notes_off_clears_held_notes() {
        let mut pattern = pattern(16);
        pattern.add_event(0, MidiEvent::NoteOn { note: 40, velocity: 90 });
        pattern.add_event(0, MidiEvent::NoteOn { note: 45, velocity: 90 });

        let mut out = Vec::new();
        pattern.render(0, 1, &mut out);
        assert!(pattern.has_sounding_notes());

        let offs = pattern.all_notes_off();
        assert_eq!(
            offs,
            vec![MidiEvent::NoteOff { note: 40 }, MidiEvent::NoteOff { note: 45 }]
        );
        assert!(!pattern.has_sounding_notes());
    }

    #[test]
    fn test_from_template_resets_runtime_state() {
        let mut template = pattern(192);
        template.add_note(0, 10, 60, 100);
        template.set_playing(true);
        template.set_in_edit(true);

        let copy = Pattern::from_template(&template);
        assert_eq!(copy.event_count(), 2);
        assert!(!copy.is_playing());
        assert!(!copy.is_in_edit());
    }
}
