// Integration tests for song mode
// Trigger playback, song recording with snap, and timeline edits

use mymusic_live::messaging::OutputConsumer;
use mymusic_live::{
    ChannelSink, GridLayout, MidiEvent, OutputEvent, Performance, PerformanceOptions, RunMode,
    Settings, Trigger, create_output_channel,
};
use ringbuf::traits::Consumer;

/// 16 ticks per beat, 64 per measure
fn performance() -> (Performance, OutputConsumer) {
    let (tx, rx) = create_output_channel(4096);
    let options = PerformanceOptions {
        layout: GridLayout::new(2, 8),
        ppqn: 16,
        ..PerformanceOptions::default()
    };
    let performance =
        Performance::with_sink(options, &Settings::default(), Box::new(ChannelSink::new(tx)));
    (performance, rx)
}

fn note_ons(rx: &mut OutputConsumer) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.try_pop() {
        if matches!(event.event, MidiEvent::NoteOn { .. }) {
            events.push(event);
        }
    }
    events
}

#[test]
fn test_recorded_toggle_snaps_to_beat() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.set_song_recording(true);
    performance.set_song_record_snap(true);
    assert_eq!(performance.snap_ticks(), 16);

    performance.start(true);
    performance.step(17);
    assert_eq!(performance.current_tick(), 17);

    assert!(performance.toggle_playing(0).unwrap());
    assert_eq!(
        performance.song_triggers(),
        vec![Trigger {
            tick: 16,
            slot: 0,
            on: true
        }]
    );
}

#[test]
fn test_recorded_toggle_without_snap_keeps_tick() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.set_song_recording(true);
    performance.set_song_record_snap(false);

    performance.start(true);
    performance.step(17);
    performance.toggle_playing(0).unwrap();
    assert_eq!(performance.song_triggers()[0].tick, 17);
}

#[test]
fn test_custom_snap_size() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.set_song_recording(true);
    performance.set_snap_ticks(64);

    performance.start(true);
    performance.step(40);
    performance.toggle_playing(0).unwrap();
    assert_eq!(performance.song_triggers()[0].tick, 64);

    performance.set_snap_ticks(0);
    assert_eq!(performance.snap_ticks(), 16);
}

#[test]
fn test_no_recording_in_live_mode() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.set_song_recording(true);

    performance.start(false);
    performance.step(5);
    performance.toggle_playing(0).unwrap();
    assert!(performance.song_triggers().is_empty());
}

#[test]
fn test_triggers_drive_play_state() {
    let (performance, mut rx) = performance();
    performance.create(0, None).unwrap();
    performance.with_pattern_mut(0, |p| p.add_note(0, 4, 60, 100)).unwrap();
    performance.record_trigger(64, 0, true).unwrap();
    performance.record_trigger(192, 0, false).unwrap();

    performance.start(true);
    assert_eq!(performance.run_mode(), RunMode::SongRunning);
    for _ in 0..256 {
        performance.step(1);
    }

    let ticks: Vec<u64> = note_ons(&mut rx).iter().map(|e| e.tick).collect();
    assert_eq!(ticks, vec![64, 128]);
    assert!(!performance.pattern(0).unwrap().is_playing());
}

#[test]
fn test_live_toggle_is_advisory_in_song_mode() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.record_trigger(32, 0, false).unwrap();

    performance.start(true);
    performance.step(8);

    // Immediate, until the next trigger
    assert!(performance.toggle_playing(0).unwrap());
    assert!(performance.pattern(0).unwrap().is_playing());

    performance.step(30);
    assert!(!performance.pattern(0).unwrap().is_playing());
}

#[test]
fn test_song_ignored_in_live_mode() {
    let (performance, mut rx) = performance();
    performance.create(0, None).unwrap();
    performance.with_pattern_mut(0, |p| p.add_note(0, 4, 60, 100)).unwrap();
    performance.record_trigger(0, 0, true).unwrap();

    performance.start(false);
    performance.step(128);
    assert!(note_ons(&mut rx).is_empty());
}

#[test]
fn test_clear_song_takes_effect_next_pass() {
    let (performance, mut rx) = performance();
    performance.create(0, None).unwrap();
    performance.with_pattern_mut(0, |p| p.add_note(0, 4, 60, 100)).unwrap();
    performance.record_trigger(64, 0, true).unwrap();

    performance.start(true);
    performance.step(10);
    performance.clear_song();
    performance.step(100);

    assert!(note_ons(&mut rx).is_empty());
    assert!(performance.song_triggers().is_empty());
}

#[test]
fn test_destroy_drops_slot_triggers() {
    let (performance, _rx) = performance();
    performance.create(0, None).unwrap();
    performance.create(1, None).unwrap();
    performance.record_trigger(0, 0, true).unwrap();
    performance.record_trigger(0, 1, true).unwrap();

    performance.destroy(0).unwrap();
    let triggers = performance.song_triggers();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].slot, 1);
}

#[test]
fn test_trigger_for_out_of_range_slot_is_rejected() {
    let (performance, _rx) = performance();
    assert!(performance.record_trigger(0, 16, true).is_err());
}
