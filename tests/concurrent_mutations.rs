// Slot mutations racing the clock thread
// Moves, destroy/recreate and toggles hammer the grid while a ClockRunner drives tick passes

use mymusic_live::messaging::OutputConsumer;
use mymusic_live::{
    ChannelSink, ClockRunner, GridLayout, MidiEvent, OutputEvent, Pattern, Performance,
    PerformanceOptions, Settings, create_output_channel,
};
use rand::Rng;
use ringbuf::traits::Consumer;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const PATTERNS: usize = 4;
const SLOTS: usize = 8;
const ROUNDS: usize = 2000;

/// One bank of 8 slots, 16 ticks per beat, fast enough to loop often
fn performance() -> (Performance, OutputConsumer) {
    let (tx, rx) = create_output_channel(1 << 16);
    let options = PerformanceOptions {
        layout: GridLayout::new(1, SLOTS),
        ppqn: 16,
        ..PerformanceOptions::default()
    };
    let performance =
        Performance::with_sink(options, &Settings::default(), Box::new(ChannelSink::new(tx)));
    performance.set_bpm(300.0).unwrap();
    (performance, rx)
}

/// Patterns P0..P3, each playing its own pitch on every sixteenth
fn fill(performance: &Performance) -> Vec<Pattern> {
    (0..PATTERNS)
        .map(|i| {
            performance.create(i, None).unwrap();
            performance
                .with_pattern_mut(i, |p| {
                    p.name = format!("P{}", i);
                    for step in 0..16 {
                        p.add_note(step * 4, 3, 60 + i as u8, 100);
                    }
                })
                .unwrap();
            performance.toggle_playing(i).unwrap();
            performance.pattern(i).unwrap()
        })
        .collect()
}

fn slot_of(performance: &Performance, name: &str) -> Option<usize> {
    performance
        .active_patterns()
        .into_iter()
        .find(|(_, p)| p.name == name)
        .map(|(slot, _)| slot)
}

fn empty_slot(performance: &Performance) -> Option<usize> {
    (0..SLOTS).find(|slot| !performance.is_active(*slot))
}

fn mutate(performance: &Performance, templates: &[Pattern]) {
    let mut rng = rand::thread_rng();
    for _ in 0..ROUNDS {
        let template = &templates[rng.gen_range(0..PATTERNS)];
        let Some(slot) = slot_of(performance, &template.name) else {
            continue;
        };

        match rng.gen_range(0..3) {
            0 => {
                performance.move_pattern(slot, rng.gen_range(0..SLOTS)).unwrap();
            }
            1 => {
                performance.destroy(slot).unwrap();
                let target = empty_slot(performance).unwrap();
                performance.create(target, Some(template)).unwrap();
                performance.toggle_playing(target).unwrap();
            }
            _ => {
                performance.toggle_playing(slot).unwrap();
            }
        }
        thread::sleep(Duration::from_micros(200));
    }
}

/// Held notes keyed by channel and pitch, moves keep a pattern's notes with it
fn assert_balanced(events: &[OutputEvent]) {
    let mut held = HashSet::new();
    for e in events {
        match e.event {
            MidiEvent::NoteOn { note, .. } => {
                assert!(held.insert((e.channel, note)), "NoteOn while held: {:?}", e)
            }
            MidiEvent::NoteOff { note } => {
                assert!(held.remove(&(e.channel, note)), "NoteOff without NoteOn: {:?}", e)
            }
            _ => {}
        }
    }
    assert!(held.is_empty(), "Notes left hanging: {:?}", held);
}

#[test]
fn test_mutations_while_clock_runs() {
    let (performance, mut rx) = performance();
    let templates = fill(&performance);

    performance.start(false);
    let runner = ClockRunner::spawn(performance.clone(), Duration::from_millis(1)).unwrap();
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let mutator = scope.spawn(|| {
            mutate(&performance, &templates);
            done.store(true, Ordering::Release);
        });

        while !done.load(Ordering::Acquire) && !mutator.is_finished() {
            let active = performance.active_patterns();
            let names: HashSet<_> = active.iter().map(|(_, p)| p.name.clone()).collect();
            assert_eq!(names.len(), active.len(), "Pattern in two slots: {:?}", names);
            assert!(active.len() <= PATTERNS);
            thread::sleep(Duration::from_micros(100));
        }
    });

    assert!(runner.is_running());
    assert!(performance.current_tick() > 0);
    performance.stop();
    runner.shutdown();

    let mut events = Vec::new();
    while let Some(event) = rx.try_pop() {
        events.push(event);
    }
    assert!(events.iter().any(|e| matches!(e.event, MidiEvent::NoteOn { .. })));
    assert_balanced(&events);
}
