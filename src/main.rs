use mymusic_live::messaging::NotificationLevel;
use mymusic_live::midi::{MidiOutputThread, list_output_ports};
use mymusic_live::{
    ChannelSink, ClockRunner, Performance, PerformanceOptions, Settings, SharedTransport, SyncRole,
    create_notification_channel, create_output_channel,
};
use ringbuf::traits::Consumer;
use std::time::Duration;

// Ringbuffer capacity constants
// A tick pass emits at most a few events per playing pattern, the output thread
// drains every millisecond
const OUTPUT_RINGBUFFER_CAPACITY: usize = 4096;
const NOTIFICATION_RINGBUFFER_CAPACITY: usize = 256;

const DEMO_DURATION: Duration = Duration::from_secs(4);
const REFRESH_PERIOD: Duration = Duration::from_millis(50);
const TRANSPORT_FRAME_RATE: u32 = 48_000;

/// Fill the first bank with a drum-ish loop, a bass line and a chord stab
fn build_demo(performance: &Performance) -> Result<(), mymusic_live::PerformanceError> {
    let beat = performance.time_signature().ticks_per_beat(performance.ppqn());

    performance.create(0, None)?;
    performance.with_pattern_mut(0, |p| {
        p.name = "Kick".to_string();
        p.set_channel(9);
        for i in 0..4 {
            p.add_note(i * beat, beat / 4, 36, 110);
        }
    })?;

    performance.create(1, None)?;
    performance.with_pattern_mut(1, |p| {
        p.name = "Bass".to_string();
        p.set_channel(1);
        p.set_measures(2);
        for (i, note) in [36u8, 36, 43, 41, 36, 36, 39, 41].into_iter().enumerate() {
            p.add_note(i as u64 * beat, beat / 2, note, 96);
        }
    })?;

    performance.create(2, None)?;
    performance.with_pattern_mut(2, |p| {
        p.name = "Stab".to_string();
        p.set_channel(2);
        for note in [60u8, 63, 67] {
            p.add_note(2 * beat, beat / 2, note, 80);
        }
    })?;

    performance.rename_bank(0, "Demo");
    performance.set_bank_notepad(0, "Kick and bass first, stab comes in halfway");
    performance.toggle_playing(0)?;
    performance.toggle_playing(1)?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("=== MyMusic Live ===");

    let mut settings = Settings::load_default().unwrap_or_else(|e| {
        log::warn!("Could not load settings ({}), using defaults", e);
        Settings::default()
    });

    let (output_tx, output_rx) = create_output_channel(OUTPUT_RINGBUFFER_CAPACITY);
    let (notification_tx, mut notification_rx) =
        create_notification_channel(NOTIFICATION_RINGBUFFER_CAPACITY);

    let performance = Performance::with_sink(
        PerformanceOptions::default(),
        &settings,
        Box::new(ChannelSink::new(output_tx)),
    );
    performance.set_notification_sender(notification_tx);

    let transport = SharedTransport::new(TRANSPORT_FRAME_RATE);
    performance.set_transport(Box::new(transport.clone()));
    match performance.init_transport() {
        Ok(role) => log::info!("Transport role: {:?}", role),
        Err(e) => log::warn!("{}", e),
    }

    if let Err(e) = build_demo(&performance) {
        log::error!("Failed to build demo performance: {}", e);
        return;
    }

    for port in list_output_ports() {
        log::info!("MIDI output port {}: {}", port.index, port.name);
    }
    let output = match MidiOutputThread::spawn(output_rx, None) {
        Ok(thread) => thread,
        Err(e) => {
            log::error!("Failed to spawn MIDI output thread: {}", e);
            return;
        }
    };

    let period = Duration::from_millis(settings.clock_period_ms.max(1));
    let runner = match ClockRunner::spawn(performance.clone(), period) {
        Ok(runner) => runner,
        Err(e) => {
            log::error!("Failed to spawn clock thread: {}", e);
            return;
        }
    };

    log::info!("{}", performance.set_bank(0));
    performance.start(false);

    let mut elapsed = Duration::ZERO;
    let mut last_beat = None;
    let mut stab_armed = false;
    while elapsed < DEMO_DURATION {
        std::thread::sleep(REFRESH_PERIOD);
        elapsed += REFRESH_PERIOD;

        // Nobody else drives the in-process transport, roll it for a follower
        if performance.sync_role() == SyncRole::Follower {
            let frames = TRANSPORT_FRAME_RATE as f64 * REFRESH_PERIOD.as_secs_f64();
            transport.advance_frames(frames as u64);
        }

        let snapshot = performance.refresh();
        if last_beat != Some(snapshot.beat) {
            last_beat = Some(snapshot.beat);
            if snapshot.beat.is_downbeat() {
                log::info!(
                    "{} | {:.1} BPM | {} playing",
                    snapshot.beat,
                    snapshot.bpm,
                    snapshot.playing_count()
                );
            } else {
                log::debug!("{}", snapshot.beat);
            }
        }

        if !stab_armed && elapsed >= DEMO_DURATION / 2 {
            stab_armed = true;
            if let Err(e) = performance.toggle_playing(2) {
                log::warn!("{}", e);
            }
        }

        while let Some(notification) = notification_rx.try_pop() {
            match notification.level {
                NotificationLevel::Info => log::info!("{}", notification),
                NotificationLevel::Warning => log::warn!("{}", notification),
                NotificationLevel::Error => log::error!("{}", notification),
            }
        }
    }

    performance.stop();
    runner.shutdown();
    log::info!("{} MIDI events sent", output.shutdown());

    if let Err(e) = performance.deinit_transport() {
        log::warn!("{}", e);
    }

    performance.store_settings(&mut settings);
    if let Err(e) = settings.save_default() {
        log::warn!("Could not save settings: {}", e);
    }
}
