// MIDI output - Port discovery and the thread draining the output ringbuffer

use crate::messaging::channels::OutputConsumer;
use midir::{MidiOutput, MidiOutputConnection};
use ringbuf::traits::Consumer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CLIENT_NAME: &str = "MyMusic Live";

#[derive(Clone, Debug)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

/// List every available MIDI output port
pub fn list_output_ports() -> Vec<MidiPortInfo> {
    let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) else {
        return Vec::new();
    };

    midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

/// Connect to the port named `port_name`, or to the first port
fn open_output(port_name: Option<&str>) -> Option<MidiOutputConnection> {
    let midi_out = MidiOutput::new(CLIENT_NAME).ok()?;
    let ports = midi_out.ports();

    let port = match port_name {
        Some(wanted) => ports
            .iter()
            .find(|p| midi_out.port_name(p).is_ok_and(|name| name == wanted))?,
        None => ports.first()?,
    }
    .clone();

    let name = midi_out.port_name(&port).unwrap_or_default();
    match midi_out.connect(&port, "mymusic-live-out") {
        Ok(connection) => {
            log::info!("MIDI output connected to '{}'", name);
            Some(connection)
        }
        Err(e) => {
            log::warn!("Failed to connect MIDI output '{}': {}", name, e);
            None
        }
    }
}

/// Thread forwarding output events to a MIDI port
///
/// Without a port the events are only logged. The connection is opened inside the
/// thread so it never crosses threads.
pub struct MidiOutputThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl MidiOutputThread {
    pub fn spawn(mut consumer: OutputConsumer, port_name: Option<String>) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("midi-output".to_string())
            .spawn(move || {
                let mut connection = open_output(port_name.as_deref());
                if connection.is_none() {
                    log::info!("No MIDI output port, events are logged only");
                }

                let mut sent = 0u64;
                loop {
                    let mut drained = false;
                    while let Some(event) = consumer.try_pop() {
                        drained = true;
                        log::trace!("t={} slot={} {:?}", event.tick, event.slot, event.event);
                        if let Some(conn) = connection.as_mut() {
                            if let Err(e) = conn.send(&event.to_bytes()) {
                                log::warn!("MIDI send failed: {}", e);
                            }
                        }
                        sent += 1;
                    }
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    if !drained {
                        thread::sleep(Duration::from_millis(1));
                    }
                }

                if let Some(conn) = connection {
                    conn.close();
                }
                sent
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the thread once the buffer is drained. Returns the number of events forwarded
    pub fn shutdown(mut self) -> u64 {
        self.join()
    }

    fn join(&mut self) -> u64 {
        self.shutdown.store(true, Ordering::Release);
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(sent)) => sent,
            Some(Err(_)) => {
                log::error!("MIDI output thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for MidiOutputThread {
    fn drop(&mut self) {
        self.join();
    }
}
