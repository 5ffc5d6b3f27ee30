// MIDI output sinks
// Tick passes write into a sink while holding the engine lock, so sinks never block

use crate::messaging::channels::OutputProducer;
use crate::midi::event::OutputEvent;
use ringbuf::traits::Producer;

/// Destination for events produced by the playback clock
pub trait MidiSink: Send {
    /// Deliver one event. Returns false if the event was dropped
    fn send(&mut self, event: OutputEvent) -> bool;
}

/// Sink backed by the lock-free output ringbuffer
/// The consumer half is drained by the MIDI output thread
pub struct ChannelSink {
    producer: OutputProducer,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(producer: OutputProducer) -> Self {
        Self {
            producer,
            dropped: 0,
        }
    }

    /// Number of events dropped because the ringbuffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl MidiSink for ChannelSink {
    fn send(&mut self, event: OutputEvent) -> bool {
        if self.producer.try_push(event).is_ok() {
            true
        } else {
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 1000 == 0 {
                log::warn!("MIDI output buffer full, {} events dropped", self.dropped);
            }
            false
        }
    }
}

/// Sink that discards everything (used when no output is connected)
#[derive(Debug, Default)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn send(&mut self, _event: OutputEvent) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::create_output_channel;
    use crate::midi::event::MidiEvent;
    use ringbuf::traits::Consumer;

    fn note_off(tick: u64) -> OutputEvent {
        OutputEvent {
            tick,
            slot: 0,
            channel: 0,
            event: MidiEvent::NoteOff { note: 60 },
        }
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, mut rx) = create_output_channel(4);
        let mut sink = ChannelSink::new(tx);

        assert!(sink.send(note_off(1)));
        assert!(sink.send(note_off(2)));

        assert_eq!(rx.try_pop().map(|e| e.tick), Some(1));
        assert_eq!(rx.try_pop().map(|e| e.tick), Some(2));
        assert!(rx.try_pop().is_none());
    }

    #[test]
    fn test_channel_sink_counts_drops() {
        let (tx, _rx) = create_output_channel(1);
        let mut sink = ChannelSink::new(tx);

        assert!(sink.send(note_off(1)));
        assert!(!sink.send(note_off(2)));
        assert_eq!(sink.dropped(), 1);
    }
}
