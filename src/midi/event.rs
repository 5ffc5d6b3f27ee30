// MIDI event types emitted by patterns

/// Channel voice message carried by patterns and sent to the MIDI output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    ControlChange { controller: u8, value: u8 },
    PitchBend { value: i16 },
}

impl MidiEvent {
    /// Parse a raw MIDI channel message
    /// Returns the channel (0-15) with the event
    pub fn from_bytes(bytes: &[u8]) -> Option<(u8, Self)> {
        let (&status, data) = bytes.split_first()?;
        if data.len() < 2 {
            return None;
        }

        let channel = status & 0x0F;
        let (d1, d2) = (data[0] & 0x7F, data[1] & 0x7F);

        let event = match status & 0xF0 {
            // Velocity 0 = Note Off
            0x90 if d2 == 0 => MidiEvent::NoteOff { note: d1 },
            0x90 => MidiEvent::NoteOn {
                note: d1,
                velocity: d2,
            },
            0x80 => MidiEvent::NoteOff { note: d1 },
            0xB0 => MidiEvent::ControlChange {
                controller: d1,
                value: d2,
            },
            0xE0 => MidiEvent::PitchBend {
                value: ((d2 as i16) << 7) | d1 as i16,
            },
            _ => return None,
        };

        Some((channel, event))
    }

    /// Encode as a 3-byte channel message
    pub fn to_bytes(&self, channel: u8) -> [u8; 3] {
        let channel = channel & 0x0F;
        match *self {
            MidiEvent::NoteOn { note, velocity } => [0x90 | channel, note & 0x7F, velocity & 0x7F],
            MidiEvent::NoteOff { note } => [0x80 | channel, note & 0x7F, 0],
            MidiEvent::ControlChange { controller, value } => {
                [0xB0 | channel, controller & 0x7F, value & 0x7F]
            }
            MidiEvent::PitchBend { value } => {
                let value = value.clamp(0, 0x3FFF) as u16;
                [0xE0 | channel, (value & 0x7F) as u8, (value >> 7) as u8]
            }
        }
    }

    /// Note number for note messages
    pub fn note(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOn { note, .. } | MidiEvent::NoteOff { note } => Some(note),
            _ => None,
        }
    }
}

/// Event produced by a tick pass
/// `tick` is the absolute clock tick the event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    pub tick: u64,
    pub slot: usize,
    pub channel: u8,
    pub event: MidiEvent,
}

impl OutputEvent {
    pub fn to_bytes(&self) -> [u8; 3] {
        self.event.to_bytes(self.channel)
    }
}
