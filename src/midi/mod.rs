// MIDI events, output sinks and the output port thread

pub mod event;
pub mod output;
pub mod sink;

pub use event::{MidiEvent, OutputEvent};
pub use output::{MidiOutputThread, MidiPortInfo, list_output_ports};
pub use sink::{ChannelSink, MidiSink, NullSink};
