//! MIDI input side: message decoding and the port manager

mod message;
mod port;

pub use message::{format_hex, MessageKind, MidiMessage};
pub use port::{MidiPortManager, OpenMidiTransport};
