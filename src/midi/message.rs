//! Structured view of a received MIDI message
//!
//! Only the status byte is classified. Message semantics are left to
//! whoever consumes the raw bytes.

use std::fmt;

/// Message family, from the status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NoteOff,
    NoteOn,
    PolyPressure,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SysEx,
    SystemCommon,
    Realtime,
    /// Empty input or a data byte in status position (running status)
    Unknown,
}

/// A received message: its raw bytes plus the decoded family and channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiMessage {
    pub kind: MessageKind,
    /// Channel 0-15 for channel voice messages
    pub channel: Option<u8>,
    pub data: Vec<u8>,
}

impl MidiMessage {
    /// Decode raw bytes; never fails, unknown input keeps its bytes
    pub fn from_raw(data: &[u8]) -> Self {
        let (kind, channel) = match data.first() {
            None => (MessageKind::Unknown, None),
            Some(&status) if status < 0x80 => (MessageKind::Unknown, None),
            Some(&status) if status < 0xF0 => {
                let kind = match status & 0xF0 {
                    0x80 => MessageKind::NoteOff,
                    // Note On with velocity 0 is a Note Off
                    0x90 if data.get(2) == Some(&0) => MessageKind::NoteOff,
                    0x90 => MessageKind::NoteOn,
                    0xA0 => MessageKind::PolyPressure,
                    0xB0 => MessageKind::ControlChange,
                    0xC0 => MessageKind::ProgramChange,
                    0xD0 => MessageKind::ChannelPressure,
                    _ => MessageKind::PitchBend,
                };
                (kind, Some(status & 0x0F))
            }
            Some(&0xF0) => (MessageKind::SysEx, None),
            Some(&status) if status < 0xF8 => (MessageKind::SystemCommon, None),
            Some(_) => (MessageKind::Realtime, None),
        };

        Self {
            kind,
            channel,
            data: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Some(channel) => write!(f, "{:?} ch:{} [{}]", self.kind, channel + 1, format_hex(&self.data)),
            None => write!(f, "{:?} [{}]", self.kind, format_hex(&self.data)),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
