//! MIDI message parsing
//!
//! Controllers only ever report three kinds of events that matter here:
//! note-on, note-off and control-change. Everything else is dropped at parse time.

use std::fmt;

/// Hardware event delivered by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), key (0-127), velocity (0-127)
    NoteOff { channel: u8, key: u8, velocity: u8 },

    /// Note On: channel (0-15), key (0-127), velocity (1-127)
    NoteOn { channel: u8, key: u8, velocity: u8 },

    /// Control Change: channel (0-15), key (0-127), value (0-127)
    ControlChange { channel: u8, key: u8, value: u8 },
}

impl MidiMessage {
    /// Parse a MIDI message from raw bytes
    ///
    /// Returns `None` for system messages, running status and channel
    /// messages other than note-on/off and control-change.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        // Running status / system messages are not tracked
        if !(0x80..0xF0).contains(&status) || rest.len() < 2 {
            return None;
        }

        let channel = status & 0x0F;
        let key = rest[0] & 0x7F;
        let value = rest[1] & 0x7F;

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                key,
                velocity: value,
            }),
            // Velocity 0 = Note Off
            0x90 if value == 0 => Some(MidiMessage::NoteOff {
                channel,
                key,
                velocity: 0,
            }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                key,
                velocity: value,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                key,
                value,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => write!(f, "NoteOff ch:{} k:{} v:{}", channel + 1, key, velocity),
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => write!(f, "NoteOn ch:{} k:{} v:{}", channel + 1, key, velocity),
            MidiMessage::ControlChange {
                channel,
                key,
                value,
            } => write!(f, "CC ch:{} k:{} v:{}", channel + 1, key, value),
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
