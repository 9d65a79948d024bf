//! MIDI channel-voice events the engine consumes
//!
//! Parsing raw MIDI bytes is the caller's concern; the engine only looks
//! at the decoded tuples carried here.

/// A decoded MIDI channel-voice message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note-on. A zero velocity is treated as note-off per the MIDI
    /// running-status convention.
    NoteOn {
        /// MIDI channel.
        channel: u8,
        /// MIDI note number.
        note_number: u8,
        /// Velocity.
        velocity: u8,
    },
    /// Note-off.
    NoteOff {
        /// MIDI channel.
        channel: u8,
        /// MIDI note number.
        note_number: u8,
    },
    /// Pitch wheel move, as the raw 14-bit wheel position (8192 is
    /// center).
    PitchWheel {
        /// MIDI channel.
        channel: u8,
        /// Wheel position, `0..=16383`.
        position: u16,
    },
    /// Control change.
    Controller {
        /// MIDI channel.
        channel: u8,
        /// Controller number.
        controller: u8,
        /// Controller value.
        value: u8,
    },
}
