//! Note and voice-assignment value types
//!
//! A [`Note`] is a single note-on or note-off event tied to a MIDI
//! (channel, note number) pair. Zero velocity denotes note-off, matching
//! the MIDI convention of running-status note-offs.

/// A single note-on or note-off event.
///
/// Immutable once constructed. `velocity == 0` means note-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    /// MIDI channel.
    pub channel: u8,
    /// MIDI note number.
    pub note_number: u8,
    /// Velocity. Zero is handled as note-off.
    pub velocity: u8,
}

impl Note {
    /// Create a note event. Zero velocity yields a note-off.
    pub fn new(channel: u8, note_number: u8, velocity: u8) -> Self {
        Note {
            channel,
            note_number,
            velocity,
        }
    }

    /// Create a note-on event.
    pub fn note_on(channel: u8, note_number: u8, velocity: u8) -> Self {
        Note::new(channel, note_number, velocity)
    }

    /// Create a note-off event for the given pitch.
    pub fn note_off(channel: u8, note_number: u8) -> Self {
        Note::new(channel, note_number, 0)
    }

    /// Whether this event is a note-on.
    pub fn is_note_on(&self) -> bool {
        self.velocity != 0
    }

    /// The note-off counterpart of this event (same channel and pitch).
    pub fn to_note_off(&self) -> Self {
        Note::note_off(self.channel, self.note_number)
    }
}

/// Binding of a physical voice slot to the note it is producing.
///
/// Created by the allocator on a successful note-on; the same type also
/// carries the note-off transitions the allocator asks its caller to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceAssignment {
    /// Identifier of the physical voice slot.
    pub voice_id: usize,
    /// The note bound to (or released from) the slot.
    pub note: Note,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_velocity_is_note_off() {
        assert!(!Note::new(1, 60, 0).is_note_on());
        assert!(Note::new(1, 60, 1).is_note_on());
        assert!(!Note::note_off(1, 60).is_note_on());
    }

    #[test]
    fn test_note_off_counterpart_keeps_pitch() {
        let on = Note::note_on(2, 64, 100);
        let off = on.to_note_off();
        assert_eq!(off.channel, 2);
        assert_eq!(off.note_number, 64);
        assert_eq!(off.velocity, 0);
    }
}
