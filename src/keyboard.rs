//! FIFO polyphonic voice allocation
//!
//! [`Keyboard`] maps an unbounded stream of note-on/note-off events onto a
//! bounded pool of voice ids. When the pool is exhausted the oldest sounding
//! note is stolen, never the loudest or the highest priority: the player
//! keeps every new note at the cost of cutting the oldest sustained one.
//!
//! Two invariants hold after every operation:
//! - `active voices + free ids == polyphony`
//! - the ids on both sides are disjoint and together cover `0..polyphony`

use std::collections::{BTreeSet, VecDeque};

use crate::note::{Note, VoiceAssignment};
use crate::{Result, Ym2608FmError};

/// FIFO note-on/polyphony manager.
///
/// Voice ids cycle strictly between free and assigned. The queue order of
/// active assignments is their age: the front is the oldest note-on and the
/// first steal candidate.
#[derive(Debug, Clone)]
pub struct Keyboard {
    /// Active assignments, oldest first.
    note_ons: VecDeque<VoiceAssignment>,
    /// Voice ids currently assignable to a note.
    free_ids: VecDeque<usize>,
    /// Maximum number of simultaneously sounding notes.
    polyphony: usize,
}

impl Keyboard {
    /// Create an allocator with the given polyphony.
    ///
    /// Free ids start as `0..polyphony` in ascending order.
    ///
    /// # Errors
    /// [`Ym2608FmError::InvalidPolyphony`] if `polyphony` is zero.
    pub fn new(polyphony: usize) -> Result<Self> {
        if polyphony == 0 {
            return Err(Ym2608FmError::InvalidPolyphony);
        }

        Ok(Keyboard {
            note_ons: VecDeque::new(),
            free_ids: (0..polyphony).collect(),
            polyphony,
        })
    }

    /// Current polyphony.
    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    /// Resize the voice pool.
    ///
    /// Shrinking reclaims free ids first; if that is not enough, the oldest
    /// active notes are forced off and returned so the caller can emit the
    /// matching key-off writes. Growing prepends the unused ids and forces
    /// nothing off.
    ///
    /// # Errors
    /// [`Ym2608FmError::InvalidPolyphony`] if `new_polyphony` is zero,
    /// [`Ym2608FmError::BrokenPolyphonyState`] if the internal id accounting
    /// no longer matches the tracked polyphony.
    pub fn set_polyphony(&mut self, new_polyphony: usize) -> Result<Vec<VoiceAssignment>> {
        if new_polyphony == 0 {
            return Err(Ym2608FmError::InvalidPolyphony);
        }

        let old_polyphony = std::mem::replace(&mut self.polyphony, new_polyphony);

        if new_polyphony < old_polyphony {
            let mut shrink = old_polyphony - new_polyphony;
            if self.note_ons.len() + self.free_ids.len() < shrink {
                return Err(Ym2608FmError::BrokenPolyphonyState(format!(
                    "{} tracked ids cannot cover a shrink of {shrink}",
                    self.note_ons.len() + self.free_ids.len()
                )));
            }

            // Reclaim from the free pool first.
            let removable = shrink.min(self.free_ids.len());
            self.free_ids.drain(..removable);
            shrink -= removable;
            if shrink == 0 {
                return Ok(Vec::new());
            }

            // Still short: force the oldest notes off.
            let note_offs = self
                .note_ons
                .drain(..shrink)
                .map(|assignment| VoiceAssignment {
                    voice_id: assignment.voice_id,
                    note: assignment.note.to_note_off(),
                })
                .collect();
            Ok(note_offs)
        } else if old_polyphony < new_polyphony {
            let used: BTreeSet<usize> = self
                .free_ids
                .iter()
                .copied()
                .chain(self.note_ons.iter().map(|a| a.voice_id))
                .collect();
            if used.len() != old_polyphony {
                return Err(Ym2608FmError::BrokenPolyphonyState(format!(
                    "{} distinct ids tracked for polyphony {old_polyphony}",
                    used.len()
                )));
            }

            let growth = new_polyphony - old_polyphony;
            let unused: Vec<usize> = (0..new_polyphony)
                .filter(|id| !used.contains(id))
                .take(growth)
                .collect();
            if unused.len() < growth {
                return Err(Ym2608FmError::BrokenPolyphonyState(
                    "not enough unused ids to grow into".into(),
                ));
            }

            // Prepend in ascending order so the lowest id is handed out first.
            for id in unused.into_iter().rev() {
                self.free_ids.push_front(id);
            }
            Ok(Vec::new())
        } else {
            Ok(Vec::new())
        }
    }

    /// All ids currently owned by the allocator, free or assigned.
    ///
    /// Callers that must touch a register on *every* slot regardless of
    /// activity (full tone dumps) iterate this set.
    pub fn used_assign_ids(&self) -> BTreeSet<usize> {
        self.free_ids
            .iter()
            .copied()
            .chain(self.note_ons.iter().map(|a| a.voice_id))
            .collect()
    }

    /// Currently sounding assignments, oldest first.
    pub fn note_ons(&self) -> impl Iterator<Item = &VoiceAssignment> {
        self.note_ons.iter()
    }

    /// Try to assign a voice to a note-on.
    ///
    /// Returns the transitions to apply, in order: a note-off for the same
    /// pitch if it was already sounding (retrigger), a note-off for the
    /// stolen oldest voice if the pool was exhausted, then exactly one
    /// note-on. Note-off events are ignored and yield nothing.
    pub fn try_note_on(&mut self, note: Note) -> Vec<VoiceAssignment> {
        if !note.is_note_on() {
            return Vec::new();
        }

        let mut changes = Vec::with_capacity(3);

        // Retrigger: a pitch never sounds on two voices at once.
        if let Some(note_off) = self.try_note_off(note.to_note_off()) {
            changes.push(note_off);
        }

        if self.free_ids.is_empty() {
            // FIFO steal: force the oldest note off and reclaim its id.
            if let Some(oldest) = self.note_ons.pop_front() {
                changes.push(VoiceAssignment {
                    voice_id: oldest.voice_id,
                    note: oldest.note.to_note_off(),
                });
                self.free_ids.push_back(oldest.voice_id);
            }
        }

        if let Some(voice_id) = self.free_ids.pop_front() {
            let assignment = VoiceAssignment { voice_id, note };
            self.note_ons.push_back(assignment);
            changes.push(assignment);
        }

        changes
    }

    /// Try to release the voice sounding the given pitch.
    ///
    /// Returns the note-off transition, or `None` for a stale or duplicate
    /// note-off (not an error) and for note-on events.
    pub fn try_note_off(&mut self, note: Note) -> Option<VoiceAssignment> {
        if note.is_note_on() {
            return None;
        }

        let position = self.note_ons.iter().position(|assignment| {
            assignment.note.channel == note.channel
                && assignment.note.note_number == note.note_number
        })?;

        let assignment = self.note_ons.remove(position)?;
        self.free_ids.push_back(assignment.voice_id);

        Some(VoiceAssignment {
            voice_id: assignment.voice_id,
            note: assignment.note.to_note_off(),
        })
    }

    /// Force every sounding note off, returning the note-off transitions.
    ///
    /// Ids are reclaimed into the free pool within this call, so the
    /// capacity invariant holds immediately and new note-ons may follow
    /// without any extra reconstruction step.
    pub fn force_all_note_off(&mut self) -> Vec<VoiceAssignment> {
        let note_offs = self
            .note_ons
            .iter()
            .map(|assignment| VoiceAssignment {
                voice_id: assignment.voice_id,
                note: assignment.note.to_note_off(),
            })
            .collect();

        for assignment in self.note_ons.drain(..) {
            self.free_ids.push_back(assignment.voice_id);
        }

        note_offs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Capacity and disjointness hold after every operation.
    fn assert_invariants(keyboard: &Keyboard) {
        assert_eq!(
            keyboard.note_ons.len() + keyboard.free_ids.len(),
            keyboard.polyphony(),
            "active + free must equal polyphony"
        );
        assert_eq!(
            keyboard.used_assign_ids().len(),
            keyboard.polyphony(),
            "ids must be pairwise distinct"
        );
    }

    /// Exact id coverage additionally holds while no shrink has displaced ids.
    fn assert_full_coverage(keyboard: &Keyboard) {
        assert_invariants(keyboard);
        assert_eq!(
            keyboard.used_assign_ids(),
            (0..keyboard.polyphony()).collect(),
            "ids must cover exactly 0..polyphony"
        );
    }

    #[test]
    fn test_zero_polyphony_rejected() {
        assert_eq!(Keyboard::new(0).unwrap_err(), Ym2608FmError::InvalidPolyphony);

        let mut keyboard = Keyboard::new(4).unwrap();
        assert_eq!(
            keyboard.set_polyphony(0).unwrap_err(),
            Ym2608FmError::InvalidPolyphony
        );
    }

    #[test]
    fn test_ids_assigned_in_ascending_order() {
        let mut keyboard = Keyboard::new(3).unwrap();

        for (index, note_number) in [60u8, 64, 67].iter().enumerate() {
            let changes = keyboard.try_note_on(Note::note_on(1, *note_number, 100));
            assert_eq!(changes.len(), 1);
            assert_eq!(changes[0].voice_id, index);
            assert_full_coverage(&keyboard);
        }
    }

    #[test]
    fn test_fifo_steal_takes_the_oldest() {
        let polyphony = 4;
        let mut keyboard = Keyboard::new(polyphony).unwrap();

        for note_number in 60..60 + polyphony as u8 {
            keyboard.try_note_on(Note::note_on(1, note_number, 100));
        }

        // One more than polyphony: the very first note must be stolen.
        let changes = keyboard.try_note_on(Note::note_on(1, 72, 100));
        assert_eq!(changes.len(), 2, "steal must produce an off and an on");
        assert_eq!(changes[0].note, Note::note_off(1, 60));
        assert_eq!(changes[0].voice_id, 0);
        assert!(changes[1].note.is_note_on());
        assert_eq!(changes[1].voice_id, 0, "new note reuses the vacated id");
        assert_full_coverage(&keyboard);
    }

    #[test]
    fn test_retrigger_same_pitch() {
        let mut keyboard = Keyboard::new(4).unwrap();

        keyboard.try_note_on(Note::note_on(1, 60, 100));
        let changes = keyboard.try_note_on(Note::note_on(1, 60, 90));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].note, Note::note_off(1, 60));
        assert!(changes[1].note.is_note_on());
        assert_eq!(
            keyboard.note_ons().count(),
            1,
            "a pitch never sounds on two voices"
        );
        assert_full_coverage(&keyboard);
    }

    #[test]
    fn test_monophonic_two_notes() {
        let mut keyboard = Keyboard::new(1).unwrap();

        let first = keyboard.try_note_on(Note::note_on(1, 60, 100));
        assert_eq!(
            first,
            vec![VoiceAssignment {
                voice_id: 0,
                note: Note::note_on(1, 60, 100),
            }]
        );

        let second = keyboard.try_note_on(Note::note_on(1, 64, 90));
        assert_eq!(
            second,
            vec![
                VoiceAssignment {
                    voice_id: 0,
                    note: Note::note_off(1, 60),
                },
                VoiceAssignment {
                    voice_id: 0,
                    note: Note::note_on(1, 64, 90),
                },
            ]
        );
        assert_full_coverage(&keyboard);
    }

    #[test]
    fn test_stale_note_off_is_a_no_op() {
        let mut keyboard = Keyboard::new(2).unwrap();

        assert!(keyboard.try_note_off(Note::note_off(1, 60)).is_none());

        keyboard.try_note_on(Note::note_on(1, 60, 100));
        assert!(keyboard.try_note_off(Note::note_off(1, 60)).is_some());
        assert!(
            keyboard.try_note_off(Note::note_off(1, 60)).is_none(),
            "duplicate note-off must be ignored"
        );
        assert_full_coverage(&keyboard);
    }

    #[test]
    fn test_note_off_ignores_other_channel() {
        let mut keyboard = Keyboard::new(2).unwrap();

        keyboard.try_note_on(Note::note_on(1, 60, 100));
        assert!(keyboard.try_note_off(Note::note_off(2, 60)).is_none());
        assert_eq!(keyboard.note_ons().count(), 1);
    }

    #[test]
    fn test_shrink_reclaims_free_ids_before_stealing() {
        let mut keyboard = Keyboard::new(4).unwrap();

        // 3 active, 1 free.
        keyboard.try_note_on(Note::note_on(1, 60, 100));
        keyboard.try_note_on(Note::note_on(1, 64, 100));
        keyboard.try_note_on(Note::note_on(1, 67, 100));

        let forced = keyboard.set_polyphony(2).unwrap();
        assert_eq!(forced.len(), 1, "only one steal after the free id is spent");
        assert_eq!(forced[0].note, Note::note_off(1, 60), "oldest goes first");
        assert_eq!(keyboard.note_ons().count(), 2);
        assert_eq!(keyboard.used_assign_ids().len(), 2);
        assert_invariants(&keyboard);
    }

    #[test]
    fn test_shrink_within_free_ids_forces_nothing() {
        let mut keyboard = Keyboard::new(4).unwrap();
        keyboard.try_note_on(Note::note_on(1, 60, 100));

        let forced = keyboard.set_polyphony(2).unwrap();
        assert!(forced.is_empty());
        assert_eq!(keyboard.note_ons().count(), 1);
        assert_invariants(&keyboard);
    }

    #[test]
    fn test_grow_adds_unused_ids() {
        let mut keyboard = Keyboard::new(2).unwrap();
        keyboard.try_note_on(Note::note_on(1, 60, 100));
        keyboard.try_note_on(Note::note_on(1, 64, 100));

        let forced = keyboard.set_polyphony(4).unwrap();
        assert!(forced.is_empty(), "growth never forces a note off");
        assert_full_coverage(&keyboard);

        // The grown pool is immediately usable.
        let changes = keyboard.try_note_on(Note::note_on(1, 67, 100));
        assert_eq!(changes.len(), 1);
        assert!(changes[0].note.is_note_on());
    }

    #[test]
    fn test_shrink_then_grow_round_trip() {
        let mut keyboard = Keyboard::new(6).unwrap();
        for note_number in 60..66 {
            keyboard.try_note_on(Note::note_on(1, note_number, 100));
        }

        keyboard.set_polyphony(3).unwrap();
        assert_invariants(&keyboard);
        keyboard.set_polyphony(6).unwrap();
        assert_invariants(&keyboard);
    }

    #[test]
    fn test_force_all_note_off_reclaims_ids() {
        let mut keyboard = Keyboard::new(3).unwrap();
        keyboard.try_note_on(Note::note_on(1, 60, 100));
        keyboard.try_note_on(Note::note_on(1, 64, 100));

        let offs = keyboard.force_all_note_off();
        assert_eq!(offs.len(), 2);
        assert!(offs.iter().all(|a| !a.note.is_note_on()));
        assert_eq!(keyboard.note_ons().count(), 0);
        assert_full_coverage(&keyboard);
    }

    #[test]
    fn test_invariants_under_mixed_traffic() {
        let mut keyboard = Keyboard::new(3).unwrap();

        for step in 0u8..40 {
            let note_number = 48 + (step % 13);
            if step % 3 == 0 {
                keyboard.try_note_off(Note::note_off(1, note_number));
            } else {
                keyboard.try_note_on(Note::note_on(1, note_number, 100));
            }
            assert_full_coverage(&keyboard);
        }
    }
}
