//! Coalescing FIFO queue of pending parameter changes
//!
//! Edits posted from a UI thread are buffered here until the audio thread
//! drains them. Re-posting a change for the same parameter (same variant,
//! same slot) evicts the stale entry and reinserts at the newest position,
//! so a knob twiddled a hundred times between two audio callbacks costs
//! one register reservation, not a hundred.

use std::collections::VecDeque;

use crate::parameter::{ChangeKey, ParameterChange};
use crate::{Result, Ym2608FmError};

/// FIFO queue deduplicated by parameter identity.
///
/// The queue length is bounded by the number of distinct parameters, so
/// the linear key scan on enqueue stays cheap.
#[derive(Debug, Default)]
pub struct ParameterChangeQueue {
    entries: VecDeque<(ChangeKey, ParameterChange)>,
}

impl ParameterChangeQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        ParameterChangeQueue::default()
    }

    /// Enqueue a change, coalescing with a pending change for the same
    /// parameter. A coalesced entry is evicted and reinserted at the
    /// newest position; distinct keys keep their oldest-first order.
    pub fn enqueue(&mut self, change: ParameterChange) {
        let key = change.key();
        if let Some(index) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(index);
        }
        self.entries.push_back((key, change));
    }

    /// Dequeue the oldest pending change.
    ///
    /// # Errors
    ///
    /// Returns [`Ym2608FmError::EmptyQueue`] when nothing is pending.
    pub fn dequeue(&mut self) -> Result<ParameterChange> {
        self.entries
            .pop_front()
            .map(|(_, change)| change)
            .ok_or(Ym2608FmError::EmptyQueue)
    }

    /// Drop every pending change.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of pending (distinct) changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{AlgorithmValue, AttackRateValue, TotalLevelValue};

    #[test]
    fn test_dequeue_preserves_fifo_order() {
        let mut queue = ParameterChangeQueue::new();
        queue.enqueue(ParameterChange::Algorithm(AlgorithmValue::new(3)));
        queue.enqueue(ParameterChange::AttackRate {
            slot: 0,
            value: AttackRateValue::new(12),
        });

        assert_eq!(
            queue.dequeue().unwrap(),
            ParameterChange::Algorithm(AlgorithmValue::new(3))
        );
        assert_eq!(
            queue.dequeue().unwrap(),
            ParameterChange::AttackRate {
                slot: 0,
                value: AttackRateValue::new(12),
            }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_coalescing_moves_entry_to_newest_position() {
        let mut queue = ParameterChangeQueue::new();
        queue.enqueue(ParameterChange::TotalLevel {
            slot: 2,
            value: TotalLevelValue::new(10),
        });
        queue.enqueue(ParameterChange::Algorithm(AlgorithmValue::new(1)));
        queue.enqueue(ParameterChange::TotalLevel {
            slot: 2,
            value: TotalLevelValue::new(90),
        });

        assert_eq!(queue.len(), 2, "re-post must coalesce, not append");
        assert_eq!(
            queue.dequeue().unwrap(),
            ParameterChange::Algorithm(AlgorithmValue::new(1)),
            "the untouched entry is now the oldest"
        );
        assert_eq!(
            queue.dequeue().unwrap(),
            ParameterChange::TotalLevel {
                slot: 2,
                value: TotalLevelValue::new(90),
            },
            "the coalesced entry drains last with the newest value"
        );
    }

    #[test]
    fn test_same_field_different_slots_do_not_coalesce() {
        let mut queue = ParameterChangeQueue::new();
        queue.enqueue(ParameterChange::TotalLevel {
            slot: 0,
            value: TotalLevelValue::new(10),
        });
        queue.enqueue(ParameterChange::TotalLevel {
            slot: 3,
            value: TotalLevelValue::new(20),
        });
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dequeue_empty_is_an_error() {
        let mut queue = ParameterChangeQueue::new();
        assert!(matches!(queue.dequeue(), Err(Ym2608FmError::EmptyQueue)));

        queue.enqueue(ParameterChange::Algorithm(AlgorithmValue::new(1)));
        queue.clear();
        assert!(matches!(queue.dequeue(), Err(Ym2608FmError::EmptyQueue)));
    }
}
