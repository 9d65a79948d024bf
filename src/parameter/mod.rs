//! Tone parameters and bounded value types
//!
//! Every synthesis parameter is a bounded integer: a [`Ranged`] value is
//! clamped on construction and can never hold an out-of-range number, so
//! register packing downstream never has to re-validate. [`FmParameters`]
//! is the authoritative shadow copy of the chip's tone state; the engine
//! diffs incoming edits against it to decide whether a register write is
//! needed at all.

pub mod change_queue;

use std::mem::Discriminant;

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Number of FM operators (slots) per voice.
pub const SLOT_COUNT: usize = 4;

/// Integer value constrained to `MIN..=MAX`.
///
/// Construction clamps; [`Ranged::try_new`] rejects instead. Values are
/// never silently wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ranged<const MIN: i32, const MAX: i32>(i32);

impl<const MIN: i32, const MAX: i32> Ranged<MIN, MAX> {
    /// Smallest representable value.
    pub const MIN_VALUE: i32 = MIN;
    /// Largest representable value.
    pub const MAX_VALUE: i32 = MAX;

    /// Create a value, clamping into `MIN..=MAX`.
    pub const fn new(value: i32) -> Self {
        let clamped = if value < MIN {
            MIN
        } else if value > MAX {
            MAX
        } else {
            value
        };
        Ranged(clamped)
    }

    /// Create a value, rejecting anything outside `MIN..=MAX`.
    pub const fn try_new(value: i32) -> Option<Self> {
        if value < MIN || value > MAX {
            None
        } else {
            Some(Ranged(value))
        }
    }

    /// The raw value.
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl<const MIN: i32, const MAX: i32> Default for Ranged<MIN, MAX> {
    fn default() -> Self {
        Ranged(MIN)
    }
}

/// Pitch-bend sensitivity in semitones (RPN #0).
pub type PitchBendSensitivityValue = Ranged<1, 24>;
/// Operator connection algorithm (0-7).
pub type AlgorithmValue = Ranged<0, 7>;
/// Slot-1 self-feedback amount (0-7).
pub type FeedbackValue = Ranged<0, 7>;
/// Envelope attack rate (0-31).
pub type AttackRateValue = Ranged<0, 31>;
/// Envelope decay rate (0-31).
pub type DecayRateValue = Ranged<0, 31>;
/// Envelope sustain (second decay) rate (0-31).
pub type SustainRateValue = Ranged<0, 31>;
/// Envelope release rate (0-15).
pub type ReleaseRateValue = Ranged<0, 15>;
/// Envelope sustain level (0-15).
pub type SustainLevelValue = Ranged<0, 15>;
/// Operator attenuation (0-127).
pub type TotalLevelValue = Ranged<0, 127>;
/// Key-scaling of envelope rates (0-3).
pub type KeyScaleValue = Ranged<0, 3>;
/// Frequency multiple (0-15).
pub type MultipleValue = Ranged<0, 15>;
/// Detune, signed (-3..+3); transmitted as sign-magnitude.
pub type DetuneValue = Ranged<-3, 3>;
/// LFO frequency (0-7).
pub type LfoFrequencyValue = Ranged<0, 7>;
/// LFO phase modulation sensitivity (0-7).
pub type LfoPmsValue = Ranged<0, 7>;
/// LFO amplitude modulation sensitivity (0-3).
pub type LfoAmsValue = Ranged<0, 3>;

/// SSG-EG envelope shape.
///
/// The discriminants are the raw register values for `$90-$9e`; bit 3 is
/// the SSG-EG enable bit, so every shape value already carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
#[repr(u8)]
pub enum SsgegShape {
    /// Repeating downward saw.
    DownwardSaw = 8,
    /// Decay once and stay silent.
    FadeOut = 9,
    /// Repeating downward triangle.
    DownwardTriangle = 10,
    /// Decay once, then hold at maximum.
    FadeOutAndSoundAgain = 11,
    /// Repeating upward saw.
    UpwardSaw = 12,
    /// Attack once and hold.
    FadeIn = 13,
    /// Repeating upward triangle.
    UpwardTriangle = 14,
    /// Attack once, then silence.
    FadeInAndSilence = 15,
}

/// Parameters of one FM operator (slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorParameters {
    /// Whether this operator takes part in key-on.
    pub enabled: bool,
    /// Attack rate.
    pub ar: AttackRateValue,
    /// Decay rate.
    pub dr: DecayRateValue,
    /// Sustain rate.
    pub sr: SustainRateValue,
    /// Release rate.
    pub rr: ReleaseRateValue,
    /// Sustain level.
    pub sl: SustainLevelValue,
    /// Total level.
    pub tl: TotalLevelValue,
    /// Key scale.
    pub ks: KeyScaleValue,
    /// Frequency multiple.
    pub ml: MultipleValue,
    /// Detune.
    pub dt: DetuneValue,
    /// Whether SSG-EG is active for this operator.
    pub ssgeg_enabled: bool,
    /// SSG-EG shape (meaningful while enabled).
    pub ssgeg_shape: SsgegShape,
    /// Whether the LFO amplitude modulation applies to this operator.
    pub am: bool,
}

impl Default for OperatorParameters {
    fn default() -> Self {
        OperatorParameters {
            enabled: true,
            ar: AttackRateValue::new(31),
            dr: DecayRateValue::new(0),
            sr: SustainRateValue::new(0),
            rr: ReleaseRateValue::new(7),
            sl: SustainLevelValue::new(0),
            tl: TotalLevelValue::new(0),
            ks: KeyScaleValue::new(0),
            ml: MultipleValue::new(0),
            dt: DetuneValue::new(0),
            ssgeg_enabled: false,
            ssgeg_shape: SsgegShape::DownwardSaw,
            am: false,
        }
    }
}

/// LFO parameters shared by all voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LfoParameters {
    /// Whether the LFO runs.
    pub enabled: bool,
    /// LFO frequency.
    pub frequency: LfoFrequencyValue,
    /// Phase modulation sensitivity.
    pub pms: LfoPmsValue,
    /// Amplitude modulation sensitivity.
    pub ams: LfoAmsValue,
}

/// Authoritative shadow copy of the chip's tone state.
///
/// One tone is applied identically to every voice; per-voice state on the
/// chip only differs in pitch and key-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FmParameters {
    /// Operator connection algorithm.
    pub al: AlgorithmValue,
    /// Slot-1 feedback.
    pub fb: FeedbackValue,
    /// Per-operator parameters.
    pub slot: [OperatorParameters; SLOT_COUNT],
    /// LFO parameters.
    pub lfo: LfoParameters,
}

impl Default for FmParameters {
    fn default() -> Self {
        FmParameters {
            al: AlgorithmValue::new(7),
            fb: FeedbackValue::new(0),
            slot: [OperatorParameters::default(); SLOT_COUNT],
            lfo: LfoParameters::default(),
        }
    }
}

/// One logical parameter edit, as posted by a UI or host automation.
///
/// A closed sum type dispatched through a single apply function; the
/// variant (plus the slot index, where present) is the deduplication key
/// in the pending-change queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterChange {
    /// Pitch-bend sensitivity in semitones.
    PitchBendSensitivity(PitchBendSensitivityValue),
    /// Operator connection algorithm.
    Algorithm(AlgorithmValue),
    /// Slot-1 feedback.
    Feedback(FeedbackValue),
    /// Operator enable toggle.
    OperatorEnabled {
        /// Target slot (0-3).
        slot: usize,
        /// New state.
        enabled: bool,
    },
    /// Attack rate of one slot.
    AttackRate {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: AttackRateValue,
    },
    /// Decay rate of one slot.
    DecayRate {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: DecayRateValue,
    },
    /// Sustain rate of one slot.
    SustainRate {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: SustainRateValue,
    },
    /// Release rate of one slot.
    ReleaseRate {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: ReleaseRateValue,
    },
    /// Sustain level of one slot.
    SustainLevel {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: SustainLevelValue,
    },
    /// Total level of one slot.
    TotalLevel {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: TotalLevelValue,
    },
    /// Key scale of one slot.
    KeyScale {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: KeyScaleValue,
    },
    /// Frequency multiple of one slot.
    Multiple {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: MultipleValue,
    },
    /// Detune of one slot.
    Detune {
        /// Target slot (0-3).
        slot: usize,
        /// New value.
        value: DetuneValue,
    },
    /// SSG-EG enable toggle of one slot.
    SsgegEnabled {
        /// Target slot (0-3).
        slot: usize,
        /// New state.
        enabled: bool,
    },
    /// SSG-EG shape of one slot.
    SsgegShape {
        /// Target slot (0-3).
        slot: usize,
        /// New shape.
        shape: SsgegShape,
    },
}

/// Deduplication key of a [`ParameterChange`]: variant tag plus slot.
pub(crate) type ChangeKey = (Discriminant<ParameterChange>, Option<usize>);

impl ParameterChange {
    /// The slot this change targets, if it is slot-scoped.
    pub fn slot(&self) -> Option<usize> {
        match *self {
            ParameterChange::PitchBendSensitivity(_)
            | ParameterChange::Algorithm(_)
            | ParameterChange::Feedback(_) => None,
            ParameterChange::OperatorEnabled { slot, .. }
            | ParameterChange::AttackRate { slot, .. }
            | ParameterChange::DecayRate { slot, .. }
            | ParameterChange::SustainRate { slot, .. }
            | ParameterChange::ReleaseRate { slot, .. }
            | ParameterChange::SustainLevel { slot, .. }
            | ParameterChange::TotalLevel { slot, .. }
            | ParameterChange::KeyScale { slot, .. }
            | ParameterChange::Multiple { slot, .. }
            | ParameterChange::Detune { slot, .. }
            | ParameterChange::SsgegEnabled { slot, .. }
            | ParameterChange::SsgegShape { slot, .. } => Some(slot),
        }
    }

    pub(crate) fn key(&self) -> ChangeKey {
        (std::mem::discriminant(self), self.slot())
    }
}

/// Flat identifier for one parameter, for host state as an id-value map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParameterId {
    /// Pitch-bend sensitivity.
    PitchBendSensitivity,
    /// Operator connection algorithm.
    Algorithm,
    /// Slot-1 feedback.
    Feedback,
    /// LFO enable.
    LfoEnabled,
    /// LFO frequency.
    LfoFrequency,
    /// LFO phase modulation sensitivity.
    LfoPms,
    /// LFO amplitude modulation sensitivity.
    LfoAms,
    /// Operator enable of one slot.
    OperatorEnabled(usize),
    /// Attack rate of one slot.
    AttackRate(usize),
    /// Decay rate of one slot.
    DecayRate(usize),
    /// Sustain rate of one slot.
    SustainRate(usize),
    /// Release rate of one slot.
    ReleaseRate(usize),
    /// Sustain level of one slot.
    SustainLevel(usize),
    /// Total level of one slot.
    TotalLevel(usize),
    /// Key scale of one slot.
    KeyScale(usize),
    /// Frequency multiple of one slot.
    Multiple(usize),
    /// Detune of one slot.
    Detune(usize),
    /// SSG-EG enable of one slot.
    SsgegEnabled(usize),
    /// SSG-EG shape of one slot.
    SsgegShape(usize),
    /// LFO amplitude modulation enable of one slot.
    AmEnabled(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranged_clamps_on_construction() {
        assert_eq!(AttackRateValue::new(40).get(), 31);
        assert_eq!(AttackRateValue::new(-1).get(), 0);
        assert_eq!(DetuneValue::new(-7).get(), -3);
        assert_eq!(DetuneValue::new(2).get(), 2);
    }

    #[test]
    fn test_ranged_try_new_rejects() {
        assert!(TotalLevelValue::try_new(128).is_none());
        assert!(TotalLevelValue::try_new(-1).is_none());
        assert_eq!(TotalLevelValue::try_new(127).map(|v| v.get()), Some(127));
    }

    #[test]
    fn test_default_parameters_match_reset_tone() {
        let parameters = FmParameters::default();
        assert_eq!(parameters.al.get(), 7);
        assert_eq!(parameters.fb.get(), 0);
        for op in &parameters.slot {
            assert!(op.enabled);
            assert_eq!(op.ar.get(), 31);
            assert_eq!(op.rr.get(), 7);
            assert!(!op.ssgeg_enabled);
        }
        assert!(!parameters.lfo.enabled);
    }

    #[test]
    fn test_ssgeg_shape_from_register_value() {
        use num_traits::FromPrimitive;
        assert_eq!(SsgegShape::from_u8(8), Some(SsgegShape::DownwardSaw));
        assert_eq!(SsgegShape::from_u8(15), Some(SsgegShape::FadeInAndSilence));
        assert_eq!(SsgegShape::from_u8(3), None, "values below 8 lack the enable bit");
    }

    #[test]
    fn test_change_key_distinguishes_slots() {
        let a = ParameterChange::AttackRate {
            slot: 0,
            value: AttackRateValue::new(10),
        };
        let b = ParameterChange::AttackRate {
            slot: 3,
            value: AttackRateValue::new(10),
        };
        let c = ParameterChange::AttackRate {
            slot: 0,
            value: AttackRateValue::new(20),
        };
        assert_ne!(a.key(), b.key(), "same field on another slot is a distinct key");
        assert_eq!(a.key(), c.key(), "the key ignores the carried value");
    }
}
