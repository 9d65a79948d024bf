//! RPN/NRPN controller-sequence detector
//!
//! Registered parameters arrive as a controller sequence: parameter
//! number on CC 101/100 (or 99/98 for NRPN), then the value on CC 6
//! (and optionally CC 38). The detector accumulates that state per
//! channel and yields a parsed message when a data-entry controller
//! completes a sequence.

/// Parameter-number controllers.
const CC_RPN_MSB: u8 = 101;
const CC_RPN_LSB: u8 = 100;
const CC_NRPN_MSB: u8 = 99;
const CC_NRPN_LSB: u8 = 98;
/// Data-entry controllers.
const CC_DATA_ENTRY_MSB: u8 = 6;
const CC_DATA_ENTRY_LSB: u8 = 38;

/// Number of MIDI channels tracked.
const MIDI_CHANNEL_COUNT: usize = 16;

/// A completed (N)RPN sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpnMessage {
    /// MIDI channel the sequence arrived on.
    pub channel: u8,
    /// 14-bit parameter number.
    pub parameter_number: u16,
    /// 14-bit value; the low 7 bits are zero until a data-entry LSB
    /// refines it.
    pub value: u16,
    /// Whether the sequence was non-registered (CC 99/98).
    pub is_nrpn: bool,
}

impl RpnMessage {
    /// The coarse (MSB) part of the value, which is the whole value for
    /// parameters defined in 7 bits such as pitch-bend sensitivity
    /// semitones.
    pub fn value_msb(&self) -> u8 {
        (self.value >> 7) as u8
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    parameter_msb: Option<u8>,
    parameter_lsb: Option<u8>,
    value_msb: Option<u8>,
    is_nrpn: bool,
}

impl ChannelState {
    fn parameter_number(&self) -> Option<u16> {
        match (self.parameter_msb, self.parameter_lsb) {
            (Some(msb), Some(lsb)) => Some(u16::from(msb) << 7 | u16::from(lsb)),
            _ => None,
        }
    }

    fn set_parameter_msb(&mut self, value: u8, is_nrpn: bool) {
        self.parameter_msb = Some(value);
        self.is_nrpn = is_nrpn;
        self.value_msb = None;
    }

    fn set_parameter_lsb(&mut self, value: u8, is_nrpn: bool) {
        self.parameter_lsb = Some(value);
        self.is_nrpn = is_nrpn;
        self.value_msb = None;
    }
}

/// Per-channel (N)RPN sequence tracker.
#[derive(Debug, Default)]
pub struct RpnDetector {
    channels: [ChannelState; MIDI_CHANNEL_COUNT],
}

impl RpnDetector {
    /// Create a detector with no sequence in progress.
    pub fn new() -> Self {
        RpnDetector::default()
    }

    /// Feed one controller event. Returns a parsed message when the
    /// event completes a sequence; parameter-number and unrelated
    /// controllers return `None`.
    ///
    /// `channel` is 1-based as in MIDI displays; out-of-range channels
    /// are ignored.
    pub fn try_parse(&mut self, channel: u8, controller: u8, value: u8) -> Option<RpnMessage> {
        if channel < 1 || channel > MIDI_CHANNEL_COUNT as u8 {
            return None;
        }
        let state = &mut self.channels[usize::from(channel) - 1];

        match controller {
            CC_RPN_MSB => state.set_parameter_msb(value, false),
            CC_RPN_LSB => state.set_parameter_lsb(value, false),
            CC_NRPN_MSB => state.set_parameter_msb(value, true),
            CC_NRPN_LSB => state.set_parameter_lsb(value, true),
            CC_DATA_ENTRY_MSB => {
                let parameter_number = state.parameter_number()?;
                state.value_msb = Some(value);
                return Some(RpnMessage {
                    channel,
                    parameter_number,
                    value: u16::from(value) << 7,
                    is_nrpn: state.is_nrpn,
                });
            }
            CC_DATA_ENTRY_LSB => {
                let parameter_number = state.parameter_number()?;
                let msb = state.value_msb?;
                return Some(RpnMessage {
                    channel,
                    parameter_number,
                    value: u16::from(msb) << 7 | u16::from(value),
                    is_nrpn: state.is_nrpn,
                });
            }
            _ => {}
        }
        None
    }

    /// Forget every partial sequence. Called when a non-controller
    /// message interleaves, so a split sequence cannot resume around it.
    pub fn reset(&mut self) {
        self.channels = [ChannelState::default(); MIDI_CHANNEL_COUNT];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpn_zero_sequence_parses_on_data_entry() {
        let mut detector = RpnDetector::new();
        assert_eq!(detector.try_parse(1, CC_RPN_MSB, 0), None);
        assert_eq!(detector.try_parse(1, CC_RPN_LSB, 0), None);
        let message = detector.try_parse(1, CC_DATA_ENTRY_MSB, 12).unwrap();
        assert_eq!(message.parameter_number, 0);
        assert_eq!(message.value_msb(), 12);
        assert!(!message.is_nrpn);
    }

    #[test]
    fn test_data_entry_lsb_refines_value() {
        let mut detector = RpnDetector::new();
        detector.try_parse(1, CC_RPN_MSB, 0);
        detector.try_parse(1, CC_RPN_LSB, 0);
        detector.try_parse(1, CC_DATA_ENTRY_MSB, 2);
        let message = detector.try_parse(1, CC_DATA_ENTRY_LSB, 50).unwrap();
        assert_eq!(message.value, 2 << 7 | 50);
        assert_eq!(message.value_msb(), 2);
    }

    #[test]
    fn test_nrpn_is_flagged() {
        let mut detector = RpnDetector::new();
        detector.try_parse(3, CC_NRPN_MSB, 1);
        detector.try_parse(3, CC_NRPN_LSB, 20);
        let message = detector.try_parse(3, CC_DATA_ENTRY_MSB, 5).unwrap();
        assert!(message.is_nrpn);
        assert_eq!(message.parameter_number, 1 << 7 | 20);
    }

    #[test]
    fn test_data_entry_without_parameter_number_is_ignored() {
        let mut detector = RpnDetector::new();
        assert_eq!(detector.try_parse(1, CC_DATA_ENTRY_MSB, 12), None);
        detector.try_parse(1, CC_RPN_MSB, 0);
        // LSB still missing.
        assert_eq!(detector.try_parse(1, CC_DATA_ENTRY_MSB, 12), None);
    }

    #[test]
    fn test_reset_forgets_partial_sequences() {
        let mut detector = RpnDetector::new();
        detector.try_parse(1, CC_RPN_MSB, 0);
        detector.try_parse(1, CC_RPN_LSB, 0);
        detector.reset();
        assert_eq!(detector.try_parse(1, CC_DATA_ENTRY_MSB, 12), None);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut detector = RpnDetector::new();
        detector.try_parse(1, CC_RPN_MSB, 0);
        detector.try_parse(1, CC_RPN_LSB, 0);
        detector.try_parse(2, CC_NRPN_MSB, 9);
        detector.try_parse(2, CC_NRPN_LSB, 9);
        let on_one = detector.try_parse(1, CC_DATA_ENTRY_MSB, 7).unwrap();
        assert!(!on_one.is_nrpn);
        assert_eq!(on_one.channel, 1);
    }
}
