//! Pitch math: MIDI cents to chip Block/F-Number
//!
//! Pitch flows through an intermediate "cent from MIDI note 0" value so
//! note number and pitch-bend combine in one integer domain before any
//! floating-point frequency math.

/// Cents per semitone.
pub const SEMITONE_CENT: i32 = 100;
/// Semitones per octave.
pub const SEMITONES_PER_OCTAVE: i32 = 12;
/// MIDI note number of C4.
pub const C4_NOTE_NUMBER: i32 = 60;
/// MIDI note number of A4.
pub const A4_NOTE_NUMBER: i32 = C4_NOTE_NUMBER + 9;
/// Concert pitch.
pub const A4_HZ: f64 = 440.0;
/// Pitch-bend wheel range.
pub const MIN_PITCH_BEND: i32 = -8192;
/// Pitch-bend wheel range.
pub const MAX_PITCH_BEND: i32 = 8191;

/// Master clock of the chip in Hz.
pub const CHIP_CLOCK_HZ: u32 = 3_993_600 * 2;

const OCTAVE_CENT: i32 = SEMITONES_PER_OCTAVE * SEMITONE_CENT;

/// Cent from MIDI note 0 for a note number with pitch bend applied.
///
/// The bend is scaled asymmetrically so that the wheel extremes land
/// exactly on `±sensitivity` semitones despite the wheel's asymmetric
/// integer range.
pub fn cent(note_number: i32, pitch_bend: i32, sensitivity: i32) -> i32 {
    let divisor = if pitch_bend < 0 {
        -MIN_PITCH_BEND
    } else {
        MAX_PITCH_BEND
    };
    note_number * SEMITONE_CENT + SEMITONE_CENT * sensitivity * pitch_bend / divisor
}

/// Frequency in Hz for a cent from MIDI note 0.
pub fn hz_from_cent(cent: i32) -> f64 {
    A4_HZ * 2f64.powf(f64::from(cent - A4_NOTE_NUMBER * SEMITONE_CENT) / f64::from(OCTAVE_CENT))
}

fn f_number(hz: f64) -> u16 {
    // 2304 = 144 * 16: the FM synthesis divider times the F-Number scale.
    (hz * 2304.0 / f64::from(CHIP_CLOCK_HZ >> 13)).round() as u16
}

/// Block and F-Number packed as the chip's two pitch bytes:
/// block in bits 11-13, F-Number in bits 0-10.
///
/// The F-Number is computed from the cent folded into the C4 octave and
/// the block carries the octave, so the same F-Number table serves every
/// octave.
pub fn block_and_f_number(cent: i32) -> u16 {
    const C4_CENT: i32 = C4_NOTE_NUMBER * SEMITONE_CENT;
    let block = (cent / OCTAVE_CENT - 1).clamp(0, 7);
    let cent_in_octave = cent.rem_euclid(OCTAVE_CENT);
    let base_hz = hz_from_cent(C4_CENT + cent_in_octave);
    ((block as u16) << 11) | f_number(base_hz)
}
