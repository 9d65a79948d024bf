//! Change-reservation engine
//!
//! [`FmEngine`] is the hub between three callers: a MIDI/UI thread that
//! posts events and parameter edits, the audio callback that drains the
//! reserved register writes into the chip, and a host that resizes
//! polyphony or restores state. Every mutation is first diffed against
//! the shadow tone state, turned into the minimal set of register
//! writes, and appended to the reservation list; the audio callback
//! later flushes that list to the [`RegisterDevice`] in generation
//! order.
//!
//! Locking is per sub-resource and short-held: the voice allocator, the
//! tone state, the reservation list and the pending-edit queue each sit
//! behind their own `parking_lot::Mutex`, while the key-on operator mask
//! and the pitch-bend amount are atomics read on the pitch path without
//! any lock.

use std::mem;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::device::RegisterDevice;
use crate::keyboard::Keyboard;
use crate::midi::MidiEvent;
use crate::note::{Note, VoiceAssignment};
use crate::parameter::change_queue::ParameterChangeQueue;
use crate::parameter::{
    FmParameters, ParameterChange, ParameterId, PitchBendSensitivityValue, SsgegShape, SLOT_COUNT,
};
use crate::pitch;
use crate::register::{
    channel_address, key_on_data, operator_address, pack_am_dr, pack_dt_ml, pack_fb_al, pack_ks_ar,
    pack_lfo, pack_pan_ams_pms, pack_sl_rr, pack_ssgeg, OperatorMask, RegisterWrite, ADDRESS_AM_DR,
    ADDRESS_BLOCK_F_NUM2, ADDRESS_DT_ML, ADDRESS_FB_AL, ADDRESS_F_NUM1, ADDRESS_KEY_ON,
    ADDRESS_KS_AR, ADDRESS_LFO, ADDRESS_MODE, ADDRESS_PAN_AMS_PMS, ADDRESS_SL_RR, ADDRESS_SR,
    ADDRESS_SSGEG, ADDRESS_TL, CHANNEL_COUNT, MODE_INIT_DATA,
};
use crate::Result;

/// Default pitch-bend sensitivity in semitones.
const DEFAULT_PITCH_BEND_SENSITIVITY: i32 = 2;

/// Tone state guarded by one mutex: the shadow parameters and the
/// pitch-bend sensitivity they are scaled by.
#[derive(Debug)]
struct ToneState {
    parameters: FmParameters,
    pitch_bend_sensitivity: PitchBendSensitivityValue,
}

/// Voice allocation and register-change reservation for one YM2608.
///
/// All methods take `&self`; interior locks keep each sub-resource
/// consistent so a MIDI thread, a UI thread and the audio callback can
/// call in concurrently.
pub struct FmEngine {
    keyboard: Mutex<Keyboard>,
    tone: Mutex<ToneState>,
    reserved: Mutex<Vec<RegisterWrite>>,
    pending: Mutex<ParameterChangeQueue>,
    rpn: Mutex<crate::rpn::RpnDetector>,
    /// Operator bits of the key-on register, pre-shifted into the high
    /// nibble.
    note_on_mask: AtomicU8,
    /// Pitch-bend amount, `-8192..=8191`. Bend is channel-insensitive.
    pitch_bend: AtomicI32,
}

impl FmEngine {
    /// Engine with one voice per hardware channel.
    pub fn new() -> Self {
        // CHANNEL_COUNT is nonzero, so the allocator cannot reject it.
        Self::with_polyphony(CHANNEL_COUNT).unwrap_or_else(|_| unreachable!())
    }

    /// Engine with an explicit polyphony.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Ym2608FmError::InvalidPolyphony`] when
    /// `polyphony` is zero.
    pub fn with_polyphony(polyphony: usize) -> Result<Self> {
        let parameters = FmParameters::default();
        let mask = operator_mask_of(&parameters);
        Ok(FmEngine {
            keyboard: Mutex::new(Keyboard::new(polyphony)?),
            tone: Mutex::new(ToneState {
                parameters,
                pitch_bend_sensitivity: PitchBendSensitivityValue::new(
                    DEFAULT_PITCH_BEND_SENSITIVITY,
                ),
            }),
            reserved: Mutex::new(Vec::new()),
            pending: Mutex::new(ParameterChangeQueue::new()),
            rpn: Mutex::new(crate::rpn::RpnDetector::new()),
            note_on_mask: AtomicU8::new(mask.bits()),
            pitch_bend: AtomicI32::new(0),
        })
    }

    /// Current polyphony.
    pub fn polyphony(&self) -> usize {
        self.keyboard.lock().polyphony()
    }

    /// Reset for playback: drop stale reservations and pending edits,
    /// reserve the mode-register init write and a full tone dump, and
    /// forget partial RPN sequences. Follow with [`FmEngine::flush_reserved`]
    /// once the device has been reset.
    pub fn prepare(&self) {
        self.pending.lock().clear();
        {
            let mut reserved = self.reserved.lock();
            reserved.clear();
            reserved.push(RegisterWrite::new(ADDRESS_MODE, MODE_INIT_DATA));
        }
        self.reserve_all_tone_parameters();
        self.rpn.lock().reset();
    }

    /// Resize the voice pool. Voices forced off by a shrink get their
    /// key-off register writes reserved here.
    ///
    /// # Errors
    ///
    /// Propagates the allocator's [`crate::Ym2608FmError::InvalidPolyphony`]
    /// and [`crate::Ym2608FmError::BrokenPolyphonyState`].
    pub fn set_polyphony(&self, polyphony: usize) -> Result<()> {
        let forced_off = self.keyboard.lock().set_polyphony(polyphony)?;
        for assignment in &forced_off {
            self.reserve_note_off(assignment.voice_id);
        }
        Ok(())
    }

    /// Key off every active voice and release its allocator slot.
    pub fn force_all_note_off(&self) {
        let released = self.keyboard.lock().force_all_note_off();
        for assignment in &released {
            self.reserve_note_off(assignment.voice_id);
        }
    }

    /// Enqueue a parameter edit from a non-audio thread. Edits for the
    /// same parameter coalesce; the audio cycle applies them via
    /// [`FmEngine::drain_posted_changes`].
    pub fn post_parameter_change(&self, change: ParameterChange) {
        self.pending.lock().enqueue(change);
    }

    /// Apply every posted edit. Returns whether any of them reserved a
    /// register write or changed stored state.
    pub fn drain_posted_changes(&self) -> bool {
        let changes: Vec<ParameterChange> = {
            let mut pending = self.pending.lock();
            let mut drained = Vec::with_capacity(pending.len());
            while let Ok(change) = pending.dequeue() {
                drained.push(change);
            }
            drained
        };
        let mut any = false;
        for change in changes {
            any |= self.apply_parameter_change(change);
        }
        any
    }

    /// Diff one parameter edit against the shadow state and reserve the
    /// register writes it implies.
    ///
    /// Returns `false` for soft no-ops: a value equal to the stored one,
    /// or an out-of-range slot index. Returns `true` when stored state
    /// changed, even when the change needs no immediate register write
    /// (attack rate while SSG-EG pins the rate to maximum).
    pub fn apply_parameter_change(&self, change: ParameterChange) -> bool {
        if matches!(change.slot(), Some(slot) if slot >= SLOT_COUNT) {
            warn!("parameter change for out-of-range slot: {:?}", change);
            return false;
        }

        match change {
            ParameterChange::PitchBendSensitivity(value) => {
                {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.pitch_bend_sensitivity, value) == value {
                        return false;
                    }
                }
                self.reserve_pitch_change_for_active_voices();
                true
            }
            ParameterChange::Algorithm(value) => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.parameters.al, value) == value {
                        return false;
                    }
                    pack_fb_al(tone.parameters.fb.get() as u8, value.get() as u8)
                };
                self.reserve_channel_writes(&ids, ADDRESS_FB_AL, data);
                true
            }
            ParameterChange::Feedback(value) => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.parameters.fb, value) == value {
                        return false;
                    }
                    pack_fb_al(value.get() as u8, tone.parameters.al.get() as u8)
                };
                self.reserve_channel_writes(&ids, ADDRESS_FB_AL, data);
                true
            }
            ParameterChange::OperatorEnabled { slot, enabled } => {
                let sounding = self.sounding_channel_ids();
                {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.parameters.slot[slot].enabled, enabled) == enabled {
                        return false;
                    }
                }
                let bit = 1u8 << (slot + 4);
                if enabled {
                    self.note_on_mask.fetch_or(bit, Ordering::SeqCst);
                } else {
                    self.note_on_mask.fetch_and(!bit, Ordering::SeqCst);
                }
                // Re-issue key-on so already-sounding voices pick up the
                // new operator set.
                let mask = self.current_operator_mask();
                let mut reserved = self.reserved.lock();
                for id in sounding {
                    reserved.push(RegisterWrite::new(ADDRESS_KEY_ON, key_on_data(mask, id)));
                }
                true
            }
            ParameterChange::AttackRate { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.ar, value) == value {
                        return false;
                    }
                    if op.ssgeg_enabled {
                        // The register already carries the pinned maximum
                        // rate; only the stored value moves.
                        return true;
                    }
                    pack_ks_ar(op.ks.get() as u8, value.get() as u8, false)
                };
                self.reserve_operator_writes(&ids, ADDRESS_KS_AR, slot, data);
                true
            }
            ParameterChange::DecayRate { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.dr, value) == value {
                        return false;
                    }
                    pack_am_dr(value.get() as u8, op.am)
                };
                self.reserve_operator_writes(&ids, ADDRESS_AM_DR, slot, data);
                true
            }
            ParameterChange::SustainRate { slot, value } => {
                let ids = self.used_channel_ids();
                {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.parameters.slot[slot].sr, value) == value {
                        return false;
                    }
                }
                self.reserve_operator_writes(&ids, ADDRESS_SR, slot, value.get() as u8);
                true
            }
            ParameterChange::ReleaseRate { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.rr, value) == value {
                        return false;
                    }
                    pack_sl_rr(op.sl.get() as u8, value.get() as u8)
                };
                self.reserve_operator_writes(&ids, ADDRESS_SL_RR, slot, data);
                true
            }
            ParameterChange::SustainLevel { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.sl, value) == value {
                        return false;
                    }
                    pack_sl_rr(value.get() as u8, op.rr.get() as u8)
                };
                self.reserve_operator_writes(&ids, ADDRESS_SL_RR, slot, data);
                true
            }
            ParameterChange::TotalLevel { slot, value } => {
                let ids = self.used_channel_ids();
                {
                    let mut tone = self.tone.lock();
                    if mem::replace(&mut tone.parameters.slot[slot].tl, value) == value {
                        return false;
                    }
                }
                self.reserve_operator_writes(&ids, ADDRESS_TL, slot, value.get() as u8);
                true
            }
            ParameterChange::KeyScale { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.ks, value) == value {
                        return false;
                    }
                    pack_ks_ar(value.get() as u8, op.ar.get() as u8, op.ssgeg_enabled)
                };
                self.reserve_operator_writes(&ids, ADDRESS_KS_AR, slot, data);
                true
            }
            ParameterChange::Multiple { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.ml, value) == value {
                        return false;
                    }
                    pack_dt_ml(op.dt.get() as i8, value.get() as u8)
                };
                self.reserve_operator_writes(&ids, ADDRESS_DT_ML, slot, data);
                true
            }
            ParameterChange::Detune { slot, value } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.dt, value) == value {
                        return false;
                    }
                    pack_dt_ml(value.get() as i8, op.ml.get() as u8)
                };
                self.reserve_operator_writes(&ids, ADDRESS_DT_ML, slot, data);
                true
            }
            ParameterChange::SsgegEnabled { slot, enabled } => {
                let ids = self.used_channel_ids();
                let (ssgeg_data, ks_ar_data) = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.ssgeg_enabled, enabled) == enabled {
                        return false;
                    }
                    (
                        pack_ssgeg(enabled, op.ssgeg_shape as u8),
                        // The effective attack rate flips between the
                        // stored value and the pinned maximum.
                        pack_ks_ar(op.ks.get() as u8, op.ar.get() as u8, enabled),
                    )
                };
                self.reserve_operator_writes(&ids, ADDRESS_SSGEG, slot, ssgeg_data);
                self.reserve_operator_writes(&ids, ADDRESS_KS_AR, slot, ks_ar_data);
                true
            }
            ParameterChange::SsgegShape { slot, shape } => {
                let ids = self.used_channel_ids();
                let data = {
                    let mut tone = self.tone.lock();
                    let op = &mut tone.parameters.slot[slot];
                    if mem::replace(&mut op.ssgeg_shape, shape) == shape {
                        return false;
                    }
                    if !op.ssgeg_enabled {
                        // Register stays zero until SSG-EG is enabled.
                        return true;
                    }
                    pack_ssgeg(true, shape as u8)
                };
                self.reserve_operator_writes(&ids, ADDRESS_SSGEG, slot, data);
                true
            }
        }
    }

    /// Consume one MIDI event. Returns whether any register write was
    /// reserved or stored state changed.
    ///
    /// Controller events feed the RPN detector first; only RPN #0
    /// (pitch-bend sensitivity) has an effect. Every non-controller
    /// event resets the detector so partial sequences do not survive
    /// interleaved notes.
    pub fn try_reserve_change_from_midi(&self, event: MidiEvent) -> bool {
        debug!("midi event: {:?}", event);

        match event {
            MidiEvent::Controller {
                channel,
                controller,
                value,
            } => {
                let parsed = self.rpn.lock().try_parse(channel, controller, value);
                let Some(message) = parsed else {
                    return false;
                };
                if message.is_nrpn || message.parameter_number != 0 {
                    return false;
                }

                // Bend sensitivity is channel-insensitive here, like the
                // bend amount itself.
                let sensitivity =
                    PitchBendSensitivityValue::new(i32::from(message.value_msb()));
                {
                    self.tone.lock().pitch_bend_sensitivity = sensitivity;
                }
                self.rpn.lock().reset();
                self.reserve_pitch_change_for_active_voices();
                true
            }
            MidiEvent::NoteOn {
                channel,
                note_number,
                velocity,
            } => {
                self.rpn.lock().reset();
                let note = Note::new(channel, note_number, velocity);
                if !note.is_note_on() {
                    return self.handle_note_off(note);
                }

                let assignments = self.keyboard.lock().try_note_on(note);
                let mut success = !assignments.is_empty();
                for assignment in &assignments {
                    if assignment.note.is_note_on() {
                        success &= self.reserve_pitch_change(assignment);
                        success &= self.reserve_note_on(assignment.voice_id);
                    } else {
                        success &= self.reserve_note_off(assignment.voice_id);
                    }
                }
                success
            }
            MidiEvent::NoteOff {
                channel,
                note_number,
            } => {
                self.rpn.lock().reset();
                self.handle_note_off(Note::note_off(channel, note_number))
            }
            MidiEvent::PitchWheel { position, .. } => {
                self.rpn.lock().reset();
                // Bend is channel-insensitive.
                self.pitch_bend
                    .store(i32::from(position) + pitch::MIN_PITCH_BEND, Ordering::SeqCst);
                self.reserve_pitch_change_for_active_voices()
            }
        }
    }

    /// Hand every reserved register write to the device in generation
    /// order, then discard them. The reservation list is detached under
    /// its lock in one move, so writers are never blocked behind device
    /// I/O.
    pub fn flush_reserved<D: RegisterDevice>(&self, device: &mut D) {
        let writes = mem::take(&mut *self.reserved.lock());
        for write in writes {
            device.write_register(write);
        }
    }

    /// Number of reserved, not yet flushed register writes.
    pub fn reserved_len(&self) -> usize {
        self.reserved.lock().len()
    }

    /// The tone state as a flat id-value mapping, for host persistence.
    pub fn parameters(&self) -> Vec<(ParameterId, i32)> {
        let tone = self.tone.lock();
        let p = &tone.parameters;

        let mut entries = vec![
            (
                ParameterId::PitchBendSensitivity,
                tone.pitch_bend_sensitivity.get(),
            ),
            (ParameterId::Algorithm, p.al.get()),
            (ParameterId::Feedback, p.fb.get()),
            (ParameterId::LfoEnabled, i32::from(p.lfo.enabled)),
            (ParameterId::LfoFrequency, p.lfo.frequency.get()),
            (ParameterId::LfoPms, p.lfo.pms.get()),
            (ParameterId::LfoAms, p.lfo.ams.get()),
        ];
        for (slot, op) in p.slot.iter().enumerate() {
            entries.extend([
                (ParameterId::OperatorEnabled(slot), i32::from(op.enabled)),
                (ParameterId::AttackRate(slot), op.ar.get()),
                (ParameterId::DecayRate(slot), op.dr.get()),
                (ParameterId::SustainRate(slot), op.sr.get()),
                (ParameterId::ReleaseRate(slot), op.rr.get()),
                (ParameterId::SustainLevel(slot), op.sl.get()),
                (ParameterId::TotalLevel(slot), op.tl.get()),
                (ParameterId::KeyScale(slot), op.ks.get()),
                (ParameterId::Multiple(slot), op.ml.get()),
                (ParameterId::Detune(slot), op.dt.get()),
                (ParameterId::SsgegEnabled(slot), i32::from(op.ssgeg_enabled)),
                (ParameterId::SsgegShape(slot), op.ssgeg_shape as i32),
                (ParameterId::AmEnabled(slot), i32::from(op.am)),
            ]);
        }
        entries
    }

    /// Restore tone state from a flat id-value mapping and reserve a
    /// full dump so bound channels pick it up. Unknown slot indices and
    /// out-of-range shape values are ignored; numeric values clamp.
    pub fn load_parameters(&self, entries: &[(ParameterId, i32)]) {
        use num_traits::FromPrimitive;

        {
            let mut tone = self.tone.lock();
            for &(id, value) in entries {
                if matches!(
                    id,
                    ParameterId::OperatorEnabled(slot)
                    | ParameterId::AttackRate(slot)
                    | ParameterId::DecayRate(slot)
                    | ParameterId::SustainRate(slot)
                    | ParameterId::ReleaseRate(slot)
                    | ParameterId::SustainLevel(slot)
                    | ParameterId::TotalLevel(slot)
                    | ParameterId::KeyScale(slot)
                    | ParameterId::Multiple(slot)
                    | ParameterId::Detune(slot)
                    | ParameterId::SsgegEnabled(slot)
                    | ParameterId::SsgegShape(slot)
                    | ParameterId::AmEnabled(slot)
                        if slot >= SLOT_COUNT
                ) {
                    warn!("ignoring parameter for out-of-range slot: {:?}", id);
                    continue;
                }

                match id {
                    ParameterId::PitchBendSensitivity => {
                        tone.pitch_bend_sensitivity = PitchBendSensitivityValue::new(value);
                    }
                    ParameterId::Algorithm => {
                        tone.parameters.al = crate::parameter::AlgorithmValue::new(value);
                    }
                    ParameterId::Feedback => {
                        tone.parameters.fb = crate::parameter::FeedbackValue::new(value);
                    }
                    ParameterId::LfoEnabled => tone.parameters.lfo.enabled = value != 0,
                    ParameterId::LfoFrequency => {
                        tone.parameters.lfo.frequency =
                            crate::parameter::LfoFrequencyValue::new(value);
                    }
                    ParameterId::LfoPms => {
                        tone.parameters.lfo.pms = crate::parameter::LfoPmsValue::new(value);
                    }
                    ParameterId::LfoAms => {
                        tone.parameters.lfo.ams = crate::parameter::LfoAmsValue::new(value);
                    }
                    ParameterId::OperatorEnabled(slot) => {
                        tone.parameters.slot[slot].enabled = value != 0;
                    }
                    ParameterId::AttackRate(slot) => {
                        tone.parameters.slot[slot].ar =
                            crate::parameter::AttackRateValue::new(value);
                    }
                    ParameterId::DecayRate(slot) => {
                        tone.parameters.slot[slot].dr =
                            crate::parameter::DecayRateValue::new(value);
                    }
                    ParameterId::SustainRate(slot) => {
                        tone.parameters.slot[slot].sr =
                            crate::parameter::SustainRateValue::new(value);
                    }
                    ParameterId::ReleaseRate(slot) => {
                        tone.parameters.slot[slot].rr =
                            crate::parameter::ReleaseRateValue::new(value);
                    }
                    ParameterId::SustainLevel(slot) => {
                        tone.parameters.slot[slot].sl =
                            crate::parameter::SustainLevelValue::new(value);
                    }
                    ParameterId::TotalLevel(slot) => {
                        tone.parameters.slot[slot].tl =
                            crate::parameter::TotalLevelValue::new(value);
                    }
                    ParameterId::KeyScale(slot) => {
                        tone.parameters.slot[slot].ks =
                            crate::parameter::KeyScaleValue::new(value);
                    }
                    ParameterId::Multiple(slot) => {
                        tone.parameters.slot[slot].ml =
                            crate::parameter::MultipleValue::new(value);
                    }
                    ParameterId::Detune(slot) => {
                        tone.parameters.slot[slot].dt = crate::parameter::DetuneValue::new(value);
                    }
                    ParameterId::SsgegEnabled(slot) => {
                        tone.parameters.slot[slot].ssgeg_enabled = value != 0;
                    }
                    ParameterId::SsgegShape(slot) => {
                        if let Some(shape) = SsgegShape::from_i32(value) {
                            tone.parameters.slot[slot].ssgeg_shape = shape;
                        } else {
                            warn!("ignoring invalid SSG-EG shape value: {}", value);
                        }
                    }
                    ParameterId::AmEnabled(slot) => tone.parameters.slot[slot].am = value != 0,
                }
            }
        }

        self.reserve_all_tone_parameters();
    }

    // ---- reservation helpers ------------------------------------------

    fn handle_note_off(&self, note: Note) -> bool {
        match self.keyboard.lock().try_note_off(note) {
            Some(assignment) => self.reserve_note_off(assignment.voice_id),
            None => false,
        }
    }

    /// Assign ids currently bound to a channel, whether sounding or not.
    fn used_channel_ids(&self) -> Vec<usize> {
        self.keyboard
            .lock()
            .used_assign_ids()
            .into_iter()
            .filter(|id| *id < CHANNEL_COUNT)
            .collect()
    }

    /// Assign ids of voices that are currently keyed on.
    fn sounding_channel_ids(&self) -> Vec<usize> {
        self.keyboard
            .lock()
            .note_ons()
            .map(|assignment| assignment.voice_id)
            .filter(|id| *id < CHANNEL_COUNT)
            .collect()
    }

    fn current_operator_mask(&self) -> OperatorMask {
        OperatorMask::from_bits_truncate(self.note_on_mask.load(Ordering::SeqCst))
    }

    fn reserve_channel_writes(&self, ids: &[usize], base: u16, data: u8) {
        let mut reserved = self.reserved.lock();
        for &id in ids {
            reserved.push(RegisterWrite::new(channel_address(base, id), data));
        }
    }

    fn reserve_operator_writes(&self, ids: &[usize], base: u16, slot: usize, data: u8) {
        let mut reserved = self.reserved.lock();
        for &id in ids {
            reserved.push(RegisterWrite::new(operator_address(base, id, slot), data));
        }
    }

    fn reserve_note_on(&self, voice_id: usize) -> bool {
        if voice_id >= CHANNEL_COUNT {
            return false;
        }
        let data = key_on_data(self.current_operator_mask(), voice_id);
        self.reserved
            .lock()
            .push(RegisterWrite::new(ADDRESS_KEY_ON, data));
        true
    }

    fn reserve_note_off(&self, voice_id: usize) -> bool {
        if voice_id >= CHANNEL_COUNT {
            return false;
        }
        let data = key_on_data(OperatorMask::empty(), voice_id);
        self.reserved
            .lock()
            .push(RegisterWrite::new(ADDRESS_KEY_ON, data));
        true
    }

    /// Reserve the two pitch bytes for one voice: block/F-Num2 first,
    /// F-Num1 second, since the chip latches on the F-Num1 write.
    fn reserve_pitch_change(&self, assignment: &VoiceAssignment) -> bool {
        if assignment.voice_id >= CHANNEL_COUNT {
            return false;
        }
        let sensitivity = self.tone.lock().pitch_bend_sensitivity.get();
        let bend = self.pitch_bend.load(Ordering::SeqCst);
        let cent = pitch::cent(i32::from(assignment.note.note_number), bend, sensitivity);
        let block_and_f_number = pitch::block_and_f_number(cent);

        let mut reserved = self.reserved.lock();
        reserved.push(RegisterWrite::new(
            channel_address(ADDRESS_BLOCK_F_NUM2, assignment.voice_id),
            (block_and_f_number >> 8) as u8,
        ));
        reserved.push(RegisterWrite::new(
            channel_address(ADDRESS_F_NUM1, assignment.voice_id),
            (block_and_f_number & 0xff) as u8,
        ));
        true
    }

    /// Re-reserve pitch for every sounding voice. Returns `false` when
    /// nothing sounds, so callers can report bend moves with no audible
    /// effect as no-ops.
    fn reserve_pitch_change_for_active_voices(&self) -> bool {
        let assignments: Vec<VoiceAssignment> =
            self.keyboard.lock().note_ons().copied().collect();
        let mut any = false;
        for assignment in &assignments {
            any |= self.reserve_pitch_change(assignment);
        }
        any
    }

    /// Reserve a full dump of the tone state to every bound channel,
    /// plus the global LFO register, and recompute the key-on operator
    /// mask from the enabled flags.
    fn reserve_all_tone_parameters(&self) {
        let ids = self.used_channel_ids();

        let (writes, mask) = {
            let tone = self.tone.lock();
            let p = &tone.parameters;
            let mut writes = Vec::with_capacity(ids.len() * (2 + SLOT_COUNT * 7) + 1);

            for &id in &ids {
                writes.push(RegisterWrite::new(
                    channel_address(ADDRESS_FB_AL, id),
                    pack_fb_al(p.fb.get() as u8, p.al.get() as u8),
                ));

                for (slot, op) in p.slot.iter().enumerate() {
                    let mut op_write = |base: u16, data: u8| {
                        writes.push(RegisterWrite::new(operator_address(base, id, slot), data));
                    };
                    op_write(
                        ADDRESS_DT_ML,
                        pack_dt_ml(op.dt.get() as i8, op.ml.get() as u8),
                    );
                    op_write(ADDRESS_TL, op.tl.get() as u8);
                    op_write(
                        ADDRESS_KS_AR,
                        pack_ks_ar(op.ks.get() as u8, op.ar.get() as u8, op.ssgeg_enabled),
                    );
                    op_write(ADDRESS_AM_DR, pack_am_dr(op.dr.get() as u8, op.am));
                    op_write(ADDRESS_SR, op.sr.get() as u8);
                    op_write(
                        ADDRESS_SL_RR,
                        pack_sl_rr(op.sl.get() as u8, op.rr.get() as u8),
                    );
                    op_write(
                        ADDRESS_SSGEG,
                        pack_ssgeg(op.ssgeg_enabled, op.ssgeg_shape as u8),
                    );
                }

                writes.push(RegisterWrite::new(
                    channel_address(ADDRESS_PAN_AMS_PMS, id),
                    pack_pan_ams_pms(p.lfo.ams.get() as u8, p.lfo.pms.get() as u8),
                ));
            }

            writes.push(RegisterWrite::new(
                ADDRESS_LFO,
                pack_lfo(p.lfo.enabled, p.lfo.frequency.get() as u8),
            ));

            (writes, operator_mask_of(p))
        };

        self.note_on_mask.store(mask.bits(), Ordering::SeqCst);
        self.reserved.lock().extend(writes);
    }
}

impl Default for FmEngine {
    fn default() -> Self {
        FmEngine::new()
    }
}

fn operator_mask_of(parameters: &FmParameters) -> OperatorMask {
    OperatorMask::from_enabled([
        parameters.slot[0].enabled,
        parameters.slot[1].enabled,
        parameters.slot[2].enabled,
        parameters.slot[3].enabled,
    ])
}
