//! YM2608 register map and bit packing
//!
//! Everything here is pure data and pure functions: given parameter
//! values, produce the exact register address/data bytes the chip wants.
//! The engine owns sequencing and deduplication; this module owns the
//! bit layout.
//!
//! The chip exposes its FM registers over two address buses. Channels
//! 1-3 live on the first bus, channels 4-6 on the second; an address is
//! carried here as a `u16` whose bit 8 selects the bus and whose low
//! byte is the in-bus register address.

use bitflags::bitflags;

/// Number of FM channels the chip provides.
pub const CHANNEL_COUNT: usize = 6;

/// Bit selecting the second register bus in a packed address.
pub const SECOND_BUS_BIT: u16 = 0x100;

/// LFO enable/frequency register.
pub const ADDRESS_LFO: u16 = 0x22;
/// Key-on/key-off register (first bus only).
pub const ADDRESS_KEY_ON: u16 = 0x28;
/// Mode register; written once at start-up.
pub const ADDRESS_MODE: u16 = 0x29;
/// Start-up value for the mode register (enable the extended FM channels).
pub const MODE_INIT_DATA: u8 = 0x80;

/// Base address of the detune/multiple operator registers.
pub const ADDRESS_DT_ML: u16 = 0x30;
/// Base address of the total-level operator registers.
pub const ADDRESS_TL: u16 = 0x40;
/// Base address of the key-scale/attack-rate operator registers.
pub const ADDRESS_KS_AR: u16 = 0x50;
/// Base address of the AM-enable/decay-rate operator registers.
pub const ADDRESS_AM_DR: u16 = 0x60;
/// Base address of the sustain-rate operator registers.
pub const ADDRESS_SR: u16 = 0x70;
/// Base address of the sustain-level/release-rate operator registers.
pub const ADDRESS_SL_RR: u16 = 0x80;
/// Base address of the SSG-EG operator registers.
pub const ADDRESS_SSGEG: u16 = 0x90;
/// Base address of the feedback/algorithm channel registers.
pub const ADDRESS_FB_AL: u16 = 0xb0;
/// Base address of the pan/AMS/PMS channel registers.
pub const ADDRESS_PAN_AMS_PMS: u16 = 0xb4;
/// Base address of the F-Num1 channel registers.
pub const ADDRESS_F_NUM1: u16 = 0xa0;
/// Base address of the block/F-Num2 channel registers. Must be written
/// before F-Num1; the chip latches the pitch on the F-Num1 write.
pub const ADDRESS_BLOCK_F_NUM2: u16 = 0xa4;

/// Per-channel address offsets. Channels 4-6 sit on the second bus.
pub const CHANNEL_OFFSETS: [u16; CHANNEL_COUNT] = [0x000, 0x001, 0x002, 0x100, 0x101, 0x102];

/// Per-slot address offsets within a channel's operator registers.
/// Slot order on the bus is 1, 3, 2, 4.
pub const SLOT_OFFSETS: [u16; 4] = [0, 8, 4, 12];

/// Channel codes for the key-on register. The code skips value 3; the
/// low bits select the channel, with bit 2 meaning "second bus group".
pub const KEY_ON_CHANNEL_CODES: [u8; CHANNEL_COUNT] = [0, 1, 2, 4, 5, 6];

/// Which register bus a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusSelect {
    /// First bus (channels 1-3 and the global registers).
    First,
    /// Second bus (channels 4-6).
    Second,
}

/// One pending register write: packed address plus data byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    /// Packed address; bit 8 selects the bus.
    pub address: u16,
    /// Data byte.
    pub data: u8,
}

impl RegisterWrite {
    /// Create a write from a packed address.
    pub const fn new(address: u16, data: u8) -> Self {
        RegisterWrite { address, data }
    }

    /// The bus this write targets.
    pub const fn bus(&self) -> BusSelect {
        if self.address & SECOND_BUS_BIT != 0 {
            BusSelect::Second
        } else {
            BusSelect::First
        }
    }

    /// The in-bus register address (low byte of the packed address).
    pub const fn bus_address(&self) -> u8 {
        (self.address & 0xff) as u8
    }
}

bitflags! {
    /// Operator bits of the key-on register's high nibble.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperatorMask: u8 {
        /// Slot 1.
        const SLOT1 = 1 << 4;
        /// Slot 2.
        const SLOT2 = 1 << 5;
        /// Slot 3.
        const SLOT3 = 1 << 6;
        /// Slot 4.
        const SLOT4 = 1 << 7;
    }
}

impl OperatorMask {
    /// Mask from per-slot enable flags, slot 0 first.
    pub fn from_enabled(enabled: [bool; 4]) -> Self {
        let mut mask = OperatorMask::empty();
        for (slot, on) in enabled.iter().enumerate() {
            if *on {
                mask |= OperatorMask::from_bits_truncate(1 << (4 + slot));
            }
        }
        mask
    }
}

/// Address of an operator-scoped register for one voice and slot.
pub const fn operator_address(base: u16, assign_id: usize, slot: usize) -> u16 {
    base + CHANNEL_OFFSETS[assign_id] + SLOT_OFFSETS[slot]
}

/// Address of a channel-scoped register for one voice.
pub const fn channel_address(base: u16, assign_id: usize) -> u16 {
    base + CHANNEL_OFFSETS[assign_id]
}

/// Key-on register data: operator mask in the high nibble, channel code
/// in the low. An empty mask keys the channel off.
pub const fn key_on_data(mask: OperatorMask, assign_id: usize) -> u8 {
    mask.bits() | KEY_ON_CHANNEL_CODES[assign_id]
}

/// `$b0-$b2`: feedback in bits 3-5, algorithm in bits 0-2.
pub const fn pack_fb_al(fb: u8, al: u8) -> u8 {
    (fb << 3) | al
}

/// `$30-$3e`: detune in bits 4-6, multiple in bits 0-3.
///
/// Detune is sign-magnitude on the chip: bit 6 is the sign, bits 4-5 the
/// magnitude.
pub const fn pack_dt_ml(dt: i8, ml: u8) -> u8 {
    let magnitude = dt.unsigned_abs() & 0x3;
    let sign = if dt < 0 { 0x4 } else { 0 };
    ((sign | magnitude) << 4) | ml
}

/// Recover the signed detune from a packed detune nibble (bits 4-6 of
/// the `$30` register, shifted down).
pub const fn unpack_detune(raw: u8) -> i8 {
    let magnitude = (raw & 0x3) as i8;
    if raw & 0x4 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// `$50-$5e`: key scale in bits 6-7, attack rate in bits 0-4.
///
/// While SSG-EG is enabled the attack rate is forced to 31; the SSG-EG
/// shapes misbehave with a slow attack.
pub const fn pack_ks_ar(ks: u8, ar: u8, ssgeg_enabled: bool) -> u8 {
    let effective_ar = if ssgeg_enabled { 31 } else { ar };
    (ks << 6) | effective_ar
}

/// `$60-$6e`: LFO amplitude modulation enable in bit 7, decay rate in
/// bits 0-4.
pub const fn pack_am_dr(dr: u8, am: bool) -> u8 {
    (if am { 0x80 } else { 0 }) | dr
}

/// `$80-$8e`: sustain level in bits 4-7, release rate in bits 0-3.
pub const fn pack_sl_rr(sl: u8, rr: u8) -> u8 {
    (sl << 4) | rr
}

/// `$90-$9e`: SSG-EG shape; zero when disabled. The shape values carry
/// the enable bit (bit 3) already.
pub const fn pack_ssgeg(enabled: bool, shape: u8) -> u8 {
    if enabled {
        shape
    } else {
        0
    }
}

/// `$22`: LFO enable in bit 3, frequency in bits 0-2.
pub const fn pack_lfo(enabled: bool, frequency: u8) -> u8 {
    (if enabled { 0x8 } else { 0 }) | frequency
}

/// `$b4-$b6`: pan in bits 6-7 (both speakers always on), AMS in bits
/// 4-5, PMS in bits 0-2.
pub const fn pack_pan_ams_pms(ams: u8, pms: u8) -> u8 {
    0xc0 | (ams << 4) | pms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_addresses_cross_the_bus_boundary() {
        assert_eq!(channel_address(ADDRESS_FB_AL, 2), 0xb2);
        assert_eq!(channel_address(ADDRESS_FB_AL, 3), 0x1b0);
        assert_eq!(
            RegisterWrite::new(channel_address(ADDRESS_FB_AL, 3), 0).bus(),
            BusSelect::Second
        );
        assert_eq!(
            RegisterWrite::new(channel_address(ADDRESS_FB_AL, 3), 0).bus_address(),
            0xb0
        );
    }

    #[test]
    fn test_operator_addresses_follow_slot_bus_order() {
        // Slot order on the bus is 1, 3, 2, 4.
        assert_eq!(operator_address(ADDRESS_TL, 0, 0), 0x40);
        assert_eq!(operator_address(ADDRESS_TL, 0, 1), 0x48);
        assert_eq!(operator_address(ADDRESS_TL, 0, 2), 0x44);
        assert_eq!(operator_address(ADDRESS_TL, 0, 3), 0x4c);
        assert_eq!(operator_address(ADDRESS_TL, 4, 3), 0x14d);
    }

    #[test]
    fn test_key_on_channel_codes_skip_three() {
        assert_eq!(key_on_data(OperatorMask::empty(), 2), 0x02);
        assert_eq!(key_on_data(OperatorMask::empty(), 3), 0x04);
        assert_eq!(key_on_data(OperatorMask::all(), 5), 0xf6);
    }

    #[test]
    fn test_operator_mask_from_enabled() {
        assert_eq!(OperatorMask::from_enabled([true; 4]), OperatorMask::all());
        assert_eq!(
            OperatorMask::from_enabled([true, false, false, true]),
            OperatorMask::SLOT1 | OperatorMask::SLOT4
        );
        assert!(OperatorMask::from_enabled([false; 4]).is_empty());
    }

    #[test]
    fn test_detune_is_sign_magnitude() {
        assert_eq!(pack_dt_ml(3, 0), 0x30);
        assert_eq!(pack_dt_ml(-3, 0), 0x70);
        assert_eq!(pack_dt_ml(-1, 15), 0x5f);
        assert_eq!(pack_dt_ml(0, 4), 0x04);

        for dt in -3i8..=3 {
            let packed = pack_dt_ml(dt, 0);
            assert_eq!(unpack_detune(packed >> 4), dt, "detune {dt} must survive packing");
        }
    }

    #[test]
    fn test_ssgeg_forces_full_attack_rate() {
        assert_eq!(pack_ks_ar(2, 10, false), (2 << 6) | 10);
        assert_eq!(pack_ks_ar(2, 10, true), (2 << 6) | 31);
    }

    #[test]
    fn test_envelope_and_lfo_packing() {
        assert_eq!(pack_fb_al(5, 3), 0x2b);
        assert_eq!(pack_am_dr(17, true), 0x91);
        assert_eq!(pack_sl_rr(9, 7), 0x97);
        assert_eq!(pack_ssgeg(true, 12), 12);
        assert_eq!(pack_ssgeg(false, 12), 0);
        assert_eq!(pack_lfo(true, 5), 0x0d);
        assert_eq!(pack_lfo(false, 5), 0x05);
        assert_eq!(pack_pan_ams_pms(3, 6), 0xf6);
    }
}
