//! Device trait abstraction for YM2608 register targets
//!
//! This module defines the interface the engine writes registers through,
//! whether the other side is a cycle-accurate emulation core, real
//! hardware behind a bridge, or a recording stub in tests.

use crate::register::{BusSelect, RegisterWrite};

/// Common interface for YM2608 register targets
///
/// The engine never reads the device back; the shadow parameter state is
/// authoritative. A device only has to accept address/data byte pairs on
/// the chip's two register buses.
///
/// # Example
///
/// ```
/// use ym2608_fm::{RegisterDevice, RegisterWrite};
///
/// struct Discard;
///
/// impl RegisterDevice for Discard {
///     fn write_address(&mut self, _bus: ym2608_fm::BusSelect, _address: u8) {}
///     fn write_data(&mut self, _bus: ym2608_fm::BusSelect, _data: u8) {}
/// }
///
/// fn apply<D: RegisterDevice>(device: &mut D, write: RegisterWrite) {
///     device.write_register(write);
/// }
/// ```
pub trait RegisterDevice: Send {
    /// Latch a register address on one of the two buses.
    fn write_address(&mut self, bus: BusSelect, address: u8);

    /// Write the data byte for the previously latched address.
    fn write_data(&mut self, bus: BusSelect, data: u8);

    /// Perform one address-then-data register write.
    fn write_register(&mut self, write: RegisterWrite) {
        let bus = write.bus();
        self.write_address(bus, write.bus_address());
        self.write_data(bus, write.data);
    }
}
