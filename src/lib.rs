//! YM2608 (OPNA) FM voice allocation and register-change reservation
//!
//! The core of an FM synthesizer built around a register-addressed sound
//! chip: it maps an unbounded stream of MIDI note events onto the chip's
//! six FM channels under a FIFO stealing policy, and translates
//! concurrently-arriving parameter edits into a deduplicated, ordered
//! batch of register writes handed atomically to the audio callback.
//!
//! # Features
//! - FIFO voice allocator with oldest-first stealing, same-pitch
//!   retrigger and runtime polyphony resize
//! - Shadow tone state diffed on every edit, so redundant edits reserve
//!   no register traffic
//! - Coalescing pending-edit queue decoupling UI threads from the audio
//!   cycle
//! - Pitch derivation from (note, bend, bend sensitivity) to the chip's
//!   Block/F-Number code
//! - RPN detection for pitch-bend sensitivity (RPN #0)
//!
//! # Device Trait
//! The `RegisterDevice` trait decouples the engine from the chip: any
//! emulation core, hardware bridge or test recorder that accepts
//! address/data pairs on the chip's two register buses plugs in.
//!
//! # Quick start
//! ```
//! use ym2608_fm::{FmEngine, MidiEvent, RegisterDevice, BusSelect};
//!
//! struct Recorder(Vec<(BusSelect, u8, u8)>);
//!
//! impl RegisterDevice for Recorder {
//!     fn write_address(&mut self, bus: BusSelect, address: u8) {
//!         self.0.push((bus, address, 0));
//!     }
//!     fn write_data(&mut self, bus: BusSelect, data: u8) {
//!         if let Some(last) = self.0.last_mut() {
//!             last.2 = data;
//!         }
//!     }
//! }
//!
//! let engine = FmEngine::new();
//! let mut device = Recorder(Vec::new());
//!
//! engine.prepare();
//! engine.try_reserve_change_from_midi(MidiEvent::NoteOn {
//!     channel: 1,
//!     note_number: 69,
//!     velocity: 100,
//! });
//! engine.flush_reserved(&mut device); // audio callback side
//! assert!(!device.0.is_empty());
//! ```

#![warn(missing_docs)]

// Domain modules
pub mod device; // Register device trait abstraction
pub mod engine; // Change-reservation engine
pub mod keyboard; // FIFO voice allocator
pub mod midi; // MIDI input events
pub mod note; // Note / voice-assignment value types
pub mod parameter; // Tone parameters, bounded values, pending-edit queue
pub mod pitch; // Cent / Block-F-Number math
pub mod register; // Register map and bit packing
pub mod rpn; // RPN controller-sequence detector

/// Error types for the allocation and reservation core
///
/// Steady-state audio-path operations never error; they report "no
/// effect" through `bool`/`Option` returns. The variants here cover
/// construction, resize and queue misuse.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Ym2608FmError {
    /// Polyphony of zero requested at construction or resize.
    #[error("polyphony must be at least 1")]
    InvalidPolyphony,

    /// The allocator's id accounting disagrees with its polyphony.
    #[error("broken polyphony state: {0}")]
    BrokenPolyphonyState(String),

    /// Dequeue was called on an empty change queue.
    #[error("called dequeue, but the queue is empty")]
    EmptyQueue,
}

/// Result type for allocation and reservation operations
pub type Result<T> = std::result::Result<T, Ym2608FmError>;

// Public API exports
pub use device::RegisterDevice;
pub use engine::FmEngine;
pub use keyboard::Keyboard;
pub use midi::MidiEvent;
pub use note::{Note, VoiceAssignment};
pub use parameter::change_queue::ParameterChangeQueue;
pub use parameter::{FmParameters, ParameterChange, ParameterId, SsgegShape};
pub use register::{BusSelect, OperatorMask, RegisterWrite};
