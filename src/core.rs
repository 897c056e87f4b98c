//! The host/core interface contracts.
//!
//! The host owns the core. The core never stores a reference back to the host;
//! callbacks are provided per call as `&mut dyn EmulatorHost`, which keeps the
//! ownership graph a tree and the worker thread borrow-checkable.

use crate::clock::Cycles;
use crate::cpu::{ExecMode, GenericCpu};
use crate::error::CadmiumError;
use crate::palette::Palette;
use crate::properties::Properties;
use crate::video::VideoBuffer;

/// Callbacks a core may issue towards its embedding application while it is
/// executing. A headless host can leave everything defaulted except the key
/// state queries.
pub trait EmulatorHost {
    /// True when no interactive UI is attached; cores start running instead of
    /// paused in that case.
    fn is_headless(&self) -> bool {
        true
    }
    /// Current state of a single CHIP-8 key (0x0..=0xF).
    fn key_down(&self, key: u8) -> bool;
    /// All sixteen key states as a bit mask.
    fn key_states(&self) -> u16;
    /// The key to report for a blocking `Fx0A` wait, if any is newly pressed.
    fn key_pressed(&mut self) -> Option<u8>;
    /// The display content changed and should be redrawn.
    fn update_screen(&mut self) {}
    /// A display refresh boundary passed.
    fn vblank(&mut self) {}
    /// A ROM finished loading into the core.
    fn rom_loaded(&mut self, _name: &str, _auto_run: bool) {}
}

/// A host implementation with no keyboard and no display, used by the
/// librarian's scratch cores and by tests.
pub struct HeadlessHost;

impl EmulatorHost for HeadlessHost {
    fn key_down(&self, _key: u8) -> bool {
        false
    }
    fn key_states(&self) -> u16 {
        0
    }
    fn key_pressed(&mut self) -> Option<u8> {
        None
    }
}

/// The contract between a host and one emulation core. A core owns its memory
/// and screen buffer exclusively; the host borrows read-only views between
/// frames.
pub trait EmulationCore {
    fn name(&self) -> &'static str;

    /// The properties this core was built from.
    fn properties(&self) -> &Properties;

    /// Applies changed properties. Returns `true` when the change cannot be
    /// absorbed in place and the host has to reconstruct the core.
    fn update_properties(&mut self, props: &Properties, changed: &str) -> bool;

    /// Full power-cycle; registers and memory reset, breakpoints survive.
    fn reset(&mut self, host: &mut dyn EmulatorHost);

    /// The variant-specific default load address for plain binaries.
    fn default_load_address(&self) -> u32;

    /// Resets the core and places `data` at `address` (or the variant default),
    /// recording the image's SHA-1 fingerprint.
    fn load_binary(
        &mut self,
        host: &mut dyn EmulatorHost,
        name: &str,
        data: &[u8],
        address: Option<u32>,
    ) -> Result<(), CadmiumError>;

    /// Lowercase 40-char hex digest of the most recently loaded image.
    fn rom_sha1(&self) -> Option<&str>;

    /// Advances emulation until the next display refresh boundary.
    fn execute_frame(&mut self, host: &mut dyn EmulatorHost);

    /// Advances emulation by `microseconds`, returning the unspent remainder
    /// (negative when the core overshot).
    fn execute_for(&mut self, host: &mut dyn EmulatorHost, microseconds: i64) -> i64;

    /// Executes a single instruction of the focussed unit.
    fn execute_instruction(&mut self, host: &mut dyn EmulatorHost) -> Cycles;

    fn exec_mode(&self) -> ExecMode;
    fn set_exec_mode(&mut self, mode: ExecMode);

    /// Number of debugger-selectable execution units (e.g. CHIP-8 plus backend
    /// CPU on a hybrid core).
    fn num_execution_units(&self) -> usize {
        1
    }
    fn execution_unit(&mut self, index: usize) -> Option<&mut dyn GenericCpu>;
    /// Index of the focussed unit, the one step operations apply to.
    fn focussed_execution_unit(&self) -> usize {
        0
    }
    fn set_focussed_execution_unit(&mut self, _index: usize) {}

    /// The palette-indexed screen; the host borrows it between frames only.
    fn screen(&self) -> &VideoBuffer;
    fn palette(&self) -> &Palette;

    /// Completed display frames since reset.
    fn frames(&self) -> i64;

    /// Fills `samples` with signed 16-bit mono audio for the current state.
    fn render_audio(&mut self, samples: &mut [i16], sample_rate: u32);
}
