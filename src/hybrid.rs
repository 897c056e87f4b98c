//! Real-hardware cores: a backend CPU, a video device, a keyboard path and a
//! monitor ROM composed into a machine that *is* running CHIP-8 — there is no
//! separate CHIP-8 interpreter at runtime, only the real monitor interpreting
//! CHIP-8 bytecode, plus a shim that lifts the interpreter's state out of
//! emulated RAM whenever the backend reaches the monitor's fetch-decode entry
//! point.

pub mod dream6800;
pub mod eti660;
pub mod vip;

pub use dream6800::Dream6800;
pub use eti660::Eti660;
pub use vip::CosmacVip;

use crate::clock::Cycles;

/// The CHIP-8 machine state lifted out of a monitor's work area. Registers live
/// at documented offsets in emulated RAM (or backend registers); this is a pure
/// snapshot, re-sampled at every fetch-decode entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct Chip8State {
    pub v: [u8; 16],
    pub i: u16,
    pub pc: u16,
    pub sp: u16,
    pub dt: u8,
    pub st: u8,
    pub stack: [u16; 16],
    pub cycles: Cycles,
    pub frame_cycle: i64,
}

impl Chip8State {
    /// Serialises the return stack as debugger-consumable bytes.
    pub fn stack_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.stack.len() * 2);
        for entry in &self.stack {
            bytes.extend_from_slice(&entry.to_be_bytes());
        }
        bytes
    }

    /// One-line dump in the debugger's register layout.
    pub fn dump_state_line(&self, next_opcode: u16) -> String {
        format!(
            "V0:{:02x} V1:{:02x} V2:{:02x} V3:{:02x} V4:{:02x} V5:{:02x} V6:{:02x} V7:{:02x} \
             V8:{:02x} V9:{:02x} VA:{:02x} VB:{:02x} VC:{:02x} VD:{:02x} VE:{:02x} VF:{:02x} \
             I:{:04x} SP:{:1x} PC:{:04x} O:{:04x}",
            self.v[0], self.v[1], self.v[2], self.v[3], self.v[4], self.v[5], self.v[6],
            self.v[7], self.v[8], self.v[9], self.v[10], self.v[11], self.v[12], self.v[13],
            self.v[14], self.v[15], self.i, self.sp, self.pc, next_opcode
        )
    }
}

/// How many backend instructions a reset fast-forward may take before the core
/// declares the monitor stalled.
pub(crate) const RESET_FAST_FORWARD_LIMIT: u32 = 4_000_000;

pub(crate) static CHIP8_REGISTER_NAMES: [&str; 21] = [
    "V0", "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "VA", "VB", "VC", "VD", "VE",
    "VF", "I", "DT", "ST", "PC", "SP",
];
