pub mod cdp1802;
pub mod m6800;

use crate::clock::{Cycles, Time};
use std::collections::HashMap;

/// The debugger-driven execution mode of an execution unit.
///
/// Transitions follow the step state machine: `Paused` to `Running` on run,
/// `Step`/`StepOver`/`StepOut` complete back into `Paused`, breakpoints and
/// errors force `Paused`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    Paused,
    Running,
    Step,
    StepOver,
    StepOut,
}

/// The hardware state of an execution unit, orthogonal to [ExecMode]: `Wait`
/// models display-wait and WAI-style stalls, `Halt` a stopped backend, and
/// `Error` is terminal until reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuState {
    Normal,
    Wait,
    Halt,
    Error,
}

/// A register value paired with its width in bits, for generic debugger views.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterValue {
    pub value: u32,
    pub bits: u8,
}

/// Byte order of stack entries as exposed to the debugger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Growth direction of the stack in the exposed byte content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackDirection {
    Upwards,
    Downwards,
}

/// A snapshot descriptor of an execution unit's stack.
#[derive(Clone, Debug, Default)]
pub struct StackContent {
    pub entry_size: usize,
    pub endianness: Option<Endianness>,
    pub direction: Option<StackDirection>,
    pub content: Vec<u8>,
}

impl StackContent {
    pub fn new(
        entry_size: usize,
        endianness: Endianness,
        direction: StackDirection,
        content: Vec<u8>,
    ) -> Self {
        StackContent {
            entry_size,
            endianness: Some(endianness),
            direction: Some(direction),
            content,
        }
    }
}

/// Who owns a breakpoint, which decides its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointKind {
    /// Set by the user, lives until removed by the user
    User,
    /// Self-clears after it has fired once
    Transient,
    /// Owned by the compiler; removed and re-inserted on recompile
    Coded,
}

/// A single breakpoint entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Breakpoint {
    pub label: String,
    pub kind: BreakpointKind,
    pub enabled: bool,
}

/// The address-keyed breakpoint table attached to an execution unit. Survives
/// reset; only registers and memory are reset.
#[derive(Clone, Debug, Default)]
pub struct BreakpointMap {
    entries: HashMap<u32, Breakpoint>,
}

impl BreakpointMap {
    pub fn new() -> Self {
        BreakpointMap::default()
    }

    pub fn set(&mut self, address: u32, bp: Breakpoint) {
        self.entries.insert(address, bp);
    }

    pub fn remove(&mut self, address: u32) {
        self.entries.remove(&address);
    }

    pub fn get(&self, address: u32) -> Option<&Breakpoint> {
        self.entries.get(&address)
    }

    pub fn contains(&self, address: u32) -> bool {
        self.entries.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drops all compiler-owned breakpoints (called before a recompile).
    pub fn remove_coded(&mut self) {
        self.entries.retain(|_, bp| bp.kind != BreakpointKind::Coded);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Breakpoint)> {
        self.entries.iter()
    }

    /// Checks whether an enabled breakpoint fires at `address`. Transient
    /// breakpoints are removed by the act of firing.
    pub fn trigger(&mut self, address: u32) -> bool {
        let fired = match self.entries.get(&address) {
            Some(bp) => bp.enabled,
            None => return false,
        };
        if fired && self.entries[&address].kind == BreakpointKind::Transient {
            self.entries.remove(&address);
        }
        fired
    }
}

/// The contract every execution unit in Cadmium fulfils, whether it is a CHIP-8
/// interpreter, a backend CPU of a real-hardware core, or the synthesised CHIP-8
/// view of a hybrid core.
pub trait GenericCpu {
    /// A stable numeric identity (e.g. 6800, 1802, 0xC8).
    fn cpu_id(&self) -> u32;
    fn name(&self) -> &'static str;

    fn register_names(&self) -> &'static [&'static str];
    fn register(&self, index: usize) -> RegisterValue;
    fn set_register(&mut self, index: usize, value: u32);

    fn pc(&self) -> u32;
    fn sp(&self) -> u32;
    fn cycles(&self) -> Cycles;
    fn time(&self) -> Time;

    fn stack_size(&self) -> usize;
    fn stack(&self) -> StackContent;

    /// Debug memory read without side effects.
    fn read_memory_byte(&self, addr: u32) -> u8;
    fn memory_size(&self) -> usize;

    /// Disassembles the instruction at `addr` (or the current PC when negative),
    /// returning its size in bytes and a line that includes the raw bytes.
    fn disassemble_with_bytes(&self, addr: i64) -> (usize, String);

    /// A one-line register dump for trace logs.
    fn dump_state_line(&self) -> String;

    fn exec_mode(&self) -> ExecMode;
    fn set_exec_mode(&mut self, mode: ExecMode);
    fn cpu_state(&self) -> CpuState;
    fn in_error_state(&self) -> bool {
        self.cpu_state() == CpuState::Error
    }
    fn error_message(&self) -> Option<&str> {
        None
    }

    fn breakpoints(&self) -> &BreakpointMap;
    fn breakpoints_mut(&mut self) -> &mut BreakpointMap;

    /// True once a breakpoint has paused this unit; latched until cleared by the
    /// host.
    fn breakpoint_triggered(&self) -> bool;
    fn clear_breakpoint_triggered(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_breakpoint_self_clears() {
        let mut map = BreakpointMap::new();
        map.set(
            0x202,
            Breakpoint { label: "once".into(), kind: BreakpointKind::Transient, enabled: true },
        );
        assert!(map.trigger(0x202));
        assert!(!map.contains(0x202));
        assert!(!map.trigger(0x202));
    }

    #[test]
    fn test_disabled_breakpoint_does_not_fire() {
        let mut map = BreakpointMap::new();
        map.set(
            0x300,
            Breakpoint { label: String::new(), kind: BreakpointKind::User, enabled: false },
        );
        assert!(!map.trigger(0x300));
        assert!(map.contains(0x300));
    }

    #[test]
    fn test_remove_coded_keeps_user() {
        let mut map = BreakpointMap::new();
        map.set(
            0x200,
            Breakpoint { label: "user".into(), kind: BreakpointKind::User, enabled: true },
        );
        map.set(
            0x204,
            Breakpoint { label: "coded".into(), kind: BreakpointKind::Coded, enabled: true },
        );
        map.remove_coded();
        assert!(map.contains(0x200));
        assert!(!map.contains(0x204));
    }
}
