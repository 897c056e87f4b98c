//! The debugger layer: drives the step state machine of the focussed execution
//! unit and keeps one-instruction-old copies of memory, registers and stacks so
//! the UI can highlight what changed.

use crate::core::{EmulationCore, EmulatorHost};
use crate::cpu::{Breakpoint, BreakpointKind, ExecMode, RegisterValue};
use crate::error::CadmiumError;
use crate::expression::{CpuEnv, Expression};

/// Per-execution-unit snapshot taken by [Debugger::capture_states].
#[derive(Clone, Debug, Default)]
struct UnitSnapshot {
    registers: Vec<RegisterValue>,
    stack: Vec<u8>,
}

/// The debugger sits between the host and a core; it owns no core itself.
#[derive(Default)]
pub struct Debugger {
    memory_backup: Vec<u8>,
    units: Vec<UnitSnapshot>,
}

impl Debugger {
    pub fn new() -> Self {
        Debugger::default()
    }

    /// Takes the "one instruction ago" snapshots; the host calls this before
    /// each user-visible render.
    pub fn capture_states(&mut self, core: &mut dyn EmulationCore) {
        self.units.clear();
        for index in 0..core.num_execution_units() {
            if let Some(unit) = core.execution_unit(index) {
                let registers =
                    (0..unit.register_names().len()).map(|reg| unit.register(reg)).collect();
                let stack = unit.stack().content;
                self.units.push(UnitSnapshot { registers, stack });
            }
        }
        if let Some(unit) = core.execution_unit(0) {
            let size = unit.memory_size().min(0x10000);
            self.memory_backup.resize(size, 0);
            for (addr, slot) in self.memory_backup.iter_mut().enumerate() {
                *slot = unit.read_memory_byte(addr as u32);
            }
        }
    }

    /// Register indices of `unit` whose value changed since the last capture.
    pub fn changed_registers(&self, core: &mut dyn EmulationCore, unit_index: usize) -> Vec<usize> {
        let Some(snapshot) = self.units.get(unit_index) else { return Vec::new() };
        let Some(unit) = core.execution_unit(unit_index) else { return Vec::new() };
        (0..unit.register_names().len())
            .filter(|reg| {
                snapshot.registers.get(*reg).map(|old| old.value) != Some(unit.register(*reg).value)
            })
            .collect()
    }

    /// True if the byte at `addr` changed since the last capture.
    pub fn memory_changed(&self, core: &mut dyn EmulationCore, addr: u32) -> bool {
        let current = match core.execution_unit(0) {
            Some(unit) => unit.read_memory_byte(addr),
            None => return false,
        };
        self.memory_backup.get(addr as usize).map(|old| *old != current).unwrap_or(false)
    }

    /// Stack bytes of `unit` that changed since the last capture.
    pub fn changed_stack_bytes(
        &self,
        core: &mut dyn EmulationCore,
        unit_index: usize,
    ) -> Vec<usize> {
        let Some(snapshot) = self.units.get(unit_index) else { return Vec::new() };
        let Some(unit) = core.execution_unit(unit_index) else { return Vec::new() };
        let current = unit.stack().content;
        current
            .iter()
            .enumerate()
            .filter(|(index, byte)| snapshot.stack.get(*index) != Some(byte))
            .map(|(index, _)| index)
            .collect()
    }

    // --- the step state machine -------------------------------------------

    pub fn run(&mut self, core: &mut dyn EmulationCore) {
        core.set_exec_mode(ExecMode::Running);
    }

    pub fn pause(&mut self, core: &mut dyn EmulationCore) {
        core.set_exec_mode(ExecMode::Paused);
    }

    /// Executes exactly one instruction of the focussed unit, ending paused.
    pub fn step(&mut self, core: &mut dyn EmulationCore, host: &mut dyn EmulatorHost) {
        self.capture_states(core);
        core.set_exec_mode(ExecMode::Step);
        core.execute_instruction(host);
        core.set_exec_mode(ExecMode::Paused);
    }

    /// Steps over calls: runs until the stack is back at (or above) the level
    /// it had when stepping started.
    pub fn step_over(&mut self, core: &mut dyn EmulationCore, host: &mut dyn EmulatorHost) {
        self.capture_states(core);
        core.set_exec_mode(ExecMode::StepOver);
        while core.exec_mode() != ExecMode::Paused {
            core.execute_frame(host);
        }
    }

    /// Runs until the current subroutine returned.
    pub fn step_out(&mut self, core: &mut dyn EmulationCore, host: &mut dyn EmulatorHost) {
        self.capture_states(core);
        core.set_exec_mode(ExecMode::StepOut);
        while core.exec_mode() != ExecMode::Paused {
            core.execute_frame(host);
        }
    }

    // --- breakpoint editing ------------------------------------------------

    pub fn set_breakpoint(&mut self, core: &mut dyn EmulationCore, address: u32, label: &str) {
        if let Some(unit) = core.execution_unit(core.focussed_execution_unit()) {
            unit.breakpoints_mut().set(
                address,
                Breakpoint { label: label.to_string(), kind: BreakpointKind::User, enabled: true },
            );
        }
    }

    pub fn set_transient_breakpoint(&mut self, core: &mut dyn EmulationCore, address: u32) {
        if let Some(unit) = core.execution_unit(core.focussed_execution_unit()) {
            unit.breakpoints_mut().set(
                address,
                Breakpoint { label: String::new(), kind: BreakpointKind::Transient, enabled: true },
            );
        }
    }

    pub fn remove_breakpoint(&mut self, core: &mut dyn EmulationCore, address: u32) {
        if let Some(unit) = core.execution_unit(core.focussed_execution_unit()) {
            unit.breakpoints_mut().remove(address);
        }
    }

    /// Runs to `address` using a transient breakpoint.
    pub fn run_to(
        &mut self,
        core: &mut dyn EmulationCore,
        host: &mut dyn EmulatorHost,
        address: u32,
    ) {
        self.set_transient_breakpoint(core, address);
        self.capture_states(core);
        core.set_exec_mode(ExecMode::Running);
        while core.exec_mode() != ExecMode::Paused {
            core.execute_frame(host);
        }
    }

    /// Single-steps until the watch condition evaluates true on the focussed
    /// unit, up to `max_instructions`. Returns whether the condition hit.
    pub fn run_until(
        &mut self,
        core: &mut dyn EmulationCore,
        host: &mut dyn EmulatorHost,
        condition: &Expression,
        max_instructions: u64,
    ) -> Result<bool, CadmiumError> {
        self.capture_states(core);
        for _ in 0..max_instructions {
            core.set_exec_mode(ExecMode::Step);
            core.execute_instruction(host);
            core.set_exec_mode(ExecMode::Paused);
            let focussed = core.focussed_execution_unit();
            let Some(unit) = core.execution_unit(focussed) else { break };
            let hit = condition.evaluate(&CpuEnv::new(&*unit))?.as_bool();
            if hit {
                return Ok(true);
            }
            if unit.in_error_state() {
                break;
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip8::{Chip8GenericCore, Chip8Options, Chip8Preset};
    use crate::core::HeadlessHost;
    use crate::properties::PropertyRegistry;

    fn setup_core(code: &[u8]) -> Chip8GenericCore {
        let mut registry = PropertyRegistry::new();
        let mut core =
            Chip8GenericCore::with_options(&mut registry, Chip8Options::for_preset(Chip8Preset::Chip8));
        let mut host = HeadlessHost;
        crate::core::EmulationCore::load_binary(&mut core, &mut host, "test", code, None).unwrap();
        core
    }

    #[test]
    fn test_step_executes_exactly_one_instruction() {
        let mut core = setup_core(&[0x60, 0x05, 0x61, 0x06]);
        let mut debugger = Debugger::new();
        let mut host = HeadlessHost;
        debugger.step(&mut core, &mut host);
        assert_eq!(crate::cpu::GenericCpu::pc(&core), 0x202);
        assert_eq!(core.v(0), 5);
        assert_eq!(core.v(1), 0);
        assert_eq!(crate::core::EmulationCore::exec_mode(&core), ExecMode::Paused);
    }

    #[test]
    fn test_changed_registers_after_step() {
        let mut core = setup_core(&[0x63, 0x2A]);
        let mut debugger = Debugger::new();
        let mut host = HeadlessHost;
        debugger.step(&mut core, &mut host);
        let changed = debugger.changed_registers(&mut core, 0);
        // V3 and PC changed.
        assert!(changed.contains(&3));
        assert!(changed.contains(&19));
        assert!(!changed.contains(&4));
    }

    #[test]
    fn test_memory_changed_after_store() {
        // I := 0x300, V0 := 0x77, save v0
        let mut core = setup_core(&[0xA3, 0x00, 0x60, 0x77, 0xF0, 0x55]);
        let mut debugger = Debugger::new();
        let mut host = HeadlessHost;
        debugger.step(&mut core, &mut host);
        debugger.step(&mut core, &mut host);
        debugger.capture_states(&mut core);
        debugger.step(&mut core, &mut host);
        assert!(debugger.memory_changed(&mut core, 0x300));
        assert!(!debugger.memory_changed(&mut core, 0x301 + 16));
    }

    #[test]
    fn test_run_until_watch_condition() {
        // A counting loop: v0 += 1; jump back.
        let mut core = setup_core(&[0x70, 0x01, 0x12, 0x00]);
        let mut debugger = Debugger::new();
        let mut host = HeadlessHost;
        let condition = Expression::parse("V0 >= 5").unwrap();
        let hit = debugger.run_until(&mut core, &mut host, &condition, 100).unwrap();
        assert!(hit);
        assert_eq!(core.v(0), 5);
    }

    #[test]
    fn test_run_to_transient_breakpoint() {
        let mut core = setup_core(&[0x60, 0x01, 0x61, 0x02, 0x62, 0x03, 0x12, 0x06]);
        let mut debugger = Debugger::new();
        let mut host = HeadlessHost;
        debugger.run_to(&mut core, &mut host, 0x204);
        assert_eq!(crate::cpu::GenericCpu::pc(&core), 0x204);
        // The transient breakpoint has cleared itself.
        assert!(crate::cpu::GenericCpu::breakpoints(&core).is_empty());
    }
}
