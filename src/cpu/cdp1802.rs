//! Cycle-accurate RCA CDP1802 core.
//!
//! Dispatch is a switch on the full opcode byte (high nibble selects the
//! instruction class, low nibble the register operand). Each instruction is two
//! machine cycles of eight clocks (16 clocks charged on fetch); long branches,
//! long skips and NOP take a third machine cycle (8 more clocks). `IDL` parks
//! the CPU in [CpuState::Wait] until DMA or an interrupt wakes it up.

use crate::clock::{Cycles, Time};
use crate::cpu::{
    BreakpointMap, CpuState, ExecMode, GenericCpu, RegisterValue, StackContent,
};

/// Bus interface of the CDP1802, including the N-line I/O ports and the EF1-EF4
/// sense inputs.
pub trait Cdp1802Bus {
    fn read_byte(&mut self, addr: u16) -> u8;
    fn write_byte(&mut self, addr: u16, val: u8);
    /// Side-effect-free read for the debugger and disassembler.
    fn read_debug_byte(&self, addr: u16) -> u8;
    /// `OUT n`: a byte travels from memory to the device on N-lines `n` (1..=7).
    fn output(&mut self, _n: u8, _val: u8) {}
    /// `INP n`: a byte travels from the device to memory and D.
    fn input(&mut self, _n: u8) -> u8 {
        0
    }
    /// State of the EFx input line (0-based: 0 is EF1).
    fn ef(&self, _n: u8) -> bool {
        true
    }
    /// Level on the Q output changed.
    fn q_changed(&mut self, _q: bool) {}
}

/// A full register snapshot for the step-back debugger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cdp1802State {
    pub r: [u16; 16],
    pub d: u8,
    pub df: bool,
    pub p: u8,
    pub x: u8,
    pub n: u8,
    pub t: u8,
    pub ie: bool,
    pub q: bool,
    pub cycles: Cycles,
}

const FETCH_CLOCKS: Cycles = 16;
const LONG_EXTRA_CLOCKS: Cycles = 8;

/// The CDP1802 execution unit. Owns its bus (the composing system board).
pub struct Cdp1802<B: Cdp1802Bus> {
    bus: B,
    r: [u16; 16],
    d: u8,
    df: bool,
    p: u8,
    x: u8,
    n: u8,
    t: u8,
    ie: bool,
    q: bool,
    irq_pending: bool,
    cycles: Cycles,
    instructions: i64,
    cpu_state: CpuState,
    exec_mode: ExecMode,
    step_over_sp: u16,
    breakpoints: BreakpointMap,
    breakpoint_triggered: bool,
    system_time: Time,
    error_message: Option<String>,
}

impl<B: Cdp1802Bus> Cdp1802<B> {
    pub fn new(bus: B, clock_rate: u64) -> Self {
        let mut cpu = Cdp1802 {
            bus,
            r: [0; 16],
            d: 0,
            df: false,
            p: 0,
            x: 0,
            n: 0,
            t: 0,
            ie: true,
            q: false,
            irq_pending: false,
            cycles: 0,
            instructions: 0,
            cpu_state: CpuState::Normal,
            exec_mode: ExecMode::Running,
            step_over_sp: 0,
            breakpoints: BreakpointMap::new(),
            breakpoint_triggered: false,
            system_time: Time::zero(clock_rate),
            error_message: None,
        };
        cpu.reset();
        cpu
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Reset per the datasheet: P=X=0, R0=0, R1 primed for the interrupt
    /// routine, IE enabled. Breakpoints survive.
    pub fn reset(&mut self) {
        self.d = 0;
        self.df = false;
        self.p = 0;
        self.x = 0;
        self.n = 0;
        self.t = 0;
        self.q = false;
        self.r = [0; 16];
        self.r[1] = 0x0FFF;
        self.ie = true;
        self.irq_pending = false;
        self.cycles = 0;
        self.instructions = 0;
        self.cpu_state = CpuState::Normal;
        self.system_time.reset();
        self.error_message = None;
    }

    pub fn r(&self, index: u8) -> u16 {
        self.r[(index & 0xF) as usize]
    }

    pub fn set_r(&mut self, index: u8, value: u16) {
        self.r[(index & 0xF) as usize] = value;
    }

    pub fn p_register(&self) -> u8 {
        self.p
    }

    pub fn x_register(&self) -> u8 {
        self.x
    }

    pub fn d_register(&self) -> u8 {
        self.d
    }

    pub fn q_output(&self) -> bool {
        self.q
    }

    pub fn ie(&self) -> bool {
        self.ie
    }

    pub fn program_counter(&self) -> u16 {
        self.r[self.p as usize]
    }

    pub fn instructions(&self) -> i64 {
        self.instructions
    }

    pub fn get_state(&self, state: &mut Cdp1802State) {
        state.r = self.r;
        state.d = self.d;
        state.df = self.df;
        state.p = self.p;
        state.x = self.x;
        state.n = self.n;
        state.t = self.t;
        state.ie = self.ie;
        state.q = self.q;
        state.cycles = self.cycles;
    }

    pub fn set_state(&mut self, state: &Cdp1802State) {
        self.r = state.r;
        self.d = state.d;
        self.df = state.df;
        self.p = state.p & 0xF;
        self.x = state.x & 0xF;
        self.n = state.n & 0xF;
        self.t = state.t;
        self.ie = state.ie;
        self.q = state.q;
        self.cycles = state.cycles;
    }

    pub fn add_cycles(&mut self, clocks: Cycles) {
        self.cycles += clocks;
        self.system_time.add_cycles(clocks);
    }

    /// Asserts the interrupt line; it is sampled at the next instruction
    /// boundary while IE is set.
    pub fn interrupt(&mut self) {
        self.irq_pending = true;
    }

    /// The 1861-style DMA-out burst: reads M(R0) and post-increments R0.
    pub fn dma_out(&mut self) -> u8 {
        self.add_cycles(LONG_EXTRA_CLOCKS);
        let addr = self.r[0];
        self.r[0] = self.r[0].wrapping_add(1);
        if self.cpu_state == CpuState::Wait {
            self.cpu_state = CpuState::Normal;
        }
        self.bus.read_byte(addr)
    }

    /// DMA-in: writes a byte to M(R0) and post-increments R0.
    pub fn dma_in(&mut self, data: u8) {
        self.add_cycles(LONG_EXTRA_CLOCKS);
        let addr = self.r[0];
        self.r[0] = self.r[0].wrapping_add(1);
        if self.cpu_state == CpuState::Wait {
            self.cpu_state = CpuState::Normal;
        }
        self.bus.write_byte(addr, data);
    }

    /// Leaves the IDL state without a bus event (used by boards that model
    /// their interrupt sources natively).
    pub fn wake(&mut self) {
        if self.cpu_state == CpuState::Wait {
            self.cpu_state = CpuState::Normal;
        }
    }

    fn service_interrupt(&mut self) {
        self.add_cycles(LONG_EXTRA_CLOCKS);
        self.ie = false;
        self.t = (self.x << 4) | self.p;
        self.p = 1;
        self.x = 2;
        if self.cpu_state == CpuState::Wait {
            self.cpu_state = CpuState::Normal;
        }
    }

    #[inline]
    fn pc_fetch(&mut self) -> u8 {
        let addr = self.r[self.p as usize];
        self.r[self.p as usize] = addr.wrapping_add(1);
        self.bus.read_byte(addr)
    }

    fn branch_short(&mut self, condition: bool) {
        let pc = self.r[self.p as usize];
        if condition {
            let target = self.bus.read_byte(pc);
            self.r[self.p as usize] = (pc & 0xFF00) | target as u16;
        } else {
            self.r[self.p as usize] = pc.wrapping_add(1);
        }
    }

    fn branch_long(&mut self, condition: bool) {
        let pc = self.r[self.p as usize];
        if condition {
            let hi = self.bus.read_byte(pc);
            let lo = self.bus.read_byte(pc.wrapping_add(1));
            self.r[self.p as usize] = ((hi as u16) << 8) | lo as u16;
        } else {
            self.r[self.p as usize] = pc.wrapping_add(2);
        }
        self.add_cycles(LONG_EXTRA_CLOCKS);
    }

    fn skip_long(&mut self, condition: bool) {
        if condition {
            self.r[self.p as usize] = self.r[self.p as usize].wrapping_add(2);
        }
        self.add_cycles(LONG_EXTRA_CLOCKS);
    }

    /// Executes one instruction and returns the number of clocks charged.
    pub fn execute_instruction(&mut self) -> Cycles {
        if self.exec_mode == ExecMode::Paused || self.cpu_state == CpuState::Error {
            return 0;
        }
        let start = self.cycles;
        if self.irq_pending && self.ie {
            self.irq_pending = false;
            self.service_interrupt();
        }
        if self.cpu_state == CpuState::Wait {
            // IDLE: mark time until DMA or interrupt.
            self.add_cycles(LONG_EXTRA_CLOCKS);
            return self.cycles - start;
        }
        let opcode = self.pc_fetch();
        self.add_cycles(FETCH_CLOCKS);
        self.n = opcode & 0xF;
        let n = self.n as usize;
        match opcode {
            0x00 => self.cpu_state = CpuState::Wait, // IDL
            0x01..=0x0F => self.d = self.bus.read_byte(self.r[n]), // LDN
            0x10..=0x1F => self.r[n] = self.r[n].wrapping_add(1),  // INC
            0x20..=0x2F => self.r[n] = self.r[n].wrapping_sub(1),  // DEC
            0x30 => self.branch_short(true),                       // BR
            0x31 => {
                let q = self.q;
                self.branch_short(q)
            }
            0x32 => {
                let z = self.d == 0;
                self.branch_short(z)
            }
            0x33 => {
                let df = self.df;
                self.branch_short(df)
            }
            0x34..=0x37 => {
                let ef = self.bus.ef(opcode - 0x34);
                self.branch_short(ef)
            }
            0x38 => self.r[self.p as usize] = self.r[self.p as usize].wrapping_add(1), // SKP
            0x39 => {
                let q = self.q;
                self.branch_short(!q)
            }
            0x3A => {
                let nz = self.d != 0;
                self.branch_short(nz)
            }
            0x3B => {
                let df = self.df;
                self.branch_short(!df)
            }
            0x3C..=0x3F => {
                let ef = self.bus.ef(opcode - 0x3C);
                self.branch_short(!ef)
            }
            0x40..=0x4F => {
                // LDA
                self.d = self.bus.read_byte(self.r[n]);
                self.r[n] = self.r[n].wrapping_add(1);
            }
            0x50..=0x5F => self.bus.write_byte(self.r[n], self.d), // STR
            0x60 => self.r[self.x as usize] = self.r[self.x as usize].wrapping_add(1), // IRX
            0x61..=0x67 => {
                // OUT
                let x = self.x as usize;
                let val = self.bus.read_byte(self.r[x]);
                self.r[x] = self.r[x].wrapping_add(1);
                self.bus.output(opcode & 7, val);
            }
            0x68 => {} // unassigned on the 1802
            0x69..=0x6F => {
                // INP
                self.d = self.bus.input(opcode & 7);
                let x = self.x as usize;
                self.bus.write_byte(self.r[x], self.d);
            }
            0x70 | 0x71 => {
                // RET / DIS
                let x = self.x as usize;
                let t = self.bus.read_byte(self.r[x]);
                self.r[x] = self.r[x].wrapping_add(1);
                self.p = t & 0xF;
                self.x = t >> 4;
                self.ie = opcode == 0x70;
            }
            0x72 => {
                // LDXA
                let x = self.x as usize;
                self.d = self.bus.read_byte(self.r[x]);
                self.r[x] = self.r[x].wrapping_add(1);
            }
            0x73 => {
                // STXD
                let x = self.x as usize;
                self.bus.write_byte(self.r[x], self.d);
                self.r[x] = self.r[x].wrapping_sub(1);
            }
            0x74 => {
                // ADC
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = val as u16 + self.d as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x75 => {
                // SDB
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = val as u16 + (self.d ^ 0xFF) as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x76 => {
                // SHRC
                let carry_in = (self.df as u8) << 7;
                self.df = self.d & 1 != 0;
                self.d = (self.d >> 1) | carry_in;
            }
            0x77 => {
                // SMB
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = (val ^ 0xFF) as u16 + self.d as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x78 => self.bus.write_byte(self.r[self.x as usize], self.t), // SAV
            0x79 => {
                // MARK
                self.t = (self.x << 4) | self.p;
                self.bus.write_byte(self.r[2], self.t);
                self.x = self.p;
                self.r[2] = self.r[2].wrapping_sub(1);
            }
            0x7A | 0x7B => {
                self.q = opcode == 0x7B;
                let q = self.q;
                self.bus.q_changed(q);
            }
            0x7C => {
                // ADCI
                let val = self.pc_fetch();
                let t = val as u16 + self.d as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x7D => {
                // SDBI
                let val = self.pc_fetch();
                let t = val as u16 + (self.d ^ 0xFF) as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x7E => {
                // SHLC
                let carry_in = self.df as u8;
                self.df = self.d & 0x80 != 0;
                self.d = (self.d << 1) | carry_in;
            }
            0x7F => {
                // SMBI
                let val = self.pc_fetch();
                let t = (val ^ 0xFF) as u16 + self.d as u16 + self.df as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0x80..=0x8F => self.d = self.r[n] as u8, // GLO
            0x90..=0x9F => self.d = (self.r[n] >> 8) as u8, // GHI
            0xA0..=0xAF => self.r[n] = (self.r[n] & 0xFF00) | self.d as u16, // PLO
            0xB0..=0xBF => self.r[n] = (self.r[n] & 0x00FF) | ((self.d as u16) << 8), // PHI
            0xC0 => self.branch_long(true),
            0xC1 => {
                let q = self.q;
                self.branch_long(q)
            }
            0xC2 => {
                let z = self.d == 0;
                self.branch_long(z)
            }
            0xC3 => {
                let df = self.df;
                self.branch_long(df)
            }
            0xC4 => self.add_cycles(LONG_EXTRA_CLOCKS), // NOP is a three-cycle instruction
            0xC5 => {
                let q = self.q;
                self.skip_long(!q)
            }
            0xC6 => {
                let nz = self.d != 0;
                self.skip_long(nz)
            }
            0xC7 => {
                let df = self.df;
                self.skip_long(!df)
            }
            0xC8 => self.skip_long(true),
            0xC9 => {
                let q = self.q;
                self.branch_long(!q)
            }
            0xCA => {
                let nz = self.d != 0;
                self.branch_long(nz)
            }
            0xCB => {
                let df = self.df;
                self.branch_long(!df)
            }
            0xCC => {
                let ie = self.ie;
                self.skip_long(ie)
            }
            0xCD => {
                let q = self.q;
                self.skip_long(q)
            }
            0xCE => {
                let z = self.d == 0;
                self.skip_long(z)
            }
            0xCF => {
                let df = self.df;
                self.skip_long(df)
            }
            0xD0..=0xDF => self.p = self.n, // SEP
            0xE0..=0xEF => self.x = self.n, // SEX
            0xF0 => self.d = self.bus.read_byte(self.r[self.x as usize]), // LDX
            0xF1 => self.d |= self.bus.read_byte(self.r[self.x as usize]), // OR
            0xF2 => self.d &= self.bus.read_byte(self.r[self.x as usize]), // AND
            0xF3 => self.d ^= self.bus.read_byte(self.r[self.x as usize]), // XOR
            0xF4 => {
                // ADD
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = val as u16 + self.d as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0xF5 => {
                // SD
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = val as u16 + (self.d ^ 0xFF) as u16 + 1;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0xF6 => {
                // SHR
                self.df = self.d & 1 != 0;
                self.d >>= 1;
            }
            0xF7 => {
                // SM
                let val = self.bus.read_byte(self.r[self.x as usize]);
                let t = (val ^ 0xFF) as u16 + self.d as u16 + 1;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0xF8 => self.d = self.pc_fetch(), // LDI
            0xF9 => self.d |= self.pc_fetch(), // ORI
            0xFA => self.d &= self.pc_fetch(), // ANI
            0xFB => self.d ^= self.pc_fetch(), // XRI
            0xFC => {
                // ADI
                let val = self.pc_fetch();
                let t = val as u16 + self.d as u16;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0xFD => {
                // SDI
                let val = self.pc_fetch();
                let t = val as u16 + (self.d ^ 0xFF) as u16 + 1;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
            0xFE => {
                // SHL
                self.df = self.d & 0x80 != 0;
                self.d <<= 1;
            }
            0xFF => {
                // SMI
                let val = self.pc_fetch();
                let t = (val ^ 0xFF) as u16 + self.d as u16 + 1;
                self.df = t > 0xFF;
                self.d = t as u8;
            }
        }
        self.instructions += 1;
        if self.exec_mode == ExecMode::Step
            || (self.exec_mode == ExecMode::StepOver && self.r[2] >= self.step_over_sp)
            || (self.exec_mode == ExecMode::StepOut && self.r[2] > self.step_over_sp)
        {
            self.exec_mode = ExecMode::Paused;
        }
        let pc = self.program_counter() as u32;
        if self.breakpoints.trigger(pc) {
            self.exec_mode = ExecMode::Paused;
            self.breakpoint_triggered = true;
        }
        self.cycles - start
    }

    /// Disassembles the instruction in `code`, returning its byte size and text.
    pub fn disassemble_instruction(code: &[u8]) -> (usize, String) {
        let opcode = code[0];
        let n = opcode & 0xF;
        let imm = code.get(1).copied().unwrap_or(0);
        let imm16 = ((imm as u16) << 8) | code.get(2).copied().unwrap_or(0) as u16;
        match opcode {
            0x00 => (1, "IDL".into()),
            0x01..=0x0F => (1, format!("LDN R{:X}", n)),
            0x10..=0x1F => (1, format!("INC R{:X}", n)),
            0x20..=0x2F => (1, format!("DEC R{:X}", n)),
            0x30 => (2, format!("BR 0x{:02X}", imm)),
            0x31 => (2, format!("BQ 0x{:02X}", imm)),
            0x32 => (2, format!("BZ 0x{:02X}", imm)),
            0x33 => (2, format!("BDF 0x{:02X}", imm)),
            0x34..=0x37 => (2, format!("B{} 0x{:02X}", opcode - 0x33, imm)),
            0x38 => (1, "SKP".into()),
            0x39 => (2, format!("BNQ 0x{:02X}", imm)),
            0x3A => (2, format!("BNZ 0x{:02X}", imm)),
            0x3B => (2, format!("BNF 0x{:02X}", imm)),
            0x3C..=0x3F => (2, format!("BN{} 0x{:02X}", opcode - 0x3B, imm)),
            0x40..=0x4F => (1, format!("LDA R{:X}", n)),
            0x50..=0x5F => (1, format!("STR R{:X}", n)),
            0x60 => (1, "IRX".into()),
            0x61..=0x67 => (1, format!("OUT {:X}", n)),
            0x68 => (1, "ILLEGAL".into()),
            0x69..=0x6F => (1, format!("INP {:X}", n & 7)),
            0x70 => (1, "RET".into()),
            0x71 => (1, "DIS".into()),
            0x72 => (1, "LDXA".into()),
            0x73 => (1, "STXD".into()),
            0x74 => (1, "ADC".into()),
            0x75 => (1, "SDB".into()),
            0x76 => (1, "SHRC".into()),
            0x77 => (1, "SMB".into()),
            0x78 => (1, "SAV".into()),
            0x79 => (1, "MARK".into()),
            0x7A => (1, "REQ".into()),
            0x7B => (1, "SEQ".into()),
            0x7C => (2, format!("ADCI #0x{:02X}", imm)),
            0x7D => (2, format!("SDBI #0x{:02X}", imm)),
            0x7E => (1, "SHLC".into()),
            0x7F => (2, format!("SMBI #0x{:02X}", imm)),
            0x80..=0x8F => (1, format!("GLO R{:X}", n)),
            0x90..=0x9F => (1, format!("GHI R{:X}", n)),
            0xA0..=0xAF => (1, format!("PLO R{:X}", n)),
            0xB0..=0xBF => (1, format!("PHI R{:X}", n)),
            0xC0 => (3, format!("LBR 0x{:04X}", imm16)),
            0xC1 => (3, format!("LBQ 0x{:04X}", imm16)),
            0xC2 => (3, format!("LBZ 0x{:04X}", imm16)),
            0xC3 => (3, format!("LBDF 0x{:04X}", imm16)),
            0xC4 => (1, "NOP".into()),
            0xC5 => (1, "LSNQ".into()),
            0xC6 => (1, "LSNZ".into()),
            0xC7 => (1, "LSNF".into()),
            0xC8 => (1, "LSKP".into()),
            0xC9 => (3, format!("LBNQ 0x{:04X}", imm16)),
            0xCA => (3, format!("LBNZ 0x{:04X}", imm16)),
            0xCB => (3, format!("LBNF 0x{:04X}", imm16)),
            0xCC => (1, "LSIE".into()),
            0xCD => (1, "LSQ".into()),
            0xCE => (1, "LSZ".into()),
            0xCF => (1, "LSDF".into()),
            0xD0..=0xDF => (1, format!("SEP R{:X}", n)),
            0xE0..=0xEF => (1, format!("SEX R{:X}", n)),
            0xF0 => (1, "LDX".into()),
            0xF1 => (1, "OR".into()),
            0xF2 => (1, "AND".into()),
            0xF3 => (1, "XOR".into()),
            0xF4 => (1, "ADD".into()),
            0xF5 => (1, "SD".into()),
            0xF6 => (1, "SHR".into()),
            0xF7 => (1, "SM".into()),
            0xF8 => (2, format!("LDI #0x{:02X}", imm)),
            0xF9 => (2, format!("ORI #0x{:02X}", imm)),
            0xFA => (2, format!("ANI #0x{:02X}", imm)),
            0xFB => (2, format!("XRI #0x{:02X}", imm)),
            0xFC => (2, format!("ADI #0x{:02X}", imm)),
            0xFD => (2, format!("SDI #0x{:02X}", imm)),
            0xFE => (1, "SHL".into()),
            0xFF => (2, format!("SMI #0x{:02X}", imm)),
        }
    }
}

impl<B: Cdp1802Bus> GenericCpu for Cdp1802<B> {
    fn cpu_id(&self) -> u32 {
        1802
    }

    fn name(&self) -> &'static str {
        "CDP1802"
    }

    fn register_names(&self) -> &'static [&'static str] {
        &[
            "R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "R8", "R9", "RA", "RB", "RC", "RD",
            "RE", "RF", "D", "DF", "P", "X", "T", "Q",
        ]
    }

    fn register(&self, index: usize) -> RegisterValue {
        match index {
            0..=15 => RegisterValue { value: self.r[index] as u32, bits: 16 },
            16 => RegisterValue { value: self.d as u32, bits: 8 },
            17 => RegisterValue { value: self.df as u32, bits: 1 },
            18 => RegisterValue { value: self.p as u32, bits: 4 },
            19 => RegisterValue { value: self.x as u32, bits: 4 },
            20 => RegisterValue { value: self.t as u32, bits: 8 },
            21 => RegisterValue { value: self.q as u32, bits: 1 },
            _ => RegisterValue { value: 0, bits: 0 },
        }
    }

    fn set_register(&mut self, index: usize, value: u32) {
        match index {
            0..=15 => self.r[index] = value as u16,
            16 => self.d = value as u8,
            17 => self.df = value != 0,
            18 => self.p = value as u8 & 0xF,
            19 => self.x = value as u8 & 0xF,
            20 => self.t = value as u8,
            21 => self.q = value != 0,
            _ => {}
        }
    }

    fn pc(&self) -> u32 {
        self.program_counter() as u32
    }

    fn sp(&self) -> u32 {
        self.r[2] as u32
    }

    fn cycles(&self) -> Cycles {
        self.cycles
    }

    fn time(&self) -> Time {
        self.system_time
    }

    fn stack_size(&self) -> usize {
        0
    }

    fn stack(&self) -> StackContent {
        StackContent::default()
    }

    fn read_memory_byte(&self, addr: u32) -> u8 {
        self.bus.read_debug_byte(addr as u16)
    }

    fn memory_size(&self) -> usize {
        0x10000
    }

    fn disassemble_with_bytes(&self, addr: i64) -> (usize, String) {
        let address = if addr < 0 { self.program_counter() } else { addr as u16 };
        let code = [
            self.bus.read_debug_byte(address),
            self.bus.read_debug_byte(address.wrapping_add(1)),
            self.bus.read_debug_byte(address.wrapping_add(2)),
        ];
        let (size, text) = Self::disassemble_instruction(&code);
        (size, format!("{:04x}:  {:02x}    {}", address, code[0], text))
    }

    fn dump_state_line(&self) -> String {
        format!(
            "R0:{:04x} R1:{:04x} R2:{:04x} R3:{:04x} R4:{:04x} R5:{:04x} R6:{:04x} R7:{:04x} \
             R8:{:04x} R9:{:04x} RA:{:04x} RB:{:04x} RC:{:04x} RD:{:04x} RE:{:04x} RF:{:04x} \
             D:{:02x} DF:{} P:{:1x} X:{:1x} T:{:02x} Q:{}",
            self.r[0], self.r[1], self.r[2], self.r[3], self.r[4], self.r[5], self.r[6],
            self.r[7], self.r[8], self.r[9], self.r[10], self.r[11], self.r[12], self.r[13],
            self.r[14], self.r[15], self.d, self.df as u8, self.p, self.x, self.t, self.q as u8
        )
    }

    fn exec_mode(&self) -> ExecMode {
        self.exec_mode
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        if mode == ExecMode::StepOver || mode == ExecMode::StepOut {
            self.step_over_sp = self.r[2];
        }
        self.exec_mode = mode;
    }

    fn cpu_state(&self) -> CpuState {
        self.cpu_state
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn breakpoints(&self) -> &BreakpointMap {
        &self.breakpoints
    }

    fn breakpoints_mut(&mut self) -> &mut BreakpointMap {
        &mut self.breakpoints
    }

    fn breakpoint_triggered(&self) -> bool {
        self.breakpoint_triggered
    }

    fn clear_breakpoint_triggered(&mut self) {
        self.breakpoint_triggered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBus {
        mem: Vec<u8>,
        out: Vec<(u8, u8)>,
        ef_levels: [bool; 4],
    }

    impl TestBus {
        fn with_program(code: &[u8]) -> Self {
            let mut mem = vec![0; 0x10000];
            mem[..code.len()].copy_from_slice(code);
            TestBus { mem, out: Vec::new(), ef_levels: [true; 4] }
        }
    }

    impl Cdp1802Bus for TestBus {
        fn read_byte(&mut self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }
        fn write_byte(&mut self, addr: u16, val: u8) {
            self.mem[addr as usize] = val;
        }
        fn read_debug_byte(&self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }
        fn output(&mut self, n: u8, val: u8) {
            self.out.push((n, val));
        }
        fn ef(&self, n: u8) -> bool {
            self.ef_levels[n as usize]
        }
    }

    fn cpu_with(code: &[u8]) -> Cdp1802<TestBus> {
        Cdp1802::new(TestBus::with_program(code), 1_760_900)
    }

    #[test]
    fn test_base_cycle_charge() {
        let mut cpu = cpu_with(&[0xC4, 0xF8, 0x42]);
        // NOP is three machine cycles (24 clocks).
        assert_eq!(cpu.execute_instruction(), 24);
        // LDI is two machine cycles (16 clocks).
        assert_eq!(cpu.execute_instruction(), 16);
        assert_eq!(cpu.d_register(), 0x42);
        assert_eq!(cpu.cycles(), 40);
    }

    #[test]
    fn test_long_branch_cycles_and_target() {
        let mut cpu = cpu_with(&[0xC0, 0x12, 0x34]);
        assert_eq!(cpu.execute_instruction(), 24);
        assert_eq!(cpu.program_counter(), 0x1234);
    }

    #[test]
    fn test_short_branch_stays_in_page() {
        let mut code = vec![0u8; 0x200];
        code[0x100] = 0x30; // BR 0x42
        code[0x101] = 0x42;
        let mut cpu = cpu_with(&code);
        cpu.set_r(0, 0x100);
        cpu.execute_instruction();
        assert_eq!(cpu.program_counter(), 0x142);
    }

    #[test]
    fn test_sep_sex() {
        let mut cpu = cpu_with(&[0xD3, 0x00]);
        cpu.set_r(3, 0x123);
        cpu.execute_instruction();
        assert_eq!(cpu.p_register(), 3);
        assert_eq!(cpu.program_counter(), 0x123);
    }

    #[test]
    fn test_add_sets_df() {
        // SEX R4; LDI 0xFF; ADD with M(R4)=2 -> D=1, DF=1.
        let mut cpu = cpu_with(&[0xE4, 0xF8, 0xFF, 0xF4]);
        cpu.set_r(4, 0x20);
        cpu.bus_mut().mem[0x20] = 2;
        for _ in 0..3 {
            cpu.execute_instruction();
        }
        assert_eq!(cpu.d_register(), 1);
        assert_eq!(cpu.register(17).value, 1);
    }

    #[test]
    fn test_sd_borrow_semantics() {
        // SDI #5 with D=3 -> 5 - 3 = 2, DF=1 (no borrow).
        let mut cpu = cpu_with(&[0xF8, 0x03, 0xFD, 0x05]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.d_register(), 2);
        assert_eq!(cpu.register(17).value, 1);
    }

    #[test]
    fn test_out_advances_rx() {
        let mut cpu = cpu_with(&[0xE5, 0x62]);
        cpu.set_r(5, 0x40);
        cpu.bus_mut().mem[0x40] = 0xAB;
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.bus().out, vec![(2, 0xAB)]);
        assert_eq!(cpu.r(5), 0x41);
    }

    #[test]
    fn test_idl_waits_until_interrupt() {
        let mut cpu = cpu_with(&[0x00, 0x00]);
        cpu.execute_instruction();
        assert_eq!(cpu.cpu_state(), CpuState::Wait);
        cpu.execute_instruction();
        assert_eq!(cpu.cpu_state(), CpuState::Wait);
        cpu.interrupt();
        cpu.execute_instruction();
        assert_eq!(cpu.cpu_state(), CpuState::Normal);
        assert_eq!(cpu.p_register(), 1);
        assert_eq!(cpu.x_register(), 2);
        assert!(!cpu.ie());
    }

    #[test]
    fn test_interrupt_saves_xp_in_t() {
        let mut cpu = cpu_with(&[0xE7, 0xD3, 0x00]);
        cpu.set_r(3, 0x200);
        cpu.execute_instruction(); // SEX R7
        cpu.execute_instruction(); // SEP R3
        cpu.interrupt();
        cpu.execute_instruction();
        assert_eq!(cpu.register(20).value, 0x73);
    }

    #[test]
    fn test_dma_out_uses_r0() {
        let mut cpu = cpu_with(&[0x00]);
        cpu.set_r(0, 0x80);
        cpu.bus_mut().mem[0x80] = 0x5A;
        assert_eq!(cpu.dma_out(), 0x5A);
        assert_eq!(cpu.r(0), 0x81);
    }

    #[test]
    fn test_shrc_rotates_through_df() {
        // LDI 0x01; SHRC; SHRC
        let mut cpu = cpu_with(&[0xF8, 0x01, 0x76, 0x76]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.d_register(), 0);
        assert_eq!(cpu.register(17).value, 1);
        cpu.execute_instruction();
        assert_eq!(cpu.d_register(), 0x80);
        assert_eq!(cpu.register(17).value, 0);
    }

    #[test]
    fn test_disassembly() {
        assert_eq!(Cdp1802::<TestBus>::disassemble_instruction(&[0xC0, 0x12, 0x34]).1, "LBR 0x1234");
        assert_eq!(Cdp1802::<TestBus>::disassemble_instruction(&[0x45]).1, "LDA R5");
        assert_eq!(Cdp1802::<TestBus>::disassemble_instruction(&[0x34, 0x10]).1, "B1 0x10");
    }
}
