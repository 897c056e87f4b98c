//! Cycle-accurate Motorola 6800 core.
//!
//! The dispatch is a 256-entry table of `{mnemonic, addressing mode, base
//! cycles}` driving a single mnemonic match; cycle charges come from the
//! documented per-addressing-mode counts in the table. VMA=0 accesses are
//! forwarded to the bus as [M6800Bus::dummy_read] so external hardware can
//! emulate the matching time difference where needed.

use crate::clock::{Cycles, Time};
use crate::cpu::{
    BreakpointMap, CpuState, Endianness, ExecMode, GenericCpu, RegisterValue, StackContent,
    StackDirection,
};

/// Bus interface of the M6800: every access the CPU makes goes through here.
pub trait M6800Bus {
    fn read_byte(&mut self, addr: u16) -> u8;
    fn write_byte(&mut self, addr: u16, val: u8);
    /// A VMA=0 cycle: the address is on the bus but no transfer happens.
    fn dummy_read(&mut self, _addr: u16) {}
    /// Side-effect-free read for the debugger and disassembler.
    fn read_debug_byte(&self, addr: u16) -> u8;
}

/// Condition code flag bits.
pub mod cc {
    pub const C: u8 = 1;
    pub const V: u8 = 2;
    pub const Z: u8 = 4;
    pub const N: u8 = 8;
    pub const I: u8 = 16;
    pub const H: u8 = 32;
}

/// A full register snapshot, used by the step-back debugger and the hybrid
/// cores' reset sequences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct M6800State {
    pub a: u8,
    pub b: u8,
    pub ix: u16,
    pub pc: u16,
    pub sp: u16,
    pub cc: u8,
    pub cycles: Cycles,
    pub instructions: i64,
}

impl M6800State {
    pub fn flags_string(&self) -> String {
        let mut out = String::with_capacity(6);
        for (bit, ch) in [(cc::H, 'H'), (cc::I, 'I'), (cc::N, 'N'), (cc::Z, 'Z'), (cc::V, 'V'), (cc::C, 'C')] {
            out.push(if self.cc & bit != 0 { ch } else { '-' });
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrMode {
    Invalid,
    Inherent,
    Immediate,
    Immediate16,
    Direct,
    Extended,
    Relative,
    Indexed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Accu {
    None,
    A,
    B,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[rustfmt::skip]
pub enum Op {
    Ill, Hcf,
    Nop, Tap, Tpa, Inx, Dex, Clv, Sev, Clc, Sec, Cli, Sei,
    Sba, Cba, Nba, Tab, Tba, Daa, Aba,
    Bra, Bhi, Bls, Bcc, Bcs, Bne, Beq, Bvc, Bvs, Bpl, Bmi, Bge, Blt, Bgt, Ble,
    Tsx, Ins, Pul, Des, Txs, Psh,
    Rts, Rti, Wai, Swi,
    Neg, Com, Lsr, Ror, Asr, Asl, Rol, Dec, Inc, Tst, Jmp, Clr,
    Sub, Cmp, Sbc, And, Bit, Lda, Sta, Eor, Adc, Ora, Add,
    Cpx, Bsr, Lds, Sts, Jsr, Ldx, Stx,
}

/// One row of the dispatch table.
pub struct OpcodeInfo {
    pub bytes: u8,
    pub cycles: u8,
    pub mode: AddrMode,
    pub accu: Accu,
    pub undocumented: bool,
    pub op: Op,
    pub mnemonic: &'static str,
}

const fn oi(bytes: u8, cycles: u8, mode: AddrMode, accu: Accu, op: Op, mnemonic: &'static str) -> OpcodeInfo {
    OpcodeInfo { bytes, cycles, mode, accu, undocumented: false, op, mnemonic }
}

const fn ou(bytes: u8, cycles: u8, mode: AddrMode, accu: Accu, op: Op, mnemonic: &'static str) -> OpcodeInfo {
    OpcodeInfo { bytes, cycles, mode, accu, undocumented: true, op, mnemonic }
}

const fn ill() -> OpcodeInfo {
    oi(1, 1, AddrMode::Invalid, Accu::None, Op::Ill, "???")
}

use AddrMode::*;
use Accu::{A, B, None as NoAccu};

#[rustfmt::skip]
pub static OPCODES: [OpcodeInfo; 256] = [
    // 00-0F
    ill(), oi(1, 2, Inherent, NoAccu, Op::Nop, "NOP"), ill(), ill(),
    ill(), ill(), oi(1, 2, Inherent, NoAccu, Op::Tap, "TAP"), oi(1, 2, Inherent, NoAccu, Op::Tpa, "TPA"),
    oi(1, 4, Inherent, NoAccu, Op::Inx, "INX"), oi(1, 4, Inherent, NoAccu, Op::Dex, "DEX"),
    oi(1, 2, Inherent, NoAccu, Op::Clv, "CLV"), oi(1, 2, Inherent, NoAccu, Op::Sev, "SEV"),
    oi(1, 2, Inherent, NoAccu, Op::Clc, "CLC"), oi(1, 2, Inherent, NoAccu, Op::Sec, "SEC"),
    oi(1, 2, Inherent, NoAccu, Op::Cli, "CLI"), oi(1, 2, Inherent, NoAccu, Op::Sei, "SEI"),
    // 10-1F
    oi(1, 2, Inherent, NoAccu, Op::Sba, "SBA"), oi(1, 2, Inherent, NoAccu, Op::Cba, "CBA"), ill(), ill(),
    ou(1, 2, Inherent, NoAccu, Op::Nba, "NBA"), ill(), oi(1, 2, Inherent, NoAccu, Op::Tab, "TAB"), oi(1, 2, Inherent, NoAccu, Op::Tba, "TBA"),
    ill(), oi(1, 2, Inherent, NoAccu, Op::Daa, "DAA"), ill(), oi(1, 2, Inherent, NoAccu, Op::Aba, "ABA"),
    ill(), ill(), ill(), ill(),
    // 20-2F
    oi(2, 4, Relative, NoAccu, Op::Bra, "BRA"), ill(), oi(2, 4, Relative, NoAccu, Op::Bhi, "BHI"), oi(2, 4, Relative, NoAccu, Op::Bls, "BLS"),
    oi(2, 4, Relative, NoAccu, Op::Bcc, "BCC"), oi(2, 4, Relative, NoAccu, Op::Bcs, "BCS"), oi(2, 4, Relative, NoAccu, Op::Bne, "BNE"), oi(2, 4, Relative, NoAccu, Op::Beq, "BEQ"),
    oi(2, 4, Relative, NoAccu, Op::Bvc, "BVC"), oi(2, 4, Relative, NoAccu, Op::Bvs, "BVS"), oi(2, 4, Relative, NoAccu, Op::Bpl, "BPL"), oi(2, 4, Relative, NoAccu, Op::Bmi, "BMI"),
    oi(2, 4, Relative, NoAccu, Op::Bge, "BGE"), oi(2, 4, Relative, NoAccu, Op::Blt, "BLT"), oi(2, 4, Relative, NoAccu, Op::Bgt, "BGT"), oi(2, 4, Relative, NoAccu, Op::Ble, "BLE"),
    // 30-3F
    oi(1, 4, Inherent, NoAccu, Op::Tsx, "TSX"), oi(1, 4, Inherent, NoAccu, Op::Ins, "INS"),
    oi(1, 4, Inherent, A, Op::Pul, "PUL"), oi(1, 4, Inherent, B, Op::Pul, "PUL"),
    oi(1, 4, Inherent, NoAccu, Op::Des, "DES"), oi(1, 4, Inherent, NoAccu, Op::Txs, "TXS"),
    oi(1, 4, Inherent, A, Op::Psh, "PSH"), oi(1, 4, Inherent, B, Op::Psh, "PSH"),
    ill(), oi(1, 5, Inherent, NoAccu, Op::Rts, "RTS"), ill(), oi(1, 10, Inherent, NoAccu, Op::Rti, "RTI"),
    ill(), ill(), oi(1, 9, Inherent, NoAccu, Op::Wai, "WAI"), oi(1, 12, Inherent, NoAccu, Op::Swi, "SWI"),
    // 40-4F
    oi(1, 2, Inherent, A, Op::Neg, "NEG"), ill(), ill(), oi(1, 2, Inherent, A, Op::Com, "COM"),
    oi(1, 2, Inherent, A, Op::Lsr, "LSR"), ill(), oi(1, 2, Inherent, A, Op::Ror, "ROR"), oi(1, 2, Inherent, A, Op::Asr, "ASR"),
    oi(1, 2, Inherent, A, Op::Asl, "ASL"), oi(1, 2, Inherent, A, Op::Rol, "ROL"), oi(1, 2, Inherent, A, Op::Dec, "DEC"), ill(),
    oi(1, 2, Inherent, A, Op::Inc, "INC"), oi(1, 2, Inherent, A, Op::Tst, "TST"), ill(), oi(1, 2, Inherent, A, Op::Clr, "CLR"),
    // 50-5F
    oi(1, 2, Inherent, B, Op::Neg, "NEG"), ill(), ill(), oi(1, 2, Inherent, B, Op::Com, "COM"),
    oi(1, 2, Inherent, B, Op::Lsr, "LSR"), ill(), oi(1, 2, Inherent, B, Op::Ror, "ROR"), oi(1, 2, Inherent, B, Op::Asr, "ASR"),
    oi(1, 2, Inherent, B, Op::Asl, "ASL"), oi(1, 2, Inherent, B, Op::Rol, "ROL"), oi(1, 2, Inherent, B, Op::Dec, "DEC"), ill(),
    oi(1, 2, Inherent, B, Op::Inc, "INC"), oi(1, 2, Inherent, B, Op::Tst, "TST"), ill(), oi(1, 2, Inherent, B, Op::Clr, "CLR"),
    // 60-6F
    oi(2, 7, Indexed, NoAccu, Op::Neg, "NEG"), ill(), ill(), oi(2, 7, Indexed, NoAccu, Op::Com, "COM"),
    oi(2, 7, Indexed, NoAccu, Op::Lsr, "LSR"), ill(), oi(2, 7, Indexed, NoAccu, Op::Ror, "ROR"), oi(2, 7, Indexed, NoAccu, Op::Asr, "ASR"),
    oi(2, 7, Indexed, NoAccu, Op::Asl, "ASL"), oi(2, 7, Indexed, NoAccu, Op::Rol, "ROL"), oi(2, 7, Indexed, NoAccu, Op::Dec, "DEC"), ill(),
    oi(2, 7, Indexed, NoAccu, Op::Inc, "INC"), oi(2, 7, Indexed, NoAccu, Op::Tst, "TST"), oi(2, 4, Indexed, NoAccu, Op::Jmp, "JMP"), oi(2, 7, Indexed, NoAccu, Op::Clr, "CLR"),
    // 70-7F
    oi(3, 6, Extended, NoAccu, Op::Neg, "NEG"), ill(), ill(), oi(3, 6, Extended, NoAccu, Op::Com, "COM"),
    oi(3, 6, Extended, NoAccu, Op::Lsr, "LSR"), ill(), oi(3, 6, Extended, NoAccu, Op::Ror, "ROR"), oi(3, 6, Extended, NoAccu, Op::Asr, "ASR"),
    oi(3, 6, Extended, NoAccu, Op::Asl, "ASL"), oi(3, 6, Extended, NoAccu, Op::Rol, "ROL"), oi(3, 6, Extended, NoAccu, Op::Dec, "DEC"), ill(),
    oi(3, 6, Extended, NoAccu, Op::Inc, "INC"), oi(3, 6, Extended, NoAccu, Op::Tst, "TST"), oi(3, 3, Extended, NoAccu, Op::Jmp, "JMP"), oi(3, 6, Extended, NoAccu, Op::Clr, "CLR"),
    // 80-8F
    oi(2, 2, Immediate, A, Op::Sub, "SUB"), oi(2, 2, Immediate, A, Op::Cmp, "CMP"), oi(2, 2, Immediate, A, Op::Sbc, "SBC"), ill(),
    oi(2, 2, Immediate, A, Op::And, "AND"), oi(2, 2, Immediate, A, Op::Bit, "BIT"), oi(2, 2, Immediate, A, Op::Lda, "LDA"), ou(2, 2, Immediate, A, Op::Sta, "STA"),
    oi(2, 2, Immediate, A, Op::Eor, "EOR"), oi(2, 2, Immediate, A, Op::Adc, "ADC"), oi(2, 2, Immediate, A, Op::Ora, "ORA"), oi(2, 2, Immediate, A, Op::Add, "ADD"),
    oi(3, 3, Immediate16, NoAccu, Op::Cpx, "CPX"), oi(2, 8, Relative, NoAccu, Op::Bsr, "BSR"), oi(3, 3, Immediate16, NoAccu, Op::Lds, "LDS"), ou(3, 4, Immediate16, NoAccu, Op::Sts, "STS"),
    // 90-9F
    oi(2, 3, Direct, A, Op::Sub, "SUB"), oi(2, 3, Direct, A, Op::Cmp, "CMP"), oi(2, 3, Direct, A, Op::Sbc, "SBC"), ill(),
    oi(2, 3, Direct, A, Op::And, "AND"), oi(2, 3, Direct, A, Op::Bit, "BIT"), oi(2, 3, Direct, A, Op::Lda, "LDA"), oi(2, 4, Direct, A, Op::Sta, "STA"),
    oi(2, 3, Direct, A, Op::Eor, "EOR"), oi(2, 3, Direct, A, Op::Adc, "ADC"), oi(2, 3, Direct, A, Op::Ora, "ORA"), oi(2, 3, Direct, A, Op::Add, "ADD"),
    oi(2, 4, Direct, NoAccu, Op::Cpx, "CPX"), ou(1, 1, Inherent, NoAccu, Op::Hcf, "HCF"), oi(2, 4, Direct, NoAccu, Op::Lds, "LDS"), oi(2, 5, Direct, NoAccu, Op::Sts, "STS"),
    // A0-AF
    oi(2, 5, Indexed, A, Op::Sub, "SUB"), oi(2, 5, Indexed, A, Op::Cmp, "CMP"), oi(2, 5, Indexed, A, Op::Sbc, "SBC"), ill(),
    oi(2, 5, Indexed, A, Op::And, "AND"), oi(2, 5, Indexed, A, Op::Bit, "BIT"), oi(2, 5, Indexed, A, Op::Lda, "LDA"), oi(2, 6, Indexed, A, Op::Sta, "STA"),
    oi(2, 5, Indexed, A, Op::Eor, "EOR"), oi(2, 5, Indexed, A, Op::Adc, "ADC"), oi(2, 5, Indexed, A, Op::Ora, "ORA"), oi(2, 5, Indexed, A, Op::Add, "ADD"),
    oi(2, 6, Indexed, NoAccu, Op::Cpx, "CPX"), oi(2, 8, Indexed, NoAccu, Op::Jsr, "JSR"), oi(2, 6, Indexed, NoAccu, Op::Lds, "LDS"), oi(2, 7, Indexed, NoAccu, Op::Sts, "STS"),
    // B0-BF
    oi(3, 4, Extended, A, Op::Sub, "SUB"), oi(3, 4, Extended, A, Op::Cmp, "CMP"), oi(3, 4, Extended, A, Op::Sbc, "SBC"), ill(),
    oi(3, 4, Extended, A, Op::And, "AND"), oi(3, 4, Extended, A, Op::Bit, "BIT"), oi(3, 4, Extended, A, Op::Lda, "LDA"), oi(3, 5, Extended, A, Op::Sta, "STA"),
    oi(3, 4, Extended, A, Op::Eor, "EOR"), oi(3, 4, Extended, A, Op::Adc, "ADC"), oi(3, 4, Extended, A, Op::Ora, "ORA"), oi(3, 4, Extended, A, Op::Add, "ADD"),
    oi(3, 5, Extended, NoAccu, Op::Cpx, "CPX"), oi(3, 9, Extended, NoAccu, Op::Jsr, "JSR"), oi(3, 5, Extended, NoAccu, Op::Lds, "LDS"), oi(3, 6, Extended, NoAccu, Op::Sts, "STS"),
    // C0-CF
    oi(2, 2, Immediate, B, Op::Sub, "SUB"), oi(2, 2, Immediate, B, Op::Cmp, "CMP"), oi(2, 2, Immediate, B, Op::Sbc, "SBC"), ill(),
    oi(2, 2, Immediate, B, Op::And, "AND"), oi(2, 2, Immediate, B, Op::Bit, "BIT"), oi(2, 2, Immediate, B, Op::Lda, "LDA"), ou(2, 2, Immediate, B, Op::Sta, "STA"),
    oi(2, 2, Immediate, B, Op::Eor, "EOR"), oi(2, 2, Immediate, B, Op::Adc, "ADC"), oi(2, 2, Immediate, B, Op::Ora, "ORA"), oi(2, 2, Immediate, B, Op::Add, "ADD"),
    ill(), ill(), oi(3, 3, Immediate16, NoAccu, Op::Ldx, "LDX"), ou(3, 4, Immediate16, NoAccu, Op::Stx, "STX"),
    // D0-DF
    oi(2, 3, Direct, B, Op::Sub, "SUB"), oi(2, 3, Direct, B, Op::Cmp, "CMP"), oi(2, 3, Direct, B, Op::Sbc, "SBC"), ill(),
    oi(2, 3, Direct, B, Op::And, "AND"), oi(2, 3, Direct, B, Op::Bit, "BIT"), oi(2, 3, Direct, B, Op::Lda, "LDA"), oi(2, 4, Direct, B, Op::Sta, "STA"),
    oi(2, 3, Direct, B, Op::Eor, "EOR"), oi(2, 3, Direct, B, Op::Adc, "ADC"), oi(2, 3, Direct, B, Op::Ora, "ORA"), oi(2, 3, Direct, B, Op::Add, "ADD"),
    ill(), ou(1, 1, Inherent, NoAccu, Op::Hcf, "HCF"), oi(2, 4, Direct, NoAccu, Op::Ldx, "LDX"), oi(2, 5, Direct, NoAccu, Op::Stx, "STX"),
    // E0-EF
    oi(2, 5, Indexed, B, Op::Sub, "SUB"), oi(2, 5, Indexed, B, Op::Cmp, "CMP"), oi(2, 5, Indexed, B, Op::Sbc, "SBC"), ill(),
    oi(2, 5, Indexed, B, Op::And, "AND"), oi(2, 5, Indexed, B, Op::Bit, "BIT"), oi(2, 5, Indexed, B, Op::Lda, "LDA"), oi(2, 6, Indexed, B, Op::Sta, "STA"),
    oi(2, 5, Indexed, B, Op::Eor, "EOR"), oi(2, 5, Indexed, B, Op::Adc, "ADC"), oi(2, 5, Indexed, B, Op::Ora, "ORA"), oi(2, 5, Indexed, B, Op::Add, "ADD"),
    ill(), ill(), oi(2, 6, Indexed, NoAccu, Op::Ldx, "LDX"), oi(2, 7, Indexed, NoAccu, Op::Stx, "STX"),
    // F0-FF
    oi(3, 4, Extended, B, Op::Sub, "SUB"), oi(3, 4, Extended, B, Op::Cmp, "CMP"), oi(3, 4, Extended, B, Op::Sbc, "SBC"), ill(),
    oi(3, 4, Extended, B, Op::And, "AND"), oi(3, 4, Extended, B, Op::Bit, "BIT"), oi(3, 4, Extended, B, Op::Lda, "LDA"), oi(3, 5, Extended, B, Op::Sta, "STA"),
    oi(3, 4, Extended, B, Op::Eor, "EOR"), oi(3, 4, Extended, B, Op::Adc, "ADC"), oi(3, 4, Extended, B, Op::Ora, "ORA"), oi(3, 4, Extended, B, Op::Add, "ADD"),
    ill(), ill(), oi(3, 5, Extended, NoAccu, Op::Ldx, "LDX"), oi(3, 6, Extended, NoAccu, Op::Stx, "STX"),
];

const IRQ_VECTOR: u16 = 0xFFF8;
const SWI_VECTOR: u16 = 0xFFFA;
const NMI_VECTOR: u16 = 0xFFFC;
const RESET_VECTOR: u16 = 0xFFFE;
const INTERRUPT_CYCLES: u8 = 12;

/// The M6800 execution unit. Owns its bus (the composing system board).
pub struct M6800<B: M6800Bus> {
    bus: B,
    a: u8,
    b: u8,
    ix: u16,
    pc: u16,
    sp: u16,
    cc: u8,
    cycles: Cycles,
    instructions: i64,
    cpu_state: CpuState,
    exec_mode: ExecMode,
    irq_pending: bool,
    nmi_pending: bool,
    halt_pin: bool,
    step_over_sp: u16,
    breakpoints: BreakpointMap,
    breakpoint_triggered: bool,
    system_time: Time,
}

impl<B: M6800Bus> M6800<B> {
    pub fn new(bus: B, clock_rate: u64) -> Self {
        let mut cpu = M6800 {
            bus,
            a: 0,
            b: 0,
            ix: 0,
            pc: 0,
            sp: 0,
            cc: 0xC0 | cc::I,
            cycles: 0,
            instructions: 0,
            cpu_state: CpuState::Normal,
            exec_mode: ExecMode::Running,
            irq_pending: false,
            nmi_pending: false,
            halt_pin: false,
            step_over_sp: 0,
            breakpoints: BreakpointMap::new(),
            breakpoint_triggered: false,
            system_time: Time::zero(clock_rate),
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

    /// Resets registers and fetches the reset vector; breakpoints survive.
    pub fn reset(&mut self) {
        self.a = 0;
        self.b = 0;
        self.ix = 0;
        self.sp = 0;
        self.cc = 0xC0 | cc::I;
        let hi = self.bus.read_byte(RESET_VECTOR);
        let lo = self.bus.read_byte(RESET_VECTOR.wrapping_add(1));
        self.pc = ((hi as u16) << 8) | lo as u16;
        self.cycles = 0;
        self.instructions = 0;
        self.cpu_state = CpuState::Normal;
        self.system_time.reset();
    }

    pub fn irq(&mut self) {
        self.irq_pending = true;
    }

    pub fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    /// Drives the HALT pin; a high level maps to [CpuState::Halt].
    pub fn halt(&mut self, state: bool) {
        self.halt_pin = state;
        if self.cpu_state != CpuState::Error {
            self.cpu_state = if state { CpuState::Halt } else { CpuState::Normal };
        }
    }

    pub fn add_cycles(&mut self, cycles: Cycles) {
        self.cycles += cycles;
        self.system_time.add_cycles(cycles);
    }

    pub fn instructions(&self) -> i64 {
        self.instructions
    }

    pub fn get_state(&self, state: &mut M6800State) {
        state.a = self.a;
        state.b = self.b;
        state.ix = self.ix;
        state.pc = self.pc;
        state.sp = self.sp;
        state.cc = self.cc;
        state.cycles = self.cycles;
        state.instructions = self.instructions;
    }

    pub fn set_state(&mut self, state: &M6800State) {
        self.a = state.a;
        self.b = state.b;
        self.ix = state.ix;
        self.pc = state.pc;
        self.sp = state.sp;
        self.cc = 0xC0 | (state.cc & 0x3F);
        self.cycles = state.cycles;
        self.instructions = state.instructions;
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    #[inline]
    fn flag(&self, bit: u8) -> bool {
        self.cc & bit != 0
    }

    #[inline]
    fn set_flag(&mut self, bit: u8, value: bool) {
        if value {
            self.cc |= bit;
        } else {
            self.cc &= !bit;
        }
    }

    fn cc_set_nz(&mut self, val: u8) {
        self.set_flag(cc::N, val & 0x80 != 0);
        self.set_flag(cc::Z, val == 0);
    }

    fn cc_set_nz16(&mut self, val: u16) {
        self.set_flag(cc::N, val & 0x8000 != 0);
        self.set_flag(cc::Z, val == 0);
    }

    fn cc_set_nzv(&mut self, val: u8) {
        self.set_flag(cc::V, false);
        self.cc_set_nz(val);
    }

    fn cc_set_nzv16(&mut self, val: u16) {
        self.set_flag(cc::V, false);
        self.cc_set_nz16(val);
    }

    /// Sets C, N, Z and V from an 8-bit add/sub result widened to 16 bits.
    fn cc_set_cnzv(&mut self, v1: u8, v2: u8, res: u16) {
        let r8 = res as u8;
        self.set_flag(cc::C, res & 0x100 != 0);
        self.cc_set_nz(r8);
        self.set_flag(cc::V, (v1 as u16 ^ v2 as u16 ^ res ^ (res >> 1)) & 0x80 != 0);
    }

    fn cc_set_h(&mut self, v1: u8, v2: u8, res: u16) {
        self.set_flag(cc::H, ((res as u8 ^ v1 ^ v2) & 0x10) != 0);
    }

    fn accu(&self, info: &OpcodeInfo) -> u8 {
        match info.accu {
            Accu::B => self.b,
            _ => self.a,
        }
    }

    fn set_accu(&mut self, info: &OpcodeInfo, val: u8) {
        match info.accu {
            Accu::B => self.b = val,
            _ => self.a = val,
        }
    }

    fn read_byte(&mut self, addr: u16) -> u8 {
        self.bus.read_byte(addr)
    }

    fn read_word(&mut self, addr: u16) -> u16 {
        let hi = self.read_byte(addr);
        let lo = self.read_byte(addr.wrapping_add(1));
        ((hi as u16) << 8) | lo as u16
    }

    fn write_byte(&mut self, addr: u16, val: u8) {
        self.bus.write_byte(addr, val);
    }

    fn write_word(&mut self, addr: u16, val: u16) {
        self.write_byte(addr, (val >> 8) as u8);
        self.write_byte(addr.wrapping_add(1), val as u8);
    }

    fn push_byte(&mut self, val: u8) {
        self.write_byte(self.sp, val);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull_byte(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.read_byte(self.sp)
    }

    fn push_word(&mut self, val: u16) {
        self.push_byte(val as u8);
        self.push_byte((val >> 8) as u8);
    }

    fn pull_word(&mut self) -> u16 {
        let hi = self.pull_byte();
        let lo = self.pull_byte();
        ((hi as u16) << 8) | lo as u16
    }

    /// Computes the effective address for the given mode, consuming operand
    /// bytes from the instruction stream.
    fn effective_address(&mut self, mode: AddrMode) -> u16 {
        match mode {
            AddrMode::Immediate => {
                let ea = self.pc;
                self.pc = self.pc.wrapping_add(1);
                ea
            }
            AddrMode::Immediate16 => {
                let ea = self.pc;
                self.pc = self.pc.wrapping_add(2);
                ea
            }
            AddrMode::Direct => {
                let ea = self.read_byte(self.pc) as u16;
                self.pc = self.pc.wrapping_add(1);
                ea
            }
            AddrMode::Extended => {
                let hi = self.read_byte(self.pc);
                let lo = self.read_byte(self.pc.wrapping_add(1));
                self.pc = self.pc.wrapping_add(2);
                ((hi as u16) << 8) | lo as u16
            }
            AddrMode::Relative => {
                let off = self.read_byte(self.pc) as i8;
                self.pc = self.pc.wrapping_add(1);
                self.pc.wrapping_add(off as u16)
            }
            AddrMode::Indexed => {
                let off = self.read_byte(self.pc) as u16;
                self.pc = self.pc.wrapping_add(1);
                self.bus.dummy_read(self.ix);
                self.ix.wrapping_add(off)
            }
            _ => 0,
        }
    }

    fn handle_interrupt(&mut self, vector: u16) {
        if self.cpu_state == CpuState::Wait {
            self.cpu_state = CpuState::Normal;
        }
        self.push_word(self.pc);
        self.push_word(self.ix);
        self.push_byte(self.a);
        self.push_byte(self.b);
        self.push_byte(self.cc);
        self.cc |= cc::I;
        self.bus.dummy_read(self.sp);
        self.pc = self.read_word(vector);
        self.add_cycles(INTERRUPT_CYCLES as Cycles);
    }

    /// Executes one instruction (or one stalled cycle while halted/waiting) and
    /// returns the number of cycles charged.
    pub fn execute_instruction(&mut self) -> Cycles {
        if self.exec_mode == ExecMode::Paused || self.cpu_state == CpuState::Error {
            return 0;
        }
        if self.halt_pin {
            self.add_cycles(1);
            return 1;
        }
        let start_cycles = self.cycles;
        if self.nmi_pending {
            self.nmi_pending = false;
            self.handle_interrupt(NMI_VECTOR);
        } else if self.irq_pending && !self.flag(cc::I) {
            self.irq_pending = false;
            self.handle_interrupt(IRQ_VECTOR);
        }
        if self.cpu_state == CpuState::Wait {
            self.add_cycles(1);
        } else if self.cpu_state == CpuState::Normal {
            let opcode = self.read_byte(self.pc);
            self.pc = self.pc.wrapping_add(1);
            let info = &OPCODES[opcode as usize];
            self.dispatch(info);
            self.add_cycles(info.cycles.max(1) as Cycles);
            self.instructions += 1;
        } else {
            self.add_cycles(1);
        }
        if self.exec_mode == ExecMode::Step
            || (self.exec_mode == ExecMode::StepOver && self.sp >= self.step_over_sp)
            || (self.exec_mode == ExecMode::StepOut && self.sp > self.step_over_sp)
        {
            self.exec_mode = ExecMode::Paused;
        }
        if self.breakpoints.trigger(self.pc as u32) {
            self.exec_mode = ExecMode::Paused;
            self.breakpoint_triggered = true;
        }
        self.cycles - start_cycles
    }

    /// Executes a single instruction, returning the trace line describing it.
    pub fn execute_instruction_traced(&mut self) -> String {
        let mut before = M6800State::default();
        self.get_state(&mut before);
        let (_, dis) = self.disassemble_with_bytes(-1);
        self.execute_instruction();
        format!(
            "[{:08}/{:07}] {:<28} A:{:02X} B:{:02X} X:{:04X} SP:{:04X} {}",
            before.cycles,
            before.instructions,
            dis,
            self.a,
            self.b,
            self.ix,
            self.sp,
            {
                let mut after = M6800State::default();
                self.get_state(&mut after);
                after.flags_string()
            }
        )
    }

    /// Runs until at least `microseconds` of emulated time have passed, returning
    /// the overshoot in microseconds.
    pub fn execute_for(&mut self, microseconds: i64) -> i64 {
        if self.exec_mode == ExecMode::Paused {
            return 0;
        }
        let end = self.system_time.advanced_by_microseconds(microseconds as f64);
        while self.exec_mode != ExecMode::Paused && self.system_time < end {
            self.execute_instruction();
            if self.cpu_state == CpuState::Error {
                break;
            }
        }
        end.difference_us(&self.system_time)
    }

    fn dispatch(&mut self, info: &OpcodeInfo) {
        let mode = info.mode;
        match info.op {
            Op::Ill | Op::Hcf => {
                // HCF and the unassigned slots trap and halt; no timing contract.
                self.cpu_state = CpuState::Halt;
                self.exec_mode = ExecMode::Paused;
            }
            Op::Nop => {}
            Op::Tap => self.cc = 0xC0 | (self.a & 0x3F),
            Op::Tpa => self.a = self.cc | 0xC0,
            Op::Inx => {
                self.ix = self.ix.wrapping_add(1);
                let z = self.ix == 0;
                self.set_flag(cc::Z, z);
            }
            Op::Dex => {
                self.ix = self.ix.wrapping_sub(1);
                let z = self.ix == 0;
                self.set_flag(cc::Z, z);
            }
            Op::Clv => self.set_flag(cc::V, false),
            Op::Sev => self.set_flag(cc::V, true),
            Op::Clc => self.set_flag(cc::C, false),
            Op::Sec => self.set_flag(cc::C, true),
            Op::Cli => self.set_flag(cc::I, false),
            Op::Sei => self.set_flag(cc::I, true),
            Op::Sba => {
                let res = (self.a as u16).wrapping_sub(self.b as u16);
                self.cc_set_cnzv(self.a, self.b, res);
                self.a = res as u8;
            }
            Op::Cba => {
                let res = (self.a as u16).wrapping_sub(self.b as u16);
                self.cc_set_cnzv(self.a, self.b, res);
            }
            Op::Nba => {
                self.a &= self.b;
                let val = self.a;
                self.cc_set_nzv(val);
            }
            Op::Tab => {
                self.b = self.a;
                let val = self.b;
                self.cc_set_nzv(val);
            }
            Op::Tba => {
                self.a = self.b;
                let val = self.a;
                self.cc_set_nzv(val);
            }
            Op::Daa => {
                let lsn = self.a & 0x0F;
                let msn = self.a >> 4;
                let mut correction = 0u8;
                if self.flag(cc::H) || lsn > 9 {
                    correction |= 0x06;
                }
                if self.flag(cc::C) || msn > 9 || (msn > 8 && lsn > 9) {
                    correction |= 0x60;
                }
                let res = self.a as u16 + correction as u16;
                if correction & 0x60 != 0 {
                    self.set_flag(cc::C, true);
                }
                self.a = res as u8;
                let val = self.a;
                self.cc_set_nz(val);
            }
            Op::Aba => {
                let sum = self.a as u16 + self.b as u16;
                self.cc_set_h(self.a, self.b, sum);
                self.cc_set_cnzv(self.a, self.b, sum);
                self.a = sum as u8;
            }
            Op::Bra | Op::Bhi | Op::Bls | Op::Bcc | Op::Bcs | Op::Bne | Op::Beq | Op::Bvc
            | Op::Bvs | Op::Bpl | Op::Bmi | Op::Bge | Op::Blt | Op::Bgt | Op::Ble => {
                let target = self.effective_address(AddrMode::Relative);
                let (n, z, v, c) =
                    (self.flag(cc::N), self.flag(cc::Z), self.flag(cc::V), self.flag(cc::C));
                let taken = match info.op {
                    Op::Bra => true,
                    Op::Bhi => !(c | z),
                    Op::Bls => c | z,
                    Op::Bcc => !c,
                    Op::Bcs => c,
                    Op::Bne => !z,
                    Op::Beq => z,
                    Op::Bvc => !v,
                    Op::Bvs => v,
                    Op::Bpl => !n,
                    Op::Bmi => n,
                    Op::Bge => !(n ^ v),
                    Op::Blt => n ^ v,
                    Op::Bgt => !(z | (n ^ v)),
                    _ => z | (n ^ v),
                };
                if taken {
                    self.pc = target;
                }
            }
            Op::Tsx => self.ix = self.sp.wrapping_add(1),
            Op::Ins => self.sp = self.sp.wrapping_add(1),
            Op::Pul => {
                let val = self.pull_byte();
                self.set_accu(info, val);
            }
            Op::Des => self.sp = self.sp.wrapping_sub(1),
            Op::Txs => self.sp = self.ix.wrapping_sub(1),
            Op::Psh => {
                let val = self.accu(info);
                self.push_byte(val);
            }
            Op::Rts => self.pc = self.pull_word(),
            Op::Rti => {
                self.cc = 0xC0 | (self.pull_byte() & 0x3F);
                self.b = self.pull_byte();
                self.a = self.pull_byte();
                self.ix = self.pull_word();
                self.pc = self.pull_word();
            }
            Op::Wai => {
                self.push_word(self.pc);
                self.push_word(self.ix);
                self.push_byte(self.a);
                self.push_byte(self.b);
                self.cpu_state = CpuState::Wait;
            }
            Op::Swi => {
                self.push_word(self.pc);
                self.push_word(self.ix);
                self.push_byte(self.a);
                self.push_byte(self.b);
                self.push_byte(self.cc);
                self.cc |= cc::I;
                self.pc = self.read_word(SWI_VECTOR);
            }
            Op::Neg | Op::Com | Op::Lsr | Op::Ror | Op::Asr | Op::Asl | Op::Rol | Op::Dec
            | Op::Inc | Op::Tst | Op::Clr => {
                if mode == AddrMode::Inherent {
                    let val = self.accu(info);
                    let res = self.read_modify_write(info.op, val);
                    if info.op != Op::Tst {
                        self.set_accu(info, res);
                    }
                } else {
                    let ea = self.effective_address(mode);
                    let val = self.read_byte(ea);
                    self.bus.dummy_read(ea);
                    let res = self.read_modify_write(info.op, val);
                    self.write_byte(ea, if info.op == Op::Tst { val } else { res });
                }
            }
            Op::Jmp => {
                let ea = self.effective_address(mode);
                self.pc = ea;
            }
            Op::Sub | Op::Cmp => {
                let ea = self.effective_address(mode);
                let accu = self.accu(info);
                let val = self.read_byte(ea);
                let res = (accu as u16).wrapping_sub(val as u16);
                self.cc_set_cnzv(accu, val, res);
                if info.op == Op::Sub {
                    self.set_accu(info, res as u8);
                }
            }
            Op::Sbc => {
                let ea = self.effective_address(mode);
                let accu = self.accu(info);
                let val = self.read_byte(ea);
                let carry = self.flag(cc::C) as u16;
                let res = (accu as u16).wrapping_sub(val as u16).wrapping_sub(carry);
                self.cc_set_cnzv(accu, val, res);
                self.set_accu(info, res as u8);
            }
            Op::And | Op::Bit => {
                let ea = self.effective_address(mode);
                let res = self.accu(info) & self.read_byte(ea);
                self.cc_set_nzv(res);
                if info.op == Op::And {
                    self.set_accu(info, res);
                }
            }
            Op::Lda => {
                let ea = self.effective_address(mode);
                let val = self.read_byte(ea);
                self.cc_set_nzv(val);
                self.set_accu(info, val);
            }
            Op::Sta => {
                let val = self.accu(info);
                let ea = self.effective_address(mode);
                self.bus.dummy_read(ea);
                self.cc_set_nzv(val);
                self.write_byte(ea, val);
            }
            Op::Eor => {
                let ea = self.effective_address(mode);
                let res = self.accu(info) ^ self.read_byte(ea);
                self.cc_set_nzv(res);
                self.set_accu(info, res);
            }
            Op::Adc | Op::Add => {
                let ea = self.effective_address(mode);
                let accu = self.accu(info);
                let val = self.read_byte(ea);
                let carry = if info.op == Op::Adc && self.flag(cc::C) { 1 } else { 0 };
                let sum = accu as u16 + val as u16 + carry;
                self.cc_set_h(accu, val, sum);
                self.cc_set_cnzv(accu, val, sum);
                self.set_accu(info, sum as u8);
            }
            Op::Ora => {
                let ea = self.effective_address(mode);
                let res = self.accu(info) | self.read_byte(ea);
                self.cc_set_nzv(res);
                self.set_accu(info, res);
            }
            Op::Cpx => {
                let ea = self.effective_address(mode);
                let val = self.read_word(ea);
                let res = (self.ix as u32).wrapping_sub(val as u32);
                self.cc_set_nz16(res as u16);
                self.set_flag(
                    cc::V,
                    ((self.ix as u32 ^ val as u32 ^ res ^ (res >> 1)) & 0x8000) != 0,
                );
            }
            Op::Bsr => {
                let target = self.effective_address(AddrMode::Relative);
                self.push_word(self.pc);
                self.pc = target;
            }
            Op::Jsr => {
                let ea = self.effective_address(mode);
                self.push_word(self.pc);
                self.pc = ea;
            }
            Op::Lds => {
                let ea = self.effective_address(mode);
                self.sp = self.read_word(ea);
                let val = self.sp;
                self.cc_set_nzv16(val);
            }
            Op::Sts => {
                let val = self.sp;
                self.cc_set_nzv16(val);
                let ea = self.effective_address(mode);
                self.bus.dummy_read(ea);
                self.write_word(ea, val);
            }
            Op::Ldx => {
                let ea = self.effective_address(mode);
                self.ix = self.read_word(ea);
                let val = self.ix;
                self.cc_set_nzv16(val);
            }
            Op::Stx => {
                let val = self.ix;
                self.cc_set_nzv16(val);
                let ea = self.effective_address(mode);
                self.bus.dummy_read(ea);
                self.write_word(ea, val);
            }
        }
    }

    /// The shared core of the single-operand modify instructions.
    fn read_modify_write(&mut self, op: Op, val: u8) -> u8 {
        match op {
            Op::Neg => {
                let res = (0u16).wrapping_sub(val as u16);
                self.cc_set_cnzv(0, val, res);
                res as u8
            }
            Op::Com => {
                let res = !val;
                self.cc_set_nzv(res);
                self.set_flag(cc::C, true);
                res
            }
            Op::Lsr => {
                self.set_flag(cc::C, val & 1 != 0);
                let res = val >> 1;
                self.cc_set_nz(res);
                self.update_shift_overflow();
                res
            }
            Op::Ror => {
                let carry_in = if self.flag(cc::C) { 0x80 } else { 0 };
                self.set_flag(cc::C, val & 1 != 0);
                let res = (val >> 1) | carry_in;
                self.cc_set_nz(res);
                self.update_shift_overflow();
                res
            }
            Op::Asr => {
                self.set_flag(cc::C, val & 1 != 0);
                let res = (val >> 1) | (val & 0x80);
                self.cc_set_nz(res);
                self.update_shift_overflow();
                res
            }
            Op::Asl => {
                self.set_flag(cc::C, val & 0x80 != 0);
                let res = val << 1;
                self.cc_set_nz(res);
                self.update_shift_overflow();
                res
            }
            Op::Rol => {
                let carry_in = self.flag(cc::C) as u8;
                self.set_flag(cc::C, val & 0x80 != 0);
                let res = (val << 1) | carry_in;
                self.cc_set_nz(res);
                self.update_shift_overflow();
                res
            }
            Op::Dec => {
                let res = val.wrapping_sub(1);
                self.cc_set_nz(res);
                self.set_flag(cc::V, val == 0x80);
                res
            }
            Op::Inc => {
                let res = val.wrapping_add(1);
                self.cc_set_nz(res);
                self.set_flag(cc::V, val == 0x7F);
                res
            }
            Op::Tst => {
                self.cc_set_nz(val);
                self.set_flag(cc::C, false);
                self.set_flag(cc::V, false);
                val
            }
            Op::Clr => {
                self.set_flag(cc::C, false);
                self.set_flag(cc::V, false);
                self.set_flag(cc::N, false);
                self.set_flag(cc::Z, true);
                0
            }
            _ => val,
        }
    }

    /// After a shift/rotate, V = N xor C.
    fn update_shift_overflow(&mut self) {
        let v = self.flag(cc::N) ^ self.flag(cc::C);
        self.set_flag(cc::V, v);
    }

    /// Disassembles the instruction in `code`, returning its byte size and text.
    pub fn disassemble_instruction(code: &[u8], addr: u16) -> (usize, String) {
        let info = &OPCODES[code[0] as usize];
        let accu_sym = match info.accu {
            Accu::A => "A",
            Accu::B => "B",
            Accu::None => " ",
        };
        let byte1 = code.get(1).copied().unwrap_or(0);
        let byte2 = code.get(2).copied().unwrap_or(0);
        match info.mode {
            AddrMode::Inherent => (1, format!("{}{}", info.mnemonic, accu_sym)),
            AddrMode::Immediate => (2, format!("{}{} #${:02X}", info.mnemonic, accu_sym, byte1)),
            AddrMode::Immediate16 => (
                3,
                format!("{}{} #${:04X}", info.mnemonic, accu_sym, ((byte1 as u16) << 8) | byte2 as u16),
            ),
            AddrMode::Direct => (2, format!("{}{} ${:02X}", info.mnemonic, accu_sym, byte1)),
            AddrMode::Extended => (
                3,
                format!("{}{} ${:04X}", info.mnemonic, accu_sym, ((byte1 as u16) << 8) | byte2 as u16),
            ),
            AddrMode::Relative => (
                2,
                format!(
                    "{}  ${:04X}",
                    info.mnemonic,
                    addr.wrapping_add(2).wrapping_add(byte1 as i8 as u16)
                ),
            ),
            AddrMode::Indexed => (2, format!("{}{} ${:02X},X", info.mnemonic, accu_sym, byte1)),
            AddrMode::Invalid => (1, "???".to_string()),
        }
    }

    pub fn dump_register_state(&self) -> String {
        let mut state = M6800State::default();
        self.get_state(&mut state);
        format!(
            "A:{:02X} B:{:02X} X:{:04X} SP:{:04X} PC:{:04X} SR:{}",
            self.a,
            self.b,
            self.ix,
            self.sp,
            self.pc,
            state.flags_string()
        )
    }
}

impl<B: M6800Bus> GenericCpu for M6800<B> {
    fn cpu_id(&self) -> u32 {
        6800
    }

    fn name(&self) -> &'static str {
        "M6800"
    }

    fn register_names(&self) -> &'static [&'static str] {
        &["A", "B", "IX", "SP", "PC", "SR"]
    }

    fn register(&self, index: usize) -> RegisterValue {
        match index {
            0 => RegisterValue { value: self.a as u32, bits: 8 },
            1 => RegisterValue { value: self.b as u32, bits: 8 },
            2 => RegisterValue { value: self.ix as u32, bits: 16 },
            3 => RegisterValue { value: self.sp as u32, bits: 16 },
            4 => RegisterValue { value: self.pc as u32, bits: 16 },
            5 => RegisterValue { value: self.cc as u32, bits: 8 },
            _ => RegisterValue { value: 0, bits: 0 },
        }
    }

    fn set_register(&mut self, index: usize, value: u32) {
        match index {
            0 => self.a = value as u8,
            1 => self.b = value as u8,
            2 => self.ix = value as u16,
            3 => self.sp = value as u16,
            4 => self.pc = value as u16,
            5 => self.cc = 0xC0 | (value as u8 & 0x3F),
            _ => {}
        }
    }

    fn pc(&self) -> u32 {
        self.pc as u32
    }

    fn sp(&self) -> u32 {
        self.sp as u32
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
        let address = if addr < 0 { self.pc } else { addr as u16 };
        let code = [
            self.bus.read_debug_byte(address),
            self.bus.read_debug_byte(address.wrapping_add(1)),
            self.bus.read_debug_byte(address.wrapping_add(2)),
        ];
        let (size, text) = Self::disassemble_instruction(&code, address);
        let line = match size {
            2 => format!("{:04X}: {:02X} {:02X}     {}", address, code[0], code[1], text),
            3 => format!("{:04X}: {:02X} {:02X} {:02X}  {}", address, code[0], code[1], code[2], text),
            _ => format!("{:04X}: {:02X}        {}", address, code[0], text),
        };
        (size, line)
    }

    fn dump_state_line(&self) -> String {
        self.dump_register_state()
    }

    fn exec_mode(&self) -> ExecMode {
        self.exec_mode
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        if mode == ExecMode::StepOver || mode == ExecMode::StepOut {
            self.step_over_sp = self.sp;
        }
        self.exec_mode = mode;
    }

    fn cpu_state(&self) -> CpuState {
        self.cpu_state
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

    /// Flat 64KiB test memory.
    struct TestBus {
        mem: Vec<u8>,
    }

    impl TestBus {
        fn new() -> Self {
            TestBus { mem: vec![0; 0x10000] }
        }

        fn with_program(org: u16, code: &[u8]) -> Self {
            let mut bus = TestBus::new();
            bus.mem[org as usize..org as usize + code.len()].copy_from_slice(code);
            bus.mem[0xFFFE] = (org >> 8) as u8;
            bus.mem[0xFFFF] = org as u8;
            bus
        }
    }

    impl M6800Bus for TestBus {
        fn read_byte(&mut self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }
        fn write_byte(&mut self, addr: u16, val: u8) {
            self.mem[addr as usize] = val;
        }
        fn read_debug_byte(&self, addr: u16) -> u8 {
            self.mem[addr as usize]
        }
    }

    fn cpu_with(code: &[u8]) -> M6800<TestBus> {
        M6800::new(TestBus::with_program(0x0100, code), 1_000_000)
    }

    #[test]
    fn test_reset_vector() {
        let cpu = cpu_with(&[0x01]);
        assert_eq!(cpu.pc(), 0x0100);
        assert_eq!(cpu.cycles(), 0);
    }

    #[test]
    fn test_documented_cycle_counts() {
        // One opcode per addressing mode, checked against the datasheet counts.
        let cases: &[(&[u8], Cycles)] = &[
            (&[0x01], 2),             // NOP inherent
            (&[0x86, 0x12], 2),       // LDAA immediate
            (&[0x96, 0x10], 3),       // LDAA direct
            (&[0xB6, 0x12, 0x34], 4), // LDAA extended
            (&[0xA6, 0x05], 5),       // LDAA indexed
            (&[0x20, 0x02], 4),       // BRA relative
            (&[0x8C, 0x00, 0x00], 3), // CPX immediate16
            (&[0xBD, 0x02, 0x00], 9), // JSR extended
            (&[0x3B], 10),            // RTI
        ];
        for (code, expected) in cases {
            let mut cpu = cpu_with(code);
            let charged = cpu.execute_instruction();
            assert_eq!(charged, *expected, "opcode {:02X}", code[0]);
            assert_eq!(cpu.cycles(), *expected);
        }
    }

    #[test]
    fn test_adda_flags() {
        // LDAA #$80; ADDA #$80 -> zero result, carry and overflow set.
        let mut cpu = cpu_with(&[0x86, 0x80, 0x8B, 0x80]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.register(0).value, 0);
        let sr = cpu.register(5).value as u8;
        assert_ne!(sr & cc::C, 0);
        assert_ne!(sr & cc::V, 0);
        assert_ne!(sr & cc::Z, 0);
    }

    #[test]
    fn test_suba_borrow() {
        // LDAA #$10; SUBA #$20 -> 0xF0, carry (borrow) set, negative set.
        let mut cpu = cpu_with(&[0x86, 0x10, 0x80, 0x20]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.register(0).value, 0xF0);
        let sr = cpu.register(5).value as u8;
        assert_ne!(sr & cc::C, 0);
        assert_ne!(sr & cc::N, 0);
    }

    #[test]
    fn test_jsr_rts_round_trip() {
        // LDS #$01FF; JSR $0200; (at 0200: RTS)
        let mut cpu = cpu_with(&[0x8E, 0x01, 0xFF, 0xBD, 0x02, 0x00, 0x01]);
        cpu.bus_mut().mem[0x0200] = 0x39;
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.pc(), 0x0200);
        assert_eq!(cpu.sp(), 0x01FD);
        cpu.execute_instruction();
        assert_eq!(cpu.pc(), 0x0106);
        assert_eq!(cpu.sp(), 0x01FF);
    }

    #[test]
    fn test_branch_taken_and_not() {
        // LDAA #$00 (Z set); BEQ +2 skips the following bytes.
        let mut cpu = cpu_with(&[0x86, 0x00, 0x27, 0x02, 0x01, 0x01, 0x01]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.pc(), 0x0106);
        // BNE is not taken from the same flags.
        let mut cpu = cpu_with(&[0x86, 0x00, 0x26, 0x02, 0x01]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.pc(), 0x0104);
    }

    #[test]
    fn test_shift_carry() {
        // LDAA #$81; ASLA -> 0x02, carry set.
        let mut cpu = cpu_with(&[0x86, 0x81, 0x48]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.register(0).value, 0x02);
        assert_ne!(cpu.register(5).value as u8 & cc::C, 0);
    }

    #[test]
    fn test_irq_serviced_at_instruction_boundary() {
        // CLI; NOP... with IRQ vector pointing to 0x0300.
        let mut cpu = cpu_with(&[0x0E, 0x01, 0x01]);
        cpu.bus_mut().mem[0xFFF8] = 0x03;
        cpu.bus_mut().mem[0xFFF9] = 0x00;
        cpu.set_register(3, 0x01FF);
        cpu.execute_instruction();
        cpu.irq();
        cpu.execute_instruction();
        assert_eq!(cpu.pc(), 0x0301);
        // pc, ix, a, b, cc pushed: 7 bytes.
        assert_eq!(cpu.sp(), 0x01FF - 7);
    }

    #[test]
    fn test_irq_masked_by_i_flag() {
        let mut cpu = cpu_with(&[0x01, 0x01]);
        cpu.irq();
        cpu.execute_instruction();
        // I is set after reset, so no interrupt is taken.
        assert_eq!(cpu.pc(), 0x0101);
    }

    #[test]
    fn test_hcf_halts() {
        let mut cpu = cpu_with(&[0x9D]);
        cpu.execute_instruction();
        assert_eq!(cpu.cpu_state(), CpuState::Halt);
    }

    #[test]
    fn test_state_snapshot_round_trip() {
        let mut cpu = cpu_with(&[0x86, 0x55, 0xC6, 0xAA]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        let mut state = M6800State::default();
        cpu.get_state(&mut state);
        let mut other = cpu_with(&[0x01]);
        other.set_state(&state);
        let mut copied = M6800State::default();
        other.get_state(&mut copied);
        assert_eq!(state, copied);
    }

    #[test]
    fn test_disassembly() {
        let (size, text) = M6800::<TestBus>::disassemble_instruction(&[0xB6, 0x12, 0x34], 0x100);
        assert_eq!(size, 3);
        assert_eq!(text, "LDAA $1234");
        let (size, text) = M6800::<TestBus>::disassemble_instruction(&[0x20, 0xFE], 0x100);
        assert_eq!(size, 2);
        assert_eq!(text, "BRA  $0100");
    }

    #[test]
    fn test_daa_after_bcd_add() {
        // LDAA #$19; ADDA #$28 -> 0x41; DAA -> 0x47.
        let mut cpu = cpu_with(&[0x86, 0x19, 0x8B, 0x28, 0x19]);
        cpu.execute_instruction();
        cpu.execute_instruction();
        cpu.execute_instruction();
        assert_eq!(cpu.register(0).value, 0x47);
    }
}
