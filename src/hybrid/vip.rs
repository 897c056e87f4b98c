//! RCA COSMAC VIP hardware emulation.
//!
//! A CDP1802 at 1.76064 MHz, 2 or 4 KiB of RAM mirrored across the address
//! space, a CDP1861 video controller DMA-ing 128 scanlines of 8 bytes per
//! frame, the hex keypad, and Joseph Weisbecker's original 512-byte CHIP-8
//! interpreter loaded at 0x0000 (hybrid mode: the monitor *is* the
//! interpreter).
//!
//! The interpreter keeps the CHIP-8 PC in R5, I in RA, DT/ST packed into R8
//! and the stack pointer in R2; V0..VF live in RAM at `(R2 & 0xFF00) + 0xF0`.
//! The fetch-decode loop is entered through R4 = 0x001B, so every time the
//! backend lands there one CHIP-8 instruction has retired. The work-area page
//! is derived from the initial R2 captured on first entry, not hard-coded,
//! because the interpreter places it according to the RAM size.

use crate::clock::{Cycles, Time};
use crate::core::{EmulationCore, EmulatorHost};
use crate::cpu::cdp1802::{Cdp1802, Cdp1802Bus};
use crate::cpu::{
    BreakpointMap, CpuState, Endianness, ExecMode, GenericCpu, RegisterValue, StackContent,
    StackDirection,
};
use crate::error::CadmiumError;
use crate::hardware::{Cdp186x, Cdp186xType};
use crate::hybrid::{Chip8State, CHIP8_REGISTER_NAMES, RESET_FAST_FORWARD_LIMIT};
use crate::palette::Palette;
use crate::properties::{
    ComboValue, IntegerValue, Property, PropertyAccess, PropertyRegistry, PropertyValue,
    Properties,
};
use crate::video::VideoBuffer;
use rand::{Rng, SeedableRng};
use std::cell::Cell;

/// Property class name of this core.
pub const PROP_CLASS_COSMAC_VIP: &str = "COSMAC-VIP";

const PROP_TRACE_LOG: &str = "Trace Log";
const PROP_CPU: &str = "CPU";
const PROP_CLOCK: &str = "Clock Rate";
const PROP_RAM: &str = "Memory";
const PROP_CLEAN_RAM: &str = "Clean RAM";
const PROP_VIDEO: &str = "Video";
const PROP_INTERPRETER: &str = "Interpreter";
const PROP_START_ADDRESS: &str = "Start Address";

const FETCH_LOOP_ENTRY: u16 = 0x001B;
const CLOCK_RATE: u64 = 1_760_640;

/// The original COSMAC VIP CHIP-8 interpreter, 512 bytes, loaded at 0x0000.
#[rustfmt::skip]
static VIP_CHIP8_INTERPRETER: &[u8] = &[
    0x91, 0xbb, 0xff, 0x01, 0xb2, 0xb6, 0xf8, 0xcf, 0xa2, 0xf8, 0x81, 0xb1, 0xf8, 0x46, 0xa1, 0x90, 0xb4, 0xf8, 0x1b, 0xa4, 0xf8, 0x01, 0xb5, 0xf8, 0xfc, 0xa5, 0xd4, 0x96, 0xb7, 0xe2, 0x94, 0xbc, 0x45, 0xaf, 0xf6, 0xf6, 0xf6, 0xf6, 0x32, 0x44,
    0xf9, 0x50, 0xac, 0x8f, 0xfa, 0x0f, 0xf9, 0xf0, 0xa6, 0x05, 0xf6, 0xf6, 0xf6, 0xf6, 0xf9, 0xf0, 0xa7, 0x4c, 0xb3, 0x8c, 0xfc, 0x0f, 0xac, 0x0c, 0xa3, 0xd3, 0x30, 0x1b, 0x8f, 0xfa, 0x0f, 0xb3, 0x45, 0x30, 0x40, 0x22, 0x69, 0x12, 0xd4, 0x00,
    0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00, 0x01, 0x01, 0x00, 0x7c, 0x75, 0x83, 0x8b, 0x95, 0xb4, 0xb7, 0xbc, 0x91, 0xeb, 0xa4, 0xd9, 0x70, 0x99, 0x05, 0x06, 0xfa, 0x07, 0xbe, 0x06, 0xfa, 0x3f, 0xf6,
    0xf6, 0xf6, 0x22, 0x52, 0x07, 0xfa, 0x1f, 0xfe, 0xfe, 0xfe, 0xf1, 0xac, 0x9b, 0xbc, 0x45, 0xfa, 0x0f, 0xad, 0xa7, 0xf8, 0xd0, 0xa6, 0x93, 0xaf, 0x87, 0x32, 0xf3, 0x27, 0x4a, 0xbd, 0x9e, 0xae, 0x8e, 0x32, 0xa4, 0x9d, 0xf6, 0xbd, 0x8f, 0x76,
    0xaf, 0x2e, 0x30, 0x98, 0x9d, 0x56, 0x16, 0x8f, 0x56, 0x16, 0x30, 0x8e, 0x00, 0xec, 0xf8, 0xd0, 0xa6, 0x93, 0xa7, 0x8d, 0x32, 0xd9, 0x06, 0xf2, 0x2d, 0x32, 0xbe, 0xf8, 0x01, 0xa7, 0x46, 0xf3, 0x5c, 0x02, 0xfb, 0x07, 0x32, 0xd2, 0x1c, 0x06,
    0xf2, 0x32, 0xce, 0xf8, 0x01, 0xa7, 0x06, 0xf3, 0x5c, 0x2c, 0x16, 0x8c, 0xfc, 0x08, 0xac, 0x3b, 0xb3, 0xf8, 0xff, 0xa6, 0x87, 0x56, 0x12, 0xd4, 0x9b, 0xbf, 0xf8, 0xff, 0xaf, 0x93, 0x5f, 0x8f, 0x32, 0xdf, 0x2f, 0x30, 0xe5, 0x00, 0x42, 0xb5,
    0x42, 0xa5, 0xd4, 0x8d, 0xa7, 0x87, 0x32, 0xac, 0x2a, 0x27, 0x30, 0xf5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x45, 0xa3, 0x98, 0x56, 0xd4, 0xf8, 0x81, 0xbc, 0xf8, 0x95, 0xac, 0x22, 0xdc, 0x12, 0x56, 0xd4, 0x06, 0xb8, 0xd4,
    0x06, 0xa8, 0xd4, 0x64, 0x0a, 0x01, 0xe6, 0x8a, 0xf4, 0xaa, 0x3b, 0x28, 0x9a, 0xfc, 0x01, 0xba, 0xd4, 0xf8, 0x81, 0xba, 0x06, 0xfa, 0x0f, 0xaa, 0x0a, 0xaa, 0xd4, 0xe6, 0x06, 0xbf, 0x93, 0xbe, 0xf8, 0x1b, 0xae, 0x2a, 0x1a, 0xf8, 0x00, 0x5a,
    0x0e, 0xf5, 0x3b, 0x4b, 0x56, 0x0a, 0xfc, 0x01, 0x5a, 0x30, 0x40, 0x4e, 0xf6, 0x3b, 0x3c, 0x9f, 0x56, 0x2a, 0x2a, 0xd4, 0x00, 0x22, 0x86, 0x52, 0xf8, 0xf0, 0xa7, 0x07, 0x5a, 0x87, 0xf3, 0x17, 0x1a, 0x3a, 0x5b, 0x12, 0xd4, 0x22, 0x86, 0x52,
    0xf8, 0xf0, 0xa7, 0x0a, 0x57, 0x87, 0xf3, 0x17, 0x1a, 0x3a, 0x6b, 0x12, 0xd4, 0x15, 0x85, 0x22, 0x73, 0x95, 0x52, 0x25, 0x45, 0xa5, 0x86, 0xfa, 0x0f, 0xb5, 0xd4, 0x45, 0xe6, 0xf3, 0x3a, 0x82, 0x15, 0x15, 0xd4, 0x45, 0xe6, 0xf3, 0x3a, 0x88,
    0xd4, 0x45, 0x07, 0x30, 0x8c, 0x45, 0x07, 0x30, 0x84, 0xe6, 0x62, 0x26, 0x45, 0xa3, 0x36, 0x88, 0xd4, 0x3e, 0x88, 0xd4, 0xf8, 0xf0, 0xa7, 0xe7, 0x45, 0xf4, 0xa5, 0x86, 0xfa, 0x0f, 0x3b, 0xb2, 0xfc, 0x01, 0xb5, 0xd4, 0x45, 0x56, 0xd4, 0x45,
    0xe6, 0xf4, 0x56, 0xd4, 0x45, 0xfa, 0x0f, 0x3a, 0xc4, 0x07, 0x56, 0xd4, 0xaf, 0x22, 0xf8, 0xd3, 0x73, 0x8f, 0xf9, 0xf0, 0x52, 0xe6, 0x07, 0xd2, 0x56, 0xf8, 0xff, 0xa6, 0xf8, 0x00, 0x7e, 0x56, 0xd4, 0x19, 0x89, 0xae, 0x93, 0xbe, 0x99, 0xee,
    0xf4, 0x56, 0x76, 0xe6, 0xf4, 0xb9, 0x56, 0x45, 0xf2, 0x56, 0xd4, 0x45, 0xaa, 0x86, 0xfa, 0x0f, 0xba, 0xd4, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xe0, 0x00, 0x4b,
];

/// Options distilled from the property class.
#[derive(Clone, Debug)]
pub struct VipOptions {
    pub clock_rate: u64,
    pub ram_size: usize,
    pub clean_ram: bool,
    pub trace_log: bool,
    pub start_address: u32,
}

impl Default for VipOptions {
    fn default() -> Self {
        VipOptions {
            clock_rate: CLOCK_RATE,
            ram_size: 4096,
            clean_ram: false,
            trace_log: false,
            start_address: 0x200,
        }
    }
}

impl VipOptions {
    pub fn registered_prototype(registry: &mut PropertyRegistry) -> Properties {
        registry
            .prototype_or_init(PROP_CLASS_COSMAC_VIP, || {
                let mut props = Properties::new(PROP_CLASS_COSMAC_VIP);
                props.register_property(Property::new(
                    PROP_TRACE_LOG,
                    PropertyValue::Bool(false),
                    "Enable trace log",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_CPU,
                    PropertyValue::String("CDP1802".into()),
                    "CPU type (currently only CDP1802)",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_CLOCK,
                    PropertyValue::Int(IntegerValue::new(CLOCK_RATE as i32, 100_000, 500_000_000)),
                    "Clock frequency, default is 1760640",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_RAM,
                    PropertyValue::Combo(ComboValue::new(vec!["2048", "4096"])),
                    "Size of ram in bytes",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_CLEAN_RAM,
                    PropertyValue::Bool(false),
                    "Delete ram on startup",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_VIDEO,
                    PropertyValue::Combo(ComboValue::new(vec!["CDP1861"])),
                    "Video hardware, only CDP1861",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_INTERPRETER,
                    PropertyValue::String("CHIP-8".into()),
                    "CHIP-8 interpreter loaded into low RAM",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_START_ADDRESS,
                    PropertyValue::Int(IntegerValue::new(0x200, 0, 4095)),
                    "Initial CHIP-8 interpreter PC address",
                    PropertyAccess::ReadOnly,
                ));
                props.set_palette(Palette::monochrome());
                props
            })
            .clone()
    }

    pub fn from_properties(props: &Properties) -> Result<Self, CadmiumError> {
        Ok(VipOptions {
            clock_rate: props.at(PROP_CLOCK)?.get_int() as u64,
            ram_size: props.at(PROP_RAM)?.selected_text().parse().unwrap_or(4096),
            clean_ram: props.at(PROP_CLEAN_RAM)?.get_bool(),
            trace_log: props.at(PROP_TRACE_LOG)?.get_bool(),
            start_address: props.at(PROP_START_ADDRESS)?.get_int() as u32,
        })
    }

    pub fn as_properties(&self, registry: &mut PropertyRegistry) -> Properties {
        let mut props = Self::registered_prototype(registry);
        if let Ok(p) = props.at_mut(PROP_CLOCK) {
            p.set_int(self.clock_rate as i32);
        }
        if let Ok(p) = props.at_mut(PROP_RAM) {
            p.set_selected_text(&self.ram_size.to_string());
        }
        if let Ok(p) = props.at_mut(PROP_CLEAN_RAM) {
            p.set_bool(self.clean_ram);
        }
        if let Ok(p) = props.at_mut(PROP_TRACE_LOG) {
            p.set_bool(self.trace_log);
        }
        if let Ok(p) = props.at_mut(PROP_START_ADDRESS) {
            p.set_int(self.start_address as i32);
        }
        props
    }
}

/// The VIP board: RAM mirrored over the whole address space, keypad latch,
/// display on/off requests surfaced to the composing core through cells.
pub struct VipBus {
    pub ram: Vec<u8>,
    pub key_states: u16,
    pub key_latch: u8,
    pub display_on: Cell<bool>,
    pub nef: Cell<bool>,
}

impl VipBus {
    fn new(ram_size: usize) -> Self {
        VipBus {
            ram: vec![0; ram_size],
            key_states: 0,
            key_latch: 0,
            display_on: Cell::new(false),
            nef: Cell::new(false),
        }
    }

    #[inline]
    fn map(&self, addr: u16) -> usize {
        addr as usize % self.ram.len()
    }
}

impl Cdp1802Bus for VipBus {
    fn read_byte(&mut self, addr: u16) -> u8 {
        let idx = self.map(addr);
        self.ram[idx]
    }

    fn write_byte(&mut self, addr: u16, val: u8) {
        let idx = self.map(addr);
        self.ram[idx] = val;
    }

    fn read_debug_byte(&self, addr: u16) -> u8 {
        self.ram[self.map(addr)]
    }

    fn output(&mut self, n: u8, val: u8) {
        match n {
            1 => self.display_on.set(false),
            2 => self.key_latch = val & 0xF,
            _ => {}
        }
    }

    fn input(&mut self, n: u8) -> u8 {
        if n == 1 {
            self.display_on.set(true);
        }
        0
    }

    fn ef(&self, n: u8) -> bool {
        match n {
            // EF1 is wired to the 1861; the core refreshes the level per step.
            0 => self.nef.get(),
            2 => self.key_states & (1 << self.key_latch) != 0,
            _ => false,
        }
    }
}

/// The COSMAC VIP core: backend CPU plus the CHIP-8 view lifted from the
/// interpreter's register conventions.
pub struct CosmacVip {
    cpu: Cdp1802<VipBus>,
    video: Cdp186x,
    options: VipOptions,
    properties: Properties,
    state: Chip8State,
    initial_chip8_sp: u16,
    screen: VideoBuffer,
    palette: Palette,
    cycles: Cycles,
    frames: i64,
    exec_mode: ExecMode,
    cpu_state: CpuState,
    error_message: Option<String>,
    exec_chip8: bool,
    backend_stopped: bool,
    breakpoints: BreakpointMap,
    breakpoint_triggered: bool,
    step_over_sp: u16,
    endless_loops: u8,
    last_fetch_frame_cycle: i64,
    wave_phase: f32,
    rom_name: String,
    rom_sha1: Option<String>,
}

impl CosmacVip {
    pub fn new(registry: &mut PropertyRegistry, props: &Properties) -> Result<Self, CadmiumError> {
        let options = VipOptions::from_properties(props)?;
        let mut properties = options.as_properties(registry);
        let digest = sha1_smol::Sha1::from(VIP_CHIP8_INTERPRETER).digest().to_string();
        if let Ok(p) = properties.at_mut(PROP_INTERPRETER) {
            p.set_additional_info(format!("(sha1: {})", &digest[..8]));
        }
        let cpu = Cdp1802::new(VipBus::new(options.ram_size), options.clock_rate);
        let mut core = CosmacVip {
            cpu,
            video: Cdp186x::new(Cdp186xType::Cdp1861),
            options,
            properties,
            state: Chip8State::default(),
            initial_chip8_sp: 0,
            screen: VideoBuffer::new(64, 32),
            palette: Palette::monochrome(),
            cycles: 0,
            frames: 0,
            exec_mode: ExecMode::Paused,
            cpu_state: CpuState::Normal,
            error_message: None,
            exec_chip8: true,
            backend_stopped: false,
            breakpoints: BreakpointMap::new(),
            breakpoint_triggered: false,
            step_over_sp: 0,
            endless_loops: 0,
            last_fetch_frame_cycle: 0,
            wave_phase: 0.0,
            rom_name: String::new(),
            rom_sha1: None,
        };
        core.screen.set_palette(&core.palette);
        Ok(core)
    }

    pub fn backend_cpu(&mut self) -> &mut Cdp1802<VipBus> {
        &mut self.cpu
    }


    /// True when the last pause came from the backend CPU stopping rather
    /// than the CHIP-8 unit.
    pub fn backend_stopped(&self) -> bool {
        self.backend_stopped
    }

    /// Name of the most recently loaded image.
    pub fn rom_name(&self) -> &str {
        &self.rom_name
    }

    /// Samples the interpreter's CHIP-8 machine out of backend registers and
    /// the work area derived from the initial stack pointer.
    fn fetch_state(&mut self) {
        if self.initial_chip8_sp == 0 {
            self.initial_chip8_sp = self.cpu.r(2);
        }
        self.state.cycles = self.cycles;
        self.state.frame_cycle = self.video.frame_cycle(self.cpu.cycles());
        let base = self.initial_chip8_sp & 0xFF00;
        for reg in 0..16u16 {
            self.state.v[reg as usize] =
                self.cpu.bus().read_debug_byte(base + 0xF0 + reg);
        }
        self.state.i = self.cpu.r(0xA);
        self.state.pc = self.cpu.r(5);
        self.state.sp = self.initial_chip8_sp.wrapping_sub(self.cpu.r(2)) >> 1;
        self.state.dt = (self.cpu.r(8) >> 8) as u8;
        self.state.st = (self.cpu.r(8) & 0xFF) as u8;
        for slot in 0..16.min(self.state.sp as usize) {
            let addr = self.initial_chip8_sp.wrapping_sub(slot as u16 * 2);
            self.state.stack[slot] = ((self.cpu.bus().read_debug_byte(addr.wrapping_sub(2)) as u16)
                << 8)
                | self.cpu.bus().read_debug_byte(addr.wrapping_sub(1)) as u16;
        }
    }

    /// Writes edited CHIP-8 state back into backend registers and RAM.
    fn force_state(&mut self) {
        if self.initial_chip8_sp == 0 {
            return;
        }
        let base = self.initial_chip8_sp & 0xFF00;
        let state = self.state;
        for reg in 0..16u16 {
            let idx = self.cpu.bus().map(base + 0xF0 + reg);
            self.cpu.bus_mut().ram[idx] = state.v[reg as usize];
        }
        self.cpu.set_r(0xA, state.i);
        self.cpu.set_r(5, state.pc);
        self.cpu.set_r(8, ((state.dt as u16) << 8) | state.st as u16);
        self.cpu.set_r(2, self.initial_chip8_sp.wrapping_sub(state.sp * 2));
    }

    fn opcode(&self) -> u16 {
        let pc = self.state.pc;
        ((self.cpu.bus().read_debug_byte(pc) as u16) << 8)
            | self.cpu.bus().read_debug_byte(pc.wrapping_add(1)) as u16
    }

    /// Blits the interpreter's display page (one page above the work area)
    /// into the screen buffer.
    fn flush_screen(&mut self) {
        if self.initial_chip8_sp == 0 {
            return;
        }
        let page = (self.initial_chip8_sp & 0xFF00).wrapping_add(0x100);
        for row in 0..32u16 {
            for byte_index in 0..8u16 {
                let data = self.cpu.bus().read_debug_byte(page + row * 8 + byte_index);
                for bit in 0..8 {
                    self.screen.set_pixel(
                        (byte_index * 8) as usize + bit,
                        row as usize,
                        (data >> (7 - bit)) & 1,
                    );
                }
            }
        }
    }

    /// The display interrupt service of the VIP's operating ROM, modelled
    /// natively: per field it refreshes the screen from the display page,
    /// ticks the interpreter's timers in R8, and costs the CPU the DMA burst
    /// it would lose on real hardware.
    fn service_video_frame(&mut self, host: &mut dyn EmulatorHost) {
        self.frames += 1;
        self.cpu.bus_mut().key_states = host.key_states();
        if self.video.is_display_enabled() {
            self.flush_screen();
            let timers = self.cpu.r(8);
            let dt = (timers >> 8) as u8;
            let st = (timers & 0xFF) as u8;
            let dt = dt.saturating_sub(1);
            let st = st.saturating_sub(1);
            self.cpu.set_r(8, ((dt as u16) << 8) | st as u16);
            // 128 scanlines of 8-byte DMA bursts steal the bus.
            self.cpu.add_cycles(128 * 8 * 8);
        }
        self.cpu.wake();
        host.vblank();
    }

    /// Runs one backend instruction with video interleave; returns true when a
    /// CHIP-8 instruction retired.
    fn execute_1802(&mut self, host: &mut dyn EmulatorHost) -> bool {
        // Keep the video device in sync with the display on/off port writes.
        if self.cpu.bus().display_on.get() != self.video.is_display_enabled() {
            if self.cpu.bus().display_on.get() {
                self.video.enable_display();
            } else {
                self.video.disable_display();
            }
        }
        let step = self.video.execute_step(self.cpu.cycles());
        if step.vsync {
            self.service_video_frame(host);
        }
        let nef = self.video.nef(self.cpu.cycles());
        self.cpu.bus().nef.set(nef);
        if self.options.trace_log && self.cpu.cpu_state() == CpuState::Normal {
            log::trace!(
                "{:24} ; {}",
                self.cpu.disassemble_with_bytes(-1).1,
                self.cpu.dump_state_line()
            );
        }
        self.cpu.execute_instruction();
        if self.cpu.program_counter() == FETCH_LOOP_ENTRY {
            self.fetch_state();
            self.cycles += 1;
            if self.options.trace_log {
                log::trace!("CHIP8: {}", self.state.dump_state_line(self.opcode()));
            }
            if GenericCpu::exec_mode(&self.cpu) == ExecMode::Paused {
                self.set_exec_mode_impl(ExecMode::Paused);
                self.backend_stopped = true;
            } else if self.exec_mode == ExecMode::Step
                || (self.exec_mode == ExecMode::StepOver && self.state.sp <= self.step_over_sp)
                || (self.exec_mode == ExecMode::StepOut && self.state.sp < self.step_over_sp)
            {
                self.set_exec_mode_impl(ExecMode::Paused);
            }
            let fc = self.state.frame_cycle;
            let new_frame = fc < self.last_fetch_frame_cycle;
            self.last_fetch_frame_cycle = fc;
            if new_frame {
                host.update_screen();
                let next_op = self.opcode();
                if next_op & 0xF000 == 0x1000 && next_op & 0xFFF == self.state.pc {
                    self.endless_loops += 1;
                    if self.endless_loops > 2 {
                        self.set_exec_mode_impl(ExecMode::Paused);
                        self.endless_loops = 0;
                    }
                } else {
                    self.endless_loops = 0;
                }
            }
            if self.breakpoints.trigger(self.state.pc as u32) {
                self.set_exec_mode_impl(ExecMode::Paused);
                self.breakpoint_triggered = true;
            }
            return true;
        } else if GenericCpu::exec_mode(&self.cpu) == ExecMode::Paused {
            self.set_exec_mode_impl(ExecMode::Paused);
            self.backend_stopped = true;
        }
        false
    }

    fn set_exec_mode_impl(&mut self, mode: ExecMode) {
        if mode == ExecMode::StepOver || mode == ExecMode::StepOut {
            self.step_over_sp = self.state.sp;
        }
        if self.exec_chip8 {
            if mode == ExecMode::Paused {
                self.exec_mode = ExecMode::Paused;
                GenericCpu::set_exec_mode(&mut self.cpu, ExecMode::Paused);
            } else {
                self.exec_mode = mode;
                GenericCpu::set_exec_mode(&mut self.cpu, ExecMode::Running);
            }
        } else if mode == ExecMode::Paused {
            self.exec_mode = ExecMode::Paused;
            GenericCpu::set_exec_mode(&mut self.cpu, ExecMode::Paused);
        } else {
            self.exec_mode = ExecMode::Running;
            GenericCpu::set_exec_mode(&mut self.cpu, mode);
        }
    }
}

impl GenericCpu for CosmacVip {
    fn cpu_id(&self) -> u32 {
        0xC8
    }

    fn name(&self) -> &'static str {
        "CHIP-8-VIP"
    }

    fn register_names(&self) -> &'static [&'static str] {
        &CHIP8_REGISTER_NAMES
    }

    fn register(&self, index: usize) -> RegisterValue {
        match index {
            0..=15 => RegisterValue { value: self.state.v[index] as u32, bits: 8 },
            16 => RegisterValue { value: self.state.i as u32, bits: 12 },
            17 => RegisterValue { value: self.state.dt as u32, bits: 8 },
            18 => RegisterValue { value: self.state.st as u32, bits: 8 },
            19 => RegisterValue { value: self.state.pc as u32, bits: 12 },
            _ => RegisterValue { value: self.state.sp as u32, bits: 8 },
        }
    }

    fn set_register(&mut self, index: usize, value: u32) {
        match index {
            0..=15 => self.state.v[index] = value as u8,
            16 => self.state.i = value as u16,
            17 => self.state.dt = value as u8,
            18 => self.state.st = value as u8,
            19 => self.state.pc = value as u16,
            _ => self.state.sp = value as u16,
        }
        self.force_state();
    }

    fn pc(&self) -> u32 {
        self.state.pc as u32
    }

    fn sp(&self) -> u32 {
        self.state.sp as u32
    }

    fn cycles(&self) -> Cycles {
        self.cycles
    }

    fn time(&self) -> Time {
        self.cpu.time()
    }

    fn stack_size(&self) -> usize {
        12
    }

    fn stack(&self) -> StackContent {
        StackContent::new(2, Endianness::Big, StackDirection::Upwards, self.state.stack_bytes())
    }

    fn read_memory_byte(&self, addr: u32) -> u8 {
        self.cpu.bus().read_debug_byte(addr as u16)
    }

    fn memory_size(&self) -> usize {
        self.cpu.bus().ram.len()
    }

    fn disassemble_with_bytes(&self, addr: i64) -> (usize, String) {
        let address = if addr < 0 { self.state.pc as u32 } else { addr as u32 };
        let opcode = ((self.read_memory_byte(address) as u16) << 8)
            | self.read_memory_byte(address + 1) as u16;
        let next = ((self.read_memory_byte(address + 2) as u16) << 8)
            | self.read_memory_byte(address + 3) as u16;
        let (size, text) = crate::decompiler::disassemble_opcode(
            opcode,
            next,
            crate::chip8::variants::Chip8Variant::CHIP_8_VIP,
        );
        (size, format!("{:04X}: {:04X}       {}", address, opcode, text))
    }

    fn dump_state_line(&self) -> String {
        self.state.dump_state_line(self.opcode())
    }

    fn exec_mode(&self) -> ExecMode {
        let backend = GenericCpu::exec_mode(&self.cpu);
        if backend == ExecMode::Paused || self.exec_mode == ExecMode::Paused {
            ExecMode::Paused
        } else if backend == ExecMode::Running {
            self.exec_mode
        } else {
            backend
        }
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        self.set_exec_mode_impl(mode);
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
        self.breakpoint_triggered || self.cpu.breakpoint_triggered()
    }

    fn clear_breakpoint_triggered(&mut self) {
        self.breakpoint_triggered = false;
        self.cpu.clear_breakpoint_triggered();
    }
}

impl EmulationCore for CosmacVip {
    fn name(&self) -> &'static str {
        "COSMAC-VIP"
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn update_properties(&mut self, props: &Properties, changed: &str) -> bool {
        if crate::properties::fuzzy_compare(changed, PROP_TRACE_LOG) {
            if let Ok(opts) = VipOptions::from_properties(props) {
                self.options.trace_log = opts.trace_log;
                self.properties = props.clone();
            }
            return false;
        }
        true
    }

    fn reset(&mut self, host: &mut dyn EmulatorHost) {
        if self.options.clean_ram {
            self.cpu.bus_mut().ram.fill(0);
        } else {
            let mut rng = rand::rngs::SmallRng::seed_from_u64(42);
            rng.fill(&mut self.cpu.bus_mut().ram[..]);
        }
        // The interpreter is the monitor: it sits at the bottom of RAM.
        self.cpu.bus_mut().ram[..VIP_CHIP8_INTERPRETER.len()]
            .copy_from_slice(VIP_CHIP8_INTERPRETER);
        self.cpu.bus_mut().display_on.set(false);
        self.cpu.bus_mut().key_latch = 0;
        self.screen.set_all(0);
        self.video.reset();
        self.cpu.reset();
        self.initial_chip8_sp = 0;
        self.cycles = 0;
        self.frames = 0;
        self.endless_loops = 0;
        self.last_fetch_frame_cycle = 0;
        self.cpu_state = CpuState::Normal;
        self.error_message = None;
        self.exec_chip8 = true;
        self.exec_mode = ExecMode::Running;
        GenericCpu::set_exec_mode(&mut self.cpu, ExecMode::Running);
        // Fast-forward through interpreter start-up (including the built-in
        // clear/display-on prelude) to the first fetch at the start address.
        let start = self.options.start_address as u16;
        let mut budget = RESET_FAST_FORWARD_LIMIT;
        while budget > 0 {
            if self.execute_1802(host) && self.state.pc == start {
                break;
            }
            budget -= 1;
        }
        if budget == 0 {
            self.cpu_state = CpuState::Error;
            self.error_message = Some("interpreter did not reach its fetch loop".into());
        }
        self.set_exec_mode_impl(if host.is_headless() { ExecMode::Running } else { ExecMode::Paused });
    }

    fn default_load_address(&self) -> u32 {
        self.options.start_address
    }

    fn load_binary(
        &mut self,
        host: &mut dyn EmulatorHost,
        name: &str,
        data: &[u8],
        address: Option<u32>,
    ) -> Result<(), CadmiumError> {
        let offset = address.unwrap_or_else(|| self.default_load_address()) as usize;
        if offset + data.len() > self.options.ram_size {
            return Err(CadmiumError::RomTooLarge {
                size: data.len(),
                capacity: self.options.ram_size.saturating_sub(offset),
            });
        }
        self.reset(host);
        self.cpu.bus_mut().ram[offset..offset + data.len()].copy_from_slice(data);
        self.rom_name = name.to_string();
        self.rom_sha1 = Some(sha1_smol::Sha1::from(data).digest().to_string());
        let auto_run = host.is_headless();
        host.rom_loaded(name, auto_run);
        Ok(())
    }

    fn rom_sha1(&self) -> Option<&str> {
        self.rom_sha1.as_deref()
    }

    fn execute_frame(&mut self, host: &mut dyn EmulatorHost) {
        if self.exec_mode == ExecMode::Paused || self.cpu_state == CpuState::Error {
            return;
        }
        let next = self.video.next_frame(self.cpu.cycles());
        while EmulationCore::exec_mode(self) != ExecMode::Paused && self.cpu.cycles() < next {
            self.execute_1802(host);
            if self.cpu_state == CpuState::Error {
                break;
            }
        }
    }

    fn execute_for(&mut self, host: &mut dyn EmulatorHost, microseconds: i64) -> i64 {
        if self.exec_mode == ExecMode::Paused {
            return 0;
        }
        let end = self.cpu.time().advanced_by_microseconds(microseconds as f64);
        while EmulationCore::exec_mode(self) != ExecMode::Paused && self.cpu.time() < end {
            self.execute_instruction(host);
        }
        self.cpu.time().difference_us(&end)
    }

    fn execute_instruction(&mut self, host: &mut dyn EmulatorHost) -> Cycles {
        if self.exec_mode == ExecMode::Paused || self.cpu_state == CpuState::Error {
            return 0;
        }
        let start = self.cpu.cycles();
        let limit = self.video.cycles_per_frame() * 8 * 14;
        while !self.execute_1802(host)
            && EmulationCore::exec_mode(self) != ExecMode::Paused
            && self.cpu.cycles() - start < limit
        {}
        self.cpu.cycles() - start
    }

    fn exec_mode(&self) -> ExecMode {
        GenericCpu::exec_mode(self)
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        self.set_exec_mode_impl(mode);
    }

    fn num_execution_units(&self) -> usize {
        2
    }

    fn execution_unit(&mut self, index: usize) -> Option<&mut dyn GenericCpu> {
        match index {
            0 => Some(self),
            1 => Some(&mut self.cpu),
            _ => None,
        }
    }

    fn focussed_execution_unit(&self) -> usize {
        if self.exec_chip8 {
            0
        } else {
            1
        }
    }

    fn set_focussed_execution_unit(&mut self, index: usize) {
        self.exec_chip8 = index == 0;
    }

    fn screen(&self) -> &VideoBuffer {
        &self.screen
    }

    fn palette(&self) -> &Palette {
        &self.palette
    }

    fn frames(&self) -> i64 {
        self.frames
    }

    fn render_audio(&mut self, samples: &mut [i16], sample_rate: u32) {
        // The beeper runs while the interpreter's sound timer (R8.0) is up.
        let sound_timer = (self.cpu.r(8) & 0xFF) as u8;
        if (sound_timer > 0 || self.cpu.q_output()) && sample_rate > 0 {
            let step = 1400.0 / sample_rate as f32;
            for out in samples.iter_mut() {
                *out = if self.wave_phase > 0.5 { 16384 } else { -16384 };
                self.wave_phase = (self.wave_phase + step) % 1.0;
            }
        } else {
            self.wave_phase = 0.0;
            samples.fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HeadlessHost;

    fn setup_core(program: &[u8]) -> CosmacVip {
        let mut registry = PropertyRegistry::new();
        let props = VipOptions::default().as_properties(&mut registry);
        let mut core = CosmacVip::new(&mut registry, &props).unwrap();
        let mut host = HeadlessHost;
        core.load_binary(&mut host, "test", program, None).unwrap();
        core
    }

    #[test]
    fn test_reset_parks_backend_at_interpreter_fetch_loop() {
        let core = setup_core(&[0x60, 0x01, 0x12, 0x02]);
        assert_eq!(
            GenericCpu::cpu_state(&core),
            CpuState::Normal,
            "{:?}",
            GenericCpu::error_message(&core)
        );
        // The interpreter ran its start-up (including the built-in clear and
        // display-on prelude) and stopped at the first fetch of the program.
        assert_eq!(GenericCpu::pc(&core), 0x200);
        assert_eq!(core.cpu.program_counter(), FETCH_LOOP_ENTRY);
        assert!(core.video.is_display_enabled());
    }

    #[test]
    fn test_chip8_instruction_executes_through_interpreter() {
        let mut core = setup_core(&[0x67, 0x42, 0x12, 0x02]);
        let mut host = HeadlessHost;
        core.execute_instruction(&mut host);
        assert_eq!(core.state.v[7], 0x42);
        assert_eq!(GenericCpu::pc(&core), 0x202);
    }

    #[test]
    fn test_frame_advances_documented_cycle_budget() {
        // A counting loop that never trips the tight-self-jump pause.
        let mut core = setup_core(&[0x70, 0x01, 0x12, 0x00]);
        let mut host = HeadlessHost;
        // Align to a field boundary, then measure one full field.
        core.execute_frame(&mut host);
        let before = core.cpu.cycles();
        core.execute_frame(&mut host);
        let delta = core.cpu.cycles() - before;
        // One 1861 field is 3668 machine cycles of eight clocks each,
        // including the modelled DMA stall; the boundary may jitter by one
        // instruction.
        let frame_clocks = core.video.cycles_per_frame() * 8;
        assert!(
            (delta - frame_clocks).abs() <= 24,
            "field took {} clocks, expected about {}",
            delta,
            frame_clocks
        );
    }

    #[test]
    fn test_state_lifting_round_trips_through_work_area() {
        let mut core = setup_core(&[0x12, 0x02]);
        core.state.v[3] = 0x5A;
        core.state.v[0xF] = 0x01;
        core.state.i = 0x345;
        core.state.pc = 0x220;
        core.state.sp = 2;
        core.state.dt = 7;
        core.state.st = 9;
        core.force_state();
        core.state = Chip8State::default();
        core.fetch_state();
        assert_eq!(core.state.v[3], 0x5A);
        assert_eq!(core.state.v[0xF], 0x01);
        assert_eq!(core.state.i, 0x345);
        assert_eq!(core.state.pc, 0x220);
        assert_eq!(core.state.sp, 2);
        assert_eq!(core.state.dt, 7);
        assert_eq!(core.state.st, 9);
    }

    #[test]
    fn test_rom_too_large_reports_real_capacity() {
        let mut registry = PropertyRegistry::new();
        let props = VipOptions::default().as_properties(&mut registry);
        let mut core = CosmacVip::new(&mut registry, &props).unwrap();
        let mut host = HeadlessHost;
        // 4 KiB of RAM minus the 0x200 load offset leaves 3584 bytes.
        let oversized = vec![0u8; 4000];
        assert_eq!(
            core.load_binary(&mut host, "big", &oversized, None),
            Err(CadmiumError::RomTooLarge { size: 4000, capacity: 3584 })
        );
    }
}
