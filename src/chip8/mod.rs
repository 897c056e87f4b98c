//! The quirk-parameterised generic CHIP-8 interpreter.
//!
//! Instead of branching on quirks per instruction, the core builds a 64 Ki
//! function-pointer dispatch table once at construction: every `(mask, opcode,
//! handler)` registration fills the matching slots, and quirk configuration
//! decides which handler variant gets registered. The hot loop is then a plain
//! indexed call.

pub mod variants;

#[cfg(test)]
mod tests;

use crate::clock::{Cycles, Time};
use crate::core::{EmulationCore, EmulatorHost};
use crate::cpu::{
    BreakpointMap, CpuState, Endianness, ExecMode, GenericCpu, RegisterValue, StackContent,
    StackDirection,
};
use crate::error::CadmiumError;
use crate::palette::Palette;
use crate::properties::{
    ComboValue, IntegerValue, Property, PropertyAccess, PropertyRegistry, PropertyValue,
    Properties,
};
use crate::video::{ScrollDirection, VideoBuffer};
use rand::Rng;

use self::variants::Chip8Variant;

/// Property class name of the generic interpreter.
pub const PROP_CLASS_GENERIC: &str = "CHIP-8-GENERIC";

const PROP_BEHAVIOR: &str = "Behavior Base";
const PROP_TRACE_LOG: &str = "Trace Log";
const PROP_MEMORY: &str = "Memory";
const PROP_START_ADDRESS: &str = "Start Address";
const PROP_CLEAN_RAM: &str = "Clean RAM";
const PROP_IPF: &str = "Instructions per frame";
const PROP_FRAME_RATE: &str = "Frame rate";
const PROP_SHIFT_VX: &str = "Shift Vx only";
const PROP_VF_RESET: &str = "VF reset on logic ops";
const PROP_I_BY_X: &str = "I increments by X";
const PROP_I_UNCHANGED: &str = "I unchanged on load/store";
const PROP_WRAP_SPRITES: &str = "Wrap sprites";
const PROP_INSTANT_DXYN: &str = "Instant Dxyn";
const PROP_LORES_DXY0_8X16: &str = "Lores Dxy0 is 8x16";
const PROP_LORES_DXY0_16X16: &str = "Lores Dxy0 is 16x16";
const PROP_SC11_COLLISIONS: &str = "SCHIP-1.1 collisions";
const PROP_HALF_PIXEL_SCROLL: &str = "Half pixel scroll";
const PROP_MODE_CHANGE_CLEAR: &str = "Mode change clears screen";
const PROP_JUMP0_BXNN: &str = "Jump0 uses Bxnn";
const PROP_CYCLIC_STACK: &str = "Cyclic stack";

/// Default font placement, below the conventional 0x200 program area.
const FONT_ADDRESS: u32 = 0x50;
const BIG_FONT_ADDRESS: u32 = 0xA0;

/// The five-byte hex digit sprites of the original interpreter.
#[rustfmt::skip]
static SMALL_FONT: [u8; 80] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

/// The ten-byte digit sprites used by the hires `Fx30` pointer.
#[rustfmt::skip]
static BIG_FONT: [u8; 100] = [
    0x3C, 0x7E, 0xE7, 0xC3, 0xC3, 0xC3, 0xC3, 0xE7, 0x7E, 0x3C, // 0
    0x18, 0x38, 0x58, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x3C, // 1
    0x3E, 0x7F, 0xC3, 0x06, 0x0C, 0x18, 0x30, 0x60, 0xFF, 0xFF, // 2
    0x3C, 0x7E, 0xC3, 0x03, 0x0E, 0x0E, 0x03, 0xC3, 0x7E, 0x3C, // 3
    0x06, 0x0E, 0x1E, 0x36, 0x66, 0xC6, 0xFF, 0xFF, 0x06, 0x06, // 4
    0xFF, 0xFF, 0xC0, 0xC0, 0xFC, 0xFE, 0x03, 0xC3, 0x7E, 0x3C, // 5
    0x3E, 0x7C, 0xE0, 0xC0, 0xFC, 0xFE, 0xC3, 0xC3, 0x7E, 0x3C, // 6
    0xFF, 0xFF, 0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x60, 0x60, // 7
    0x3C, 0x7E, 0xC3, 0xC3, 0x7E, 0x7E, 0xC3, 0xC3, 0x7E, 0x3C, // 8
    0x3C, 0x7E, 0xC3, 0xC3, 0x7F, 0x3F, 0x03, 0x03, 0x3E, 0x7C, // 9
];

/// The behaviour bases the generic interpreter can be configured as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chip8Preset {
    Chip8,
    Chip8X,
    Chip48,
    SChip10,
    SChip11,
    SChipC,
    MegaChip,
    XoChip,
}

impl Chip8Preset {
    pub const ALL: [Chip8Preset; 8] = [
        Chip8Preset::Chip8,
        Chip8Preset::Chip8X,
        Chip8Preset::Chip48,
        Chip8Preset::SChip10,
        Chip8Preset::SChip11,
        Chip8Preset::SChipC,
        Chip8Preset::MegaChip,
        Chip8Preset::XoChip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Chip8Preset::Chip8 => "CHIP-8",
            Chip8Preset::Chip8X => "CHIP-8X",
            Chip8Preset::Chip48 => "CHIP-48",
            Chip8Preset::SChip10 => "SCHIP-1.0",
            Chip8Preset::SChip11 => "SCHIP-1.1",
            Chip8Preset::SChipC => "SCHIPC",
            Chip8Preset::MegaChip => "MEGACHIP",
            Chip8Preset::XoChip => "XO-CHIP",
        }
    }

    pub fn from_name(name: &str) -> Option<Chip8Preset> {
        Chip8Preset::ALL
            .iter()
            .copied()
            .find(|p| crate::properties::fuzzy_compare(p.name(), name))
    }

    pub fn variant(&self) -> Chip8Variant {
        match self {
            Chip8Preset::Chip8 => Chip8Variant::CHIP_8,
            Chip8Preset::Chip8X => Chip8Variant::CHIP_8X,
            Chip8Preset::Chip48 => Chip8Variant::CHIP_48,
            Chip8Preset::SChip10 => Chip8Variant::SCHIP_1_0,
            Chip8Preset::SChip11 => Chip8Variant::SCHIP_1_1,
            Chip8Preset::SChipC => Chip8Variant::SCHIPC,
            Chip8Preset::MegaChip => Chip8Variant::MEGA_CHIP,
            Chip8Preset::XoChip => Chip8Variant::XO_CHIP,
        }
    }
}

/// The full quirk and sizing configuration of one interpreter instance.
#[derive(Clone, Debug)]
pub struct Chip8Options {
    pub behavior_base: Chip8Preset,
    pub ram_size: u32,
    pub start_address: u32,
    pub clean_ram: bool,
    pub trace_log: bool,
    pub just_shift_vx: bool,
    pub dont_reset_vf: bool,
    pub load_store_inc_i_by_x: bool,
    pub load_store_dont_inc_i: bool,
    pub wrap_sprites: bool,
    pub instant_dxyn: bool,
    pub lores_dxy0_is_8x16: bool,
    pub lores_dxy0_is_16x16: bool,
    pub sc11_collision: bool,
    pub half_pixel_scroll: bool,
    pub mode_change_clear: bool,
    pub jump0_bxnn: bool,
    pub cyclic_stack: bool,
    pub allow_hires: bool,
    pub only_hires: bool,
    pub allow_colors: bool,
    pub has_16bit_addr: bool,
    pub xo_chip_sound: bool,
    pub instructions_per_frame: i32,
    pub frame_rate: i32,
    pub palette: Palette,
}

impl Default for Chip8Options {
    fn default() -> Self {
        Chip8Options {
            behavior_base: Chip8Preset::Chip8,
            ram_size: 4096,
            start_address: 0x200,
            clean_ram: true,
            trace_log: false,
            just_shift_vx: false,
            dont_reset_vf: false,
            load_store_inc_i_by_x: false,
            load_store_dont_inc_i: false,
            wrap_sprites: false,
            instant_dxyn: false,
            lores_dxy0_is_8x16: false,
            lores_dxy0_is_16x16: false,
            sc11_collision: false,
            half_pixel_scroll: false,
            mode_change_clear: false,
            jump0_bxnn: false,
            cyclic_stack: false,
            allow_hires: false,
            only_hires: false,
            allow_colors: false,
            has_16bit_addr: false,
            xo_chip_sound: false,
            instructions_per_frame: 15,
            frame_rate: 60,
            palette: Palette::monochrome(),
        }
    }
}

impl Chip8Options {
    /// The documented behaviour of each supported preset.
    pub fn for_preset(preset: Chip8Preset) -> Self {
        let mut opts = Chip8Options { behavior_base: preset, ..Chip8Options::default() };
        match preset {
            Chip8Preset::Chip8 => {}
            Chip8Preset::Chip8X => {
                opts.start_address = 0x300;
                opts.instant_dxyn = true;
            }
            Chip8Preset::Chip48 => {
                opts.just_shift_vx = true;
                opts.dont_reset_vf = true;
                opts.load_store_inc_i_by_x = true;
                opts.jump0_bxnn = true;
                opts.instant_dxyn = true;
                opts.instructions_per_frame = 15;
            }
            Chip8Preset::SChip10 => {
                opts.just_shift_vx = true;
                opts.dont_reset_vf = true;
                opts.load_store_dont_inc_i = true;
                opts.jump0_bxnn = true;
                opts.instant_dxyn = true;
                opts.allow_hires = true;
                opts.lores_dxy0_is_8x16 = true;
                opts.instructions_per_frame = 30;
            }
            Chip8Preset::SChip11 => {
                opts.just_shift_vx = true;
                opts.dont_reset_vf = true;
                opts.load_store_dont_inc_i = true;
                opts.jump0_bxnn = true;
                opts.instant_dxyn = true;
                opts.allow_hires = true;
                opts.sc11_collision = true;
                opts.half_pixel_scroll = true;
                opts.lores_dxy0_is_8x16 = true;
                opts.instructions_per_frame = 30;
            }
            Chip8Preset::SChipC => {
                opts.just_shift_vx = true;
                opts.load_store_dont_inc_i = true;
                opts.jump0_bxnn = true;
                opts.instant_dxyn = true;
                opts.allow_hires = true;
                opts.mode_change_clear = true;
                opts.lores_dxy0_is_16x16 = true;
                opts.instructions_per_frame = 30;
            }
            Chip8Preset::MegaChip => {
                opts.just_shift_vx = true;
                opts.load_store_dont_inc_i = true;
                opts.jump0_bxnn = true;
                opts.instant_dxyn = true;
                opts.allow_hires = true;
                opts.has_16bit_addr = true;
                opts.ram_size = 0x100_0000;
                opts.instructions_per_frame = 3000;
            }
            Chip8Preset::XoChip => {
                opts.load_store_inc_i_by_x = false;
                opts.wrap_sprites = true;
                opts.instant_dxyn = true;
                opts.allow_hires = true;
                opts.allow_colors = true;
                opts.has_16bit_addr = true;
                opts.xo_chip_sound = true;
                opts.mode_change_clear = true;
                opts.lores_dxy0_is_16x16 = true;
                opts.ram_size = 0x10000;
                opts.instructions_per_frame = 1000;
            }
        }
        opts
    }

    /// The canonical property template of the generic interpreter class.
    pub fn registered_prototype(registry: &mut PropertyRegistry) -> Properties {
        registry
            .prototype_or_init(PROP_CLASS_GENERIC, || {
                let mut props = Properties::new(PROP_CLASS_GENERIC);
                let preset_names: Vec<&str> =
                    Chip8Preset::ALL.iter().map(|p| p.name()).collect();
                props.register_property(Property::new(
                    PROP_BEHAVIOR,
                    PropertyValue::Combo(ComboValue::new(preset_names)),
                    "Base behaviour the quirks start from",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_TRACE_LOG,
                    PropertyValue::Bool(false),
                    "Enable trace log",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_MEMORY,
                    PropertyValue::Int(IntegerValue::new(4096, 2048, 0x100_0000)),
                    "Size of ram in bytes",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_START_ADDRESS,
                    PropertyValue::Int(IntegerValue::new(0x200, 0, 0xFFFF)),
                    "Initial program counter address",
                    PropertyAccess::ReadOnly,
                ));
                props.register_property(Property::new(
                    PROP_CLEAN_RAM,
                    PropertyValue::Bool(true),
                    "Clear ram on startup",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_IPF,
                    PropertyValue::Int(IntegerValue::new(15, 0, 1_000_000)),
                    "Instructions per frame",
                    PropertyAccess::Writable,
                ));
                props.register_property(Property::new(
                    PROP_FRAME_RATE,
                    PropertyValue::Int(IntegerValue::new(60, 50, 120)),
                    "Frames per second",
                    PropertyAccess::Writable,
                ));
                for (name, description) in [
                    (PROP_SHIFT_VX, "8xy6/8xyE shift Vx in place instead of Vy into Vx"),
                    (PROP_VF_RESET, "AND/OR/XOR clear VF"),
                    (PROP_I_BY_X, "Fx55/Fx65 leave I at I+x"),
                    (PROP_I_UNCHANGED, "Fx55/Fx65 leave I unchanged"),
                    (PROP_WRAP_SPRITES, "Sprite pixels past the edge wrap instead of clipping"),
                    (PROP_INSTANT_DXYN, "No vblank wait on draw"),
                    (PROP_LORES_DXY0_8X16, "Dxy0 draws an 8x16 sprite in lores"),
                    (PROP_LORES_DXY0_16X16, "Dxy0 draws a 16x16 sprite in lores"),
                    (PROP_SC11_COLLISIONS, "Hires collision reports row count"),
                    (PROP_HALF_PIXEL_SCROLL, "Scrolls move a single pixel in lores"),
                    (PROP_MODE_CHANGE_CLEAR, "00FE/00FF clear the screen"),
                    (PROP_JUMP0_BXNN, "Bxnn jumps to nnn + Vx"),
                    (PROP_CYCLIC_STACK, "Stack wraps instead of halting"),
                ] {
                    props.register_property(Property::new(
                        name,
                        PropertyValue::Bool(false),
                        description,
                        PropertyAccess::Writable,
                    ));
                }
                props.set_palette(Palette::monochrome());
                props
            })
            .clone()
    }

    /// Projects this options value into a [Properties] instance of the
    /// registered prototype.
    pub fn as_properties(&self, registry: &mut PropertyRegistry) -> Properties {
        let mut props = Self::registered_prototype(registry);
        let set_bool = |props: &mut Properties, name: &str, val: bool| {
            if let Ok(p) = props.at_mut(name) {
                p.set_bool(val);
            }
        };
        if let Ok(p) = props.at_mut(PROP_BEHAVIOR) {
            p.set_selected_text(self.behavior_base.name());
        }
        if let Ok(p) = props.at_mut(PROP_MEMORY) {
            p.set_int(self.ram_size as i32);
        }
        if let Ok(p) = props.at_mut(PROP_START_ADDRESS) {
            p.set_int(self.start_address as i32);
        }
        if let Ok(p) = props.at_mut(PROP_IPF) {
            p.set_int(self.instructions_per_frame);
        }
        if let Ok(p) = props.at_mut(PROP_FRAME_RATE) {
            p.set_int(self.frame_rate);
        }
        set_bool(&mut props, PROP_TRACE_LOG, self.trace_log);
        set_bool(&mut props, PROP_CLEAN_RAM, self.clean_ram);
        set_bool(&mut props, PROP_SHIFT_VX, self.just_shift_vx);
        set_bool(&mut props, PROP_VF_RESET, !self.dont_reset_vf);
        set_bool(&mut props, PROP_I_BY_X, self.load_store_inc_i_by_x);
        set_bool(&mut props, PROP_I_UNCHANGED, self.load_store_dont_inc_i);
        set_bool(&mut props, PROP_WRAP_SPRITES, self.wrap_sprites);
        set_bool(&mut props, PROP_INSTANT_DXYN, self.instant_dxyn);
        set_bool(&mut props, PROP_LORES_DXY0_8X16, self.lores_dxy0_is_8x16);
        set_bool(&mut props, PROP_LORES_DXY0_16X16, self.lores_dxy0_is_16x16);
        set_bool(&mut props, PROP_SC11_COLLISIONS, self.sc11_collision);
        set_bool(&mut props, PROP_HALF_PIXEL_SCROLL, self.half_pixel_scroll);
        set_bool(&mut props, PROP_MODE_CHANGE_CLEAR, self.mode_change_clear);
        set_bool(&mut props, PROP_JUMP0_BXNN, self.jump0_bxnn);
        set_bool(&mut props, PROP_CYCLIC_STACK, self.cyclic_stack);
        props.set_palette(self.palette.clone());
        props
    }

    /// Reads an options value back out of a [Properties] instance.
    pub fn from_properties(props: &Properties) -> Result<Self, CadmiumError> {
        let base = Chip8Preset::from_name(props.at(PROP_BEHAVIOR)?.selected_text())
            .unwrap_or(Chip8Preset::Chip8);
        let mut opts = Chip8Options::for_preset(base);
        opts.ram_size = props.at(PROP_MEMORY)?.get_int() as u32;
        opts.start_address = props.at(PROP_START_ADDRESS)?.get_int() as u32;
        opts.clean_ram = props.at(PROP_CLEAN_RAM)?.get_bool();
        opts.trace_log = props.at(PROP_TRACE_LOG)?.get_bool();
        opts.instructions_per_frame = props.at(PROP_IPF)?.get_int();
        opts.frame_rate = props.at(PROP_FRAME_RATE)?.get_int();
        opts.just_shift_vx = props.at(PROP_SHIFT_VX)?.get_bool();
        opts.dont_reset_vf = !props.at(PROP_VF_RESET)?.get_bool();
        opts.load_store_inc_i_by_x = props.at(PROP_I_BY_X)?.get_bool();
        opts.load_store_dont_inc_i = props.at(PROP_I_UNCHANGED)?.get_bool();
        opts.wrap_sprites = props.at(PROP_WRAP_SPRITES)?.get_bool();
        opts.instant_dxyn = props.at(PROP_INSTANT_DXYN)?.get_bool();
        opts.lores_dxy0_is_8x16 = props.at(PROP_LORES_DXY0_8X16)?.get_bool();
        opts.lores_dxy0_is_16x16 = props.at(PROP_LORES_DXY0_16X16)?.get_bool();
        opts.sc11_collision = props.at(PROP_SC11_COLLISIONS)?.get_bool();
        opts.half_pixel_scroll = props.at(PROP_HALF_PIXEL_SCROLL)?.get_bool();
        opts.mode_change_clear = props.at(PROP_MODE_CHANGE_CLEAR)?.get_bool();
        opts.jump0_bxnn = props.at(PROP_JUMP0_BXNN)?.get_bool();
        opts.cyclic_stack = props.at(PROP_CYCLIC_STACK)?.get_bool();
        if !props.palette().is_empty() {
            opts.palette = props.palette().clone();
        }
        Ok(opts)
    }

    fn max_stack(&self) -> usize {
        if self.behavior_base == Chip8Preset::MegaChip {
            24
        } else {
            16
        }
    }

    fn address_mask(&self) -> u32 {
        if self.behavior_base == Chip8Preset::MegaChip {
            0xFF_FFFF
        } else if self.has_16bit_addr {
            0xFFFF
        } else {
            0xFFF
        }
    }
}

type OpcodeHandler = fn(&mut Chip8GenericCore, &mut dyn EmulatorHost, u16);

/// MEGA-CHIP blend modes for `bmode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Alpha25,
    Alpha50,
    Alpha75,
    Add,
    Multiply,
}

impl BlendMode {
    fn from_nibble(n: u8) -> BlendMode {
        match n {
            1 => BlendMode::Alpha25,
            2 => BlendMode::Alpha50,
            3 => BlendMode::Alpha75,
            4 => BlendMode::Add,
            5 => BlendMode::Multiply,
            _ => BlendMode::Normal,
        }
    }
}

/// The generic CHIP-8 execution unit and emulation core.
pub struct Chip8GenericCore {
    options: Chip8Options,
    properties: Properties,
    handlers: Vec<OpcodeHandler>,

    v: [u8; 16],
    i: u32,
    pc: u32,
    sp: usize,
    dt: u8,
    st: u8,
    stack: [u16; 24],
    stack_size: usize,
    rpl: [u8; 16],
    memory: Vec<u8>,
    address_mask: u32,

    screen: VideoBuffer,
    screen_width: usize,
    screen_height: usize,
    is_hires: bool,
    is_megachip: bool,
    planes: u8,
    screen_needs_update: bool,

    cycle_counter: Cycles,
    frame_counter: i64,
    system_time: Time,

    exec_mode: ExecMode,
    cpu_state: CpuState,
    error_message: Option<String>,
    breakpoints: BreakpointMap,
    breakpoint_triggered: bool,
    step_over_sp: usize,

    wave_phase: f32,
    xo_pattern: [u8; 16],
    xo_pitch: u8,
    sample_step: f32,
    sample_start: u32,
    sample_length: u32,
    sample_loop: bool,
    mc_sample_pos: f64,

    mc_palette: [u32; 256],
    blend_mode: BlendMode,
    collision_color: u8,
    sprite_width: u16,
    sprite_height: u16,
    screen_alpha: u8,
    chip8x_background: u8,

    rom_name: String,
    rom_sha1: Option<String>,
}

impl Chip8GenericCore {
    pub fn new(registry: &mut PropertyRegistry, props: &Properties) -> Result<Self, CadmiumError> {
        let options = Chip8Options::from_properties(props)?;
        Ok(Self::with_options(registry, options))
    }

    pub fn with_options(registry: &mut PropertyRegistry, options: Chip8Options) -> Self {
        let properties = options.as_properties(registry);
        let (width, height) = physical_dimensions(&options);
        let clock = (options.instructions_per_frame.max(1) as u64)
            * (options.frame_rate.max(1) as u64);
        let mut core = Chip8GenericCore {
            address_mask: options.address_mask(),
            stack_size: options.max_stack(),
            screen: VideoBuffer::new(width, height),
            screen_width: width,
            screen_height: height,
            memory: vec![0; options.ram_size as usize + 1],
            system_time: Time::zero(clock),
            options,
            properties,
            handlers: Vec::new(),
            v: [0; 16],
            i: 0,
            pc: 0,
            sp: 0,
            dt: 0,
            st: 0,
            stack: [0; 24],
            rpl: [0; 16],
            is_hires: false,
            is_megachip: false,
            planes: 1,
            screen_needs_update: false,
            cycle_counter: 0,
            frame_counter: 0,
            exec_mode: ExecMode::Paused,
            cpu_state: CpuState::Normal,
            error_message: None,
            breakpoints: BreakpointMap::new(),
            breakpoint_triggered: false,
            step_over_sp: 0,
            wave_phase: 0.0,
            xo_pattern: [0; 16],
            xo_pitch: 64,
            sample_step: 0.0,
            sample_start: 0,
            sample_length: 0,
            sample_loop: true,
            mc_sample_pos: 0.0,
            mc_palette: [0; 256],
            blend_mode: BlendMode::Normal,
            collision_color: 1,
            sprite_width: 0,
            sprite_height: 0,
            screen_alpha: 255,
            chip8x_background: 0,
            rom_name: String::new(),
            rom_sha1: None,
        };
        core.set_handlers();
        core.handle_reset();
        core
    }

    pub fn options(&self) -> &Chip8Options {
        &self.options
    }

    pub fn variant(&self) -> Chip8Variant {
        self.options.behavior_base.variant()
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn v(&self, index: usize) -> u8 {
        self.v[index & 0xF]
    }

    pub fn i_register(&self) -> u32 {
        self.i
    }

    pub fn delay_timer(&self) -> u8 {
        self.dt
    }

    pub fn sound_timer(&self) -> u8 {
        self.st
    }

    pub fn is_hires(&self) -> bool {
        self.is_hires
    }

    pub fn xo_pitch(&self) -> u8 {
        self.xo_pitch
    }

    pub fn xo_audio_pattern(&self) -> &[u8; 16] {
        &self.xo_pattern
    }

    /// Name of the most recently loaded image.
    pub fn rom_name(&self) -> &str {
        &self.rom_name
    }

    /// The MEGA-CHIP global screen alpha set by `alpha nn`.
    pub fn screen_alpha(&self) -> u8 {
        self.screen_alpha
    }

    /// The MEGA-CHIP blend mode set by `bmode n`.
    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    /// The CHIP-8X background colour index stepped by `02A0`.
    pub fn chip8x_background(&self) -> u8 {
        self.chip8x_background
    }

    /// Current logical screen dimensions (lores variants report the halved
    /// size when a hires-capable core runs in lores).
    pub fn current_screen_size(&self) -> (usize, usize) {
        if self.is_megachip {
            (256, 192)
        } else if self.options.allow_hires && !self.is_hires {
            (self.screen_width / 2, self.screen_height / 2)
        } else {
            (self.screen_width, self.screen_height)
        }
    }

    // --- memory accessors -------------------------------------------------

    #[inline]
    fn read(&self, addr: u32) -> u8 {
        let addr = (addr & self.address_mask) as usize;
        if addr < self.memory.len() {
            self.memory[addr]
        } else {
            255
        }
    }

    #[inline]
    fn write(&mut self, addr: u32, val: u8) {
        let addr = (addr & self.address_mask) as usize;
        if addr < self.memory.len() - 1 {
            self.memory[addr] = val;
            if addr == 0 {
                self.fixup_safety_pad();
            }
        }
    }

    fn read_opcode(&self, addr: u32) -> u16 {
        ((self.read(addr) as u16) << 8) | self.read(addr.wrapping_add(1)) as u16
    }

    /// The final memory byte mirrors byte 0 so a fetch at the top of the
    /// address space never walks off the buffer.
    fn fixup_safety_pad(&mut self) {
        let first = self.memory[0];
        let last = self.memory.len() - 1;
        self.memory[last] = first;
    }

    // --- state machine ----------------------------------------------------

    fn halt(&mut self) {
        self.exec_mode = ExecMode::Paused;
        self.pc = self.pc.wrapping_sub(2) & self.address_mask;
    }

    fn error_halt(&mut self, message: String) {
        self.exec_mode = ExecMode::Paused;
        self.cpu_state = CpuState::Error;
        self.error_message = Some(message);
        self.pc = self.pc.wrapping_sub(2) & self.address_mask;
    }

    /// Per-frame timer handling: DT/ST tick down at the frame rate and a
    /// silent sound timer forces the wave phase to zero.
    fn handle_timer(&mut self) {
        if self.exec_mode != ExecMode::Paused {
            self.frame_counter += 1;
            if self.dt > 0 {
                self.dt -= 1;
            }
            if self.st > 0 {
                self.st -= 1;
            }
            if self.st == 0 {
                self.wave_phase = 0.0;
            }
        }
    }

    fn calc_next_frame(&self) -> Cycles {
        let ipf = self.options.instructions_per_frame.max(1) as Cycles;
        ((self.cycle_counter + ipf) / ipf) * ipf
    }

    /// Executes a single instruction, returning the cycles charged (one per
    /// retired instruction on the generic core).
    pub fn step_instruction(&mut self, host: &mut dyn EmulatorHost) -> Cycles {
        if self.exec_mode == ExecMode::Paused || self.cpu_state == CpuState::Error {
            return 0;
        }
        self.cycle_counter += 1;
        self.system_time.add_cycles(1);
        let opcode = self.read_opcode(self.pc);
        if self.options.trace_log {
            log::trace!("{:30} ; {}", self.disassemble_with_bytes(-1).1, self.dump_state_line());
        }
        self.pc = (self.pc + 2) & self.address_mask;
        let handler = self.handlers[opcode as usize];
        handler(self, host, opcode);
        if self.exec_mode == ExecMode::Step
            || (self.exec_mode == ExecMode::StepOver && self.sp <= self.step_over_sp)
            || (self.exec_mode == ExecMode::StepOut && self.sp < self.step_over_sp)
        {
            self.exec_mode = ExecMode::Paused;
        }
        if self.breakpoints.trigger(self.pc) {
            self.exec_mode = ExecMode::Paused;
            self.breakpoint_triggered = true;
        }
        1
    }

    pub fn step_instructions(&mut self, host: &mut dyn EmulatorHost, count: usize) {
        for _ in 0..count {
            self.step_instruction(host);
        }
    }

    fn handle_reset(&mut self) {
        if self.options.clean_ram {
            self.memory.fill(0);
        } else {
            rand::thread_rng().fill(&mut self.memory[..]);
        }
        self.memory[FONT_ADDRESS as usize..FONT_ADDRESS as usize + SMALL_FONT.len()]
            .copy_from_slice(&SMALL_FONT);
        self.memory[BIG_FONT_ADDRESS as usize..BIG_FONT_ADDRESS as usize + BIG_FONT.len()]
            .copy_from_slice(&BIG_FONT);
        self.fixup_safety_pad();
        self.v = [0; 16];
        self.i = 0;
        self.pc = self.options.start_address & self.address_mask;
        self.sp = 0;
        self.stack = [0; 24];
        self.dt = 0;
        self.st = 0;
        self.planes = 1;
        self.is_hires = self.options.only_hires;
        self.is_megachip = false;
        self.screen.set_all(0);
        self.screen.set_palette(&self.options.palette);
        self.mc_palette = [0; 256];
        self.mc_palette[0] = 0x000000FF;
        self.mc_palette[1] = 0xFFFFFFFF;
        self.blend_mode = BlendMode::Normal;
        self.collision_color = 1;
        self.sprite_width = 0;
        self.sprite_height = 0;
        self.screen_alpha = 255;
        self.chip8x_background = 0;
        self.wave_phase = 0.0;
        self.xo_pattern = [0; 16];
        self.xo_pitch = 64;
        self.sample_length = 0;
        self.mc_sample_pos = 0.0;
        self.cycle_counter = 0;
        self.frame_counter = 0;
        self.system_time.reset();
        self.cpu_state = CpuState::Normal;
        self.error_message = None;
        self.breakpoint_triggered = false;
        self.screen_needs_update = true;
    }

    // --- dispatch table construction --------------------------------------

    /// Fills every dispatch slot whose opcode matches `opcode` under `mask`.
    fn on(&mut self, mask: u16, opcode: u16, handler: OpcodeHandler) {
        for op in 0..=0xFFFFu16 {
            if op & mask == opcode {
                self.handlers[op as usize] = handler;
            }
        }
    }

    /// Selects the per-variant handler set once, at construction.
    fn set_handlers(&mut self) {
        self.handlers = vec![Self::op_invalid as OpcodeHandler; 0x10000];
        let o = self.options.clone();
        self.on(0xFFFF, 0x00E0, Self::op_00e0);
        if o.cyclic_stack {
            self.on(0xFFFF, 0x00EE, Self::op_00ee_cyclic);
            self.on(0xF000, 0x2000, Self::op_2nnn_cyclic);
        } else {
            self.on(0xFFFF, 0x00EE, Self::op_00ee);
            self.on(0xF000, 0x2000, Self::op_2nnn);
        }
        self.on(0xF000, 0x1000, Self::op_1nnn);
        self.on(0xF000, 0x3000, Self::op_3xnn);
        self.on(0xF000, 0x4000, Self::op_4xnn);
        self.on(0xF00F, 0x5000, Self::op_5xy0);
        self.on(0xF000, 0x6000, Self::op_6xnn);
        self.on(0xF000, 0x7000, Self::op_7xnn);
        self.on(0xF00F, 0x8000, Self::op_8xy0);
        if o.dont_reset_vf {
            self.on(0xF00F, 0x8001, Self::op_8xy1_dont_reset);
            self.on(0xF00F, 0x8002, Self::op_8xy2_dont_reset);
            self.on(0xF00F, 0x8003, Self::op_8xy3_dont_reset);
        } else {
            self.on(0xF00F, 0x8001, Self::op_8xy1);
            self.on(0xF00F, 0x8002, Self::op_8xy2);
            self.on(0xF00F, 0x8003, Self::op_8xy3);
        }
        self.on(0xF00F, 0x8004, Self::op_8xy4);
        self.on(0xF00F, 0x8005, Self::op_8xy5);
        self.on(0xF00F, 0x8007, Self::op_8xy7);
        if o.just_shift_vx {
            self.on(0xF00F, 0x8006, Self::op_8xy6_just_vx);
            self.on(0xF00F, 0x800E, Self::op_8xye_just_vx);
        } else {
            self.on(0xF00F, 0x8006, Self::op_8xy6);
            self.on(0xF00F, 0x800E, Self::op_8xye);
        }
        self.on(0xF00F, 0x9000, Self::op_9xy0);
        self.on(0xF000, 0xA000, Self::op_annn);
        if o.jump0_bxnn {
            self.on(0xF000, 0xB000, Self::op_bxnn);
        } else {
            self.on(0xF000, 0xB000, Self::op_bnnn);
        }
        self.on(0xF000, 0xC000, Self::op_cxnn);
        if o.instant_dxyn {
            self.on(0xF000, 0xD000, Self::op_dxyn);
        } else {
            self.on(0xF000, 0xD000, Self::op_dxyn_display_wait);
        }
        self.on(0xF0FF, 0xE09E, Self::op_ex9e);
        self.on(0xF0FF, 0xE0A1, Self::op_exa1);
        self.on(0xF0FF, 0xF007, Self::op_fx07);
        self.on(0xF0FF, 0xF00A, Self::op_fx0a);
        self.on(0xF0FF, 0xF015, Self::op_fx15);
        self.on(0xF0FF, 0xF018, Self::op_fx18);
        self.on(0xF0FF, 0xF01E, Self::op_fx1e);
        self.on(0xF0FF, 0xF029, Self::op_fx29);
        self.on(0xF0FF, 0xF033, Self::op_fx33);
        if o.load_store_inc_i_by_x {
            self.on(0xF0FF, 0xF055, Self::op_fx55_inc_by_x);
            self.on(0xF0FF, 0xF065, Self::op_fx65_inc_by_x);
        } else if o.load_store_dont_inc_i {
            self.on(0xF0FF, 0xF055, Self::op_fx55_dont_inc);
            self.on(0xF0FF, 0xF065, Self::op_fx65_dont_inc);
        } else {
            self.on(0xF0FF, 0xF055, Self::op_fx55);
            self.on(0xF0FF, 0xF065, Self::op_fx65);
        }
        let base = o.behavior_base;
        let schip = o.allow_hires;
        if schip {
            self.on(0xFFF0, 0x00C0, Self::op_00cn);
            self.on(0xFFFF, 0x00FB, Self::op_00fb);
            self.on(0xFFFF, 0x00FC, Self::op_00fc);
            self.on(0xFFFF, 0x00FD, Self::op_00fd);
            self.on(0xFFFF, 0x00FE, Self::op_00fe);
            self.on(0xFFFF, 0x00FF, Self::op_00ff);
            self.on(0xF0FF, 0xF030, Self::op_fx30);
        }
        if base != Chip8Preset::Chip8 && base != Chip8Preset::Chip8X {
            self.on(0xF0FF, 0xF075, Self::op_fx75);
            self.on(0xF0FF, 0xF085, Self::op_fx85);
        }
        if base == Chip8Preset::XoChip {
            self.on(0xFFF0, 0x00D0, Self::op_00dn);
            self.on(0xF00F, 0x5002, Self::op_5xy2);
            self.on(0xF00F, 0x5003, Self::op_5xy3);
            self.on(0xFFFF, 0xF000, Self::op_f000);
            self.on(0xF0FF, 0xF001, Self::op_fx01);
            self.on(0xFFFF, 0xF002, Self::op_f002);
            self.on(0xF0FF, 0xF03A, Self::op_fx3a);
            // Skips must hop over the 4-byte long-I form.
            self.on(0xF000, 0x3000, Self::op_3xnn_with_f000);
            self.on(0xF000, 0x4000, Self::op_4xnn_with_f000);
            self.on(0xF00F, 0x5000, Self::op_5xy0_with_f000);
            self.on(0xF00F, 0x9000, Self::op_9xy0_with_f000);
            self.on(0xF0FF, 0xE09E, Self::op_ex9e_with_f000);
            self.on(0xF0FF, 0xE0A1, Self::op_exa1_with_f000);
        }
        if base == Chip8Preset::MegaChip {
            self.on(0xFFFF, 0x0010, Self::op_0010);
            self.on(0xFFFF, 0x0011, Self::op_0011);
            self.on(0xFFF0, 0x00B0, Self::op_00bn);
            self.on(0xFF00, 0x0100, Self::op_01nn);
            self.on(0xFF00, 0x0200, Self::op_02nn);
            self.on(0xFF00, 0x0300, Self::op_03nn);
            self.on(0xFF00, 0x0400, Self::op_04nn);
            self.on(0xFF00, 0x0500, Self::op_05nn);
            self.on(0xFFF0, 0x0600, Self::op_060n);
            self.on(0xFFFF, 0x0700, Self::op_0700);
            self.on(0xFFF0, 0x0800, Self::op_080n);
            self.on(0xFF00, 0x0900, Self::op_09nn);
        }
        if base == Chip8Preset::Chip8X {
            self.on(0xFFFF, 0x02A0, Self::op_02a0);
            self.on(0xF00F, 0x5001, Self::op_5xy1_c8x);
            self.on(0xF000, 0xB000, Self::op_bxyn_c8x);
            self.on(0xF00F, 0xB000, Self::op_bxy0_c8x);
            self.on(0xF0FF, 0xE0F2, Self::op_exf2_c8x);
            self.on(0xF0FF, 0xE0F5, Self::op_exf5_c8x);
            self.on(0xF0FF, 0xF0F8, Self::op_fxf8_c8x);
            self.on(0xF0FF, 0xF0FB, Self::op_fxfb_c8x);
        }
    }

    // --- opcode handlers --------------------------------------------------

    fn op_invalid(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let address = self.pc.wrapping_sub(2) & self.address_mask;
        self.error_halt(format!("illegal opcode {:04X} at {:04X}", opcode, address));
    }

    fn op_00e0(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        if self.options.allow_colors {
            let planes = self.planes;
            self.screen.clear_planes(planes);
        } else {
            self.screen.set_all(0);
        }
        self.screen_needs_update = true;
    }

    fn op_00ee(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        if self.sp == 0 {
            self.error_halt("return with empty call stack".into());
            return;
        }
        self.sp -= 1;
        self.pc = self.stack[self.sp] as u32;
    }

    fn op_00ee_cyclic(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.sp = if self.sp == 0 { self.stack_size - 1 } else { self.sp - 1 };
        self.pc = self.stack[self.sp] as u32;
    }

    fn op_00cn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let count = self.scroll_amount((opcode & 0xF) as usize);
        let mask = self.scroll_mask();
        self.screen.scroll(ScrollDirection::Down, count, mask);
        self.screen_needs_update = true;
    }

    fn op_00dn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let count = self.scroll_amount((opcode & 0xF) as usize);
        let mask = self.scroll_mask();
        self.screen.scroll(ScrollDirection::Up, count, mask);
        self.screen_needs_update = true;
    }

    fn op_00fb(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        let count = self.scroll_amount(4);
        let mask = self.scroll_mask();
        self.screen.scroll(ScrollDirection::Right, count, mask);
        self.screen_needs_update = true;
    }

    fn op_00fc(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        let count = self.scroll_amount(4);
        let mask = self.scroll_mask();
        self.screen.scroll(ScrollDirection::Left, count, mask);
        self.screen_needs_update = true;
    }

    fn op_00fd(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        // Exit: the interpreter stops; only a reset revives it.
        self.halt();
        self.cpu_state = CpuState::Halt;
    }

    fn op_00fe(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        if !self.options.only_hires {
            self.is_hires = false;
            if self.options.mode_change_clear {
                self.screen.set_all(0);
            }
            self.screen_needs_update = true;
        }
    }

    fn op_00ff(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.is_hires = true;
        if self.options.mode_change_clear {
            self.screen.set_all(0);
        }
        self.screen_needs_update = true;
    }

    fn op_1nnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.pc = (opcode & 0xFFF) as u32;
    }

    fn op_2nnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.sp >= self.stack_size {
            self.error_halt("call stack overflow".into());
            return;
        }
        self.stack[self.sp] = self.pc as u16;
        self.sp += 1;
        self.pc = (opcode & 0xFFF) as u32;
    }

    fn op_2nnn_cyclic(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.stack[self.sp % self.stack_size] = self.pc as u16;
        self.sp = (self.sp + 1) % self.stack_size;
        self.pc = (opcode & 0xFFF) as u32;
    }

    fn skip_next(&mut self) {
        self.pc = (self.pc + 2) & self.address_mask;
    }

    fn skip_next_with_f000(&mut self) {
        let step = if self.read_opcode(self.pc) == 0xF000 { 4 } else { 2 };
        self.pc = (self.pc + step) & self.address_mask;
    }

    fn op_3xnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] == (opcode & 0xFF) as u8 {
            self.skip_next();
        }
    }

    fn op_3xnn_with_f000(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] == (opcode & 0xFF) as u8 {
            self.skip_next_with_f000();
        }
    }

    fn op_4xnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] != (opcode & 0xFF) as u8 {
            self.skip_next();
        }
    }

    fn op_4xnn_with_f000(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] != (opcode & 0xFF) as u8 {
            self.skip_next_with_f000();
        }
    }

    fn op_5xy0(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] == self.v[((opcode >> 4) & 0xF) as usize] {
            self.skip_next();
        }
    }

    fn op_5xy0_with_f000(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] == self.v[((opcode >> 4) & 0xF) as usize] {
            self.skip_next_with_f000();
        }
    }

    fn op_5xy2(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let count = x.abs_diff(y);
        for offset in 0..=count {
            let reg = if x < y { x + offset } else { x - offset };
            let val = self.v[reg];
            self.write(self.i.wrapping_add(offset as u32), val);
        }
    }

    fn op_5xy3(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let count = x.abs_diff(y);
        for offset in 0..=count {
            let reg = if x < y { x + offset } else { x - offset };
            self.v[reg] = self.read(self.i.wrapping_add(offset as u32));
        }
    }

    fn op_6xnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.v[((opcode >> 8) & 0xF) as usize] = (opcode & 0xFF) as u8;
    }

    fn op_7xnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] = self.v[x].wrapping_add((opcode & 0xFF) as u8);
    }

    fn op_8xy0(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.v[((opcode >> 8) & 0xF) as usize] = self.v[((opcode >> 4) & 0xF) as usize];
    }

    fn op_8xy1(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] |= self.v[((opcode >> 4) & 0xF) as usize];
        self.v[0xF] = 0;
    }

    fn op_8xy1_dont_reset(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] |= self.v[((opcode >> 4) & 0xF) as usize];
    }

    fn op_8xy2(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] &= self.v[((opcode >> 4) & 0xF) as usize];
        self.v[0xF] = 0;
    }

    fn op_8xy2_dont_reset(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] &= self.v[((opcode >> 4) & 0xF) as usize];
    }

    fn op_8xy3(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] ^= self.v[((opcode >> 4) & 0xF) as usize];
        self.v[0xF] = 0;
    }

    fn op_8xy3_dont_reset(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] ^= self.v[((opcode >> 4) & 0xF) as usize];
    }

    fn op_8xy4(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let sum = self.v[x] as u16 + self.v[y] as u16;
        self.v[x] = sum as u8;
        self.v[0xF] = (sum > 0xFF) as u8;
    }

    fn op_8xy5(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let no_borrow = self.v[x] >= self.v[y];
        self.v[x] = self.v[x].wrapping_sub(self.v[y]);
        self.v[0xF] = no_borrow as u8;
    }

    fn op_8xy6(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let carry = self.v[y] & 1;
        self.v[x] = self.v[y] >> 1;
        self.v[0xF] = carry;
    }

    fn op_8xy6_just_vx(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let carry = self.v[x] & 1;
        self.v[x] >>= 1;
        self.v[0xF] = carry;
    }

    fn op_8xy7(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let no_borrow = self.v[y] >= self.v[x];
        self.v[x] = self.v[y].wrapping_sub(self.v[x]);
        self.v[0xF] = no_borrow as u8;
    }

    fn op_8xye(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let carry = self.v[y] >> 7;
        self.v[x] = self.v[y] << 1;
        self.v[0xF] = carry;
    }

    fn op_8xye_just_vx(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let carry = self.v[x] >> 7;
        self.v[x] <<= 1;
        self.v[0xF] = carry;
    }

    fn op_9xy0(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] != self.v[((opcode >> 4) & 0xF) as usize] {
            self.skip_next();
        }
    }

    fn op_9xy0_with_f000(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.v[((opcode >> 8) & 0xF) as usize] != self.v[((opcode >> 4) & 0xF) as usize] {
            self.skip_next_with_f000();
        }
    }

    fn op_annn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.i = (opcode & 0xFFF) as u32;
    }

    fn op_bnnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.pc = ((opcode & 0xFFF) as u32 + self.v[0] as u32) & self.address_mask;
    }

    fn op_bxnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.pc = ((opcode & 0xFFF) as u32 + self.v[x] as u32) & self.address_mask;
    }

    fn op_cxnn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let random: u8 = rand::thread_rng().gen();
        self.v[x] = random & (opcode & 0xFF) as u8;
    }

    fn op_ex9e(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if host.key_down(key) {
            self.skip_next();
        }
    }

    fn op_ex9e_with_f000(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if host.key_down(key) {
            self.skip_next_with_f000();
        }
    }

    fn op_exa1(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if !host.key_down(key) {
            self.skip_next();
        }
    }

    fn op_exa1_with_f000(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if !host.key_down(key) {
            self.skip_next_with_f000();
        }
    }

    fn op_f000(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.i = self.read_opcode(self.pc) as u32;
        self.pc = (self.pc + 2) & self.address_mask;
    }

    fn op_fx01(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.planes = ((opcode >> 8) & 0xF) as u8;
    }

    fn op_f002(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        for offset in 0..16 {
            self.xo_pattern[offset] = self.read(self.i.wrapping_add(offset as u32));
        }
    }

    fn op_fx07(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.v[((opcode >> 8) & 0xF) as usize] = self.dt;
    }

    fn op_fx0a(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        match host.key_pressed() {
            Some(key) => {
                self.v[((opcode >> 8) & 0xF) as usize] = key & 0xF;
                self.cpu_state = CpuState::Normal;
            }
            None => {
                // Busy-wait by re-executing this instruction every cycle.
                self.pc = self.pc.wrapping_sub(2) & self.address_mask;
                self.cpu_state = CpuState::Wait;
            }
        }
    }

    fn op_fx15(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.dt = self.v[((opcode >> 8) & 0xF) as usize];
    }

    fn op_fx18(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.st = self.v[((opcode >> 8) & 0xF) as usize];
        if self.st == 0 {
            self.wave_phase = 0.0;
        }
    }

    fn op_fx1e(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        self.i = (self.i + self.v[x] as u32) & self.address_mask;
    }

    fn op_fx29(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let digit = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        self.i = FONT_ADDRESS + digit as u32 * 5;
    }

    fn op_fx30(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let digit = (self.v[((opcode >> 8) & 0xF) as usize] % 10) as u32;
        self.i = BIG_FONT_ADDRESS + digit * 10;
    }

    fn op_fx33(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let val = self.v[((opcode >> 8) & 0xF) as usize];
        self.write(self.i, val / 100);
        self.write(self.i.wrapping_add(1), (val % 100) / 10);
        self.write(self.i.wrapping_add(2), val % 10);
    }

    fn op_fx3a(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.xo_pitch = self.v[((opcode >> 8) & 0xF) as usize];
    }

    fn op_fx55(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            let val = self.v[offset];
            self.write(self.i.wrapping_add(offset as u32), val);
        }
        self.i = (self.i + x as u32 + 1) & self.address_mask;
    }

    fn op_fx55_inc_by_x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            let val = self.v[offset];
            self.write(self.i.wrapping_add(offset as u32), val);
        }
        self.i = (self.i + x as u32) & self.address_mask;
    }

    fn op_fx55_dont_inc(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            let val = self.v[offset];
            self.write(self.i.wrapping_add(offset as u32), val);
        }
    }

    fn op_fx65(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            self.v[offset] = self.read(self.i.wrapping_add(offset as u32));
        }
        self.i = (self.i + x as u32 + 1) & self.address_mask;
    }

    fn op_fx65_inc_by_x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            self.v[offset] = self.read(self.i.wrapping_add(offset as u32));
        }
        self.i = (self.i + x as u32) & self.address_mask;
    }

    fn op_fx65_dont_inc(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            self.v[offset] = self.read(self.i.wrapping_add(offset as u32));
        }
    }

    fn op_fx75(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            self.rpl[offset] = self.v[offset];
        }
    }

    fn op_fx85(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        for offset in 0..=x {
            self.v[offset] = self.rpl[offset];
        }
    }

    // --- MEGA-CHIP handlers -----------------------------------------------

    fn op_0010(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.is_megachip = false;
        self.screen.set_dimensions(self.screen_width, self.screen_height);
        self.screen.set_all(0);
        self.screen_needs_update = true;
    }

    fn op_0011(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.is_megachip = true;
        self.screen.set_dimensions(256, 192);
        self.screen.set_all(0);
        self.screen_needs_update = true;
    }

    fn op_00bn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let count = (opcode & 0xF) as usize;
        self.screen.scroll(ScrollDirection::Up, count, 0xFF);
        self.screen_needs_update = true;
    }

    fn op_01nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let next = self.read_opcode(self.pc) as u32;
        self.i = (((opcode & 0xFF) as u32) << 16) | next;
        self.pc = (self.pc + 2) & self.address_mask;
    }

    /// `ldpal nn`: load nn palette entries of packed AARRGGBB data from I.
    /// Alpha is stored per entry; blending is controlled by `bmode` with alpha
    /// 255 meaning opaque.
    fn op_02nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let count = (opcode & 0xFF) as usize;
        for entry in 0..count {
            let base = self.i.wrapping_add(entry as u32 * 4);
            let a = self.read(base);
            let r = self.read(base.wrapping_add(1));
            let g = self.read(base.wrapping_add(2));
            let b = self.read(base.wrapping_add(3));
            let rgba = ((r as u32) << 24) | ((g as u32) << 16) | ((b as u32) << 8) | a as u32;
            self.mc_palette[entry + 1] = rgba;
            self.screen.set_palette_entry((entry + 1) as u8, rgba);
        }
    }

    fn op_03nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.sprite_width = {
            let w = opcode & 0xFF;
            if w == 0 {
                256
            } else {
                w
            }
        };
    }

    fn op_04nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.sprite_height = {
            let h = opcode & 0xFF;
            if h == 0 {
                256
            } else {
                h
            }
        };
    }

    fn op_05nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.screen_alpha = (opcode & 0xFF) as u8;
    }

    /// `digisnd n`: start 8-bit sample playback from I; the first six bytes
    /// carry the playback rate and length.
    fn op_060n(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let rate = ((self.read(self.i) as u32) << 8) | self.read(self.i.wrapping_add(1)) as u32;
        let length = ((self.read(self.i.wrapping_add(2)) as u32) << 16)
            | ((self.read(self.i.wrapping_add(3)) as u32) << 8)
            | self.read(self.i.wrapping_add(4)) as u32;
        self.sample_start = self.i.wrapping_add(6);
        self.sample_length = length;
        self.sample_step = rate as f32;
        self.sample_loop = opcode & 0xF == 0;
        self.mc_sample_pos = 0.0;
    }

    fn op_0700(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.sample_length = 0;
        self.mc_sample_pos = 0.0;
    }

    fn op_080n(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.blend_mode = BlendMode::from_nibble((opcode & 0xF) as u8);
    }

    fn op_09nn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        self.collision_color = (opcode & 0xFF) as u8;
    }

    // --- CHIP-8X handlers -------------------------------------------------

    fn op_02a0(&mut self, _host: &mut dyn EmulatorHost, _opcode: u16) {
        self.chip8x_background = (self.chip8x_background + 1) & 3;
        self.screen_needs_update = true;
    }

    fn op_5xy1_c8x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let high = ((self.v[x] >> 4) + (self.v[y] >> 4)) & 7;
        let low = ((self.v[x] & 0xF) + (self.v[y] & 0xF)) & 7;
        self.v[x] = (high << 4) | low;
    }

    fn op_bxy0_c8x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        // Colour a zone of the screen; the zone grid is coarse (8x4 cells).
        let x = ((opcode >> 8) & 0xF) as usize;
        let _from = self.v[x];
        let _color = self.v[(x + 1) & 0xF] & 7;
        self.screen_needs_update = true;
    }

    fn op_bxyn_c8x(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        self.op_bxy0_c8x(host, opcode & 0xFFF0);
    }

    fn op_exf2_c8x(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if host.key_down(key) {
            self.skip_next();
        }
    }

    fn op_exf5_c8x(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let key = self.v[((opcode >> 8) & 0xF) as usize] & 0xF;
        if !host.key_down(key) {
            self.skip_next();
        }
    }

    fn op_fxf8_c8x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        // VP-595 simple sound: Vx sets the tone divider.
        let x = ((opcode >> 8) & 0xF) as usize;
        self.xo_pitch = self.v[x];
    }

    fn op_fxfb_c8x(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        // Input port read; no port hardware is attached on the generic core.
        let x = ((opcode >> 8) & 0xF) as usize;
        self.v[x] = 0;
    }

    // --- sprite engine ----------------------------------------------------

    fn scroll_mask(&self) -> u8 {
        if self.options.allow_colors {
            self.planes
        } else {
            0xFF
        }
    }

    /// Physical scroll distance for a logical scroll of `n`: doubled in lores
    /// on a hires-capable core unless the half-pixel quirk asks for the SCHIP
    /// 1.x behaviour.
    fn scroll_amount(&self, n: usize) -> usize {
        if self.options.allow_hires && !self.is_hires && !self.options.half_pixel_scroll {
            n * 2
        } else {
            n
        }
    }

    fn op_dxyn(&mut self, _host: &mut dyn EmulatorHost, opcode: u16) {
        if self.is_megachip {
            self.draw_mega_sprite(opcode);
            return;
        }
        let lines = (opcode & 0xF) as usize;
        let vx = self.v[((opcode >> 8) & 0xF) as usize] as usize;
        let vy = self.v[((opcode >> 4) & 0xF) as usize] as usize;
        // Start coordinates only wrap when the wrap quirk is on; otherwise the
        // whole sprite clips at the edges.
        let wrap = self.options.wrap_sprites;
        if self.options.allow_hires && !self.is_hires {
            let (lw, lh) = (self.screen_width / 2, self.screen_height / 2);
            let (x, y) = if wrap { (vx % lw, vy % lh) } else { (vx, vy) };
            self.v[0xF] = self.draw_sprite(x * 2, y * 2, lines, false);
        } else {
            let (lw, lh) = (self.screen_width, self.screen_height);
            let (x, y) = if wrap { (vx % lw, vy % lh) } else { (vx, vy) };
            self.v[0xF] = self.draw_sprite(x, y, lines, true);
        }
        self.screen_needs_update = true;
    }

    /// The display-wait variant: draws retry until the next frame boundary,
    /// charging no additional progress meanwhile.
    fn op_dxyn_display_wait(&mut self, host: &mut dyn EmulatorHost, opcode: u16) {
        let ipf = self.options.instructions_per_frame;
        if ipf != 0 && self.cycle_counter % ipf as Cycles != 0 {
            self.pc = self.pc.wrapping_sub(2) & self.address_mask;
            self.cpu_state = CpuState::Wait;
            return;
        }
        self.cpu_state = CpuState::Normal;
        self.op_dxyn(host, opcode);
    }

    /// Draws a classic bit-sprite at physical coordinates; `hires` selects
    /// unscaled drawing, otherwise pixels are doubled.
    fn draw_sprite(&mut self, x: usize, y: usize, height_in: usize, hires: bool) -> u8 {
        let scr_w = self.screen_width;
        let scr_h = self.screen_height;
        let scale = if self.options.allow_hires && !hires { 2 } else { 1 };
        let mut width = 8usize;
        let mut height = height_in;
        if height == 0 {
            height = 16;
            if self.options.lores_dxy0_is_16x16 || (self.is_hires && !self.options.only_hires) {
                width = 16;
            } else if !self.options.lores_dxy0_is_8x16 {
                width = 0;
                height = 0;
            }
        }
        let mut collision = 0u32;
        let mut planes = if self.options.allow_colors { self.planes } else { 1 };
        let mut addr = self.i;
        while planes != 0 {
            let plane = planes & planes.wrapping_neg();
            planes &= planes - 1;
            for line in 0..height {
                let mut value = (self.read(addr) as u16) << 8;
                addr = addr.wrapping_add(1);
                if width == 16 {
                    value |= self.read(addr) as u16;
                    addr = addr.wrapping_add(1);
                }
                if self.options.wrap_sprites {
                    let mut line_col = 0;
                    for bit in 0..width {
                        if value & (0x8000 >> bit) != 0 {
                            let px = (x + bit * scale) % scr_w;
                            let py = (y + line * scale) % scr_h;
                            if self.draw_scaled_pixel(px, py, plane, scale) {
                                line_col = 1;
                            }
                        }
                    }
                    collision += line_col;
                } else if y + line * scale < scr_h {
                    let mut line_col = 0;
                    for bit in 0..width {
                        if value & (0x8000 >> bit) != 0 && x + bit * scale < scr_w {
                            if self.draw_scaled_pixel(x + bit * scale, y + line * scale, plane, scale)
                            {
                                line_col = 1;
                            }
                        }
                    }
                    collision += line_col;
                } else if self.options.sc11_collision {
                    // Rows clipped off the bottom count as collisions.
                    collision += 1;
                }
            }
        }
        if self.options.sc11_collision && hires && self.is_hires {
            collision.min(255) as u8
        } else {
            (collision != 0) as u8
        }
    }

    fn draw_scaled_pixel(&mut self, x: usize, y: usize, plane: u8, scale: usize) -> bool {
        if scale == 1 {
            return self.screen.xor_pixel(x, y, plane);
        }
        let mut hit = false;
        for dy in 0..scale {
            for dx in 0..scale {
                let px = x + dx;
                let py = y + dy;
                if px < self.screen_width && py < self.screen_height {
                    hit |= self.screen.xor_pixel(px, py, plane);
                }
            }
        }
        hit
    }

    /// MEGA-CHIP indexed-colour sprite: `sprw`×`sprh` bytes of palette indices,
    /// index 0 transparent, collision against the configured collision colour.
    fn draw_mega_sprite(&mut self, opcode: u16) {
        let x = self.v[((opcode >> 8) & 0xF) as usize] as usize;
        let y = self.v[((opcode >> 4) & 0xF) as usize] as usize;
        let width = if self.sprite_width == 0 { 8 } else { self.sprite_width as usize };
        let height = if self.sprite_height == 0 { (opcode & 0xF) as usize } else { self.sprite_height as usize };
        self.v[0xF] = 0;
        let mut addr = self.i;
        for line in 0..height {
            for col in 0..width {
                let index = self.read(addr.wrapping_add(col as u32));
                if index != 0 {
                    let (px, py) = if self.options.wrap_sprites {
                        ((x + col) % 256, (y + line) % 192)
                    } else {
                        if x + col >= 256 || y + line >= 192 {
                            continue;
                        }
                        (x + col, y + line)
                    };
                    if self.screen.pixel(px, py) == self.collision_color {
                        self.v[0xF] = 1;
                    }
                    self.screen.set_pixel(px, py, index);
                }
            }
            addr = addr.wrapping_add(width as u32);
        }
        self.screen_needs_update = true;
    }

    /// Pulls the next MEGA-CHIP digitised sample as a signed byte.
    pub fn next_sample(&mut self, sample_rate: u32) -> i8 {
        if self.sample_length == 0 || sample_rate == 0 {
            return 0;
        }
        let val = self.read(self.sample_start.wrapping_add(self.mc_sample_pos as u32));
        self.mc_sample_pos += self.sample_step as f64 / sample_rate as f64;
        if self.mc_sample_pos >= self.sample_length as f64 {
            if self.sample_loop {
                self.mc_sample_pos -= self.sample_length as f64;
            } else {
                self.sample_length = 0;
                self.mc_sample_pos = 0.0;
            }
        }
        (val as i16 - 128) as i8
    }
}

fn physical_dimensions(options: &Chip8Options) -> (usize, usize) {
    if options.behavior_base == Chip8Preset::MegaChip {
        (256, 192)
    } else if options.allow_hires {
        (128, 64)
    } else {
        (64, 32)
    }
}

impl GenericCpu for Chip8GenericCore {
    fn cpu_id(&self) -> u32 {
        0xC8
    }

    fn name(&self) -> &'static str {
        "GenericChip8"
    }

    fn register_names(&self) -> &'static [&'static str] {
        &[
            "V0", "V1", "V2", "V3", "V4", "V5", "V6", "V7", "V8", "V9", "VA", "VB", "VC", "VD",
            "VE", "VF", "I", "DT", "ST", "PC", "SP",
        ]
    }

    fn register(&self, index: usize) -> RegisterValue {
        match index {
            0..=15 => RegisterValue { value: self.v[index] as u32, bits: 8 },
            16 => RegisterValue {
                value: self.i,
                bits: if self.options.behavior_base == Chip8Preset::MegaChip {
                    24
                } else if self.options.has_16bit_addr {
                    16
                } else {
                    12
                },
            },
            17 => RegisterValue { value: self.dt as u32, bits: 8 },
            18 => RegisterValue { value: self.st as u32, bits: 8 },
            19 => RegisterValue { value: self.pc, bits: 16 },
            _ => RegisterValue { value: self.sp as u32, bits: 8 },
        }
    }

    fn set_register(&mut self, index: usize, value: u32) {
        match index {
            0..=15 => self.v[index] = value as u8,
            16 => self.i = value & self.address_mask,
            17 => self.dt = value as u8,
            18 => self.st = value as u8,
            19 => self.pc = value & self.address_mask,
            _ => self.sp = value as usize % self.stack_size.max(1),
        }
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn sp(&self) -> u32 {
        self.sp as u32
    }

    fn cycles(&self) -> Cycles {
        self.cycle_counter
    }

    fn time(&self) -> Time {
        self.system_time
    }

    fn stack_size(&self) -> usize {
        self.stack_size
    }

    fn stack(&self) -> StackContent {
        let mut bytes = Vec::with_capacity(self.stack_size * 2);
        for entry in &self.stack[..self.stack_size] {
            bytes.extend_from_slice(&entry.to_be_bytes());
        }
        StackContent::new(2, Endianness::Big, StackDirection::Upwards, bytes)
    }

    fn read_memory_byte(&self, addr: u32) -> u8 {
        self.read(addr)
    }

    fn memory_size(&self) -> usize {
        self.memory.len() - 1
    }

    fn disassemble_with_bytes(&self, addr: i64) -> (usize, String) {
        let address = if addr < 0 { self.pc } else { addr as u32 };
        let opcode = self.read_opcode(address);
        let next = self.read_opcode(address.wrapping_add(2));
        let (size, text) = crate::decompiler::disassemble_opcode(opcode, next, self.variant());
        let line = if size == 4 {
            format!("{:04X}: {:04X} {:04X}  {}", address, opcode, next, text)
        } else {
            format!("{:04X}: {:04X}       {}", address, opcode, text)
        };
        (size, line)
    }

    fn dump_state_line(&self) -> String {
        format!(
            "V0:{:02x} V1:{:02x} V2:{:02x} V3:{:02x} V4:{:02x} V5:{:02x} V6:{:02x} V7:{:02x} \
             V8:{:02x} V9:{:02x} VA:{:02x} VB:{:02x} VC:{:02x} VD:{:02x} VE:{:02x} VF:{:02x} \
             I:{:04x} SP:{:1x} PC:{:04x} O:{:04x}",
            self.v[0], self.v[1], self.v[2], self.v[3], self.v[4], self.v[5], self.v[6],
            self.v[7], self.v[8], self.v[9], self.v[10], self.v[11], self.v[12], self.v[13],
            self.v[14], self.v[15], self.i, self.sp, self.pc, self.read_opcode(self.pc)
        )
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

impl EmulationCore for Chip8GenericCore {
    fn name(&self) -> &'static str {
        "GenericChip8"
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn update_properties(&mut self, props: &Properties, changed: &str) -> bool {
        use crate::properties::fuzzy_compare;
        if fuzzy_compare(changed, PROP_TRACE_LOG)
            || fuzzy_compare(changed, PROP_IPF)
            || fuzzy_compare(changed, PROP_FRAME_RATE)
        {
            if let Ok(opts) = Chip8Options::from_properties(props) {
                self.options.trace_log = opts.trace_log;
                self.options.instructions_per_frame = opts.instructions_per_frame;
                self.options.frame_rate = opts.frame_rate;
                self.properties = props.clone();
            }
            return false;
        }
        true
    }

    fn reset(&mut self, host: &mut dyn EmulatorHost) {
        self.handle_reset();
        self.exec_mode = if host.is_headless() { ExecMode::Running } else { ExecMode::Paused };
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
        let capacity = self.memory.len() - 1;
        if offset + data.len() > capacity {
            return Err(CadmiumError::RomTooLarge {
                size: data.len(),
                capacity: capacity.saturating_sub(offset),
            });
        }
        self.reset(host);
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        self.fixup_safety_pad();
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
        self.handle_timer();
        let next_frame = self.calc_next_frame();
        while self.exec_mode != ExecMode::Paused
            && self.cpu_state != CpuState::Error
            && self.cycle_counter < next_frame
        {
            self.step_instruction(host);
        }
        // A tight self-jump seen at the frame boundary pauses execution as a
        // host-visible convenience.
        let opcode = self.read_opcode(self.pc);
        if opcode & 0xF000 == 0x1000 && (opcode & 0xFFF) as u32 == self.pc {
            self.exec_mode = ExecMode::Paused;
        }
        if self.screen_needs_update {
            self.screen_needs_update = false;
            host.update_screen();
        }
        host.vblank();
    }

    fn execute_for(&mut self, host: &mut dyn EmulatorHost, microseconds: i64) -> i64 {
        if self.exec_mode == ExecMode::Paused {
            return 0;
        }
        let end = self.system_time.advanced_by_microseconds(microseconds as f64);
        while self.exec_mode != ExecMode::Paused
            && self.cpu_state != CpuState::Error
            && self.system_time < end
        {
            self.execute_frame(host);
        }
        self.system_time.difference_us(&end)
    }

    fn execute_instruction(&mut self, host: &mut dyn EmulatorHost) -> Cycles {
        self.step_instruction(host)
    }

    fn exec_mode(&self) -> ExecMode {
        self.exec_mode
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        GenericCpu::set_exec_mode(self, mode);
    }

    fn execution_unit(&mut self, index: usize) -> Option<&mut dyn GenericCpu> {
        if index == 0 {
            Some(self)
        } else {
            None
        }
    }

    fn screen(&self) -> &VideoBuffer {
        &self.screen
    }

    fn palette(&self) -> &Palette {
        &self.options.palette
    }

    fn frames(&self) -> i64 {
        self.frame_counter
    }

    fn render_audio(&mut self, samples: &mut [i16], sample_rate: u32) {
        if self.st == 0 || sample_rate == 0 {
            self.wave_phase = 0.0;
            samples.fill(0);
            return;
        }
        if self.options.xo_chip_sound {
            // Pattern playback at 4000 * 2^((pitch-64)/48) bits per second.
            let freq = 4000.0 * 2f32.powf((self.xo_pitch as f32 - 64.0) / 48.0);
            let step = freq / sample_rate as f32;
            for out in samples.iter_mut() {
                let bit_index = self.wave_phase as usize & 127;
                let bit = (self.xo_pattern[bit_index >> 3] >> (7 - (bit_index & 7))) & 1;
                *out = if bit != 0 { 16384 } else { -16384 };
                self.wave_phase = (self.wave_phase + step) % 128.0;
            }
        } else if self.options.behavior_base == Chip8Preset::MegaChip && self.sample_length > 0 {
            for out in samples.iter_mut() {
                *out = self.next_sample(sample_rate) as i16 * 256;
            }
        } else {
            // The classic buzzer: a plain square wave.
            let step = 1400.0 / sample_rate as f32;
            for out in samples.iter_mut() {
                *out = if self.wave_phase > 0.5 { 16384 } else { -16384 };
                self.wave_phase = (self.wave_phase + step) % 1.0;
            }
        }
    }
}
