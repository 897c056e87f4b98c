//! Cadmium is a multi-variant CHIP-8 emulation and debugging core: a
//! collection of cycle-accurate interpreters for the CHIP-8 family, the
//! real-hardware machines they ran on (COSMAC VIP, DREAM6800, ETI-660), and
//! the workbench plumbing around them — a typed properties/registry system, a
//! decompiler with instruction-set inference, a ROM database and librarian,
//! and a debugger layer with per-execution-unit state capture.

pub mod chip8;
pub mod clock;
pub mod core;
pub mod cpu;
pub mod database;
pub mod debugger;
pub mod decompiler;
pub mod error;
pub mod expression;
pub mod hardware;
pub mod hybrid;
pub mod librarian;
pub mod palette;
pub mod properties;
pub mod registry;
pub mod video;
pub mod worker;

// Re-exports
pub use crate::chip8::variants::Chip8Variant;
pub use crate::chip8::{Chip8GenericCore, Chip8Options, Chip8Preset};
pub use crate::clock::{Cycles, Time};
pub use crate::core::{EmulationCore, EmulatorHost, HeadlessHost};
pub use crate::cpu::{
    Breakpoint, BreakpointKind, BreakpointMap, CpuState, ExecMode, GenericCpu, RegisterValue,
    StackContent,
};
pub use crate::database::{Database, Platform, Program, RomInfo};
pub use crate::debugger::Debugger;
pub use crate::decompiler::Chip8Decompiler;
pub use crate::error::{CadmiumError, ErrorKind};
pub use crate::expression::{Expression, ExpressionEnv};
pub use crate::hybrid::{CosmacVip, Dream6800, Eti660};
pub use crate::librarian::{Classification, Librarian, LibraryEntry};
pub use crate::palette::{Color, Palette};
pub use crate::properties::{Properties, PropertiesDiff, Property, PropertyRegistry};
pub use crate::registry::{CoreFactory, CoreRegistry, Preset};
pub use crate::video::VideoBuffer;
pub use crate::worker::{CoreWorker, SharedSignals};
