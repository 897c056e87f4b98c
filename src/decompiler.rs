//! Chunk-based static analysis of CHIP-8 images.
//!
//! The decompiler runs a worklist over half-open memory ranges ("chunks").
//! Starting from the entry point it interprets code speculatively with a
//! register file of known/unknown values, collects referenced labels with a
//! usage mask, splits chunks at code boundaries, and narrows the set of CHIP-8
//! variants that could execute the image by intersecting the variant sets of
//! every decoded opcode.

use crate::chip8::variants::{variants_for_opcode, Chip8Variant};
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Write as _;

bitflags! {
    /// How a byte range has been observed to be used.
    pub struct UsageType: u8 {
        const JUMP   = 1;
        const CALL   = 2;
        const SPRITE = 4;
        const LOAD   = 8;
        const STORE  = 16;
        const READ   = 32;
        const WRITE  = 64;
        const AUDIO  = 128;
    }
}

/// A half-open `[start, end)` range of the image with its usage mask.
#[derive(Clone, Debug)]
pub struct Chunk {
    pub offset: u32,
    pub start: usize,
    pub end: usize,
    pub usage: UsageType,
}

impl Chunk {
    pub fn start_addr(&self) -> u32 {
        self.offset
    }

    pub fn end_addr(&self) -> u32 {
        self.offset + self.size()
    }

    pub fn size(&self) -> u32 {
        (self.end - self.start) as u32
    }

    fn contains(&self, addr: u32) -> bool {
        addr >= self.offset && addr < self.end_addr()
    }
}

#[derive(Clone, Copy, Debug)]
struct LabelInfo {
    usage: UsageType,
    index: i32,
}

/// The speculative register file: `None` is "unknown". Any indeterminate value
/// poisons downstream dependents.
struct SpecContext {
    v: [Option<u8>; 16],
    i: Option<u32>,
    pc: u32,
    in_skip: bool,
}

impl SpecContext {
    fn new(entry: u32) -> Self {
        SpecContext { v: [None; 16], i: None, pc: entry, in_skip: false }
    }
}

/// The decompiler itself; feed it an image via [Chip8Decompiler::decompile] or
/// [Chip8Decompiler::analyse].
pub struct Chip8Decompiler {
    pub possible_variants: Chip8Variant,
    chunks: BTreeMap<u32, Chunk>,
    labels: BTreeMap<u32, LabelInfo>,
    stats: HashMap<u16, u32>,
    code: Vec<u8>,
    offset: u32,
    odd_pc_access: bool,
}

impl Default for Chip8Decompiler {
    fn default() -> Self {
        Chip8Decompiler::new()
    }
}

impl Chip8Decompiler {
    pub fn new() -> Self {
        Chip8Decompiler {
            possible_variants: Chip8Variant::all(),
            chunks: BTreeMap::new(),
            labels: BTreeMap::new(),
            stats: HashMap::new(),
            code: Vec::new(),
            offset: 0,
            odd_pc_access: false,
        }
    }

    /// Restricts the starting variant assumption (e.g. when the platform is
    /// already known).
    pub fn set_variant(&mut self, variant: Chip8Variant) {
        self.possible_variants = variant;
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Opcode usage statistics of the last analysis (stat key to count).
    pub fn stats(&self) -> &HashMap<u16, u32> {
        &self.stats
    }

    pub fn odd_pc_access(&self) -> bool {
        self.odd_pc_access
    }

    fn read_opcode(&self, addr: u32) -> u16 {
        let idx = (addr - self.offset) as usize;
        if idx + 1 < self.code.len() {
            ((self.code[idx] as u16) << 8) | self.code[idx + 1] as u16
        } else {
            0
        }
    }

    fn ref_label(&mut self, addr: u32, usage: UsageType) {
        self.labels
            .entry(addr)
            .and_modify(|info| info.usage |= usage)
            .or_insert(LabelInfo { usage, index: -1 });
    }

    fn find_chunk_key(&self, addr: u32) -> Option<u32> {
        self.chunks
            .values()
            .find(|chunk| chunk.contains(addr))
            .map(|chunk| chunk.offset)
    }

    /// Splits the chunk at `key` so that `[addr, addr+size)` becomes its own
    /// chunk carrying `usage`.
    fn split_chunk(&mut self, key: u32, addr: u32, size: u32, usage: UsageType) {
        let chunk = self.chunks.remove(&key).expect("chunk key must exist");
        let cut = (addr - chunk.offset) as usize;
        if cut > 0 {
            self.chunks.insert(
                chunk.offset,
                Chunk {
                    offset: chunk.offset,
                    start: chunk.start,
                    end: chunk.start + cut,
                    usage: chunk.usage,
                },
            );
        }
        let body_end = (chunk.start + cut + size as usize).min(chunk.end);
        self.chunks.insert(
            addr,
            Chunk { offset: addr, start: chunk.start + cut, end: body_end, usage: chunk.usage | usage },
        );
        if body_end < chunk.end {
            self.chunks.insert(
                addr + size,
                Chunk { offset: addr + size, start: body_end, end: chunk.end, usage: chunk.usage },
            );
        }
    }

    /// Forward speculative execution from `entry` inside one chunk; returns the
    /// number of bytes of code discovered.
    fn analyse_code_chunk(&mut self, chunk_end: u32, entry: u32) -> u32 {
        let mut ec = SpecContext::new(entry);
        let start = entry;
        let mut result = 0;
        while ec.pc + 1 < chunk_end {
            if ec.pc & 1 != 0 {
                self.odd_pc_access = true;
            }
            let opcode = self.read_opcode(ec.pc);
            let mask = variants_for_opcode(opcode);
            if !mask.is_empty() {
                self.possible_variants &= mask;
            }
            ec.pc += 2;
            let mut next = None;
            if opcode == 0xF000
                || (opcode & 0xFF00 == 0x0100
                    && self.possible_variants.intersects(Chip8Variant::MEGA_CHIP))
            {
                next = Some(self.read_opcode(ec.pc));
                ec.pc += 2;
            }
            if self.execute_speculative(&mut ec, opcode, next) {
                result = ec.pc - start;
                break;
            }
        }
        if result == 0 {
            result = chunk_end - start;
        }
        result
    }

    /// Interprets one opcode against the speculative context, seeding labels;
    /// returns true when the opcode ends the chunk.
    fn execute_speculative(&mut self, ec: &mut SpecContext, opcode: u16, next: Option<u16>) -> bool {
        let x = ((opcode >> 8) & 0xF) as usize;
        let y = ((opcode >> 4) & 0xF) as usize;
        let n = opcode & 0xF;
        let nn = (opcode & 0xFF) as u8;
        let nnn = (opcode & 0xFFF) as u32;
        let mut in_skip = false;
        let mut ends_chunk = false;
        match opcode >> 12 {
            0x0 => {
                if opcode & 0xFF00 == 0x0100 {
                    ec.i = next.map(|lo| (((opcode & 0xFF) as u32) << 16) | lo as u32);
                    if let Some(i) = ec.i {
                        self.ref_label(i, UsageType::READ);
                    }
                } else if opcode == 0x00EE {
                    ends_chunk = !ec.in_skip;
                }
            }
            0x1 => {
                self.ref_label(nnn, UsageType::JUMP);
                ends_chunk = !ec.in_skip;
            }
            0x2 => {
                self.ref_label(nnn, UsageType::CALL);
            }
            0x3 => {
                in_skip = true;
                if ec.v[x] == Some(nn) {
                    ec.pc += 2;
                }
            }
            0x4 => {
                in_skip = true;
                if let Some(vx) = ec.v[x] {
                    if vx != nn {
                        ec.pc += 2;
                    }
                }
            }
            0x5 => match n {
                0 => {
                    in_skip = true;
                    if let (Some(vx), Some(vy)) = (ec.v[x], ec.v[y]) {
                        if vx == vy {
                            ec.pc += 2;
                        }
                    }
                }
                3 => {
                    for offset in 0..=x.abs_diff(y) {
                        let reg = if x < y { x + offset } else { x - offset };
                        ec.v[reg] = None;
                    }
                }
                _ => {}
            },
            0x6 => ec.v[x] = if ec.in_skip { None } else { Some(nn) },
            0x7 => {
                ec.v[x] = match (ec.in_skip, ec.v[x]) {
                    (false, Some(vx)) => Some(vx.wrapping_add(nn)),
                    _ => None,
                }
            }
            0x8 => match n {
                0 => ec.v[x] = if ec.in_skip { None } else { ec.v[y] },
                1 => {
                    ec.v[x] = combine(ec, x, y, |a, b| a | b);
                    ec.v[0xF] = None;
                }
                2 => {
                    ec.v[x] = combine(ec, x, y, |a, b| a & b);
                    ec.v[0xF] = None;
                }
                3 => {
                    ec.v[x] = combine(ec, x, y, |a, b| a ^ b);
                    ec.v[0xF] = None;
                }
                4 => {
                    ec.v[x] = combine(ec, x, y, |a, b| a.wrapping_add(b));
                    ec.v[0xF] = None;
                }
                5 => {
                    ec.v[x] = combine(ec, x, y, |a, b| a.wrapping_sub(b));
                    ec.v[0xF] = None;
                }
                7 => {
                    ec.v[x] = combine(ec, x, y, |a, b| b.wrapping_sub(a));
                    ec.v[0xF] = None;
                }
                6 | 0xE => {
                    // Shift semantics depend on quirks; stay conservative.
                    ec.v[x] = None;
                    ec.v[0xF] = None;
                }
                _ => {}
            },
            0x9 => {
                if n == 0 {
                    in_skip = true;
                    if let (Some(vx), Some(vy)) = (ec.v[x], ec.v[y]) {
                        if vx != vy {
                            ec.pc += 2;
                        }
                    }
                }
            }
            0xA => {
                ec.i = if ec.in_skip { None } else { Some(nnn) };
                self.ref_label(nnn, UsageType::READ);
            }
            0xB => {
                match ec.v[0] {
                    Some(v0) => self.ref_label(nnn + v0 as u32, UsageType::JUMP),
                    None => self.ref_label(nnn, UsageType::JUMP),
                }
                ends_chunk = !ec.in_skip;
            }
            0xC => ec.v[x] = None,
            0xD => {
                if let Some(i) = ec.i {
                    self.ref_label(i, UsageType::SPRITE);
                }
                ec.v[0xF] = None;
            }
            0xE => {
                if nn == 0x9E || nn == 0xA1 {
                    in_skip = true;
                }
            }
            0xF => match nn {
                0x00 => {
                    if opcode == 0xF000 {
                        ec.i = next.map(u32::from);
                        if let Some(i) = ec.i {
                            self.ref_label(i, UsageType::READ);
                        }
                    }
                }
                0x02 => {
                    if opcode == 0xF002 {
                        if let Some(i) = ec.i {
                            self.ref_label(i, UsageType::AUDIO);
                        }
                    }
                }
                0x07 | 0x0A => ec.v[x] = None,
                0x1E => {
                    ec.i = match (ec.in_skip, ec.i, ec.v[x]) {
                        (false, Some(i), Some(vx)) => Some(i + vx as u32),
                        _ => None,
                    }
                }
                0x29 | 0x30 => ec.i = None,
                0x33 => {
                    if let Some(i) = ec.i {
                        self.ref_label(i, UsageType::WRITE);
                    }
                }
                0x55 => {
                    if let Some(i) = ec.i {
                        self.ref_label(i, UsageType::WRITE);
                    }
                    ec.i = None;
                }
                0x65 | 0x85 => {
                    if let Some(i) = ec.i {
                        self.ref_label(i, UsageType::READ);
                    }
                    for reg in 0..=x {
                        ec.v[reg] = None;
                    }
                    ec.i = None;
                }
                _ => {}
            },
            _ => {}
        }
        ec.in_skip = in_skip;
        ends_chunk
    }

    /// Runs the worklist analysis over `code`, loaded at `offset`, with the
    /// entry point `entry`.
    pub fn analyse(&mut self, code: &[u8], offset: u32, entry: u32) {
        self.code = code.to_vec();
        self.offset = offset;
        self.chunks.clear();
        self.labels.clear();
        self.stats.clear();
        self.chunks.insert(
            offset,
            Chunk { offset, start: 0, end: code.len(), usage: UsageType::empty() },
        );
        let end = offset + code.len() as u32;
        let size = self.analyse_code_chunk(end, entry);
        self.split_chunk(offset, entry, size, UsageType::JUMP);
        loop {
            let mut advanced = false;
            let worklist: Vec<(u32, UsageType)> = self
                .labels
                .iter()
                .filter(|(_, info)| info.usage.intersects(UsageType::JUMP | UsageType::CALL))
                .map(|(addr, info)| (*addr, info.usage))
                .collect();
            for (addr, usage) in worklist {
                if let Some(key) = self.find_chunk_key(addr) {
                    if self.chunks[&key].usage.is_empty() {
                        let chunk_end = self.chunks[&key].end_addr();
                        let size = self.analyse_code_chunk(chunk_end, addr);
                        self.split_chunk(key, addr, size, usage);
                        advanced = true;
                    }
                }
            }
            if !advanced {
                break;
            }
        }
        self.collect_stats();
        self.renumber_labels();
    }

    fn collect_stats(&mut self) {
        let chunk_ranges: Vec<(u32, u32, UsageType)> = self
            .chunks
            .values()
            .map(|c| (c.offset, c.end_addr(), c.usage))
            .collect();
        for (start, end, usage) in chunk_ranges {
            if !usage.intersects(UsageType::JUMP | UsageType::CALL) {
                continue;
            }
            let mut addr = start;
            while addr + 1 < end {
                let opcode = self.read_opcode(addr);
                let (size, key, _) = self.opcode_to_octo(opcode, self.read_opcode(addr + 2));
                *self.stats.entry(key).or_insert(0) += 1;
                addr += size as u32;
            }
        }
    }

    fn renumber_labels(&mut self) {
        let mut jump = 0;
        let mut sub = 0;
        let mut sprite = 0;
        let mut audio = 0;
        let mut data = 0;
        for info in self.labels.values_mut() {
            let counter = if info.usage.intersects(UsageType::JUMP) {
                &mut jump
            } else if info.usage.intersects(UsageType::CALL) {
                &mut sub
            } else if info.usage.intersects(UsageType::SPRITE) {
                &mut sprite
            } else if info.usage.intersects(UsageType::AUDIO) {
                &mut audio
            } else {
                &mut data
            };
            info.index = *counter;
            *counter += 1;
        }
    }

    fn label_or_address(&self, addr: u32) -> String {
        match self.labels.get(&addr) {
            Some(info) => {
                let number = if info.index >= 0 { info.index as u32 } else { addr };
                if info.usage.intersects(UsageType::JUMP) {
                    format!("label_{}", number)
                } else if info.usage.intersects(UsageType::CALL) {
                    format!("sub_{}", number)
                } else if info.usage.intersects(UsageType::SPRITE) {
                    format!("sprite_{}", number)
                } else if info.usage.intersects(UsageType::AUDIO) {
                    format!("audio_{}", number)
                } else {
                    format!("data_{}", number)
                }
            }
            None => format!("0x{:x}", addr),
        }
    }

    /// Octo-syntax rendition of one opcode; returns `(size, stat key, text)`.
    fn opcode_to_octo(&self, opcode: u16, next: u16) -> (u16, u16, String) {
        octo_syntax(opcode, next, self.possible_variants, &|addr| self.label_or_address(addr))
    }

    /// Emits the whole decompilation as Octo source.
    pub fn decompile_to_octo(&self, filename: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# This is an automatically generated source, created by the Cadmium-Decompiler\n# ROM file used: {}\n",
            filename
        );
        let mut has_consts = false;
        for addr in self.labels.keys() {
            if self.find_chunk_key(*addr).is_none() {
                let _ = writeln!(out, ":const {} 0x{:04X}", self.label_or_address(*addr), addr);
                has_consts = true;
            }
        }
        if has_consts {
            out.push('\n');
        }
        out.push_str(": main\n");
        for chunk in self.chunks.values() {
            self.render_chunk(chunk, &mut out);
        }
        out
    }

    fn render_chunk(&self, chunk: &Chunk, out: &mut String) {
        let mut addr = chunk.offset;
        if chunk.usage.intersects(UsageType::JUMP | UsageType::CALL) {
            let mut in_if = false;
            while addr + 1 < chunk.end_addr() {
                let (size, _, text) = self.opcode_to_octo(self.read_opcode(addr), self.read_opcode(addr + 2));
                if self.labels.contains_key(&addr) {
                    let _ = writeln!(out, ": {}", self.label_or_address(addr));
                }
                if in_if {
                    let _ = writeln!(out, "            {}", text);
                } else {
                    let _ = writeln!(out, "        {}", text);
                }
                in_if = text.starts_with("if ");
                addr += size as u32;
            }
        } else {
            let mut in_sprite = false;
            for idx in 0..chunk.size() {
                if let Some(info) = self.labels.get(&addr) {
                    let _ = write!(out, "\n: {}\n", self.label_or_address(addr));
                    in_sprite = info.usage.intersects(UsageType::SPRITE)
                        && self.possible_variants != Chip8Variant::MEGA_CHIP;
                }
                let byte = self.code[(addr - self.offset) as usize];
                if in_sprite {
                    let _ = writeln!(out, "        0b{:08b}", byte);
                } else {
                    if idx % 8 == 0 {
                        if idx > 0 {
                            out.push('\n');
                        }
                        out.push_str("       ");
                    }
                    let _ = write!(out, " 0x{:02X}", byte);
                }
                addr += 1;
            }
            out.push('\n');
        }
    }
}

fn combine(ec: &SpecContext, x: usize, y: usize, f: impl Fn(u8, u8) -> u8) -> Option<u8> {
    if ec.in_skip {
        return None;
    }
    match (ec.v[x], ec.v[y]) {
        (Some(a), Some(b)) => Some(f(a, b)),
        _ => None,
    }
}

/// Octo-syntax for a single opcode with a plain-address label formatter;
/// returns `(size, stat key, text)`. `next` is the following word, consumed by
/// the 4-byte forms.
pub fn octo_syntax(
    opcode: u16,
    next: u16,
    variants: Chip8Variant,
    label: &dyn Fn(u32) -> String,
) -> (u16, u16, String) {
    let x = (opcode >> 8) & 0xF;
    let y = (opcode >> 4) & 0xF;
    let mega = variants.intersects(Chip8Variant::MEGA_CHIP);
    match opcode >> 12 {
        0x0 => {
            if opcode == 0x0010 {
                return (2, opcode, "megaoff".into());
            }
            if opcode == 0x0011 && mega {
                return (2, opcode, "megaon".into());
            }
            if opcode & 0xFFF0 == 0x00B0 && mega {
                return (2, opcode, format!("scroll-up-alt {}", opcode & 0xF));
            }
            if opcode & 0xFFF0 == 0x00C0 {
                return (2, opcode, format!("scroll-down {}", opcode & 0xF));
            }
            if opcode & 0xFFF0 == 0x00D0 {
                return (2, opcode, format!("scroll-up {}", opcode & 0xF));
            }
            match opcode {
                0x00E0 => return (2, opcode, "clear".into()),
                0x00EE => return (2, opcode, "return".into()),
                0x00FB => return (2, opcode, "scroll-right".into()),
                0x00FC => return (2, opcode, "scroll-left".into()),
                0x00FD => return (2, opcode, "exit".into()),
                0x00FE => return (2, opcode, "lores".into()),
                0x00FF => return (2, opcode, "hires".into()),
                _ => {}
            }
            if opcode & 0xFF00 == 0x0100 && mega {
                let target = (((opcode & 0xFF) as u32) << 16) | next as u32;
                return (4, opcode, format!("ldhi {}", label(target)));
            }
            if opcode & 0xFF00 == 0x0200 && mega {
                return (2, opcode, format!("ldpal {}", opcode & 0xFF));
            }
            if opcode & 0xFF00 == 0x0300 && mega {
                return (2, opcode, format!("sprw {}", opcode & 0xFF));
            }
            if opcode & 0xFF00 == 0x0400 && mega {
                return (2, opcode, format!("sprh {}", opcode & 0xFF));
            }
            if opcode & 0xFF00 == 0x0500 && mega {
                return (2, opcode, format!("alpha {}", opcode & 0xFF));
            }
            if opcode & 0xFFF0 == 0x0600 && mega {
                return (2, opcode, format!("digisnd {}", opcode & 0xF));
            }
            if opcode == 0x0700 && mega {
                return (2, opcode, "stopsnd".into());
            }
            if opcode & 0xFFF0 == 0x0800 && mega {
                return (2, opcode, format!("bmode {}", opcode & 0xF));
            }
            if opcode & 0xFF00 == 0x0900 && mega {
                return (2, opcode, format!("ccol {}", opcode & 0xFF));
            }
            (2, opcode, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF))
        }
        0x1 => (2, 0x1000, format!("jump {}", label((opcode & 0xFFF) as u32))),
        0x2 => (2, 0x2000, format!(":call {}", label((opcode & 0xFFF) as u32))),
        0x3 => (2, 0x3000, format!("if v{:X} != 0x{:02X} then", x, opcode & 0xFF)),
        0x4 => (2, 0x4000, format!("if v{:X} == 0x{:02X} then", x, opcode & 0xFF)),
        0x5 => match opcode & 0xF {
            0 => (2, 0x5000, format!("if v{:X} != v{:X} then", x, y)),
            2 => (2, 0x5002, format!("save v{:X} - v{:X}", x, y)),
            3 => (2, 0x5003, format!("load v{:X} - v{:X}", x, y)),
            _ => (2, opcode & 0xF00F, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF)),
        },
        0x6 => (2, 0x6000, format!("v{:X} := 0x{:02X}", x, opcode & 0xFF)),
        0x7 => (2, 0x7000, format!("v{:X} += 0x{:02X}", x, opcode & 0xFF)),
        0x8 => match opcode & 0xF {
            0x0 => (2, opcode & 0xF00F, format!("v{:X} := v{:X}", x, y)),
            0x1 => (2, opcode & 0xF00F, format!("v{:X} |= v{:X}", x, y)),
            0x2 => (2, opcode & 0xF00F, format!("v{:X} &= v{:X}", x, y)),
            0x3 => (2, opcode & 0xF00F, format!("v{:X} ^= v{:X}", x, y)),
            0x4 => (2, opcode & 0xF00F, format!("v{:X} += v{:X}", x, y)),
            0x5 => (2, opcode & 0xF00F, format!("v{:X} -= v{:X}", x, y)),
            0x6 => (2, opcode & 0xF00F, format!("v{:X} >>= v{:X}", x, y)),
            0x7 => (2, opcode & 0xF00F, format!("v{:X} =- v{:X}", x, y)),
            0xE => (2, opcode & 0xF00F, format!("v{:X} <<= v{:X}", x, y)),
            _ => (2, opcode & 0xF00F, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF)),
        },
        0x9 => {
            if opcode & 0xF == 0 {
                (2, opcode & 0xF00F, format!("if v{:X} == v{:X} then", x, y))
            } else {
                (2, opcode & 0xF00F, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF))
            }
        }
        0xA => (2, 0xA000, format!("i := {}", label((opcode & 0xFFF) as u32))),
        0xB => (2, 0xB000, format!("jump0 {}", label((opcode & 0xFFF) as u32))),
        0xC => (2, 0xC000, format!("v{:X} := random 0x{:02X}", x, opcode & 0xFF)),
        0xD => (2, opcode & 0xF00F, format!("sprite v{:X} v{:X} 0x{:X}", x, y, opcode & 0xF)),
        0xE => match opcode & 0xFF {
            0x9E => (2, opcode & 0xF0FF, format!("if v{:X} -key then", x)),
            0xA1 => (2, opcode & 0xF0FF, format!("if v{:X} key then", x)),
            _ => (2, opcode, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF)),
        },
        _ => match opcode & 0xFF {
            0x00 if opcode == 0xF000 => (4, 0xF000, format!("i := long {}", label(next as u32))),
            0x01 => (2, opcode & 0xF0FF, format!("plane {}", x)),
            0x02 if opcode == 0xF002 => (2, 0xF002, "audio".into()),
            0x07 => (2, opcode & 0xF0FF, format!("v{:X} := delay", x)),
            0x0A => (2, opcode & 0xF0FF, format!("v{:X} := key", x)),
            0x15 => (2, opcode & 0xF0FF, format!("delay := v{:X}", x)),
            0x18 => (2, opcode & 0xF0FF, format!("buzzer := v{:X}", x)),
            0x1E => (2, opcode & 0xF0FF, format!("i += v{:X}", x)),
            0x29 => (2, opcode & 0xF0FF, format!("i := hex v{:X}", x)),
            0x30 => (2, opcode & 0xF0FF, format!("i := bighex v{:X}", x)),
            0x33 => (2, opcode & 0xF0FF, format!("bcd v{:X}", x)),
            0x3A => (2, opcode & 0xF0FF, format!("pitch := v{:X}", x)),
            0x55 => (2, opcode & 0xF0FF, format!("save v{:X}", x)),
            0x65 => (2, opcode & 0xF0FF, format!("load v{:X}", x)),
            0x75 => (2, opcode & 0xF0FF, format!("saveflags v{:X}", x)),
            0x85 => (2, opcode & 0xF0FF, format!("loadflags v{:X}", x)),
            _ => (2, opcode, format!("0x{:02X} 0x{:02X}", opcode >> 8, opcode & 0xFF)),
        },
    }
}

/// Disassembles one opcode without label context, for debugger views; returns
/// `(size in bytes, text)`.
pub fn disassemble_opcode(opcode: u16, next: u16, variants: Chip8Variant) -> (usize, String) {
    let (size, _, text) = octo_syntax(opcode, next, variants, &|addr| format!("0x{:x}", addr));
    (size as usize, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_rom_keeps_chip8() {
        // 6005 6100 D015 1200 plus one sprite byte.
        let rom = [0x60, 0x05, 0x61, 0x00, 0xA2, 0x0A, 0xD0, 0x15, 0x12, 0x08, 0x80, 0x00];
        let mut dec = Chip8Decompiler::new();
        dec.analyse(&rom, 0x200, 0x200);
        assert!(dec.possible_variants.contains(Chip8Variant::CHIP_8));
        assert!(dec.possible_variants.contains(Chip8Variant::XO_CHIP));
    }

    #[test]
    fn test_long_i_narrows_to_xo_or_mega() {
        let rom = [0xF0, 0x00, 0x02, 0x08, 0x60, 0x01, 0x12, 0x06, 0xAA, 0xBB];
        let mut dec = Chip8Decompiler::new();
        dec.analyse(&rom, 0x200, 0x200);
        assert!(dec
            .possible_variants
            .intersects(Chip8Variant::XO_CHIP | Chip8Variant::MEGA_CHIP));
        assert!(!dec.possible_variants.contains(Chip8Variant::CHIP_8));
        assert!(!dec.possible_variants.contains(Chip8Variant::SCHIP_1_1));
    }

    #[test]
    fn test_sprite_label_and_chunks() {
        // i := sprite at 0x20A, draw it, jump back; trailing sprite data.
        let rom = [0xA2, 0x08, 0x60, 0x00, 0xD0, 0x01, 0x12, 0x06, 0xFF, 0x81];
        let mut dec = Chip8Decompiler::new();
        dec.analyse(&rom, 0x200, 0x200);
        let chunks: Vec<_> = dec.chunks().collect();
        assert!(chunks.len() >= 2);
        assert!(chunks[0].usage.intersects(UsageType::JUMP));
        let octo = dec.decompile_to_octo("test.ch8");
        assert!(octo.contains("sprite v0 v0 0x1"));
        assert!(octo.contains(": sprite_0"));
        assert!(octo.contains("0b11111111"));
    }

    #[test]
    fn test_call_produces_sub_label() {
        // call 0x206; self-jump; sub: return
        let rom = [0x22, 0x06, 0x12, 0x02, 0x00, 0x00, 0x00, 0xEE];
        let mut dec = Chip8Decompiler::new();
        dec.analyse(&rom, 0x200, 0x200);
        let octo = dec.decompile_to_octo("test.ch8");
        assert!(octo.contains(":call sub_0"));
        assert!(octo.contains(": sub_0"));
        assert!(octo.contains("return"));
    }

    #[test]
    fn test_stats_count_opcodes() {
        let rom = [0x60, 0x05, 0x61, 0x06, 0x12, 0x04];
        let mut dec = Chip8Decompiler::new();
        dec.analyse(&rom, 0x200, 0x200);
        assert_eq!(dec.stats().get(&0x6000).copied(), Some(2));
        assert_eq!(dec.stats().get(&0x1000).copied(), Some(1));
    }

    #[test]
    fn test_disassemble_opcode_plain() {
        let (size, text) = disassemble_opcode(0x6A12, 0, Chip8Variant::all());
        assert_eq!(size, 2);
        assert_eq!(text, "vA := 0x12");
        let (size, text) = disassemble_opcode(0xF000, 0x0234, Chip8Variant::XO_CHIP);
        assert_eq!(size, 4);
        assert_eq!(text, "i := long 0x234");
    }
}
