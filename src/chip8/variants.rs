//! CHIP-8 family variant identities and the opcode metadata the disassembler
//! and decompiler share.

use bitflags::bitflags;

bitflags! {
    /// A set of CHIP-8 family variants. The decompiler narrows such a set by
    /// intersecting, per executed opcode, the variants that could produce it.
    pub struct Chip8Variant: u64 {
        const CHIP_8        = 1 << 0;
        const CHIP_10       = 1 << 1;
        const CHIP_8X       = 1 << 2;
        const CHIP_48       = 1 << 3;
        const SCHIP_1_0     = 1 << 4;
        const SCHIP_1_1     = 1 << 5;
        const SCHIPC        = 1 << 6;
        const MEGA_CHIP     = 1 << 7;
        const XO_CHIP       = 1 << 8;
        const CHIP_8_VIP    = 1 << 9;
        const CHIP_8_D6800  = 1 << 10;
        const CHIP_8_ETI660 = 1 << 11;
    }
}

impl Chip8Variant {
    /// Variants that support any SUPER-CHIP extension opcode.
    pub fn schip_or_later() -> Chip8Variant {
        Chip8Variant::SCHIP_1_0
            | Chip8Variant::SCHIP_1_1
            | Chip8Variant::SCHIPC
            | Chip8Variant::MEGA_CHIP
            | Chip8Variant::XO_CHIP
    }

    /// Variants with the SCHIP 1.1 scroll opcodes.
    pub fn schip11_or_later() -> Chip8Variant {
        Chip8Variant::SCHIP_1_1
            | Chip8Variant::SCHIPC
            | Chip8Variant::MEGA_CHIP
            | Chip8Variant::XO_CHIP
    }
}

/// Metadata for one opcode pattern: a match mask/value pair, the instruction
/// size in bytes, and the variants the pattern exists on.
pub struct OpcodePattern {
    pub mask: u16,
    pub opcode: u16,
    pub size: u16,
    pub variants: Chip8Variant,
    pub mnemonic: &'static str,
}

const fn pat(
    mask: u16,
    opcode: u16,
    size: u16,
    variants: Chip8Variant,
    mnemonic: &'static str,
) -> OpcodePattern {
    OpcodePattern { mask, opcode, size, variants, mnemonic }
}

const ALL: Chip8Variant = Chip8Variant::all();
const MEGA: Chip8Variant = Chip8Variant::MEGA_CHIP;
const XO: Chip8Variant = Chip8Variant::XO_CHIP;
const C8X: Chip8Variant = Chip8Variant::CHIP_8X;
/// SCHIP 1.0 and everything that inherited its opcodes.
const SCHIP10_PLUS: Chip8Variant = Chip8Variant::from_bits_truncate(
    Chip8Variant::SCHIP_1_0.bits()
        | Chip8Variant::SCHIP_1_1.bits()
        | Chip8Variant::SCHIPC.bits()
        | Chip8Variant::MEGA_CHIP.bits()
        | Chip8Variant::XO_CHIP.bits(),
);
/// SCHIP 1.1 and everything that inherited its scroll opcodes.
const SCHIP11_PLUS: Chip8Variant = Chip8Variant::from_bits_truncate(
    Chip8Variant::SCHIP_1_1.bits()
        | Chip8Variant::SCHIPC.bits()
        | Chip8Variant::MEGA_CHIP.bits()
        | Chip8Variant::XO_CHIP.bits(),
);
const XO_OR_MEGA: Chip8Variant = Chip8Variant::from_bits_truncate(
    Chip8Variant::XO_CHIP.bits() | Chip8Variant::MEGA_CHIP.bits(),
);
/// The real-hardware machines, where 0nnn calls native code.
const HARDWARE: Chip8Variant = Chip8Variant::from_bits_truncate(
    Chip8Variant::CHIP_8_VIP.bits()
        | Chip8Variant::CHIP_8_D6800.bits()
        | Chip8Variant::CHIP_8_ETI660.bits(),
);

/// The opcode pattern catalogue, most specific patterns first. Derived from the
/// documented opcode sets of the supported variants; entries for identical
/// encodings on different variants are merged with the union of their variant
/// sets.
#[rustfmt::skip]
pub static OPCODE_PATTERNS: &[OpcodePattern] = &[
    pat(0xFFFF, 0x0010, 2, MEGA, "megaoff"),
    pat(0xFFFF, 0x0011, 2, MEGA, "megaon"),
    pat(0xFFF0, 0x00B0, 2, MEGA, "scroll-up-alt"),
    pat(0xFFF0, 0x00C0, 2, SCHIP11_PLUS, "scroll-down"),
    pat(0xFFF0, 0x00D0, 2, XO, "scroll-up"),
    pat(0xFFFF, 0x00E0, 2, ALL, "clear"),
    pat(0xFFFF, 0x00EE, 2, ALL, "return"),
    pat(0xFFFF, 0x00FB, 2, SCHIP11_PLUS, "scroll-right"),
    pat(0xFFFF, 0x00FC, 2, SCHIP11_PLUS, "scroll-left"),
    pat(0xFFFF, 0x00FD, 2, SCHIP10_PLUS, "exit"),
    pat(0xFFFF, 0x00FE, 2, SCHIP10_PLUS, "lores"),
    pat(0xFFFF, 0x00FF, 2, SCHIP10_PLUS, "hires"),
    pat(0xFF00, 0x0100, 4, MEGA, "ldhi"),
    pat(0xFF00, 0x0200, 2, MEGA, "ldpal"),
    pat(0xFF00, 0x0300, 2, MEGA, "sprw"),
    pat(0xFF00, 0x0400, 2, MEGA, "sprh"),
    pat(0xFF00, 0x0500, 2, MEGA, "alpha"),
    pat(0xFFF0, 0x0600, 2, MEGA, "digisnd"),
    pat(0xFFFF, 0x0700, 2, MEGA, "stopsnd"),
    pat(0xFFF0, 0x0800, 2, MEGA, "bmode"),
    pat(0xFF00, 0x0900, 2, MEGA, "ccol"),
    pat(0xFFFF, 0x02A0, 2, C8X, "stepcol"),
    pat(0xF000, 0x0000, 2, HARDWARE, "native"),
    pat(0xF000, 0x1000, 2, ALL, "jump"),
    pat(0xF000, 0x2000, 2, ALL, "call"),
    pat(0xF000, 0x3000, 2, ALL, "skip-eq-imm"),
    pat(0xF000, 0x4000, 2, ALL, "skip-ne-imm"),
    pat(0xF00F, 0x5000, 2, ALL, "skip-eq-reg"),
    pat(0xF00F, 0x5001, 2, C8X, "add-bcd"),
    pat(0xF00F, 0x5002, 2, XO, "save-range"),
    pat(0xF00F, 0x5003, 2, XO, "load-range"),
    pat(0xF000, 0x6000, 2, ALL, "load-imm"),
    pat(0xF000, 0x7000, 2, ALL, "add-imm"),
    pat(0xF00F, 0x8000, 2, ALL, "move"),
    pat(0xF00F, 0x8001, 2, ALL, "or"),
    pat(0xF00F, 0x8002, 2, ALL, "and"),
    pat(0xF00F, 0x8003, 2, ALL, "xor"),
    pat(0xF00F, 0x8004, 2, ALL, "add"),
    pat(0xF00F, 0x8005, 2, ALL, "sub"),
    pat(0xF00F, 0x8006, 2, ALL, "shift-right"),
    pat(0xF00F, 0x8007, 2, ALL, "subn"),
    pat(0xF00F, 0x800E, 2, ALL, "shift-left"),
    pat(0xF00F, 0x9000, 2, ALL, "skip-ne-reg"),
    pat(0xF000, 0xA000, 2, ALL, "load-i"),
    pat(0xF000, 0xB000, 2, ALL, "jump0"),
    pat(0xF000, 0xC000, 2, ALL, "random"),
    pat(0xF000, 0xD000, 2, ALL, "sprite"),
    pat(0xF0FF, 0xE09E, 2, ALL, "skip-key"),
    pat(0xF0FF, 0xE0A1, 2, ALL, "skip-nokey"),
    pat(0xF0FF, 0xE0F2, 2, C8X, "skip-key2"),
    pat(0xF0FF, 0xE0F5, 2, C8X, "skip-nokey2"),
    pat(0xFFFF, 0xF000, 4, XO_OR_MEGA, "load-i-long"),
    pat(0xF0FF, 0xF001, 2, XO, "plane"),
    pat(0xFFFF, 0xF002, 2, XO, "audio"),
    pat(0xF0FF, 0xF007, 2, ALL, "load-delay"),
    pat(0xF0FF, 0xF00A, 2, ALL, "wait-key"),
    pat(0xF0FF, 0xF015, 2, ALL, "set-delay"),
    pat(0xF0FF, 0xF018, 2, ALL, "set-sound"),
    pat(0xF0FF, 0xF01E, 2, ALL, "add-i"),
    pat(0xF0FF, 0xF029, 2, ALL, "hexfont"),
    pat(0xF0FF, 0xF030, 2, SCHIP11_PLUS, "bigfont"),
    pat(0xF0FF, 0xF033, 2, ALL, "bcd"),
    pat(0xF0FF, 0xF03A, 2, XO, "pitch"),
    pat(0xF0FF, 0xF055, 2, ALL, "save"),
    pat(0xF0FF, 0xF065, 2, ALL, "load"),
    pat(0xF0FF, 0xF075, 2, SCHIP10_PLUS, "saveflags"),
    pat(0xF0FF, 0xF085, 2, SCHIP10_PLUS, "loadflags"),
    pat(0xF0FF, 0xF0F8, 2, C8X, "output-tone"),
    pat(0xF0FF, 0xF0FB, 2, C8X, "input-port"),
];

/// Returns the union of the variant sets of all patterns matching `opcode`, or
/// the empty set if no pattern matches.
pub fn variants_for_opcode(opcode: u16) -> Chip8Variant {
    let mut result = Chip8Variant::empty();
    for pattern in OPCODE_PATTERNS {
        if opcode & pattern.mask == pattern.opcode {
            result |= pattern.variants;
        }
    }
    result
}

/// Returns the instruction size in bytes for `opcode` on the given variant set
/// (4 for the XO-CHIP long-I form and the MEGA-CHIP `ldhi`, 2 otherwise).
pub fn opcode_size(opcode: u16, variants: Chip8Variant) -> u16 {
    if opcode == 0xF000 && variants.intersects(Chip8Variant::XO_CHIP | Chip8Variant::MEGA_CHIP) {
        return 4;
    }
    if opcode & 0xFF00 == 0x0100 && variants.intersects(Chip8Variant::MEGA_CHIP) {
        return 4;
    }
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_opcode_matches_everything() {
        let v = variants_for_opcode(0x6012);
        assert!(v.contains(Chip8Variant::CHIP_8));
        assert!(v.contains(Chip8Variant::XO_CHIP));
    }

    #[test]
    fn test_long_i_is_xo_or_mega_only() {
        let v = variants_for_opcode(0xF000);
        assert_eq!(v, Chip8Variant::XO_CHIP | Chip8Variant::MEGA_CHIP);
    }

    #[test]
    fn test_scroll_down_excludes_classic() {
        let v = variants_for_opcode(0x00C4);
        assert!(!v.contains(Chip8Variant::CHIP_8));
        assert!(v.contains(Chip8Variant::SCHIP_1_1));
    }

    #[test]
    fn test_opcode_size() {
        assert_eq!(opcode_size(0xF000, Chip8Variant::XO_CHIP), 4);
        assert_eq!(opcode_size(0xF000, Chip8Variant::CHIP_8), 2);
        assert_eq!(opcode_size(0x6012, Chip8Variant::all()), 2);
    }
}
