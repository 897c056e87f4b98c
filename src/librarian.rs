//! The librarian: walks a directory tree, fingerprints recognised files by
//! SHA-1 and classifies them — known digest, container formats, or a variant
//! guess produced by the decompiler's instruction-set inference.

use crate::chip8::variants::Chip8Variant;
use crate::database::Database;
use crate::decompiler::Chip8Decompiler;
use crate::error::CadmiumError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File extensions the librarian considers CHIP-8 related.
const KNOWN_EXTENSIONS: &[&str] = &[
    "ch8", "c8", "c8x", "ch48", "c48", "sc8", "scc", "mc8", "xo8", "c8e", "c8tp", "bin", "rom",
    "ram", "vip", "raw", "hex", "c8b", "gif",
];

/// One entry of a C8B container's variant table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct C8bVariant {
    pub variant_id: u8,
    pub offset: u16,
    pub length: u16,
}

/// A parsed C8B container header.
#[derive(Clone, Debug, PartialEq)]
pub struct C8bHeader {
    pub execution_speed: u16,
    pub palette_length: u8,
    pub variants: Vec<C8bVariant>,
}

impl C8bHeader {
    /// Parses the little-endian C8B header: magic `"CBF"`, variant count,
    /// execution speed, palette length, then the variant table.
    pub fn parse(data: &[u8]) -> Result<C8bHeader, CadmiumError> {
        if data.len() < 7 || &data[0..3] != b"CBF" {
            return Err(CadmiumError::BadCartridgeHeader { reason: "missing CBF magic".into() });
        }
        let variant_count = data[3] as usize;
        let execution_speed = u16::from_le_bytes([data[4], data[5]]);
        let palette_length = data[6];
        let table_start = 7;
        let table_end = table_start + variant_count * 5;
        if data.len() < table_end {
            return Err(CadmiumError::BadCartridgeHeader {
                reason: "truncated variant table".into(),
            });
        }
        let mut variants = Vec::with_capacity(variant_count);
        for entry in 0..variant_count {
            let at = table_start + entry * 5;
            let offset = u16::from_le_bytes([data[at + 1], data[at + 2]]);
            let length = u16::from_le_bytes([data[at + 3], data[at + 4]]);
            if offset as usize + length as usize > data.len() {
                return Err(CadmiumError::BadCartridgeHeader {
                    reason: format!("variant {} extends past the file", entry),
                });
            }
            variants.push(C8bVariant { variant_id: data[at], offset, length });
        }
        Ok(C8bHeader { execution_speed, palette_length, variants })
    }

    /// Picks the container entry best matching the host's variant preference
    /// list (earlier ids are preferred); falls back to the first entry.
    pub fn best_variant(&self, preferred: &[u8]) -> Option<&C8bVariant> {
        for id in preferred {
            if let Some(entry) = self.variants.iter().find(|v| v.variant_id == *id) {
                return Some(entry);
            }
        }
        self.variants.first()
    }
}

/// The librarian's judgement about one file.
#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// The digest is in the known-ROM table or the program database.
    Known { preset: String, tickrate: Option<u32> },
    /// Unknown digest, but the decompiler narrowed the possible variants.
    Guessed { variants: Chip8Variant },
    /// An Octo cartridge (GIF container); extraction is left to the host.
    OctoCart,
    /// A C8B multi-variant container.
    C8b(C8bHeader),
    Unknown,
}

/// One scanned file.
#[derive(Clone, Debug)]
pub struct LibraryEntry {
    pub path: PathBuf,
    pub size: u64,
    pub sha1: String,
    pub classification: Classification,
}

/// Digest to preset-name seed table for ROMs that predate the community
/// database.
fn builtin_known_roms() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    // CHIP-8
    map.insert("eb412becb086d3cbccce4e3e370b9149b969cff9", "CHIP-8");
    // CHIP-8 VIP hybrid roms
    map.insert("12fccf60004f685c112fe3db3d3bcfba104cbcb1", "VIP-CHIP-8");
    map.insert("2b711cf58008f03168d0547063fe8e3c72f65ae3", "VIP-CHIP-8");
    map.insert("346f2760ca55bb6d45b1f255fe4960a7d244191e", "VIP-CHIP-8");
    map.insert("4701417c61d80d40fe6e3ae06d891cbe730c0dc7", "VIP-CHIP-8");
    map.insert("9bfae01da1a94f99aba692da1a7a2148eb8561b4", "VIP-CHIP-8");
    map.insert("c5a2e40a381086e7d2064f9836c57224e27ec7ed", "VIP-CHIP-8");
    // CHIP-10
    map.insert("8109e5f502a624ce6c96b8aa4b44b3f7dc0ef968", "CHIP-10");
    // SUPER-CHIP 1.1 (a small seed of the full family)
    map.insert("01ffe488efbe14ca63de1c23053806533e329f3f", "SCHIP-1.1");
    map.insert("044021b046cf207c0b555ea884d61a726f7a3c22", "SCHIP-1.1");
    map.insert("0663449e1cc8d79ee38075fe86d6b9439a7e43d7", "SCHIP-1.1");
    map.insert("12572c9e957cace53076d1656ea1b12cd0f331af", "SCHIP-1.1");
    map.insert("17d775833f073be77f2834751523996e0a398edd", "SCHIP-1.1");
    map
}

/// Default instructions-per-frame for the builtin presets.
fn builtin_tickrate(preset: &str) -> Option<u32> {
    match preset {
        "CHIP-8" | "VIP-CHIP-8" | "CHIP-10" => Some(15),
        "SCHIP-1.1" => Some(30),
        _ => None,
    }
}

/// The librarian itself; borrows the database, which must outlive it.
pub struct Librarian<'a> {
    database: &'a Database,
    known_roms: HashMap<&'static str, &'static str>,
}

impl<'a> Librarian<'a> {
    pub fn new(database: &'a Database) -> Self {
        Librarian { database, known_roms: builtin_known_roms() }
    }

    /// Lowercase 40-char hex digest of `data`.
    pub fn fingerprint(data: &[u8]) -> String {
        sha1_smol::Sha1::from(data).digest().to_string()
    }

    /// Looks a digest up in the builtin table and the program database.
    pub fn classify_digest(&self, sha1: &str) -> Option<Classification> {
        let needle = sha1.to_ascii_lowercase();
        if let Some(preset) = self.known_roms.get(needle.as_str()) {
            return Some(Classification::Known {
                preset: preset.to_string(),
                tickrate: builtin_tickrate(preset),
            });
        }
        self.database.find_rom(&needle).map(|info| {
            let preset = info
                .rom
                .platforms
                .first()
                .and_then(|id| self.database.platform(id))
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "CHIP-8".to_string());
            let tickrate = if info.rom.tickrate != 0 {
                Some(info.rom.tickrate)
            } else {
                info.rom
                    .platforms
                    .first()
                    .and_then(|id| self.database.platform(id))
                    .map(|p| p.default_tickrate)
            };
            Classification::Known { preset, tickrate }
        })
    }

    /// Classifies a file's content. `name` is only used for its extension.
    pub fn classify(&self, name: &str, data: &[u8]) -> Classification {
        if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            return Classification::OctoCart;
        }
        if data.starts_with(b"CBF") {
            if let Ok(header) = C8bHeader::parse(data) {
                return Classification::C8b(header);
            }
        }
        if let Some(known) = self.classify_digest(&Self::fingerprint(data)) {
            return known;
        }
        if Self::looks_like_chip8(name, data) {
            let mut decompiler = Chip8Decompiler::new();
            decompiler.analyse(data, 0x200, 0x200);
            return Classification::Guessed { variants: decompiler.possible_variants };
        }
        Classification::Unknown
    }

    fn looks_like_chip8(name: &str, data: &[u8]) -> bool {
        if data.is_empty() || data.len() > 0x100_0000 {
            return false;
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        KNOWN_EXTENSIONS.contains(&ext.as_str())
    }

    /// Walks `dir` recursively and returns an entry for every recognised file.
    pub fn scan(&self, dir: &Path) -> std::io::Result<Vec<LibraryEntry>> {
        let mut entries = Vec::new();
        self.scan_into(dir, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn scan_into(&self, dir: &Path, out: &mut Vec<LibraryEntry>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.scan_into(&path, out)?;
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .unwrap_or_default();
            if !KNOWN_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
            let data = match fs::read(&path) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("librarian: skipping {}: {}", path.display(), err);
                    continue;
                }
            };
            let classification = self.classify(name, &data);
            out.push(LibraryEntry {
                sha1: Self::fingerprint(&data),
                size: data.len() as u64,
                path,
                classification,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c8b_header_parse() {
        // Magic, one variant, speed 30, empty palette, entry: id 1 at 12..16.
        let mut data = vec![b'C', b'B', b'F', 1, 30, 0, 0, 1, 12, 0, 4, 0];
        data.extend_from_slice(&[0x60, 0x01, 0x12, 0x0C]);
        let header = C8bHeader::parse(&data).unwrap();
        assert_eq!(header.execution_speed, 30);
        assert_eq!(header.variants.len(), 1);
        assert_eq!(header.variants[0], C8bVariant { variant_id: 1, offset: 12, length: 4 });
    }

    #[test]
    fn test_c8b_best_variant_prefers_requested_id() {
        let header = C8bHeader {
            execution_speed: 30,
            palette_length: 0,
            variants: vec![
                C8bVariant { variant_id: 1, offset: 16, length: 4 },
                C8bVariant { variant_id: 4, offset: 20, length: 4 },
            ],
        };
        assert_eq!(header.best_variant(&[4, 1]).unwrap().variant_id, 4);
        assert_eq!(header.best_variant(&[9]).unwrap().variant_id, 1);
    }

    #[test]
    fn test_c8b_truncated_table_is_error() {
        let data = [b'C', b'B', b'F', 2, 0, 0, 0, 1, 0, 0];
        assert!(matches!(
            C8bHeader::parse(&data),
            Err(CadmiumError::BadCartridgeHeader { .. })
        ));
    }

    #[test]
    fn test_gif_signature_is_octo_cart() {
        let db = Database::embedded();
        let librarian = Librarian::new(&db);
        let classification = librarian.classify("cart.gif", b"GIF89a....");
        assert_eq!(classification, Classification::OctoCart);
    }

    #[test]
    fn test_unknown_rom_gets_variant_guess() {
        let db = Database::embedded();
        let librarian = Librarian::new(&db);
        let rom = [0xF0, 0x00, 0x02, 0x08, 0x12, 0x04];
        match librarian.classify("mystery.ch8", &rom) {
            Classification::Guessed { variants } => {
                assert!(variants
                    .intersects(Chip8Variant::XO_CHIP | Chip8Variant::MEGA_CHIP));
                assert!(!variants.contains(Chip8Variant::CHIP_8));
            }
            other => panic!("expected a guess, got {:?}", other),
        }
    }

    #[test]
    fn test_unrecognised_extension_is_unknown() {
        let db = Database::embedded();
        let librarian = Librarian::new(&db);
        assert_eq!(librarian.classify("notes.txt", b"hello"), Classification::Unknown);
    }

    #[test]
    fn test_fingerprint_is_canonical_lowercase() {
        let digest = Librarian::fingerprint(b"");
        assert_eq!(digest, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(digest.len(), 40);
    }
}
