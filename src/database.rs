//! The CHIP-8 program database: two JSON documents (platforms and programs)
//! indexing known ROMs by SHA-1 digest, with a fallback platforms document
//! embedded for offline first-run use.
//!
//! Unknown JSON keys are tolerated and missing keys take defaults, so
//! hand-edited community documents round-trip without loss of what this crate
//! understands.

use crate::error::CadmiumError;
use crate::palette::Color;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Where a program was originally published.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginType {
    #[default]
    Unknown,
    Gamejam,
    Event,
    Magazine,
    Manual,
}

impl<'de> Deserialize<'de> for OriginType {
    /// Unknown origin strings fall back to [OriginType::Unknown] instead of
    /// rejecting the document.
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match text.as_str() {
            "gamejam" => OriginType::Gamejam,
            "event" => OriginType::Event,
            "magazine" => OriginType::Magazine,
            "manual" => OriginType::Manual,
            _ => OriginType::Unknown,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    #[serde(default, rename = "type")]
    pub origin_type: OriginType,
    #[serde(default)]
    pub reference: String,
}

/// Screen rotation in degrees, serialised as 0/90/180/270.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScreenRotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl Serialize for ScreenRotation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let deg = match self {
            ScreenRotation::None => 0,
            ScreenRotation::Cw90 => 90,
            ScreenRotation::Cw180 => 180,
            ScreenRotation::Cw270 => 270,
        };
        serializer.serialize_u32(deg)
    }
}

impl<'de> Deserialize<'de> for ScreenRotation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let deg = u32::deserialize(deserializer).unwrap_or(0);
        Ok(match deg {
            90 => ScreenRotation::Cw90,
            180 => ScreenRotation::Cw180,
            270 => ScreenRotation::Cw270,
            _ => ScreenRotation::None,
        })
    }
}

/// Touch input modes as used by Octo.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchInputMode {
    #[default]
    Unknown,
    None,
    Swipe,
    Seg16,
    Seg16Fill,
    Gamepad,
    Vip,
}

impl<'de> Deserialize<'de> for TouchInputMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match text.as_str() {
            "none" => TouchInputMode::None,
            "swipe" => TouchInputMode::Swipe,
            "seg16" => TouchInputMode::Seg16,
            "seg16fill" => TouchInputMode::Seg16Fill,
            "gamepad" => TouchInputMode::Gamepad,
            "vip" => TouchInputMode::Vip,
            _ => TouchInputMode::Unknown,
        })
    }
}

/// A display resolution, serialised as `"64x32"`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}x{}", self.width, self.height))
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        match text.split_once('x') {
            Some((w, h)) => Ok(Resolution {
                width: w.parse().unwrap_or(0),
                height: h.parse().unwrap_or(0),
            }),
            None => Ok(Resolution::default()),
        }
    }
}

/// Quirk name to enabled flag.
pub type QuirkMap = BTreeMap<String, bool>;

/// One interpreter platform as described by `platforms.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Platform {
    pub id: String,
    pub name: String,
    pub description: String,
    pub release: String,
    pub authors: Vec<String>,
    pub urls: Vec<String>,
    pub copyright: String,
    pub license: String,
    pub display_resolutions: Vec<Resolution>,
    pub default_tickrate: u32,
    pub quirks: QuirkMap,
}

impl Platform {
    pub fn quirk_enabled(&self, name: &str) -> bool {
        self.quirks.get(name).copied().unwrap_or(false)
    }
}

/// Colour information a program may carry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColorDef {
    pub pixels: Vec<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buzzer: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence: Option<Color>,
}

/// One ROM image of a program, keyed by its SHA-1 in the parent map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rom {
    pub file: String,
    pub embedded_title: String,
    pub description: String,
    pub release: String,
    pub platforms: Vec<String>,
    /// Per-platform quirk overrides, member-wise on top of the platform.
    pub quirky_platforms: BTreeMap<String, QuirkMap>,
    pub authors: Vec<String>,
    pub images: Vec<String>,
    pub urls: Vec<String>,
    pub tickrate: u32,
    pub start_address: u32,
    pub screen_rotation: ScreenRotation,
    pub keys: BTreeMap<String, u8>,
    pub touch_input_mode: TouchInputMode,
    pub font_style: String,
    pub colors: ColorDef,
}

/// One program (possibly with several ROM revisions).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Program {
    pub title: String,
    pub origin: Origin,
    pub description: String,
    pub release: String,
    pub copyright: String,
    pub license: String,
    pub images: Vec<String>,
    pub urls: Vec<String>,
    pub authors: Vec<String>,
    /// SHA-1 digest (lowercase hex) to ROM record.
    pub roms: BTreeMap<String, Rom>,
}

/// The result of a successful digest lookup.
#[derive(Clone, Debug)]
pub struct RomInfo<'a> {
    pub program: &'a Program,
    pub rom: &'a Rom,
    pub sha1: &'a str,
}

impl<'a> RomInfo<'a> {
    /// The effective quirk set for a platform: the platform's quirks overridden
    /// member-wise by the program's per-platform map.
    pub fn effective_quirks(&self, platform: &Platform) -> QuirkMap {
        let mut quirks = platform.quirks.clone();
        if let Some(overrides) = self.rom.quirky_platforms.get(&platform.id) {
            for (key, value) in overrides {
                quirks.insert(key.clone(), *value);
            }
        }
        quirks
    }
}

/// The platforms document embedded for offline first-run use.
pub static FALLBACK_PLATFORMS_JSON: &str = r##"[
  {"id": "originalChip8", "name": "CHIP-8", "description": "The original CHIP-8 interpreter on the COSMAC VIP", "release": "1977",
   "displayResolutions": ["64x32"], "defaultTickrate": 15,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": true, "logic": true}},
  {"id": "modernChip8", "name": "CHIP-8 (modern)", "description": "CHIP-8 as commonly reimplemented today", "release": "1990",
   "displayResolutions": ["64x32"], "defaultTickrate": 12,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": false, "logic": false}},
  {"id": "chip8x", "name": "CHIP-8X", "description": "CHIP-8 with the VP-590 colour board", "release": "1980",
   "displayResolutions": ["64x32"], "defaultTickrate": 15,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": true, "logic": true}},
  {"id": "chip48", "name": "CHIP-48", "description": "CHIP-8 reimplemented for the HP-48 calculators", "release": "1990",
   "displayResolutions": ["64x32"], "defaultTickrate": 15,
   "quirks": {"shift": true, "memoryIncrementByX": true, "memoryLeaveIUnchanged": false, "wrap": false, "jump": true, "vblank": false, "logic": false}},
  {"id": "superchip1", "name": "SUPER-CHIP 1.0", "description": "SUPER-CHIP 1.0 for the HP-48S", "release": "1991",
   "displayResolutions": ["64x32", "128x64"], "defaultTickrate": 30,
   "quirks": {"shift": true, "memoryIncrementByX": false, "memoryLeaveIUnchanged": true, "wrap": false, "jump": true, "vblank": false, "logic": false}},
  {"id": "superchip", "name": "SUPER-CHIP 1.1", "description": "SUPER-CHIP 1.1 for the HP-48SX", "release": "1991",
   "displayResolutions": ["64x32", "128x64"], "defaultTickrate": 30,
   "quirks": {"shift": true, "memoryIncrementByX": false, "memoryLeaveIUnchanged": true, "wrap": false, "jump": true, "vblank": false, "logic": false, "halfPixelScroll": true, "sc11Collisions": true}},
  {"id": "megachip8", "name": "MEGA-CHIP", "description": "MEGA-CHIP with 256x192 colour and digitised sound", "release": "2007",
   "displayResolutions": ["64x32", "128x64", "256x192"], "defaultTickrate": 3000,
   "quirks": {"shift": true, "memoryIncrementByX": false, "memoryLeaveIUnchanged": true, "wrap": false, "jump": true, "vblank": false, "logic": false}},
  {"id": "xochip", "name": "XO-CHIP", "description": "Octo's XO-CHIP extensions", "release": "2014",
   "displayResolutions": ["64x32", "128x64"], "defaultTickrate": 1000,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": true, "jump": false, "vblank": false, "logic": false}},
  {"id": "chip8vip", "name": "CHIP-8 (COSMAC VIP)", "description": "Hardware-level CHIP-8 on an emulated COSMAC VIP", "release": "1977",
   "displayResolutions": ["64x32"], "defaultTickrate": 15,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": true, "logic": true}},
  {"id": "chip8dream", "name": "CHIP-8 (DREAM6800)", "description": "Hardware-level CHIP-8 on an emulated DREAM6800", "release": "1978",
   "displayResolutions": ["64x32"], "defaultTickrate": 15,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": true, "logic": true}},
  {"id": "chip8eti660", "name": "CHIP-8 (ETI-660)", "description": "Hardware-level CHIP-8 on an emulated ETI-660", "release": "1981",
   "displayResolutions": ["64x48"], "defaultTickrate": 15,
   "quirks": {"shift": false, "memoryIncrementByX": false, "memoryLeaveIUnchanged": false, "wrap": false, "jump": false, "vblank": true, "logic": true}}
]"##;

/// The combined database with a digest index over all program ROMs.
pub struct Database {
    platforms: Vec<Platform>,
    programs: Vec<Program>,
    rom_index: HashMap<String, (usize, String)>,
}

impl Database {
    /// Builds a database from the two JSON documents; `platforms_json` may be
    /// `None` to use the embedded fallback document.
    pub fn from_json(
        platforms_json: Option<&str>,
        programs_json: &str,
    ) -> Result<Self, CadmiumError> {
        let platforms: Vec<Platform> =
            serde_json::from_str(platforms_json.unwrap_or(FALLBACK_PLATFORMS_JSON)).map_err(
                |err| CadmiumError::BadCartridgeHeader { reason: format!("platforms.json: {}", err) },
            )?;
        let programs: Vec<Program> = serde_json::from_str(programs_json).map_err(|err| {
            CadmiumError::BadCartridgeHeader { reason: format!("programs.json: {}", err) }
        })?;
        Ok(Self::from_parts(platforms, programs))
    }

    /// Builds a database with only the embedded platform knowledge.
    pub fn embedded() -> Self {
        let platforms: Vec<Platform> =
            serde_json::from_str(FALLBACK_PLATFORMS_JSON).unwrap_or_default();
        Self::from_parts(platforms, Vec::new())
    }

    pub fn from_parts(platforms: Vec<Platform>, programs: Vec<Program>) -> Self {
        let mut rom_index = HashMap::new();
        for (index, program) in programs.iter().enumerate() {
            for sha1 in program.roms.keys() {
                rom_index.insert(sha1.to_ascii_lowercase(), (index, sha1.clone()));
            }
        }
        Database { platforms, programs, rom_index }
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    pub fn platform(&self, id: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Digest lookup; the digest is canonical lowercase 40-char hex.
    pub fn find_rom(&self, sha1: &str) -> Option<RomInfo<'_>> {
        let needle = sha1.to_ascii_lowercase();
        self.rom_index.get(&needle).map(|(index, key)| {
            let program = &self.programs[*index];
            RomInfo { program, rom: &program.roms[key], sha1: key }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_database() -> Database {
        let programs = r##"[
            {"title": "Test Game",
             "origin": {"type": "magazine", "reference": "Some Journal"},
             "authors": ["Somebody"],
             "roms": {
                "da39a3ee5e6b4b0d3255bfef95601890afd80709": {
                    "file": "test.ch8",
                    "platforms": ["originalChip8"],
                    "quirkyPlatforms": {"originalChip8": {"wrap": true}},
                    "tickrate": 20,
                    "startAddress": 512
                }
             }}
        ]"##;
        Database::from_json(None, programs).unwrap()
    }

    #[test]
    fn test_fallback_platforms_parse() {
        let db = Database::embedded();
        assert!(db.platform("originalChip8").is_some());
        assert_eq!(db.platform("originalChip8").unwrap().default_tickrate, 15);
        assert!(db.platform("superchip").unwrap().quirk_enabled("shift"));
    }

    #[test]
    fn test_rom_lookup_by_digest() {
        let db = setup_test_database();
        let info = db.find_rom("DA39A3EE5E6B4B0D3255BFEF95601890AFD80709").unwrap();
        assert_eq!(info.program.title, "Test Game");
        assert_eq!(info.rom.tickrate, 20);
        assert!(db.find_rom("0000000000000000000000000000000000000000").is_none());
    }

    #[test]
    fn test_effective_quirks_override() {
        let db = setup_test_database();
        let info = db.find_rom("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let platform = db.platform("originalChip8").unwrap();
        assert!(!platform.quirk_enabled("wrap"));
        let effective = info.effective_quirks(platform);
        assert_eq!(effective.get("wrap"), Some(&true));
        // Untouched members come from the platform.
        assert_eq!(effective.get("vblank"), Some(&true));
    }

    #[test]
    fn test_unknown_keys_are_tolerated() {
        let programs = r##"[{"title": "X", "roms": {}, "someFutureKey": 42}]"##;
        let db = Database::from_json(None, programs).unwrap();
        assert_eq!(db.programs().len(), 1);
    }

    #[test]
    fn test_platform_round_trip() {
        let db = Database::embedded();
        let json = serde_json::to_string(&db.platforms()[0]).unwrap();
        let back: Platform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, db.platforms()[0]);
    }
}
