use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single RGB colour. Serialised to and from JSON as an `#rrggbb` string; an
/// alpha byte is only introduced on conversion to a packed RGBA value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Builds a colour from a packed `0xRRGGBB` integer.
    pub const fn from_rgb_int(val: u32) -> Self {
        Color { r: (val >> 16) as u8, g: (val >> 8) as u8, b: val as u8 }
    }

    /// Parses an `#rrggbb` string; anything unparsable yields black, mirroring the
    /// lenient behaviour expected from hand-edited database files.
    pub fn from_hex(hex: &str) -> Self {
        if let Some(digits) = hex.strip_prefix('#') {
            if let Ok(val) = u32::from_str_radix(digits, 16) {
                return Color::from_rgb_int(val);
            }
        }
        Color::new(0, 0, 0)
    }

    pub const fn to_rgb_int(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Packs the colour as `0xRRGGBBAA`.
    pub const fn to_rgba_int(self, alpha: u8) -> u32 {
        ((self.r as u32) << 24) | ((self.g as u32) << 16) | ((self.b as u32) << 8) | alpha as u32
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        if text.starts_with('#') {
            Ok(Color::from_hex(&text))
        } else {
            Err(D::Error::custom("expected an #rrggbb colour string"))
        }
    }
}

/// An ordered sequence of colours plus the optional border and buzzer-signal
/// colours some variants and database entries carry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub colors: Vec<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_color: Option<Color>,
}

impl Palette {
    /// Builds a palette from `#rrggbb` strings.
    pub fn from_hex_colors(colors: &[&str]) -> Self {
        Palette {
            colors: colors.iter().map(|c| Color::from_hex(c)).collect(),
            border_color: None,
            signal_color: None,
        }
    }

    /// The default two-colour palette: white on black.
    pub fn monochrome() -> Self {
        Palette::from_hex_colors(&["#000000", "#ffffff"])
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let col = Color::from_hex("#1fa2ff");
        assert_eq!(col, Color::new(0x1f, 0xa2, 0xff));
        assert_eq!(col.to_string(), "#1fa2ff");
    }

    #[test]
    fn test_bad_hex_is_black() {
        assert_eq!(Color::from_hex("bogus"), Color::new(0, 0, 0));
    }

    #[test]
    fn test_rgba_packing() {
        assert_eq!(Color::new(0x11, 0x22, 0x33).to_rgba_int(0xff), 0x112233ff);
    }

    #[test]
    fn test_palette_json() {
        let pal = Palette::from_hex_colors(&["#000000", "#ffffff"]);
        let json = serde_json::to_string(&pal).unwrap();
        assert_eq!(json, r##"{"colors":["#000000","#ffffff"]}"##);
        let back: Palette = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pal);
    }
}
