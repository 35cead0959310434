use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Top,
    Center,
    Bottom,
    Left,
    Right,
}

impl Default for Position {
    fn default() -> Self {
        Self::Center
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    Small,
    Medium,
    Large,
}

impl SizeTier {
    /// Nominal pixel size the fitter starts from.
    pub fn nominal_px(self) -> u32 {
        match self {
            SizeTier::Small => 64,
            SizeTier::Medium => 96,
            SizeTier::Large => 128,
        }
    }
}

impl Default for SizeTier {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    Transparent,
    Solid,
    Photo,
}

impl Default for BackgroundMode {
    fn default() -> Self {
        Self::Transparent
    }
}

/// An sRGB colour parsed from `#rgb` or `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl HexColor {
    pub const WHITE: HexColor = HexColor { r: 255, g: 255, b: 255 };
    pub const BLACK: HexColor = HexColor { r: 0, g: 0, b: 0 };

    pub fn rgba(self, alpha: u8) -> [u8; 4] {
        [self.r, self.g, self.b, alpha]
    }
}

impl Default for HexColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl FromStr for HexColor {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('#');
        let invalid = || AppError::Validation(format!("Invalid color: {}", s));

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |i: usize, width: usize| -> Result<u8, AppError> {
            let raw = &hex[i * width..(i + 1) * width];
            let value = u8::from_str_radix(raw, 16).map_err(|_| invalid())?;
            Ok(if width == 1 { value * 17 } else { value })
        };

        match hex.len() {
            3 => Ok(HexColor {
                r: channel(0, 1)?,
                g: channel(1, 1)?,
                b: channel(2, 1)?,
            }),
            6 => Ok(HexColor {
                r: channel(0, 2)?,
                g: channel(1, 2)?,
                b: channel(2, 2)?,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl Serialize for HexColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HexColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Everything needed to render one sticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRequest {
    pub text: String,
    pub position: Position,
    pub font: Option<String>,
    pub color: HexColor,
    pub size: SizeTier,
    pub background: BackgroundMode,
}

impl StyleRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            position: Position::default(),
            font: None,
            color: HexColor::default(),
            size: SizeTier::default(),
            background: BackgroundMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        let short: HexColor = "#f00".parse().unwrap();
        assert_eq!(short, HexColor { r: 255, g: 0, b: 0 });

        let long: HexColor = "3B82F6".parse().unwrap();
        assert_eq!(long, HexColor { r: 0x3B, g: 0x82, b: 0xF6 });
        assert_eq!(long.to_string(), "#3B82F6");
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!("#12345".parse::<HexColor>().is_err());
        assert!("#zzzzzz".parse::<HexColor>().is_err());
        assert!("".parse::<HexColor>().is_err());
    }

    #[test]
    fn size_tiers_map_to_nominal_pixels() {
        assert_eq!(SizeTier::Small.nominal_px(), 64);
        assert_eq!(SizeTier::Medium.nominal_px(), 96);
        assert_eq!(SizeTier::Large.nominal_px(), 128);
    }
}
