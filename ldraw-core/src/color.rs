/// LDraw color codes and the color library
///
/// 16 draws in the inherited color and 24 in its edge color. `0x2RRGGBB`
/// carries an RGB value directly.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ColorField;
use crate::error::ParseError;

pub const CURRENT_COLOR_CODE: u32 = 16;
pub const EDGE_COLOR_CODE: u32 = 24;

/// Color field of a part or primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ColorCode {
    /// 16: inherit the color of the referencing part.
    Current,
    /// 24: the edge color of the inherited color.
    Edge,
    /// Any other palette index.
    Palette(u32),
    /// `0x2RRGGBB` direct color.
    Direct(Rgb),
}

impl ColorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            CURRENT_COLOR_CODE => Self::Current,
            EDGE_COLOR_CODE => Self::Edge,
            other => Self::Palette(other),
        }
    }

    /// Numeric code, if this is a palette entry or sentinel.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Current => Some(CURRENT_COLOR_CODE),
            Self::Edge => Some(EDGE_COLOR_CODE),
            Self::Palette(code) => Some(*code),
            Self::Direct(_) => None,
        }
    }

    /// The color this code stands for when drawn inside `inherited`.
    pub fn resolve(self, inherited: ColorCode) -> ColorCode {
        match self {
            Self::Current => inherited,
            other => other,
        }
    }

    pub fn write(&self, style: ColorField) -> String {
        match (self, style) {
            (Self::Direct(rgb), _) => format!("0x2{:02X}{:02X}{:02X}", rgb.r, rgb.g, rgb.b),
            (code, ColorField::Compact) => code.code().unwrap_or_default().to_string(),
            (code, ColorField::ZeroPadded) => format!("{:03}", code.code().unwrap_or_default()),
        }
    }
}

impl Default for ColorCode {
    fn default() -> Self {
        Self::Current
    }
}

impl FromStr for ColorCode {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let lower = text.to_ascii_lowercase();
        if let Some(hex) = lower.strip_prefix("0x") {
            let value =
                u32::from_str_radix(hex, 16).map_err(|_| ParseError::InvalidColor(text.into()))?;
            if value >> 24 == 2 {
                return Ok(Self::Direct(Rgb::from_u32(value & 0x00FF_FFFF)));
            }
            return Ok(Self::from_code(value));
        }
        lower
            .parse::<u32>()
            .map(Self::from_code)
            .map_err(|_| ParseError::InvalidColor(text.into()))
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.write(ColorField::Compact))
    }
}

/// 24-bit color value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_u32(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: (value & 0xFF) as u8,
        }
    }
}

impl FromStr for Rgb {
    type Err = ParseError;

    /// Accepts `#RRGGBB` or `0xRRGGBB`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let hex = text
            .strip_prefix('#')
            .or_else(|| text.strip_prefix("0x"))
            .or_else(|| text.strip_prefix("0X"))
            .ok_or_else(|| ParseError::InvalidColor(text.into()))?;
        if hex.len() != 6 {
            return Err(ParseError::InvalidColor(text.into()));
        }
        u32::from_str_radix(hex, 16)
            .map(Rgb::from_u32)
            .map_err(|_| ParseError::InvalidColor(text.into()))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// EDGE field of a color definition: a value or another color's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeColor {
    Rgb(Rgb),
    Code(u32),
}

impl fmt::Display for EdgeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb(rgb) => rgb.fmt(f),
            Self::Code(code) => code.fmt(f),
        }
    }
}

/// `0 !COLOUR` meta-command.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorDefinition {
    /// Name as written, with underscores for spaces.
    pub name: String,
    pub code: u32,
    pub value: Rgb,
    pub edge: EdgeColor,
    pub alpha: Option<u8>,
    pub luminance: Option<u8>,
    /// Finish keywords and their parameters, kept verbatim.
    pub finish: Option<String>,
}

impl ColorDefinition {
    /// Name with underscores turned into spaces.
    pub fn display_name(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// Code to name and value lookup.
#[derive(Debug, Clone, Default)]
pub struct ColorLibrary {
    colors: BTreeMap<u32, ColorDefinition>,
}

impl ColorLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The common solid colors, used when no `LDConfig.ldr` is available.
    pub fn builtin() -> Self {
        const STANDARD: &[(u32, &str, u32)] = &[
            (0, "Black", 0x05131D),
            (1, "Blue", 0x0055BF),
            (2, "Green", 0x257A3E),
            (3, "Dark_Turquoise", 0x00838F),
            (4, "Red", 0xC91A09),
            (5, "Dark_Pink", 0xC870A0),
            (6, "Brown", 0x583927),
            (7, "Light_Grey", 0x9BA19D),
            (8, "Dark_Grey", 0x6D6E5C),
            (9, "Light_Blue", 0xB4D2E3),
            (10, "Bright_Green", 0x4B9F4A),
            (11, "Light_Turquoise", 0x55A5AF),
            (12, "Salmon", 0xF2705E),
            (13, "Pink", 0xFC97AC),
            (14, "Yellow", 0xF2CD37),
            (15, "White", 0xFFFFFF),
            (16, "Main_Colour", 0x7F7F7F),
            (19, "Tan", 0xE4CD9E),
            (24, "Edge_Colour", 0x7F7F7F),
            (25, "Orange", 0xFE8A18),
            (28, "Dark_Tan", 0x958A73),
            (70, "Reddish_Brown", 0x582A12),
            (71, "Light_Bluish_Grey", 0xA0A5A9),
            (72, "Dark_Bluish_Grey", 0x6C6E68),
        ];

        let mut library = Self::new();
        for (code, name, value) in STANDARD {
            let edge = if *code == 0 { 0x595959 } else { 0x333333 };
            library.insert(ColorDefinition {
                name: (*name).to_string(),
                code: *code,
                value: Rgb::from_u32(*value),
                edge: EdgeColor::Rgb(Rgb::from_u32(edge)),
                alpha: None,
                luminance: None,
                finish: None,
            });
        }
        library
    }

    /// Add or replace a definition; later definitions win.
    pub fn insert(&mut self, definition: ColorDefinition) {
        self.colors.insert(definition.code, definition);
    }

    pub fn get(&self, code: u32) -> Option<&ColorDefinition> {
        self.colors.get(&code)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Human-readable name for a color field.
    pub fn name_for(&self, color: ColorCode) -> String {
        match color {
            ColorCode::Direct(rgb) => rgb.to_string(),
            other => {
                let code = other.code().unwrap_or_default();
                self.get(code)
                    .map(ColorDefinition::display_name)
                    .unwrap_or_else(|| format!("Color {code}"))
            }
        }
    }
}
