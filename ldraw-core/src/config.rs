/// Settings for the part library, text output and the editing grid
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the part library lives and how it is laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// The LDraw folder containing `parts/` and `p/`.
    pub root: PathBuf,
    /// Side-car catalog index, written directly under `root`.
    pub catalog_file: String,
    /// Color definitions read when present, relative to `root`.
    pub color_config_file: String,
}

impl LibraryConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(&self.catalog_file)
    }

    pub fn color_config_path(&self) -> PathBuf {
        self.root.join(&self.color_config_file)
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("ldraw"),
            catalog_file: "PartCatalog.json".to_string(),
            color_config_file: "LDConfig.ldr".to_string(),
        }
    }
}

/// How the color field of a line is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorField {
    /// `16`
    #[default]
    Compact,
    /// `016`
    ZeroPadded,
}

/// How numbers are written back to LDraw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Digits after the decimal point.
    pub precision: usize,
    /// Strip trailing zeros (`1.500000` becomes `1.5`).
    pub trim_zeros: bool,
    /// Minimum field width for numbers; 0 disables padding.
    pub float_width: usize,
    pub color_field: ColorField,
    /// Line terminator.
    pub line_ending: String,
}

impl FormatConfig {
    /// Fixed columns in the style of classic LDraw editors.
    pub fn fixed_width() -> Self {
        Self {
            precision: 6,
            trim_zeros: false,
            float_width: 12,
            color_field: ColorField::ZeroPadded,
            line_ending: "\r\n".to_string(),
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            precision: 6,
            trim_zeros: true,
            float_width: 0,
            color_field: ColorField::Compact,
            line_ending: "\r\n".to_string(),
        }
    }
}

/// Editing grid used when snapping placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Horizontal pitch in LDU; 20 is one stud.
    pub spacing: f64,
    /// Rotations snap to multiples of this many degrees.
    pub minimum_angle: f64,
}

impl GridConfig {
    /// 1 LDU steps.
    pub fn fine() -> Self {
        Self {
            spacing: 1.0,
            minimum_angle: 15.0,
        }
    }

    /// Half-stud steps with plate-height vertical steps.
    pub fn medium() -> Self {
        Self {
            spacing: 10.0,
            minimum_angle: 45.0,
        }
    }

    /// One stud horizontally and one brick vertically.
    pub fn coarse() -> Self {
        Self {
            spacing: 20.0,
            minimum_angle: 90.0,
        }
    }

    /// Pitch along the axis a part's up vector points to.
    ///
    /// A brick is 24 LDU tall for a 20 LDU stud; a plate is 8 LDU for the
    /// 10 LDU half-stud grid.
    pub fn vertical_spacing(&self) -> f64 {
        if self.spacing >= 20.0 {
            self.spacing * 1.2
        } else {
            self.spacing * 0.8
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::medium()
    }
}
