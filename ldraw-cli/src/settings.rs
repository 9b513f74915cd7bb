/// Optional TOML settings file
use anyhow::{Context, Result};
use ldraw_core::{FormatConfig, GridConfig, LibraryConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tables `[library]`, `[format]` and `[grid]`; each may be left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub library: LibraryConfig,
    pub format: FormatConfig,
    pub grid: GridConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
