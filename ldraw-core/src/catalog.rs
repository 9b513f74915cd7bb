/// Part catalog: names, descriptions and categories of every library part
///
/// Only header lines are read, and the result is kept as a JSON side-car
/// next to the parts folders.
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::LibraryConfig;
use crate::directive::normalize_name;
use crate::error::LibraryError;

/// Bumped whenever the JSON layout changes; older files are rebuilt.
pub const CATALOG_VERSION: u32 = 1;

/// Folders whose parts are listed, in priority order. Earlier folders win
/// when two hold the same name.
const CATALOG_FOLDERS: &[&str] = &["parts", "p", "Unofficial/parts", "Unofficial/p"];

/// Header lines read per file before giving up on `!CATEGORY`.
const HEADER_LINE_LIMIT: usize = 32;

const MOVED_PREFIX: &str = "~Moved to ";

/// Category of a part with this description: its first word, without the
/// `~`, `_` and `=` markers used for subparts, aliases and obsolete parts.
pub fn category_for_description(description: &str) -> String {
    let trimmed = description.trim_start_matches(['~', '_', '=']).trim_start();
    match trimmed.split_whitespace().next() {
        Some(word) => word.to_string(),
        None => "Other".to_string(),
    }
}

/// Name a `~Moved to` stub points at.
pub fn moved_target(description: &str) -> Option<String> {
    let target = description.trim().strip_prefix(MOVED_PREFIX)?.trim();
    if target.is_empty() {
        return None;
    }
    let mut name = normalize_name(target);
    if !name.ends_with(".dat") {
        name.push_str(".dat");
    }
    Some(name)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
}

/// Counts reported after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSummary {
    pub parts: usize,
    pub categories: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartCatalog {
    pub version: u32,
    /// Category to parts, each list sorted by name.
    pub categories: BTreeMap<String, Vec<CatalogEntry>>,
    /// Reference name to description.
    pub descriptions: BTreeMap<String, String>,
}

impl PartCatalog {
    /// Scan the parts root. Two scans of the same tree give equal catalogs.
    pub fn build(config: &LibraryConfig) -> Result<Self, LibraryError> {
        let root = &config.root;
        if !root.is_dir() {
            return Err(LibraryError::InvalidRoot(root.clone()));
        }
        for required in ["parts", "p"] {
            if !root.join(required).is_dir() {
                return Err(LibraryError::MissingSubdirectory {
                    root: root.clone(),
                    name: required.to_string(),
                });
            }
        }

        let mut catalog = PartCatalog {
            version: CATALOG_VERSION,
            ..Self::default()
        };
        for folder in CATALOG_FOLDERS {
            let base = root.join(folder);
            if !base.is_dir() {
                continue;
            }
            let mut files = Vec::new();
            collect_part_files(&base, &mut files)?;
            files.sort();
            for path in files {
                let Some(name) = relative_name(&base, &path) else {
                    continue;
                };
                if catalog.descriptions.contains_key(&name) {
                    continue;
                }
                match read_header(&path) {
                    Ok(header) => catalog.add(name, header.description, header.category),
                    Err(error) => log::warn!("{}: unreadable, skipped: {error}", path.display()),
                }
            }
        }

        for entries in catalog.categories.values_mut() {
            entries.sort();
        }
        log::info!(
            "catalog built: {} parts in {} categories",
            catalog.descriptions.len(),
            catalog.categories.len()
        );
        Ok(catalog)
    }

    fn add(&mut self, name: String, description: String, category: Option<String>) {
        let category = category.unwrap_or_else(|| category_for_description(&description));
        self.categories
            .entry(category)
            .or_default()
            .push(CatalogEntry {
                name: name.clone(),
                description: description.clone(),
            });
        self.descriptions.insert(name, description);
    }

    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let text = fs::read_to_string(path)?;
        let catalog: PartCatalog = serde_json::from_str(&text)?;
        log::info!("catalog loaded from {}", path.display());
        Ok(catalog)
    }

    pub fn save(&self, path: &Path) -> Result<(), LibraryError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Whether this catalog was written by the current layout.
    pub fn is_current(&self) -> bool {
        self.version == CATALOG_VERSION
    }

    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            parts: self.descriptions.len(),
            categories: self.categories.len(),
        }
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn parts_in_category(&self, category: &str) -> &[CatalogEntry] {
        self.categories.get(category).map_or(&[], Vec::as_slice)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.descriptions
            .get(&normalize_name(name))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptions.contains_key(&normalize_name(name))
    }

    /// Case-insensitive substring search over names and descriptions.
    pub fn search(&self, query: &str) -> Vec<CatalogEntry> {
        let query = query.trim().to_lowercase();
        self.descriptions
            .iter()
            .filter(|(name, description)| {
                name.contains(&query) || description.to_lowercase().contains(&query)
            })
            .map(|(name, description)| CatalogEntry {
                name: name.clone(),
                description: description.clone(),
            })
            .collect()
    }
}

fn collect_part_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), LibraryError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_part_files(&path, files)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dat"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn relative_name(base: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect();
    Some(normalize_name(&parts.join("/")))
}

struct PartHeader {
    description: String,
    category: Option<String>,
}

/// Read the description and any `!CATEGORY` from the top of a part file.
fn read_header(path: &Path) -> Result<PartHeader, LibraryError> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut header = PartHeader {
        description: String::new(),
        category: None,
    };
    let mut buffer = Vec::new();
    for _ in 0..HEADER_LINE_LIMIT {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(text) = line.strip_prefix('0') else {
            break;
        };
        let text = text.trim();
        if header.description.is_empty() {
            header.description = text.to_string();
        } else if let Some(category) = text.strip_prefix("!CATEGORY") {
            header.category = Some(category.trim().to_string());
        }
    }
    Ok(header)
}
