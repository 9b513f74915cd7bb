/// Part library: resolves part references to parsed, optimized models
///
/// The cache lock is held only for lookups and inserts, never while a file
/// is read or parsed.
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use crate::catalog::{moved_target, CatalogSummary, PartCatalog};
use crate::color::ColorLibrary;
use crate::config::LibraryConfig;
use crate::directive::{normalize_name, Directive};
use crate::document::{Document, NodeId};
use crate::error::LibraryError;
use crate::geometry::Box3;
use crate::optimize;
use crate::parser;

/// Folders searched for a reference name, in priority order.
pub const SEARCH_FOLDERS: &[&str] = &[
    "parts",
    "parts/s",
    "p",
    "p/48",
    "Unofficial/parts",
    "Unofficial/parts/s",
    "Unofficial/p",
];

/// A library part, parsed and ready to draw.
#[derive(Debug)]
pub struct ResolvedPart {
    /// Normalized reference name.
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub document: Document,
    /// The model parts placing this file draw.
    pub model: NodeId,
    /// Bounds in the part's own coordinates.
    pub bounds: Box3,
}

impl ResolvedPart {
    /// Replacement name when this file is a `~Moved to` stub.
    pub fn moved_to(&self) -> Option<String> {
        moved_target(&self.description)
    }
}

/// What a part directive draws.
#[derive(Debug, Clone)]
pub enum Resolution {
    Library(Arc<ResolvedPart>),
    /// A model of the same file.
    Submodel(NodeId),
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// Names and models currently being expanded, used to cut cycles.
///
/// Model handles are only meaningful inside one document, so they are
/// set aside whenever the walk crosses into a library part's document.
#[derive(Debug, Default)]
pub(crate) struct ResolveStack {
    parts: Vec<String>,
    models: Vec<NodeId>,
}

impl ResolveStack {
    pub(crate) fn enter_part(&mut self, name: &str) -> bool {
        if self.parts.iter().any(|entry| entry == name) {
            log::warn!("cyclic part reference to {name}, not expanded");
            return false;
        }
        self.parts.push(name.to_string());
        true
    }

    pub(crate) fn leave_part(&mut self) {
        self.parts.pop();
    }

    pub(crate) fn enter_model(&mut self, model: NodeId) -> bool {
        if self.models.contains(&model) {
            log::warn!("cyclic submodel reference, not expanded");
            return false;
        }
        self.models.push(model);
        true
    }

    pub(crate) fn leave_model(&mut self) {
        self.models.pop();
    }

    pub(crate) fn take_models(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.models)
    }

    pub(crate) fn restore_models(&mut self, models: Vec<NodeId>) {
        self.models = models;
    }
}

/// Parts that could not be drawn as written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartAudit {
    /// Parts resolving to neither a library file nor a submodel.
    pub missing: Vec<NodeId>,
    /// Parts placing a `~Moved to` stub, with the replacement name.
    pub moved: Vec<(NodeId, String)>,
}

impl PartAudit {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.moved.is_empty()
    }
}

pub struct PartLibrary {
    config: LibraryConfig,
    catalog: RwLock<PartCatalog>,
    colors: ColorLibrary,
    cache: Mutex<HashMap<String, Arc<ResolvedPart>>>,
    misses: Mutex<HashSet<String>>,
    /// False for a library with no parts folder; nothing is looked up on disk.
    searchable: bool,
}

impl std::fmt::Debug for PartLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartLibrary")
            .field("root", &self.config.root)
            .field("searchable", &self.searchable)
            .finish_non_exhaustive()
    }
}

impl PartLibrary {
    /// Open a parts root, loading its catalog or building one if the
    /// side-car file is missing, unreadable or from an older layout.
    pub fn open(config: LibraryConfig) -> Result<Self, LibraryError> {
        let catalog_path = config.catalog_path();
        let catalog = match PartCatalog::load(&catalog_path) {
            Ok(catalog) if catalog.is_current() => catalog,
            Ok(_) => {
                log::info!("catalog {} is outdated, rebuilding", catalog_path.display());
                build_and_save(&config)?
            }
            Err(LibraryError::Io(_)) => build_and_save(&config)?,
            Err(error) => {
                log::warn!("catalog {} unreadable ({error}), rebuilding", catalog_path.display());
                build_and_save(&config)?
            }
        };
        let colors = load_colors(&config);
        Ok(Self::with_catalog(config, catalog, colors))
    }

    /// A library with no parts: only submodels of the document resolve.
    pub fn empty() -> Self {
        let mut library = Self::with_catalog(
            LibraryConfig::default(),
            PartCatalog::default(),
            ColorLibrary::builtin(),
        );
        library.searchable = false;
        library
    }

    fn with_catalog(config: LibraryConfig, catalog: PartCatalog, colors: ColorLibrary) -> Self {
        Self {
            config,
            catalog: RwLock::new(catalog),
            colors,
            cache: Mutex::new(HashMap::new()),
            misses: Mutex::new(HashSet::new()),
            searchable: true,
        }
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn colors(&self) -> &ColorLibrary {
        &self.colors
    }

    pub fn catalog(&self) -> RwLockReadGuard<'_, PartCatalog> {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rescan the parts root and replace the catalog on disk and in memory.
    pub fn rebuild_catalog(&self) -> Result<CatalogSummary, LibraryError> {
        let catalog = build_and_save(&self.config)?;
        let summary = catalog.summary();
        *self.catalog.write().unwrap_or_else(PoisonError::into_inner) = catalog;
        self.misses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(summary)
    }

    /// Catalog description, falling back to a resolved file's first line.
    pub fn description(&self, name: &str) -> Option<String> {
        if let Some(description) = self.catalog().description(name) {
            return Some(description.to_string());
        }
        self.resolve(name).map(|part| part.description.clone())
    }

    /// Number of parts held in the cache.
    pub fn cached_parts(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Look a name up in the library folders.
    pub fn resolve(&self, name: &str) -> Option<Arc<ResolvedPart>> {
        self.resolve_with(name, &mut ResolveStack::default())
    }

    pub(crate) fn resolve_with(
        &self,
        name: &str,
        stack: &mut ResolveStack,
    ) -> Option<Arc<ResolvedPart>> {
        let key = normalize_name(name);
        if let Some(hit) = self.cached(&key) {
            log::debug!("library cache hit: {key}");
            return Some(hit);
        }
        if !self.searchable || self.is_known_miss(&key) {
            return None;
        }
        if !stack.enter_part(&key) {
            return None;
        }
        let loaded = self.load(&key, stack);
        stack.leave_part();

        match loaded {
            Some(part) => {
                let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
                // Another thread may have loaded the same part meanwhile.
                Some(cache.entry(key).or_insert(part).clone())
            }
            None => {
                self.misses
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key);
                None
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<ResolvedPart>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn is_known_miss(&self, key: &str) -> bool {
        self.misses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn find_file(&self, key: &str) -> Option<PathBuf> {
        SEARCH_FOLDERS
            .iter()
            .map(|folder| self.config.root.join(folder).join(key))
            .find(|path| path.is_file())
    }

    fn load(&self, key: &str, stack: &mut ResolveStack) -> Option<Arc<ResolvedPart>> {
        let Some(path) = self.find_file(key) else {
            log::debug!("library miss: {key}");
            return None;
        };
        let mut document = match parser::parse_file(&path) {
            Ok(output) => output.document,
            Err(error) => {
                log::warn!("{}: {error}", path.display());
                return None;
            }
        };

        let outer_models = stack.take_models();
        for model in document.models().to_vec() {
            optimize::optimize_with(&mut document, model, self, stack);
        }
        let model = document.active_model();
        let bounds = document.bounds_with(model, self, stack);
        stack.restore_models(outer_models);

        let description = document
            .model(model)
            .map(|model| model.description.clone())
            .unwrap_or_default();
        log::debug!("library loaded: {key} from {}", path.display());
        Some(Arc::new(ResolvedPart {
            name: key.to_string(),
            path,
            description,
            document,
            model,
            bounds,
        }))
    }

    /// What the part directive `part` of `document` draws.
    ///
    /// Library files come first; a model of the same file with a matching
    /// name is the fallback. A submodel that is, or places, the model
    /// holding the part is refused.
    pub fn resolve_part(&self, document: &Document, part: NodeId) -> Resolution {
        self.resolve_part_with(document, part, &mut ResolveStack::default())
    }

    pub(crate) fn resolve_part_with(
        &self,
        document: &Document,
        part: NodeId,
        stack: &mut ResolveStack,
    ) -> Resolution {
        let Some(name) = document.part(part).map(|part| part.reference_name().to_string()) else {
            return Resolution::Unresolved;
        };
        if let Some(resolved) = self.resolve_with(&name, stack) {
            return Resolution::Library(resolved);
        }
        let Some(target) = document.find_model(&name) else {
            return Resolution::Unresolved;
        };
        if let Some(enclosing) = document.enclosing_model(part) {
            if target == enclosing || document.model_reaches(target, enclosing) {
                log::warn!("{name} places its own enclosing model, not expanded");
                return Resolution::Unresolved;
            }
        }
        Resolution::Submodel(target)
    }

    /// Walk the parts below `root` for missing and moved references.
    pub fn audit(&self, document: &Document, root: NodeId) -> PartAudit {
        let mut audit = PartAudit::default();
        for part in document.parts(root) {
            match self.resolve_part(document, part) {
                Resolution::Unresolved => audit.missing.push(part),
                Resolution::Library(resolved) => {
                    if let Some(target) = resolved.moved_to() {
                        audit.moved.push((part, target));
                    }
                }
                Resolution::Submodel(_) => {}
            }
        }
        audit
    }
}

fn build_and_save(config: &LibraryConfig) -> Result<PartCatalog, LibraryError> {
    let catalog = PartCatalog::build(config)?;
    if let Err(error) = catalog.save(&config.catalog_path()) {
        log::warn!("could not write catalog: {error}");
    }
    Ok(catalog)
}

/// Color definitions from the library's config file, or the builtin set.
fn load_colors(config: &LibraryConfig) -> ColorLibrary {
    let path = config.color_config_path();
    let output = match parser::parse_file(&path) {
        Ok(output) => output,
        Err(_) => return ColorLibrary::builtin(),
    };
    let document = output.document;
    let mut colors = ColorLibrary::new();
    for node in document.descendants(document.root()) {
        if let Some(Directive::ColorDefinition(definition)) = document.get(node) {
            colors.insert(definition.clone());
        }
    }
    if colors.is_empty() {
        return ColorLibrary::builtin();
    }
    log::info!("{} colors loaded from {}", colors.len(), path.display());
    colors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ColorCode;
    use approx::assert_abs_diff_eq;
    use nalgebra::Point3;
    use std::fs;

    fn scratch_library(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("ldraw-library-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(root.join("parts/s")).unwrap();
        fs::create_dir_all(root.join("p")).unwrap();
        fs::write(
            root.join("parts/3003.dat"),
            "0 Brick  2 x  2\r\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 s/3003s01.dat\r\n\
             4 16 -20 0 -20 20 0 -20 20 0 20 -20 0 20\r\n2 24 -20 0 -20 20 0 -20\r\n",
        )
        .unwrap();
        fs::write(
            root.join("parts/s/3003s01.dat"),
            "0 ~Brick  2 x  2 without Top\r\n4 16 -20 24 -20 20 24 -20 20 24 20 -20 24 20\r\n",
        )
        .unwrap();
        fs::write(root.join("parts/loop.dat"), "0 Loop\r\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 loop.dat\r\n")
            .unwrap();
        fs::write(root.join("parts/11.dat"), "0 ~Moved to 3003\r\n").unwrap();
        root
    }

    #[test]
    fn test_library_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PartLibrary>();
    }

    #[test]
    fn test_resolve_caches_and_optimizes() {
        let root = scratch_library("resolve");
        let library = PartLibrary::open(LibraryConfig::new(&root)).unwrap();
        assert!(root.join("PartCatalog.json").is_file());

        let part = library.resolve("3003.DAT").unwrap();
        assert_eq!(part.description, "Brick  2 x  2");
        assert_abs_diff_eq!(part.bounds.min, Point3::new(-20.0, 0.0, -20.0), epsilon = 1e-9);
        assert_abs_diff_eq!(part.bounds.max, Point3::new(20.0, 24.0, 20.0), epsilon = 1e-9);
        // Lines, quads and the subpart reference each get a step.
        assert_eq!(part.document.children(part.model).len(), 3);
        assert!(part.document.model(part.model).unwrap().cached_bounds().is_some());

        let again = library.resolve("3003.dat").unwrap();
        assert!(Arc::ptr_eq(&part, &again));
        assert_eq!(library.cached_parts(), 2);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_rebuild_catalog_forgets_misses() {
        let root = scratch_library("rebuild");
        let library = PartLibrary::open(LibraryConfig::new(&root)).unwrap();
        let before = library.catalog().summary();
        assert!(library.resolve("3001.dat").is_none());

        fs::write(root.join("parts/3001.dat"), "0 Brick  2 x  4\r\n").unwrap();
        // still remembered as missing
        assert!(library.resolve("3001.dat").is_none());

        let summary = library.rebuild_catalog().unwrap();
        assert_eq!(summary.parts, before.parts + 1);
        assert!(library.catalog().contains("3001.dat"));
        assert_eq!(library.description("3001.dat").as_deref(), Some("Brick  2 x  4"));
        assert_eq!(library.resolve("3001.dat").unwrap().description, "Brick  2 x  4");
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_cyclic_library_part_does_not_hang() {
        let root = scratch_library("cycle");
        let library = PartLibrary::open(LibraryConfig::new(&root)).unwrap();
        let part = library.resolve("loop.dat").unwrap();
        assert!(part.bounds.is_empty());
        let document = Document::parse("1 16 0 0 0 1 0 0 0 1 0 0 0 1 loop.dat");
        assert!(document.mesh(document.root(), &library).is_empty());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_submodel_fallback_and_self_reference() {
        let library = PartLibrary::empty();
        let document = Document::parse(
            "0 FILE a.ldr\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 b.ldr\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 a.ldr\n\
             0 NOFILE\n0 FILE b.ldr\n3 16 0 0 0 1 0 0 0 1 0\n0 NOFILE\n",
        );
        let a = document.find_model("a.ldr").unwrap();
        let b = document.find_model("b.ldr").unwrap();
        let parts: Vec<_> = document.parts(a).collect();

        assert!(matches!(
            library.resolve_part(&document, parts[0]),
            Resolution::Submodel(model) if model == b
        ));
        assert!(matches!(
            library.resolve_part(&document, parts[1]),
            Resolution::Unresolved
        ));
    }

    #[test]
    fn test_audit_reports_missing_and_moved() {
        let root = scratch_library("audit");
        let library = PartLibrary::open(LibraryConfig::new(&root)).unwrap();
        let document = Document::parse(
            "0 Audit\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 3003.dat\n\
             1 4 0 0 0 1 0 0 0 1 0 0 0 1 11.dat\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 nosuch.dat\n",
        );
        let audit = library.audit(&document, document.root());
        let parts: Vec<_> = document.parts(document.root()).collect();
        assert_eq!(audit.missing, vec![parts[2]]);
        assert_eq!(audit.moved, vec![(parts[1], "3003.dat".to_string())]);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_mesh_expands_library_parts() {
        let root = scratch_library("mesh");
        let library = PartLibrary::open(LibraryConfig::new(&root)).unwrap();
        let document = Document::parse("1 4 100 0 0 1 0 0 0 1 0 0 0 1 3003.dat");
        let mesh = document.mesh(document.root(), &library);
        // Two quads split into triangles, plus one edge.
        assert_eq!(mesh.faces.len(), 4);
        assert_eq!(mesh.segments.len(), 1);
        assert!(mesh.faces.iter().all(|face| face.color == ColorCode::Palette(4)));
        assert_eq!(mesh.segments[0].color, ColorCode::Edge);
        assert_abs_diff_eq!(mesh.bounds().min.x, 80.0, epsilon = 1e-9);
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let missing = std::env::temp_dir().join("ldraw-library-does-not-exist");
        assert!(PartLibrary::open(LibraryConfig::new(missing)).is_err());
    }
}
