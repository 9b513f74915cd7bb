/// LDraw Core Library - line parser, directive tree and part library
pub mod catalog;
pub mod color;
pub mod config;
pub mod directive;
pub mod document;
pub mod error;
pub mod geometry;
pub mod library;
pub mod optimize;
pub mod parser;
pub mod report;
pub mod shared;
pub mod transform;
pub mod writer;

// Re-export commonly used types
pub use catalog::{CatalogEntry, CatalogSummary, PartCatalog};
pub use color::{ColorCode, ColorLibrary, Rgb};
pub use config::{ColorField, FormatConfig, GridConfig, LibraryConfig};
pub use directive::{Directive, DirectiveKind, Model, Part, Step, StepRotation};
pub use document::{Change, Document, NodeId};
pub use error::{LibraryError, ParseError, Poisoned, Rejection};
pub use geometry::{Box3, Mesh};
pub use library::{PartAudit, PartLibrary, Resolution, ResolvedPart};
pub use optimize::{optimize_model, OptimizeOutcome};
pub use parser::{parse_document, parse_file, ParseOutput};
pub use report::{Dimensions, PartReport};
pub use shared::SharedDocument;
pub use transform::{RotationAngles, RotationState, Transform, TransformComponents};
