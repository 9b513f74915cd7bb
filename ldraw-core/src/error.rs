/// Error types for parsing, the part library and tree edits
use std::path::PathBuf;

use thiserror::Error;

/// Why a single line could not be turned into a directive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The line does not start with a line-type code.
    #[error("missing line type code")]
    MissingLineType,

    /// The line-type code is not one of 0..=5.
    #[error("unknown line type: {0}")]
    UnknownLineType(String),

    /// A color field could not be read.
    #[error("invalid color code: {0}")]
    InvalidColor(String),

    /// Fewer fields than the line type requires, or a non-numeric field.
    #[error("malformed {kind} line: {message}")]
    Malformed {
        /// Directive kind being parsed.
        kind: &'static str,
        /// What went wrong.
        message: String,
    },
}

impl ParseError {
    /// Create a malformed-line error.
    pub fn malformed(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised by the part library and its catalog.
#[derive(Error, Debug)]
pub enum LibraryError {
    /// I/O error reading the parts folder or the catalog file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file could not be encoded or decoded.
    #[error("catalog format error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configured parts root does not exist or is not a directory.
    #[error("invalid parts root: {}", .0.display())]
    InvalidRoot(PathBuf),

    /// A required LDraw subdirectory is absent from the parts root.
    #[error("parts root {} has no '{name}' folder", root.display())]
    MissingSubdirectory {
        /// The parts root.
        root: PathBuf,
        /// Name of the missing folder.
        name: String,
    },
}

/// An edit refused because it would break a tree invariant.
///
/// Rejections are raised before anything is mutated, so the document is
/// unchanged when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The node handle does not refer to a live node.
    #[error("node does not exist")]
    StaleNode,

    /// A model must keep at least one step.
    #[error("cannot remove the last step of a model")]
    LastStep,

    /// A file must keep at least one model.
    #[error("cannot remove the last model of a file")]
    LastModel,

    /// The root file is never removed.
    #[error("cannot remove the root file")]
    RootNode,

    /// The part would reference the model that contains it.
    #[error("part '{0}' would reference its own enclosing model")]
    SelfReference(String),

    /// The child kind is not allowed under the parent kind.
    #[error("a {child} cannot be placed inside a {parent}")]
    KindMismatch {
        /// Kind of the container.
        parent: &'static str,
        /// Kind of the rejected child.
        child: &'static str,
    },

    /// The insertion index is past the end of the child list.
    #[error("index {index} out of range for {len} children")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current child count.
        len: usize,
    },

    /// The node is still attached to a parent.
    #[error("node is already attached to a parent")]
    StillAttached,

    /// The property does not exist on this kind of directive.
    #[error("{kind} has no {property}")]
    NotApplicable {
        /// Kind of the directive.
        kind: &'static str,
        /// Property that was addressed.
        property: &'static str,
    },
}

/// A shared document whose last edit panicked part way through.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("shared document was poisoned by a panicking edit")]
pub struct Poisoned;
