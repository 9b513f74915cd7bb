/// A document shared between a renderer and an editor
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::document::Document;
use crate::error::Poisoned;

/// Readers hold a guard for a whole frame; edits run inside a write scope,
/// so nobody sees a tree halfway through a change. A panic inside an edit
/// poisons the document and every later access reports it.
#[derive(Debug, Clone, Default)]
pub struct SharedDocument {
    inner: Arc<RwLock<Document>>,
}

impl SharedDocument {
    pub fn new(document: Document) -> Self {
        Self {
            inner: Arc::new(RwLock::new(document)),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, Document>, Poisoned> {
        self.inner.read().map_err(|_| Poisoned)
    }

    /// Run `f` with exclusive access and return what it returns.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Document) -> R) -> Result<R, Poisoned> {
        let mut guard = self.inner.write().map_err(|_| Poisoned)?;
        Ok(f(&mut guard))
    }
}

impl From<Document> for SharedDocument {
    fn from(document: Document) -> Self {
        Self::new(document)
    }
}
