//! The single authoritative source buffer.

use parking_lot::RwLock;

/// Buffer contents together with the version that produced them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSnapshot {
    /// Full source text.
    pub code: String,
    /// Number of `set` calls applied so far.
    pub version: u64,
}

/// Shared source buffer, last writer wins.
///
/// Reads never observe a partially applied write, and concurrent writes are
/// serialized so the final value is exactly one of the submitted values.
#[derive(Debug)]
pub struct SharedDocument {
    inner: RwLock<DocumentSnapshot>,
}

impl SharedDocument {
    /// Create a document holding `initial` at version 0.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(DocumentSnapshot {
                code: initial.into(),
                version: 0,
            }),
        }
    }

    /// Current buffer.
    pub fn get(&self) -> String {
        self.inner.read().code.clone()
    }

    /// Current buffer and version, read atomically.
    pub fn snapshot(&self) -> DocumentSnapshot {
        self.inner.read().clone()
    }

    /// Run `f` on the current buffer while holding the read lock.
    ///
    /// No `set` can commit until `f` returns, so `f` must not block.
    pub fn with_current<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(&self.inner.read().code)
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    /// Replace the buffer, returning the new version.
    pub fn set(&self, code: impl Into<String>) -> u64 {
        let code = code.into();
        let mut doc = self.inner.write();
        doc.code = code;
        doc.version += 1;
        doc.version
    }
}
