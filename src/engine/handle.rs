//! Managed native handles.
//!
//! A [`ManagedHandle`] pairs an opaque engine resource with its release
//! state. Release is exactly-once: the first caller runs the destructor,
//! every later attempt is a logged no-op. A cache flush racing an
//! operation-side release therefore cannot double-free, and a flushed handle
//! can no longer hand out its raw resource.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

/// The two disjoint handle kinds, each backed by its own cache store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Molecule handle built from a plain source
    Plain,
    /// Pattern handle built from a query source
    Query,
}

impl HandleKind {
    /// Short name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleKind::Plain => "plain",
            HandleKind::Query => "query",
        }
    }
}

impl std::fmt::Display for HandleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A native handle with a one-shot release guard
pub struct ManagedHandle<H> {
    raw: H,
    kind: HandleKind,
    source: String,
    released: AtomicBool,
}

impl<H> ManagedHandle<H> {
    /// Wrap a freshly built native handle
    pub(crate) fn new(raw: H, kind: HandleKind, source: impl Into<String>) -> Self {
        Self {
            raw,
            kind,
            source: source.into(),
            released: AtomicBool::new(false),
        }
    }

    /// The native handle, `None` once released
    pub fn raw(&self) -> Option<&H> {
        if self.released.load(Ordering::Acquire) {
            None
        } else {
            Some(&self.raw)
        }
    }

    /// Kind this handle was built as
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Source text this handle was built from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True once the destructor has run
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Run `destroy` exactly once, returning true when this call released.
    ///
    /// A second release is not an error; the original resource owner may be
    /// the cache or the operation and both are allowed to try.
    pub(crate) fn release_with<F: FnOnce(&H)>(&self, destroy: F) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!(kind = %self.kind, source = %self.source, "handle already released");
            return false;
        }
        destroy(&self.raw);
        true
    }
}

impl<H> std::fmt::Debug for ManagedHandle<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedHandle")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_release_runs_once() {
        let destroyed = AtomicUsize::new(0);
        let handle = ManagedHandle::new(7u64, HandleKind::Plain, "CCO");

        assert!(handle.release_with(|_| {
            destroyed.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!handle.release_with(|_| {
            destroyed.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(handle.is_released());
    }

    #[test]
    fn test_raw_gated_by_release() {
        let handle = ManagedHandle::new(7u64, HandleKind::Query, "c1ccccc1");
        assert_eq!(handle.raw(), Some(&7));

        handle.release_with(|_| {});
        assert_eq!(handle.raw(), None);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(HandleKind::Plain.as_str(), "plain");
        assert_eq!(HandleKind::Query.to_string(), "query");
    }
}
