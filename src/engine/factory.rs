//! Handle construction and destruction.
//!
//! The factory is the only place handles are born or die. It wraps the
//! engine's constructors, translating outcomes (built, did-not-parse, native
//! allocation failure) and keeping construct/destroy counters the release
//! discipline tests rely on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::handle::{HandleKind, ManagedHandle};
use super::{ChemEngine, EngineResult};

/// Builds and destroys managed handles through the engine
pub struct HandleFactory<E: ChemEngine> {
    engine: Arc<E>,
    constructed: AtomicU64,
    destroyed: AtomicU64,
}

impl<E: ChemEngine> HandleFactory<E> {
    /// Create a factory over an engine
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            constructed: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
        }
    }

    /// The engine this factory drives
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Build a handle from source text.
    ///
    /// `Ok(None)` means the source does not parse; an empty source never
    /// reaches the engine. `Err` is a native failure and the caller decides
    /// whether to recover.
    pub fn build(
        &self,
        source: &str,
        kind: HandleKind,
    ) -> EngineResult<Option<Arc<ManagedHandle<E::Handle>>>> {
        if source.is_empty() {
            return Ok(None);
        }

        let raw = match self.engine.build_handle(source, kind)? {
            Some(raw) => raw,
            None => {
                trace!(kind = %kind, source = %source, "source did not parse");
                return Ok(None);
            }
        };

        self.constructed.fetch_add(1, Ordering::Relaxed);
        debug!(kind = %kind, source = %source, "built handle");

        Ok(Some(Arc::new(ManagedHandle::new(raw, kind, source))))
    }

    /// Destroy a handle exactly once; repeat calls are no-ops
    pub fn destroy(&self, handle: &ManagedHandle<E::Handle>) {
        if handle.release_with(|raw| self.engine.destroy_handle(raw)) {
            self.destroyed.fetch_add(1, Ordering::Relaxed);
            trace!(kind = %handle.kind(), source = %handle.source(), "destroyed handle");
        }
    }

    /// Handles built so far
    pub fn constructed(&self) -> u64 {
        self.constructed.load(Ordering::Relaxed)
    }

    /// Handles destroyed so far
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Handles currently alive
    pub fn outstanding(&self) -> u64 {
        self.constructed() - self.destroyed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;

    fn factory() -> HandleFactory<MockEngine> {
        HandleFactory::new(Arc::new(MockEngine::new()))
    }

    #[test]
    fn test_build_and_destroy() {
        let factory = factory();

        let handle = factory.build("CCO", HandleKind::Plain).unwrap().unwrap();
        assert_eq!(factory.constructed(), 1);
        assert_eq!(factory.outstanding(), 1);

        factory.destroy(&handle);
        assert_eq!(factory.destroyed(), 1);
        assert_eq!(factory.outstanding(), 0);
    }

    #[test]
    fn test_empty_source_skips_engine() {
        let factory = factory();
        assert!(factory.build("", HandleKind::Plain).unwrap().is_none());
        assert_eq!(factory.constructed(), 0);
    }

    #[test]
    fn test_unparseable_source_is_none() {
        let factory = factory();
        assert!(factory.build("not!valid", HandleKind::Plain).unwrap().is_none());
        assert_eq!(factory.constructed(), 0);
    }

    #[test]
    fn test_double_destroy_counted_once() {
        let factory = factory();
        let handle = factory.build("CCO", HandleKind::Query).unwrap().unwrap();

        factory.destroy(&handle);
        factory.destroy(&handle);

        assert_eq!(factory.destroyed(), 1);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let engine = MockEngine::new();
        engine.fail_next_allocations(1);
        let factory = HandleFactory::new(Arc::new(engine));

        let err = factory.build("CCO", HandleKind::Plain).unwrap_err();
        assert!(err.is_allocation());
    }
}
