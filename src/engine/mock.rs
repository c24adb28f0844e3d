//! In-memory engine for tests and benchmarks.
//!
//! Chemistry is faked with string rules: a source containing `!` does not
//! parse, fragments are separated by `.`, and a query matches wherever its
//! text occurs in the source. What the mock tracks precisely is the part the
//! bridge cares about: construct/destroy ledgers, scriptable allocation
//! failures, and applied option flags.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::handle::HandleKind;
use super::{ChemEngine, EngineLoader, EngineResult};
use crate::config::EngineOptions;
use crate::error::EngineError;
use crate::protocol::{DrawingOptions, MatchMapping, MoleculeStats, Notation};

/// Handle type produced by [`MockEngine`]
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    source: String,
    kind: HandleKind,
}

struct MockInner {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
    aligned: Mutex<HashSet<u64>>,
    constructed: AtomicU64,
    destroyed: AtomicU64,
    fail_allocations: AtomicU64,
    applied: AtomicU64,
    options: Mutex<EngineOptions>,
}

/// Scriptable in-memory engine; clones share one ledger
#[derive(Clone)]
pub struct MockEngine {
    inner: Arc<MockInner>,
}

impl MockEngine {
    /// Create a fresh engine
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                next_id: AtomicU64::new(1),
                live: Mutex::new(HashSet::new()),
                aligned: Mutex::new(HashSet::new()),
                constructed: AtomicU64::new(0),
                destroyed: AtomicU64::new(0),
                fail_allocations: AtomicU64::new(0),
                applied: AtomicU64::new(0),
                options: Mutex::new(EngineOptions::default()),
            }),
        }
    }

    /// Make the next `n` constructions fail with an allocation error
    pub fn fail_next_allocations(&self, n: u64) {
        self.inner.fail_allocations.store(n, Ordering::Release);
    }

    /// Raw handles built so far
    pub fn constructed(&self) -> u64 {
        self.inner.constructed.load(Ordering::Relaxed)
    }

    /// Raw handles destroyed so far
    pub fn destroyed(&self) -> u64 {
        self.inner.destroyed.load(Ordering::Relaxed)
    }

    /// Raw handles currently alive
    pub fn outstanding(&self) -> u64 {
        self.inner.live.lock().len() as u64
    }

    /// Times option flags were applied
    pub fn options_applied(&self) -> u64 {
        self.inner.applied.load(Ordering::Relaxed)
    }

    /// Snapshot of the current option flags
    pub fn current_options(&self) -> EngineOptions {
        self.inner.options.lock().clone()
    }

    fn is_live(&self, handle: &MockHandle) -> bool {
        self.inner.live.lock().contains(&handle.id)
    }

    fn dead_handle_error(&self) -> EngineError {
        EngineError::Operation("handle is no longer live".into())
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn parses(source: &str) -> bool {
    !source.is_empty() && !source.contains('!')
}

impl ChemEngine for MockEngine {
    type Handle = MockHandle;

    fn build_handle(&self, source: &str, kind: HandleKind) -> EngineResult<Option<MockHandle>> {
        if !parses(source) {
            return Ok(None);
        }
        if self
            .inner
            .fail_allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Allocation("simulated out of memory".into()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.live.lock().insert(id);
        self.inner.constructed.fetch_add(1, Ordering::Relaxed);

        Ok(Some(MockHandle {
            id,
            source: source.to_string(),
            kind,
        }))
    }

    fn destroy_handle(&self, handle: &MockHandle) {
        if self.inner.live.lock().remove(&handle.id) {
            self.inner.aligned.lock().remove(&handle.id);
            self.inner.destroyed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn apply_options(&self, options: &EngineOptions) {
        *self.inner.options.lock() = options.clone();
        self.inner.applied.fetch_add(1, Ordering::Relaxed);
    }

    fn is_valid(&self, handle: &MockHandle) -> bool {
        self.is_live(handle) && parses(&handle.source)
    }

    fn render_svg(&self, handle: &MockHandle, drawing: &DrawingOptions) -> EngineResult<String> {
        if !self.is_live(handle) {
            return Err(self.dead_handle_error());
        }
        let aligned = self.inner.aligned.lock().contains(&handle.id);
        Ok(format!(
            "<svg width=\"{}\" height=\"{}\" data-aligned=\"{}\">{}</svg>",
            drawing.width, drawing.height, aligned, handle.source
        ))
    }

    fn align_depiction(&self, handle: &MockHandle, template: &MockHandle) -> EngineResult<()> {
        if !self.is_live(handle) || !self.is_live(template) {
            return Err(self.dead_handle_error());
        }
        self.inner.aligned.lock().insert(handle.id);
        Ok(())
    }

    fn reset_depiction(&self, handle: &MockHandle) {
        self.inner.aligned.lock().remove(&handle.id);
    }

    fn write_notation(&self, handle: &MockHandle, target: Notation) -> EngineResult<String> {
        if !self.is_live(handle) {
            return Err(self.dead_handle_error());
        }
        if target == Notation::Inchi && handle.kind == HandleKind::Query {
            return Err(EngineError::Operation(
                "inchi is not supported for query patterns".into(),
            ));
        }
        Ok(format!("{}:{}", target, handle.source))
    }

    fn match_substructure(&self, handle: &MockHandle, query: &MockHandle) -> Option<MatchMapping> {
        if !self.is_live(handle) || !self.is_live(query) {
            return None;
        }
        let start = handle.source.find(&query.source)? as u32;
        let len = query.source.len() as u32;
        Some(MatchMapping {
            atoms: (start..start + len).collect(),
            bonds: if len > 1 {
                (start..start + len - 1).collect()
            } else {
                Vec::new()
            },
        })
    }

    fn fragment_atom_counts(&self, handle: &MockHandle) -> Vec<u32> {
        if !self.is_live(handle) {
            return Vec::new();
        }
        handle
            .source
            .split('.')
            .map(|fragment| fragment.len() as u32)
            .collect()
    }

    fn molecule_stats(&self, handle: &MockHandle) -> MoleculeStats {
        let heavy = handle
            .source
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .count() as u32;
        let rings = handle
            .source
            .chars()
            .filter(|c| c.is_ascii_digit())
            .count() as u32
            / 2;
        MoleculeStats {
            heavy_atom_count: heavy,
            ring_count: rings,
            molecular_weight: f64::from(heavy) * 12.011,
        }
    }

    fn add_hydrogens(&self, handle: &MockHandle) -> EngineResult<String> {
        if !self.is_live(handle) {
            return Err(self.dead_handle_error());
        }
        Ok(format!("{}[H]", handle.source))
    }

    fn remove_hydrogens(&self, handle: &MockHandle) -> EngineResult<String> {
        if !self.is_live(handle) {
            return Err(self.dead_handle_error());
        }
        Ok(handle.source.replace("[H]", ""))
    }

    fn regenerate_coordinates(
        &self,
        handle: &MockHandle,
        use_coordgen: Option<bool>,
    ) -> EngineResult<String> {
        if !self.is_live(handle) {
            return Err(self.dead_handle_error());
        }
        let coordgen = use_coordgen.unwrap_or_else(|| self.inner.options.lock().prefer_coordgen);
        Ok(format!("{} coords={}", handle.source, coordgen))
    }
}

/// Loader producing shared [`MockEngine`] clones; counts loads
#[derive(Clone)]
pub struct MockLoader {
    engine: MockEngine,
    loads: Arc<AtomicU64>,
    fail_loads: Arc<AtomicU64>,
}

impl MockLoader {
    /// Loader over a fresh engine
    pub fn new() -> Self {
        Self::with_engine(MockEngine::new())
    }

    /// Loader over a caller-held engine, for scripting from tests
    pub fn with_engine(engine: MockEngine) -> Self {
        Self {
            engine,
            loads: Arc::new(AtomicU64::new(0)),
            fail_loads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The engine every load returns
    pub fn engine(&self) -> &MockEngine {
        &self.engine
    }

    /// Completed loads
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Make the next `n` loads fail
    pub fn fail_next_loads(&self, n: u64) {
        self.fail_loads.store(n, Ordering::Release);
    }
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineLoader for MockLoader {
    type Engine = MockEngine;

    async fn load(&self, options: &EngineOptions) -> EngineResult<MockEngine> {
        if self
            .fail_loads
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Load("simulated load failure".into()));
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.engine.apply_options(options);
        Ok(self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_tracks_lifecycle() {
        let engine = MockEngine::new();

        let handle = engine
            .build_handle("CCO", HandleKind::Plain)
            .unwrap()
            .unwrap();
        assert_eq!(engine.constructed(), 1);
        assert_eq!(engine.outstanding(), 1);

        engine.destroy_handle(&handle);
        assert_eq!(engine.destroyed(), 1);
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_scripted_allocation_failures_run_out() {
        let engine = MockEngine::new();
        engine.fail_next_allocations(2);

        assert!(engine.build_handle("a", HandleKind::Plain).is_err());
        assert!(engine.build_handle("a", HandleKind::Plain).is_err());
        assert!(engine.build_handle("a", HandleKind::Plain).is_ok());
    }

    #[test]
    fn test_match_positions() {
        let engine = MockEngine::new();
        let mol = engine
            .build_handle("CCCO", HandleKind::Plain)
            .unwrap()
            .unwrap();
        let query = engine
            .build_handle("CO", HandleKind::Query)
            .unwrap()
            .unwrap();

        let mapping = engine.match_substructure(&mol, &query).unwrap();
        assert_eq!(mapping.atoms, vec![2, 3]);
        assert_eq!(mapping.bonds, vec![2]);

        let miss = engine
            .build_handle("NN", HandleKind::Query)
            .unwrap()
            .unwrap();
        assert!(engine.match_substructure(&mol, &miss).is_none());
    }

    #[test]
    fn test_fragment_counts() {
        let engine = MockEngine::new();
        let mol = engine
            .build_handle("CC.OO.N", HandleKind::Plain)
            .unwrap()
            .unwrap();
        assert_eq!(engine.fragment_atom_counts(&mol), vec![2, 2, 1]);
    }

    #[test]
    fn test_notation_rules() {
        let engine = MockEngine::new();
        let mol = engine
            .build_handle("CCO", HandleKind::Plain)
            .unwrap()
            .unwrap();
        assert_eq!(
            engine.write_notation(&mol, Notation::Smiles).unwrap(),
            "smiles:CCO"
        );

        let query = engine
            .build_handle("CCO", HandleKind::Query)
            .unwrap()
            .unwrap();
        assert!(engine.write_notation(&query, Notation::Inchi).is_err());
    }

    #[test]
    fn test_dead_handle_is_rejected() {
        let engine = MockEngine::new();
        let mol = engine
            .build_handle("CCO", HandleKind::Plain)
            .unwrap()
            .unwrap();
        engine.destroy_handle(&mol);

        assert!(!engine.is_valid(&mol));
        assert!(engine.render_svg(&mol, &DrawingOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_loader_counts_and_fails() {
        let loader = MockLoader::new();
        loader.fail_next_loads(1);

        assert!(loader.load(&EngineOptions::default()).await.is_err());
        assert_eq!(loader.loads(), 0);

        let engine = loader.load(&EngineOptions::default()).await.unwrap();
        assert_eq!(loader.loads(), 1);
        assert_eq!(engine.options_applied(), 1);
    }
}
