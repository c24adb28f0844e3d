//! Engine seam and handle ownership.
//!
//! The bridge never links a chemistry toolkit directly. Workers drive the
//! native engine through [`ChemEngine`] and bootstrap it through
//! [`EngineLoader`]; the embedder supplies both. Handle lifetime is owned on
//! this side of the seam: the [`cache::HandleCache`] keys handles by source
//! text, bounds each store, and survives native allocation failure by
//! flushing and retrying once.

pub mod cache;
pub mod factory;
pub mod handle;
pub mod mock;

use async_trait::async_trait;

use crate::config::EngineOptions;
use crate::error::EngineError;
use crate::protocol::{DrawingOptions, MatchMapping, MoleculeStats, Notation};

pub use cache::{CacheStats, HandleCache};
pub use factory::HandleFactory;
pub use handle::{HandleKind, ManagedHandle};
pub use mock::{MockEngine, MockLoader};

/// Result alias for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Interface a native chemistry toolkit exposes to workers.
///
/// Handle constructors distinguish a source that does not parse
/// (`Ok(None)`) from a failed native allocation (`Err`); only the latter is
/// retried after a cache flush. Every other method operates on a live handle
/// the caller obtained from a constructor.
pub trait ChemEngine: Send + Sync + 'static {
    /// Opaque native handle
    type Handle: Send + Sync + 'static;

    /// Build a handle from source text
    fn build_handle(&self, source: &str, kind: HandleKind) -> EngineResult<Option<Self::Handle>>;

    /// Free a handle's native memory
    fn destroy_handle(&self, handle: &Self::Handle);

    /// Re-apply runtime flags; must be idempotent
    fn apply_options(&self, options: &EngineOptions);

    /// Sanity check on a live handle
    fn is_valid(&self, handle: &Self::Handle) -> bool;

    /// Render a handle to an SVG document
    fn render_svg(&self, handle: &Self::Handle, drawing: &DrawingOptions) -> EngineResult<String>;

    /// Align a handle's depiction to a template's scaffold
    fn align_depiction(
        &self,
        handle: &Self::Handle,
        template: &Self::Handle,
    ) -> EngineResult<()>;

    /// Recompute a handle's coordinates, discarding any alignment
    fn reset_depiction(&self, handle: &Self::Handle);

    /// Write a handle out in the given notation
    fn write_notation(&self, handle: &Self::Handle, target: Notation) -> EngineResult<String>;

    /// First match of `query` in `handle`, if any
    fn match_substructure(
        &self,
        handle: &Self::Handle,
        query: &Self::Handle,
    ) -> Option<MatchMapping>;

    /// Atom counts per disconnected fragment
    fn fragment_atom_counts(&self, handle: &Self::Handle) -> Vec<u32>;

    /// Descriptor summary of a handle
    fn molecule_stats(&self, handle: &Self::Handle) -> MoleculeStats;

    /// Molblock with explicit hydrogens added
    fn add_hydrogens(&self, handle: &Self::Handle) -> EngineResult<String>;

    /// Molblock with explicit hydrogens stripped
    fn remove_hydrogens(&self, handle: &Self::Handle) -> EngineResult<String>;

    /// Molblock with freshly computed 2D coordinates; `use_coordgen` absent
    /// means the engine's configured preference applies
    fn regenerate_coordinates(
        &self,
        handle: &Self::Handle,
        use_coordgen: Option<bool>,
    ) -> EngineResult<String>;
}

/// Asynchronous engine bootstrap.
///
/// Loading the native module is the expensive one-time step a worker performs
/// on its first init job. Implementations decide where the module comes from;
/// [`EngineOptions::module_path`] is a hint, not a contract.
#[async_trait]
pub trait EngineLoader: Send + Sync + 'static {
    /// Engine produced by this loader
    type Engine: ChemEngine;

    /// Load the engine with the given flags applied
    async fn load(&self, options: &EngineOptions) -> EngineResult<Self::Engine>;
}
