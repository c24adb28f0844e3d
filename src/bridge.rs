//! High-level bridge facade.
//!
//! [`ChemBridge`] owns the worker pool and the dispatcher fronting it, and
//! exposes one typed method per action. Construction spawns and initializes
//! every worker; [`ChemBridge::shutdown`] terminates them and can be called
//! more than once. After shutdown every method reports not-ready.
//!
//! Round-robin spreads stateless jobs across the pool. Library jobs are the
//! exception: a library lives on one worker, so every job naming it is routed
//! to the same worker by a stable hash of the name.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{BridgeConfig, EngineOptions};
use crate::dispatch::pool::WorkerPool;
use crate::dispatch::JobDispatcher;
use crate::engine::EngineLoader;
use crate::error::{BridgeError, JobFailure, Result};
use crate::metrics::{BridgeStats, MetricsCollector};
use crate::protocol::{
    BuildLibraryPayload, CanonicalFormPayload, ConvertPayload, CoordinatesPayload, DrawingOptions,
    ExtendLibraryPayload, InitPayload, Job, JobOutput, JobPayload, LibraryNamePayload,
    LibraryStatus, MatchMapping, MatchPayload, MoleculeStats, Notation, QueryLibraryPayload,
    QueryPayload, SourcePayload, SvgPayload,
};

struct BridgeInner {
    dispatcher: JobDispatcher,
    config: BridgeConfig,
}

/// Asynchronous bridge to a pool of chemistry workers
pub struct ChemBridge {
    inner: Arc<RwLock<Option<BridgeInner>>>,
    metrics: Arc<MetricsCollector>,
}

impl ChemBridge {
    /// Spawn `config.workers` workers over clones of the loader and
    /// initialize each one; tears the pool down again if any worker fails
    /// to come up
    pub async fn new<L>(config: BridgeConfig, loader: L) -> Result<Self>
    where
        L: EngineLoader + Clone,
    {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new());
        let pool = WorkerPool::spawn(loader, config.workers);
        let dispatcher = JobDispatcher::new(pool, config.reply_timeout_ms, Arc::clone(&metrics));

        let init = InitPayload {
            cache: config.cache.clone(),
            engine: config.engine.clone(),
        };
        for index in 0..config.workers {
            let job = Job::new(JobPayload::InitEngine(init.clone()));
            let outcome = match dispatcher.send_to(index, job).await {
                Ok(response) => response.into_result().map_err(BridgeError::Job),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                warn!(worker = index, error = %err, "worker failed to initialize, tearing down");
                dispatcher.shutdown().await;
                return Err(err);
            }
        }
        info!(
            workers = config.workers,
            cache_enabled = config.cache.enabled,
            "bridge ready"
        );

        Ok(Self {
            inner: Arc::new(RwLock::new(Some(BridgeInner { dispatcher, config }))),
            metrics,
        })
    }

    /// Render a molecule to SVG, optionally aligned to a template source;
    /// `None` when the source or the template does not parse
    pub async fn render_svg(
        &self,
        source: impl Into<String>,
        drawing: Option<DrawingOptions>,
        align_to: Option<String>,
    ) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::GetSvg(SvgPayload {
                source: source.into(),
                drawing,
                align_to,
            })))
            .await?;
        match output {
            JobOutput::Svg { svg } => Ok(svg),
            other => Err(unexpected(other)),
        }
    }

    /// True when the source parses as a molecule
    pub async fn is_valid_source(&self, source: impl Into<String>) -> Result<bool> {
        let output = self
            .dispatch(Job::new(JobPayload::ValidateSource(SourcePayload {
                source: source.into(),
            })))
            .await?;
        match output {
            JobOutput::SourceValidity { is_valid } => Ok(is_valid),
            other => Err(unexpected(other)),
        }
    }

    /// True when the query parses as a pattern
    pub async fn is_valid_query(&self, query: impl Into<String>) -> Result<bool> {
        let output = self
            .dispatch(Job::new(JobPayload::ValidateQuery(QueryPayload {
                query: query.into(),
            })))
            .await?;
        match output {
            JobOutput::QueryValidity { is_valid } => Ok(is_valid),
            other => Err(unexpected(other)),
        }
    }

    /// Canonical text form of a source; `None` when it does not parse
    pub async fn canonical_form(
        &self,
        source: impl Into<String>,
        notation: Option<Notation>,
        as_query: bool,
    ) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::GetCanonicalForm(
                CanonicalFormPayload {
                    source: source.into(),
                    notation,
                    as_query,
                },
            )))
            .await?;
        match output {
            JobOutput::CanonicalForm { canonical } => Ok(canonical),
            other => Err(unexpected(other)),
        }
    }

    /// Convert a source into another notation; `None` when it does not parse
    pub async fn convert(
        &self,
        source: impl Into<String>,
        target: Notation,
        source_notation: Option<Notation>,
        as_query: bool,
    ) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::ConvertNotation(ConvertPayload {
                source: source.into(),
                target,
                source_notation,
                as_query,
            })))
            .await?;
        match output {
            JobOutput::ConvertedNotation { converted } => Ok(converted),
            other => Err(unexpected(other)),
        }
    }

    /// True when the query covers the whole source molecule
    pub async fn has_substructure_match(
        &self,
        source: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<bool> {
        let output = self
            .dispatch(Job::new(JobPayload::HasSubstructureMatch(MatchPayload {
                source: source.into(),
                query: query.into(),
            })))
            .await?;
        match output {
            JobOutput::SubstructureContainment { matching } => Ok(matching),
            other => Err(unexpected(other)),
        }
    }

    /// Atom and bond indices of the first substructure match
    pub async fn substructure_match(
        &self,
        source: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<Option<MatchMapping>> {
        let output = self
            .dispatch(Job::new(JobPayload::GetSubstructureMatch(MatchPayload {
                source: source.into(),
                query: query.into(),
            })))
            .await?;
        match output {
            JobOutput::SubstructureMapping { mapping } => Ok(mapping),
            other => Err(unexpected(other)),
        }
    }

    /// Descriptor summary of a source; `None` when it does not parse
    pub async fn molecule_details(
        &self,
        source: impl Into<String>,
    ) -> Result<Option<MoleculeStats>> {
        let output = self
            .dispatch(Job::new(JobPayload::GetMoleculeDetails(SourcePayload {
                source: source.into(),
            })))
            .await?;
        match output {
            JobOutput::MoleculeDetails { details } => Ok(details),
            other => Err(unexpected(other)),
        }
    }

    /// Add explicit hydrogens and return a molblock with fresh coordinates
    pub async fn add_hydrogens(&self, source: impl Into<String>) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::AddHydrogens(SourcePayload {
                source: source.into(),
            })))
            .await?;
        match output {
            JobOutput::Molblock { molblock } => Ok(molblock),
            other => Err(unexpected(other)),
        }
    }

    /// Strip explicit hydrogens and return a molblock with fresh coordinates
    pub async fn remove_hydrogens(&self, source: impl Into<String>) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::RemoveHydrogens(SourcePayload {
                source: source.into(),
            })))
            .await?;
        match output {
            JobOutput::Molblock { molblock } => Ok(molblock),
            other => Err(unexpected(other)),
        }
    }

    /// Recompute 2D coordinates; `use_coordgen` overrides the engine
    /// preference when present
    pub async fn regenerate_coordinates(
        &self,
        source: impl Into<String>,
        use_coordgen: Option<bool>,
    ) -> Result<Option<String>> {
        let output = self
            .dispatch(Job::new(JobPayload::RegenerateCoordinates(
                CoordinatesPayload {
                    source: source.into(),
                    use_coordgen,
                },
            )))
            .await?;
        match output {
            JobOutput::Molblock { molblock } => Ok(molblock),
            other => Err(unexpected(other)),
        }
    }

    /// Create a named source library on its owning worker
    pub async fn build_library(
        &self,
        name: impl Into<String>,
        replace: bool,
    ) -> Result<LibraryStatus> {
        let name = name.into();
        let job = Job::new(JobPayload::BuildLibrary(BuildLibraryPayload {
            name: name.clone(),
            replace,
        }));
        let output = self.dispatch_to_library_owner(&name, job).await?;
        match output {
            JobOutput::LibraryBuilt { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Add sources to a library; returns how many were accepted
    pub async fn extend_library(
        &self,
        name: impl Into<String>,
        sources: Vec<String>,
        pretrusted: bool,
    ) -> Result<usize> {
        let name = name.into();
        let job = Job::new(JobPayload::ExtendLibrary(ExtendLibraryPayload {
            name: name.clone(),
            sources,
            pretrusted,
        }));
        let output = self.dispatch_to_library_owner(&name, job).await?;
        match output {
            JobOutput::LibraryExtended { added } => Ok(added),
            other => Err(unexpected(other)),
        }
    }

    /// Screen a library, returning the member sources the query matches
    pub async fn query_library(
        &self,
        name: impl Into<String>,
        query: impl Into<String>,
    ) -> Result<Vec<String>> {
        let name = name.into();
        let job = Job::new(JobPayload::QueryLibrary(QueryLibraryPayload {
            name: name.clone(),
            query: query.into(),
        }));
        let output = self.dispatch_to_library_owner(&name, job).await?;
        match output {
            JobOutput::LibraryMatches { matches } => Ok(matches),
            other => Err(unexpected(other)),
        }
    }

    /// Number of sources in a library
    pub async fn library_size(&self, name: impl Into<String>) -> Result<usize> {
        let name = name.into();
        let job = Job::new(JobPayload::LibrarySize(LibraryNamePayload {
            name: name.clone(),
        }));
        let output = self.dispatch_to_library_owner(&name, job).await?;
        match output {
            JobOutput::LibrarySize { size } => Ok(size),
            other => Err(unexpected(other)),
        }
    }

    /// Remove a library; false when no library carried the name
    pub async fn drop_library(&self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        let job = Job::new(JobPayload::DropLibrary(LibraryNamePayload {
            name: name.clone(),
        }));
        let output = self.dispatch_to_library_owner(&name, job).await?;
        match output {
            JobOutput::LibraryDropped { removed } => Ok(removed),
            other => Err(unexpected(other)),
        }
    }

    /// Re-apply engine flags on every worker.
    ///
    /// Workers keep their loaded engines and caches; only the flags change.
    pub async fn apply_engine_options(&self, options: EngineOptions) -> Result<()> {
        let mut guard = self.inner.write().await;
        let inner = guard.as_mut().ok_or_else(shut_down)?;
        inner.config.engine = options.clone();

        let init = InitPayload {
            cache: inner.config.cache.clone(),
            engine: options,
        };
        for index in 0..inner.dispatcher.pool().len() {
            let job = Job::new(JobPayload::InitEngine(init.clone()));
            let response = inner.dispatcher.send_to(index, job).await?;
            response.into_result().map_err(BridgeError::Job)?;
        }
        Ok(())
    }

    /// Point-in-time dispatch statistics
    pub async fn stats(&self) -> BridgeStats {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => self.metrics.snapshot(
                inner.dispatcher.pool().len(),
                inner.dispatcher.in_flight(),
            ),
            None => self.metrics.snapshot(0, 0),
        }
    }

    /// Prometheus exposition of the dispatch counters
    pub fn prometheus_metrics(&self) -> String {
        self.metrics.to_prometheus()
    }

    /// Terminate every worker and fail outstanding waiters; repeat calls do
    /// nothing
    pub async fn shutdown(&self) {
        let mut guard = self.inner.write().await;
        if let Some(inner) = guard.take() {
            inner.dispatcher.shutdown().await;
            info!("bridge shut down");
        }
    }

    async fn dispatch(&self, job: Job) -> Result<JobOutput> {
        let guard = self.inner.read().await;
        let inner = guard.as_ref().ok_or_else(shut_down)?;
        let response = inner.dispatcher.send(job).await?;
        response.into_result().map_err(BridgeError::Job)
    }

    async fn dispatch_to_library_owner(&self, name: &str, job: Job) -> Result<JobOutput> {
        let guard = self.inner.read().await;
        let inner = guard.as_ref().ok_or_else(shut_down)?;
        let workers = inner.dispatcher.pool().len();
        if workers == 0 {
            return Err(BridgeError::NotReady("worker pool is empty".into()));
        }
        let response = inner
            .dispatcher
            .send_to(library_owner(name, workers), job)
            .await?;
        response.into_result().map_err(BridgeError::Job)
    }
}

impl std::fmt::Debug for ChemBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChemBridge").finish_non_exhaustive()
    }
}

/// Stable owner index for a library name
fn library_owner(name: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

fn shut_down() -> BridgeError {
    BridgeError::NotReady("bridge has been shut down".into())
}

fn unexpected(output: JobOutput) -> BridgeError {
    BridgeError::Job(JobFailure::internal_error(format!(
        "unexpected response payload: {:?}",
        output
    )))
}

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a tracing subscriber reading `RUST_LOG`, with debug-level bridge
/// events by default. Calling this more than once is a no-op.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("chembridge=debug".parse().unwrap()),
            )
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use crate::engine::MockLoader;
    use crate::error::FailureKind;

    fn cached_config(workers: usize) -> BridgeConfig {
        BridgeConfig::new()
            .with_workers(workers)
            .with_cache(CacheOptions::enabled(16))
    }

    #[tokio::test]
    async fn test_round_trip_through_facade() {
        let bridge = ChemBridge::new(cached_config(2), MockLoader::new())
            .await
            .unwrap();

        assert!(bridge.is_valid_source("CCO").await.unwrap());
        assert!(!bridge.is_valid_source("no!good").await.unwrap());
        assert_eq!(
            bridge.canonical_form("CCO", None, false).await.unwrap(),
            Some("smiles:CCO".into())
        );

        let svg = bridge.render_svg("CCO", None, None).await.unwrap();
        assert!(svg.unwrap().contains("CCO"));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let err = ChemBridge::new(
            BridgeConfig::new().with_workers(0),
            MockLoader::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[tokio::test]
    async fn test_failed_load_tears_down() {
        let loader = MockLoader::new();
        loader.fail_next_loads(1);

        let err = ChemBridge::new(cached_config(1), loader.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Job(_)));
        assert_eq!(loader.loads(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_guards_later_calls() {
        let bridge = ChemBridge::new(cached_config(1), MockLoader::new())
            .await
            .unwrap();

        bridge.shutdown().await;
        bridge.shutdown().await;

        let err = bridge.is_valid_source("CCO").await.unwrap_err();
        assert!(matches!(err, BridgeError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_library_jobs_share_one_owner() {
        let bridge = ChemBridge::new(cached_config(3), MockLoader::new())
            .await
            .unwrap();

        assert_eq!(
            bridge.build_library("actives", false).await.unwrap(),
            LibraryStatus::Created
        );
        // round-robin would scatter these; owner routing must not
        let added = bridge
            .extend_library(
                "actives",
                vec!["CCO".into(), "CCN".into(), "bad!".into()],
                false,
            )
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(bridge.library_size("actives").await.unwrap(), 2);
        assert_eq!(
            bridge.query_library("actives", "CC").await.unwrap(),
            vec!["CCO".to_string(), "CCN".to_string()]
        );
        assert!(bridge.drop_library("actives").await.unwrap());
        assert!(!bridge.drop_library("actives").await.unwrap());

        let err = bridge.library_size("actives").await.unwrap_err();
        match err {
            BridgeError::Job(failure) => assert_eq!(failure.kind, FailureKind::UnknownLibrary),
            other => panic!("unexpected error: {:?}", other),
        }

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_apply_engine_options_reaches_every_worker() {
        let loader = MockLoader::new();
        let bridge = ChemBridge::new(cached_config(2), loader.clone())
            .await
            .unwrap();

        bridge
            .apply_engine_options(EngineOptions::default().with_prefer_coordgen(false))
            .await
            .unwrap();
        assert!(!loader.engine().current_options().prefer_coordgen);

        // the flag now changes what an unforced coordinate job produces
        let molblock = bridge
            .regenerate_coordinates("CCO", None)
            .await
            .unwrap()
            .unwrap();
        assert!(molblock.contains("coords=false"));

        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_track_traffic() {
        let bridge = ChemBridge::new(cached_config(1), MockLoader::new())
            .await
            .unwrap();

        bridge.is_valid_source("CCO").await.unwrap();
        bridge.molecule_details("CCO").await.unwrap();

        let stats = bridge.stats().await;
        assert_eq!(stats.workers, 1);
        // one init plus two domain jobs
        assert_eq!(stats.jobs_dispatched, 3);
        assert_eq!(stats.jobs_completed, 3);
        assert_eq!(stats.jobs_in_flight, 0);

        let exposition = bridge.prometheus_metrics();
        assert!(exposition.contains("chembridge_jobs_total"));

        bridge.shutdown().await;
    }
}
