//! Action dispatch on the worker.
//!
//! [`Worker::route`] is total over the action enum; there is no default arm
//! and no job a worker silently ignores. Init idempotence, the not-ready
//! guard, and terminate live here. Every domain handler obtains handles
//! through the worker's cache and releases exactly what it obtained, on
//! every path, so the release discipline holds whether or not the cache
//! keeps handles alive.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::{EngineState, Worker};
use crate::engine::{ChemEngine, EngineLoader, HandleCache, HandleKind};
use crate::error::{EngineError, JobFailure};
use crate::protocol::{
    BuildLibraryPayload, CanonicalFormPayload, ConvertPayload, CoordinatesPayload,
    ExtendLibraryPayload, InitPayload, Job, JobOutput, JobPayload, LibraryNamePayload,
    LibraryStatus, MatchPayload, Notation, QueryLibraryPayload, QueryPayload, SourcePayload,
    SvgPayload,
};

/// What the worker loop does after a job
pub(crate) enum RouteOutcome {
    /// Publish a response
    Respond(Result<JobOutput, JobFailure>),
    /// Stop the worker without responding
    Shutdown,
}

type HandlerResult = Result<JobOutput, JobFailure>;

impl<L: EngineLoader> Worker<L> {
    #[instrument(skip(self, job), fields(worker_id = %self.id, action = %job.action(), key = %job.key))]
    pub(crate) async fn route(&mut self, job: Job) -> RouteOutcome {
        debug!("processing job");

        match job.payload {
            JobPayload::InitEngine(payload) => {
                RouteOutcome::Respond(self.init_engine(payload).await)
            }
            JobPayload::Terminate => {
                info!(worker_id = %self.id, "terminate received");
                RouteOutcome::Shutdown
            }
            JobPayload::GetSvg(payload) => self.domain(|state| get_svg(state, payload)),
            JobPayload::ValidateSource(payload) => {
                self.domain(|state| validate_source(state, payload))
            }
            JobPayload::ValidateQuery(payload) => {
                self.domain(|state| validate_query(state, payload))
            }
            JobPayload::GetCanonicalForm(payload) => {
                self.domain(|state| canonical_form(state, payload))
            }
            JobPayload::ConvertNotation(payload) => {
                self.domain(|state| convert_notation(state, payload))
            }
            JobPayload::HasSubstructureMatch(payload) => {
                self.domain(|state| has_substructure_match(state, payload))
            }
            JobPayload::GetSubstructureMatch(payload) => {
                self.domain(|state| get_substructure_match(state, payload))
            }
            JobPayload::GetMoleculeDetails(payload) => {
                self.domain(|state| molecule_details(state, payload))
            }
            JobPayload::AddHydrogens(payload) => self.domain(|state| add_hydrogens(state, payload)),
            JobPayload::RemoveHydrogens(payload) => {
                self.domain(|state| remove_hydrogens(state, payload))
            }
            JobPayload::RegenerateCoordinates(payload) => {
                self.domain(|state| regenerate_coordinates(state, payload))
            }
            JobPayload::BuildLibrary(payload) => self.domain(|state| build_library(state, payload)),
            JobPayload::ExtendLibrary(payload) => {
                self.domain(|state| extend_library(state, payload))
            }
            JobPayload::QueryLibrary(payload) => self.domain(|state| query_library(state, payload)),
            JobPayload::LibrarySize(payload) => self.domain(|state| library_size(state, payload)),
            JobPayload::DropLibrary(payload) => self.domain(|state| drop_library(state, payload)),
        }
    }

    /// Run a domain handler, answering not-ready while the engine is absent
    fn domain<F>(&mut self, handler: F) -> RouteOutcome
    where
        F: FnOnce(&mut EngineState<L::Engine>) -> HandlerResult,
    {
        match self.state.as_mut() {
            Some(state) => RouteOutcome::Respond(handler(state)),
            None => {
                warn!(worker_id = %self.id, "domain job before engine init");
                RouteOutcome::Respond(Err(JobFailure::not_ready()))
            }
        }
    }

    /// Load the engine, or refresh its flags when already loaded.
    ///
    /// Cache options are fixed at first load; a repeat init only re-applies
    /// the engine flags.
    async fn init_engine(&mut self, payload: InitPayload) -> HandlerResult {
        if let Some(state) = &self.state {
            state.cache.engine().apply_options(&payload.engine);
            debug!(worker_id = %self.id, "engine already loaded, options refreshed");
            return Ok(JobOutput::EngineReady {
                worker_id: self.id.clone(),
            });
        }

        let engine = self.loader.load(&payload.engine).await.map_err(|err| {
            warn!(worker_id = %self.id, error = %err, "engine load failed");
            JobFailure::internal_error(err.to_string())
        })?;

        let cache = HandleCache::new(Arc::new(engine), &payload.cache);
        self.state = Some(EngineState {
            cache,
            libraries: HashMap::new(),
        });
        info!(
            worker_id = %self.id,
            cache_enabled = payload.cache.enabled,
            cache_capacity = payload.cache.capacity,
            "engine loaded"
        );
        Ok(JobOutput::EngineReady {
            worker_id: self.id.clone(),
        })
    }
}

fn get_svg<E: ChemEngine>(state: &mut EngineState<E>, payload: SvgPayload) -> HandlerResult {
    let cache = &state.cache;
    let engine = Arc::clone(cache.engine());

    let Some(mol) = cache.get_or_create(&payload.source, HandleKind::Plain)? else {
        return Ok(JobOutput::Svg { svg: None });
    };

    let mut aligned = false;
    if let Some(template_source) = &payload.align_to {
        let template = match cache.get_or_create(template_source, HandleKind::Plain) {
            Ok(Some(template)) => template,
            Ok(None) => {
                cache.release(&mol);
                return Ok(JobOutput::Svg { svg: None });
            }
            Err(err) => {
                cache.release(&mol);
                return Err(err.into());
            }
        };
        let alignment = match (mol.raw(), template.raw()) {
            (Some(m), Some(t)) => engine.align_depiction(m, t).map_err(JobFailure::from),
            _ => Err(JobFailure::internal_error("handle released mid-operation")),
        };
        cache.release(&template);
        if let Err(failure) = alignment {
            cache.release(&mol);
            return Err(failure);
        }
        aligned = true;
    }

    let drawing = payload.drawing.unwrap_or_default();
    let rendered = match mol.raw() {
        Some(raw) => engine.render_svg(raw, &drawing).map_err(JobFailure::from),
        None => Err(JobFailure::internal_error("handle released mid-operation")),
    };
    if aligned {
        // the handle may stay cached; aligned coordinates must not leak into
        // later unaligned renders
        if let Some(raw) = mol.raw() {
            engine.reset_depiction(raw);
        }
    }
    cache.release(&mol);

    Ok(JobOutput::Svg {
        svg: Some(rendered?),
    })
}

fn validate_source<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: SourcePayload,
) -> HandlerResult {
    let is_valid = source_is_valid(&state.cache, &payload.source, HandleKind::Plain)?;
    Ok(JobOutput::SourceValidity { is_valid })
}

fn validate_query<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: QueryPayload,
) -> HandlerResult {
    let is_valid = source_is_valid(&state.cache, &payload.query, HandleKind::Query)?;
    Ok(JobOutput::QueryValidity { is_valid })
}

fn canonical_form<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: CanonicalFormPayload,
) -> HandlerResult {
    let converted = convert_inner(
        &state.cache,
        ConvertPayload {
            source: payload.source,
            target: payload.notation.unwrap_or(Notation::Smiles),
            source_notation: None,
            as_query: payload.as_query,
        },
    )?;
    Ok(JobOutput::CanonicalForm {
        canonical: converted,
    })
}

fn convert_notation<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: ConvertPayload,
) -> HandlerResult {
    let converted = convert_inner(&state.cache, payload)?;
    Ok(JobOutput::ConvertedNotation { converted })
}

fn has_substructure_match<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: MatchPayload,
) -> HandlerResult {
    let cache = &state.cache;
    let engine = cache.engine();

    let Some(mol) = cache.get_or_create(&payload.source, HandleKind::Plain)? else {
        return Ok(JobOutput::SubstructureContainment { matching: false });
    };
    let query = match cache.get_or_create(&payload.query, HandleKind::Query) {
        Ok(Some(query)) => query,
        Ok(None) => {
            cache.release(&mol);
            return Ok(JobOutput::SubstructureContainment { matching: false });
        }
        Err(err) => {
            cache.release(&mol);
            return Err(err.into());
        }
    };

    let matching = match (mol.raw(), query.raw()) {
        (Some(m), Some(q)) => {
            let mapping = engine.match_substructure(m, q);
            let fragments = engine.fragment_atom_counts(m);
            // a hit counts only when the query covers a single-fragment
            // source whole
            mapping.map_or(false, |mapping| {
                !mapping.atoms.is_empty()
                    && fragments.len() == 1
                    && mapping.atoms.len() == fragments[0] as usize
            })
        }
        _ => false,
    };
    cache.release(&query);
    cache.release(&mol);

    Ok(JobOutput::SubstructureContainment { matching })
}

fn get_substructure_match<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: MatchPayload,
) -> HandlerResult {
    let cache = &state.cache;
    let engine = cache.engine();

    let Some(mol) = cache.get_or_create(&payload.source, HandleKind::Plain)? else {
        return Ok(JobOutput::SubstructureMapping { mapping: None });
    };
    // the pattern side is an ordinary molecule here, not a query handle
    let pattern = match cache.get_or_create(&payload.query, HandleKind::Plain) {
        Ok(Some(pattern)) => pattern,
        Ok(None) => {
            cache.release(&mol);
            return Ok(JobOutput::SubstructureMapping { mapping: None });
        }
        Err(err) => {
            cache.release(&mol);
            return Err(err.into());
        }
    };

    let mapping = match (mol.raw(), pattern.raw()) {
        (Some(m), Some(p)) => engine.match_substructure(m, p),
        _ => None,
    };
    cache.release(&pattern);
    cache.release(&mol);

    Ok(JobOutput::SubstructureMapping { mapping })
}

fn molecule_details<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: SourcePayload,
) -> HandlerResult {
    let cache = &state.cache;

    let Some(mol) = cache.get_or_create(&payload.source, HandleKind::Plain)? else {
        return Ok(JobOutput::MoleculeDetails { details: None });
    };
    let details = mol.raw().map(|raw| cache.engine().molecule_stats(raw));
    cache.release(&mol);

    Ok(JobOutput::MoleculeDetails { details })
}

fn add_hydrogens<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: SourcePayload,
) -> HandlerResult {
    let molblock = edit_structure(&state.cache, &payload.source, |engine, raw| {
        engine.add_hydrogens(raw)
    })?;
    Ok(JobOutput::Molblock { molblock })
}

fn remove_hydrogens<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: SourcePayload,
) -> HandlerResult {
    let molblock = edit_structure(&state.cache, &payload.source, |engine, raw| {
        engine.remove_hydrogens(raw)
    })?;
    Ok(JobOutput::Molblock { molblock })
}

fn regenerate_coordinates<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: CoordinatesPayload,
) -> HandlerResult {
    let molblock = new_coordinates(&state.cache, &payload.source, payload.use_coordgen)?;
    Ok(JobOutput::Molblock { molblock })
}

fn build_library<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: BuildLibraryPayload,
) -> HandlerResult {
    let status = match state.libraries.entry(payload.name.clone()) {
        Entry::Occupied(mut occupied) => {
            if payload.replace {
                occupied.insert(Vec::new());
                info!(library = %payload.name, "library replaced");
                LibraryStatus::Replaced
            } else {
                LibraryStatus::AlreadyExists
            }
        }
        Entry::Vacant(vacant) => {
            vacant.insert(Vec::new());
            info!(library = %payload.name, "library created");
            LibraryStatus::Created
        }
    };
    Ok(JobOutput::LibraryBuilt { status })
}

fn extend_library<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: ExtendLibraryPayload,
) -> HandlerResult {
    if !state.libraries.contains_key(&payload.name) {
        return Err(JobFailure::unknown_library(&payload.name));
    }

    let accepted: Vec<String> = if payload.pretrusted {
        payload.sources
    } else {
        let cache = &state.cache;
        let engine = cache.engine();
        let handles = cache.get_or_create_batch(&payload.sources, HandleKind::Plain)?;
        let mut accepted = Vec::new();
        for (source, handle) in payload.sources.iter().zip(handles) {
            let Some(handle) = handle else {
                debug!(source = %source, "library candidate does not parse, skipped");
                continue;
            };
            let valid = handle.raw().map(|raw| engine.is_valid(raw)).unwrap_or(false);
            cache.release(&handle);
            if valid {
                accepted.push(source.clone());
            }
        }
        accepted
    };

    let added = accepted.len();
    if let Some(members) = state.libraries.get_mut(&payload.name) {
        members.extend(accepted);
    }
    debug!(library = %payload.name, added = added, "library extended");
    Ok(JobOutput::LibraryExtended { added })
}

fn query_library<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: QueryLibraryPayload,
) -> HandlerResult {
    let members = match state.libraries.get(&payload.name) {
        Some(members) => members.clone(),
        None => return Err(JobFailure::unknown_library(&payload.name)),
    };
    let cache = &state.cache;
    let engine = cache.engine();

    let Some(query) = cache.get_or_create(&payload.query, HandleKind::Query)? else {
        return Ok(JobOutput::LibraryMatches {
            matches: Vec::new(),
        });
    };

    let handles = match cache.get_or_create_batch(&members, HandleKind::Plain) {
        Ok(handles) => handles,
        Err(err) => {
            cache.release(&query);
            return Err(err.into());
        }
    };

    let mut matches = Vec::new();
    for (member, handle) in members.iter().zip(handles) {
        let Some(handle) = handle else { continue };
        match (handle.raw(), query.raw()) {
            (Some(m), Some(q)) => {
                if engine.match_substructure(m, q).is_some() {
                    matches.push(member.clone());
                }
            }
            _ => debug!(member = %member, "handle lost to a flush during screening, skipped"),
        }
        cache.release(&handle);
    }
    cache.release(&query);

    debug!(
        library = %payload.name,
        screened = members.len(),
        matched = matches.len(),
        "library screened"
    );
    Ok(JobOutput::LibraryMatches { matches })
}

fn library_size<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: LibraryNamePayload,
) -> HandlerResult {
    match state.libraries.get(&payload.name) {
        Some(members) => Ok(JobOutput::LibrarySize {
            size: members.len(),
        }),
        None => Err(JobFailure::unknown_library(&payload.name)),
    }
}

fn drop_library<E: ChemEngine>(
    state: &mut EngineState<E>,
    payload: LibraryNamePayload,
) -> HandlerResult {
    let removed = state.libraries.remove(&payload.name).is_some();
    if removed {
        info!(library = %payload.name, "library dropped");
    }
    Ok(JobOutput::LibraryDropped { removed })
}

/// Validity of a source, built and released through the cache
fn source_is_valid<E: ChemEngine>(
    cache: &HandleCache<E>,
    source: &str,
    kind: HandleKind,
) -> Result<bool, JobFailure> {
    let Some(handle) = cache.get_or_create(source, kind)? else {
        return Ok(false);
    };
    let valid = handle
        .raw()
        .map(|raw| cache.engine().is_valid(raw))
        .unwrap_or(false);
    cache.release(&handle);
    Ok(valid)
}

fn convert_inner<E: ChemEngine>(
    cache: &HandleCache<E>,
    payload: ConvertPayload,
) -> Result<Option<String>, JobFailure> {
    if let Some(source_notation) = payload.source_notation {
        if source_notation == payload.target {
            return Err(JobFailure::invalid_input(
                "source and target notations must differ",
            ));
        }
        if !validates_as(cache, &payload.source, source_notation)? {
            return Err(JobFailure::invalid_input(format!(
                "input is not valid {}",
                source_notation
            )));
        }
    }

    let kind = if payload.as_query {
        HandleKind::Query
    } else {
        HandleKind::Plain
    };
    let Some(handle) = cache.get_or_create(&payload.source, kind)? else {
        return Ok(None);
    };
    let written = match handle.raw() {
        Some(raw) => cache
            .engine()
            .write_notation(raw, payload.target)
            .map_err(|err| match err {
                // an unsupported target is the caller's problem, not ours
                EngineError::Operation(message) => JobFailure::invalid_input(message),
                other => other.into(),
            }),
        None => Err(JobFailure::internal_error("handle released mid-operation")),
    };
    cache.release(&handle);
    written.map(Some)
}

fn validates_as<E: ChemEngine>(
    cache: &HandleCache<E>,
    source: &str,
    notation: Notation,
) -> Result<bool, JobFailure> {
    match notation {
        Notation::Molblock => {
            if !source.contains("M  END") {
                return Ok(false);
            }
            source_is_valid(cache, source, HandleKind::Plain)
        }
        Notation::Smiles | Notation::Smarts => {
            source_is_valid(cache, source, HandleKind::Plain)
        }
        Notation::Inchi => Err(JobFailure::invalid_input(
            "validating inchi input is not supported",
        )),
    }
}

/// Run a structure edit, then re-derive display coordinates from its output
fn edit_structure<E: ChemEngine>(
    cache: &HandleCache<E>,
    source: &str,
    edit: impl FnOnce(&E, &E::Handle) -> crate::engine::EngineResult<String>,
) -> Result<Option<String>, JobFailure> {
    let Some(mol) = cache.get_or_create(source, HandleKind::Plain)? else {
        return Ok(None);
    };
    let edited = match mol.raw() {
        Some(raw) => edit(cache.engine().as_ref(), raw).map_err(JobFailure::from),
        None => Err(JobFailure::internal_error("handle released mid-operation")),
    };
    cache.release(&mol);

    new_coordinates(cache, &edited?, Some(false))
}

fn new_coordinates<E: ChemEngine>(
    cache: &HandleCache<E>,
    source: &str,
    use_coordgen: Option<bool>,
) -> Result<Option<String>, JobFailure> {
    let Some(mol) = cache.get_or_create(source, HandleKind::Plain)? else {
        return Ok(None);
    };
    let molblock = match mol.raw() {
        Some(raw) => cache
            .engine()
            .regenerate_coordinates(raw, use_coordgen)
            .map_err(JobFailure::from),
        None => Err(JobFailure::internal_error("handle released mid-operation")),
    };
    cache.release(&mol);
    molblock.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheOptions;
    use crate::engine::MockEngine;
    use crate::error::FailureKind;

    fn state(options: CacheOptions) -> (MockEngine, EngineState<MockEngine>) {
        let engine = MockEngine::new();
        let cache = HandleCache::new(Arc::new(engine.clone()), &options);
        (
            engine,
            EngineState {
                cache,
                libraries: HashMap::new(),
            },
        )
    }

    fn svg_payload(source: &str) -> SvgPayload {
        SvgPayload {
            source: source.into(),
            drawing: None,
            align_to: None,
        }
    }

    #[test]
    fn test_svg_happy_path() {
        let (engine, mut state) = state(CacheOptions::disabled());

        let output = get_svg(&mut state, svg_payload("CCO")).unwrap();
        let JobOutput::Svg { svg: Some(svg) } = output else {
            panic!("expected svg output");
        };
        assert!(svg.contains("CCO"));
        assert!(svg.contains("width=\"250\""));
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_svg_invalid_source() {
        let (_, mut state) = state(CacheOptions::disabled());
        let output = get_svg(&mut state, svg_payload("no!good")).unwrap();
        assert_eq!(output, JobOutput::Svg { svg: None });
    }

    #[test]
    fn test_svg_alignment_marks_and_resets() {
        let (_, mut state) = state(CacheOptions::enabled(10));

        let aligned = get_svg(
            &mut state,
            SvgPayload {
                source: "CCO".into(),
                drawing: None,
                align_to: Some("CC".into()),
            },
        )
        .unwrap();
        let JobOutput::Svg { svg: Some(svg) } = aligned else {
            panic!("expected svg output");
        };
        assert!(svg.contains("data-aligned=\"true\""));

        // the cached handle must not keep the aligned coordinates
        let plain = get_svg(&mut state, svg_payload("CCO")).unwrap();
        let JobOutput::Svg { svg: Some(svg) } = plain else {
            panic!("expected svg output");
        };
        assert!(svg.contains("data-aligned=\"false\""));
    }

    #[test]
    fn test_svg_alignment_releases_template() {
        let (engine, mut state) = state(CacheOptions::disabled());

        get_svg(
            &mut state,
            SvgPayload {
                source: "CCO".into(),
                drawing: None,
                align_to: Some("CC".into()),
            },
        )
        .unwrap();

        assert_eq!(engine.constructed(), 2);
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_svg_bad_template_yields_none() {
        let (engine, mut state) = state(CacheOptions::disabled());

        let output = get_svg(
            &mut state,
            SvgPayload {
                source: "CCO".into(),
                drawing: None,
                align_to: Some("bad!template".into()),
            },
        )
        .unwrap();

        assert_eq!(output, JobOutput::Svg { svg: None });
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_validity_checks() {
        let (_, mut state) = state(CacheOptions::disabled());

        let output = validate_source(
            &mut state,
            SourcePayload {
                source: "CCO".into(),
            },
        )
        .unwrap();
        assert_eq!(output, JobOutput::SourceValidity { is_valid: true });

        let output = validate_query(
            &mut state,
            QueryPayload {
                query: "bad!".into(),
            },
        )
        .unwrap();
        assert_eq!(output, JobOutput::QueryValidity { is_valid: false });
    }

    #[test]
    fn test_canonical_form_defaults_to_smiles() {
        let (_, mut state) = state(CacheOptions::disabled());

        let output = canonical_form(
            &mut state,
            CanonicalFormPayload {
                source: "CCO".into(),
                notation: None,
                as_query: false,
            },
        )
        .unwrap();
        assert_eq!(
            output,
            JobOutput::CanonicalForm {
                canonical: Some("smiles:CCO".into())
            }
        );
    }

    #[test]
    fn test_convert_rejects_equal_notations() {
        let (_, mut state) = state(CacheOptions::disabled());

        let failure = convert_notation(
            &mut state,
            ConvertPayload {
                source: "CCO".into(),
                target: Notation::Smiles,
                source_notation: Some(Notation::Smiles),
                as_query: false,
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_convert_validates_declared_notation() {
        let (_, mut state) = state(CacheOptions::disabled());

        // declared molblock without an M  END marker
        let failure = convert_notation(
            &mut state,
            ConvertPayload {
                source: "CCO".into(),
                target: Notation::Smiles,
                source_notation: Some(Notation::Molblock),
                as_query: false,
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_convert_unparseable_is_none() {
        let (_, mut state) = state(CacheOptions::disabled());

        let output = convert_notation(
            &mut state,
            ConvertPayload {
                source: "no!".into(),
                target: Notation::Molblock,
                source_notation: None,
                as_query: false,
            },
        )
        .unwrap();
        assert_eq!(output, JobOutput::ConvertedNotation { converted: None });
    }

    #[test]
    fn test_convert_query_inchi_is_invalid_input() {
        let (_, mut state) = state(CacheOptions::disabled());

        let failure = convert_notation(
            &mut state,
            ConvertPayload {
                source: "CCO".into(),
                target: Notation::Inchi,
                source_notation: None,
                as_query: true,
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_containment_requires_full_cover() {
        let (_, mut state) = state(CacheOptions::disabled());

        let covered = has_substructure_match(
            &mut state,
            MatchPayload {
                source: "CCO".into(),
                query: "CCO".into(),
            },
        )
        .unwrap();
        assert_eq!(
            covered,
            JobOutput::SubstructureContainment { matching: true }
        );

        let partial = has_substructure_match(
            &mut state,
            MatchPayload {
                source: "CCO".into(),
                query: "CO".into(),
            },
        )
        .unwrap();
        assert_eq!(
            partial,
            JobOutput::SubstructureContainment { matching: false }
        );

        let multi_fragment = has_substructure_match(
            &mut state,
            MatchPayload {
                source: "CC.O".into(),
                query: "CC".into(),
            },
        )
        .unwrap();
        assert_eq!(
            multi_fragment,
            JobOutput::SubstructureContainment { matching: false }
        );
    }

    #[test]
    fn test_substructure_mapping_indices() {
        let (_, mut state) = state(CacheOptions::disabled());

        let output = get_substructure_match(
            &mut state,
            MatchPayload {
                source: "CCCO".into(),
                query: "CO".into(),
            },
        )
        .unwrap();
        let JobOutput::SubstructureMapping {
            mapping: Some(mapping),
        } = output
        else {
            panic!("expected a mapping");
        };
        assert_eq!(mapping.atoms, vec![2, 3]);
        assert_eq!(mapping.bonds, vec![2]);

        let output = get_substructure_match(
            &mut state,
            MatchPayload {
                source: "CCCO".into(),
                query: "NN".into(),
            },
        )
        .unwrap();
        assert_eq!(output, JobOutput::SubstructureMapping { mapping: None });
    }

    #[test]
    fn test_molecule_details() {
        let (_, mut state) = state(CacheOptions::disabled());

        let output = molecule_details(
            &mut state,
            SourcePayload {
                source: "CCO".into(),
            },
        )
        .unwrap();
        let JobOutput::MoleculeDetails {
            details: Some(details),
        } = output
        else {
            panic!("expected details");
        };
        assert_eq!(details.heavy_atom_count, 3);
        assert_eq!(details.ring_count, 0);
    }

    #[test]
    fn test_hydrogen_edits_rederive_coordinates() {
        let (engine, mut state) = state(CacheOptions::disabled());

        let output = add_hydrogens(
            &mut state,
            SourcePayload {
                source: "CCO".into(),
            },
        )
        .unwrap();
        let JobOutput::Molblock {
            molblock: Some(molblock),
        } = output
        else {
            panic!("expected molblock");
        };
        assert!(molblock.contains("CCO[H]"));
        assert!(molblock.contains("coords=false"));
        assert_eq!(engine.outstanding(), 0);

        let output = remove_hydrogens(
            &mut state,
            SourcePayload {
                source: "CC[H]O".into(),
            },
        )
        .unwrap();
        let JobOutput::Molblock {
            molblock: Some(molblock),
        } = output
        else {
            panic!("expected molblock");
        };
        assert!(molblock.starts_with("CCO"));
    }

    #[test]
    fn test_coordinates_follow_engine_preference() {
        let (_, mut state) = state(CacheOptions::disabled());

        // engine default prefers the template generator
        let output = regenerate_coordinates(
            &mut state,
            CoordinatesPayload {
                source: "CCO".into(),
                use_coordgen: None,
            },
        )
        .unwrap();
        let JobOutput::Molblock {
            molblock: Some(molblock),
        } = output
        else {
            panic!("expected molblock");
        };
        assert!(molblock.contains("coords=true"));

        let output = regenerate_coordinates(
            &mut state,
            CoordinatesPayload {
                source: "CCO".into(),
                use_coordgen: Some(false),
            },
        )
        .unwrap();
        let JobOutput::Molblock {
            molblock: Some(molblock),
        } = output
        else {
            panic!("expected molblock");
        };
        assert!(molblock.contains("coords=false"));
    }

    #[test]
    fn test_library_lifecycle() {
        let (_, mut state) = state(CacheOptions::enabled(10));
        let name = "actives".to_string();

        let built = build_library(
            &mut state,
            BuildLibraryPayload {
                name: name.clone(),
                replace: false,
            },
        )
        .unwrap();
        assert_eq!(
            built,
            JobOutput::LibraryBuilt {
                status: LibraryStatus::Created
            }
        );

        let again = build_library(
            &mut state,
            BuildLibraryPayload {
                name: name.clone(),
                replace: false,
            },
        )
        .unwrap();
        assert_eq!(
            again,
            JobOutput::LibraryBuilt {
                status: LibraryStatus::AlreadyExists
            }
        );

        let extended = extend_library(
            &mut state,
            ExtendLibraryPayload {
                name: name.clone(),
                sources: vec!["CCO".into(), "bad!".into(), "CCN".into()],
                pretrusted: false,
            },
        )
        .unwrap();
        assert_eq!(extended, JobOutput::LibraryExtended { added: 2 });

        let size = library_size(
            &mut state,
            LibraryNamePayload { name: name.clone() },
        )
        .unwrap();
        assert_eq!(size, JobOutput::LibrarySize { size: 2 });

        let matches = query_library(
            &mut state,
            QueryLibraryPayload {
                name: name.clone(),
                query: "CC".into(),
            },
        )
        .unwrap();
        assert_eq!(
            matches,
            JobOutput::LibraryMatches {
                matches: vec!["CCO".into(), "CCN".into()]
            }
        );

        let replaced = build_library(
            &mut state,
            BuildLibraryPayload {
                name: name.clone(),
                replace: true,
            },
        )
        .unwrap();
        assert_eq!(
            replaced,
            JobOutput::LibraryBuilt {
                status: LibraryStatus::Replaced
            }
        );
        let size = library_size(
            &mut state,
            LibraryNamePayload { name: name.clone() },
        )
        .unwrap();
        assert_eq!(size, JobOutput::LibrarySize { size: 0 });

        let dropped = drop_library(
            &mut state,
            LibraryNamePayload { name: name.clone() },
        )
        .unwrap();
        assert_eq!(dropped, JobOutput::LibraryDropped { removed: true });
        let dropped = drop_library(&mut state, LibraryNamePayload { name })
            .unwrap();
        assert_eq!(dropped, JobOutput::LibraryDropped { removed: false });
    }

    #[test]
    fn test_library_ops_require_existing_name() {
        let (_, mut state) = state(CacheOptions::enabled(10));

        let failure = extend_library(
            &mut state,
            ExtendLibraryPayload {
                name: "missing".into(),
                sources: vec!["CCO".into()],
                pretrusted: true,
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnknownLibrary);

        let failure = query_library(
            &mut state,
            QueryLibraryPayload {
                name: "missing".into(),
                query: "CC".into(),
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnknownLibrary);

        let failure = library_size(
            &mut state,
            LibraryNamePayload {
                name: "missing".into(),
            },
        )
        .unwrap_err();
        assert_eq!(failure.kind, FailureKind::UnknownLibrary);
    }

    #[test]
    fn test_pretrusted_extend_skips_validation() {
        let (engine, mut state) = state(CacheOptions::disabled());

        let extended = extend_library_prepared(&mut state);
        assert_eq!(extended, JobOutput::LibraryExtended { added: 3 });
        // pretrusted members never touched the engine
        assert_eq!(engine.constructed(), 0);
    }

    fn extend_library_prepared(state: &mut EngineState<MockEngine>) -> JobOutput {
        build_library(
            state,
            BuildLibraryPayload {
                name: "raw".into(),
                replace: false,
            },
        )
        .unwrap();
        extend_library(
            state,
            ExtendLibraryPayload {
                name: "raw".into(),
                sources: vec!["CCO".into(), "bad!".into(), "CCN".into()],
                pretrusted: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_release_discipline_across_handlers() {
        let (engine, mut state) = state(CacheOptions::disabled());

        get_svg(&mut state, svg_payload("CCO")).unwrap();
        validate_source(
            &mut state,
            SourcePayload {
                source: "CCN".into(),
            },
        )
        .unwrap();
        has_substructure_match(
            &mut state,
            MatchPayload {
                source: "CCO".into(),
                query: "CC".into(),
            },
        )
        .unwrap();
        molecule_details(
            &mut state,
            SourcePayload {
                source: "CCC".into(),
            },
        )
        .unwrap();

        assert_eq!(engine.constructed(), engine.destroyed());
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_enabled_cache_keeps_handles_across_handlers() {
        let (engine, mut state) = state(CacheOptions::enabled(10));

        validate_source(
            &mut state,
            SourcePayload {
                source: "CCO".into(),
            },
        )
        .unwrap();
        get_svg(&mut state, svg_payload("CCO")).unwrap();

        assert_eq!(engine.constructed(), 1);
        assert_eq!(state.cache.hits(), 1);
        assert_eq!(engine.outstanding(), 1);
    }
}
