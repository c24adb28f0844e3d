//! Wire types for jobs and responses.
//!
//! A [`Job`] pairs a closed action tag with a correlation key and a typed
//! payload. Workers answer with a [`LocalResponse`] on their internal
//! channel; the relay converts it into the published [`Response`]. Keeping
//! the two stages as distinct types makes the local-to-public re-tagging a
//! compile-checked conversion instead of a string suffix swap.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{CacheOptions, EngineOptions};
use crate::error::JobFailure;

/// Closed set of actions a worker understands.
///
/// Unknown tags are unrepresentable; every router match over this enum is
/// exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionTag {
    /// Load the engine (idempotent; repeat calls only update flags)
    InitEngine,
    /// Flush caches and stop the worker; no response is emitted
    Terminate,
    /// Render a source to SVG, optionally aligned to a template source
    GetSvg,
    /// Check whether a source parses as a molecule
    ValidateSource,
    /// Check whether a query parses as a pattern
    ValidateQuery,
    /// Canonical text form of a source
    GetCanonicalForm,
    /// Convert a source between notations
    ConvertNotation,
    /// Whole-molecule substructure containment check
    HasSubstructureMatch,
    /// Atom/bond indices of the first substructure match
    GetSubstructureMatch,
    /// Heavy atom count, ring count, molecular weight
    GetMoleculeDetails,
    /// Add explicit hydrogens and re-derive coordinates
    AddHydrogens,
    /// Strip explicit hydrogens and re-derive coordinates
    RemoveHydrogens,
    /// Recompute 2D coordinates
    RegenerateCoordinates,
    /// Create a named source library on the worker
    BuildLibrary,
    /// Add sources to a named library
    ExtendLibrary,
    /// Screen a named library against a query pattern
    QueryLibrary,
    /// Number of sources in a named library
    LibrarySize,
    /// Remove a named library
    DropLibrary,
}

impl ActionTag {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionTag::InitEngine => "INIT_ENGINE",
            ActionTag::Terminate => "TERMINATE",
            ActionTag::GetSvg => "GET_SVG",
            ActionTag::ValidateSource => "VALIDATE_SOURCE",
            ActionTag::ValidateQuery => "VALIDATE_QUERY",
            ActionTag::GetCanonicalForm => "GET_CANONICAL_FORM",
            ActionTag::ConvertNotation => "CONVERT_NOTATION",
            ActionTag::HasSubstructureMatch => "HAS_SUBSTRUCTURE_MATCH",
            ActionTag::GetSubstructureMatch => "GET_SUBSTRUCTURE_MATCH",
            ActionTag::GetMoleculeDetails => "GET_MOLECULE_DETAILS",
            ActionTag::AddHydrogens => "ADD_HYDROGENS",
            ActionTag::RemoveHydrogens => "REMOVE_HYDROGENS",
            ActionTag::RegenerateCoordinates => "REGENERATE_COORDINATES",
            ActionTag::BuildLibrary => "BUILD_LIBRARY",
            ActionTag::ExtendLibrary => "EXTEND_LIBRARY",
            ActionTag::QueryLibrary => "QUERY_LIBRARY",
            ActionTag::LibrarySize => "LIBRARY_SIZE",
            ActionTag::DropLibrary => "DROP_LIBRARY",
        }
    }

    /// Tag a published response carries, `{action}_RESPONSE`
    pub fn response_tag(&self) -> String {
        format!("{}_RESPONSE", self.as_str())
    }

    /// Tag of the worker-local emission before the relay re-tags it
    pub fn local_response_tag(&self) -> String {
        format!("{}_LOCAL_RESPONSE", self.as_str())
    }
}

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text notations the engine converts between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Notation {
    /// Line notation for molecules
    Smiles,
    /// Line notation for query patterns
    Smarts,
    /// Connection table block with coordinates
    Molblock,
    /// IUPAC international identifier
    Inchi,
}

impl std::fmt::Display for Notation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notation::Smiles => write!(f, "smiles"),
            Notation::Smarts => write!(f, "smarts"),
            Notation::Molblock => write!(f, "molblock"),
            Notation::Inchi => write!(f, "inchi"),
        }
    }
}

/// Rendering options forwarded to the engine's SVG drawer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingOptions {
    /// Canvas width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Canvas height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Atom indices to highlight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlight_atoms: Vec<u32>,

    /// Bond indices to highlight
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub highlight_bonds: Vec<u32>,

    /// Draw atom map indices
    #[serde(default)]
    pub add_atom_indices: bool,

    /// Engine-specific drawing details passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Default for DrawingOptions {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            highlight_atoms: Vec::new(),
            highlight_bonds: Vec::new(),
            add_atom_indices: false,
            details: None,
        }
    }
}

fn default_width() -> u32 {
    250
}

fn default_height() -> u32 {
    200
}

/// Typed payload for each action.
///
/// Serializes adjacently tagged so a flattened job reads
/// `{"actionType": "GET_SVG", "payload": {...}}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "actionType",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum JobPayload {
    /// Load the engine and configure the worker cache
    InitEngine(InitPayload),
    /// Stop the worker
    Terminate,
    /// Render to SVG
    GetSvg(SvgPayload),
    /// Molecule validity check
    ValidateSource(SourcePayload),
    /// Query pattern validity check
    ValidateQuery(QueryPayload),
    /// Canonical form
    GetCanonicalForm(CanonicalFormPayload),
    /// Notation conversion
    ConvertNotation(ConvertPayload),
    /// Containment check
    HasSubstructureMatch(MatchPayload),
    /// First match indices
    GetSubstructureMatch(MatchPayload),
    /// Descriptor summary
    GetMoleculeDetails(SourcePayload),
    /// Add explicit hydrogens
    AddHydrogens(SourcePayload),
    /// Strip explicit hydrogens
    RemoveHydrogens(SourcePayload),
    /// Recompute coordinates
    RegenerateCoordinates(CoordinatesPayload),
    /// Create a named library
    BuildLibrary(BuildLibraryPayload),
    /// Add sources to a library
    ExtendLibrary(ExtendLibraryPayload),
    /// Screen a library
    QueryLibrary(QueryLibraryPayload),
    /// Library member count
    LibrarySize(LibraryNamePayload),
    /// Remove a library
    DropLibrary(LibraryNamePayload),
}

impl JobPayload {
    /// The action this payload belongs to
    pub fn action(&self) -> ActionTag {
        match self {
            JobPayload::InitEngine(_) => ActionTag::InitEngine,
            JobPayload::Terminate => ActionTag::Terminate,
            JobPayload::GetSvg(_) => ActionTag::GetSvg,
            JobPayload::ValidateSource(_) => ActionTag::ValidateSource,
            JobPayload::ValidateQuery(_) => ActionTag::ValidateQuery,
            JobPayload::GetCanonicalForm(_) => ActionTag::GetCanonicalForm,
            JobPayload::ConvertNotation(_) => ActionTag::ConvertNotation,
            JobPayload::HasSubstructureMatch(_) => ActionTag::HasSubstructureMatch,
            JobPayload::GetSubstructureMatch(_) => ActionTag::GetSubstructureMatch,
            JobPayload::GetMoleculeDetails(_) => ActionTag::GetMoleculeDetails,
            JobPayload::AddHydrogens(_) => ActionTag::AddHydrogens,
            JobPayload::RemoveHydrogens(_) => ActionTag::RemoveHydrogens,
            JobPayload::RegenerateCoordinates(_) => ActionTag::RegenerateCoordinates,
            JobPayload::BuildLibrary(_) => ActionTag::BuildLibrary,
            JobPayload::ExtendLibrary(_) => ActionTag::ExtendLibrary,
            JobPayload::QueryLibrary(_) => ActionTag::QueryLibrary,
            JobPayload::LibrarySize(_) => ActionTag::LibrarySize,
            JobPayload::DropLibrary(_) => ActionTag::DropLibrary,
        }
    }
}

/// Payload for [`ActionTag::InitEngine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    /// Cache behavior for the worker
    #[serde(default)]
    pub cache: CacheOptions,

    /// Engine flags
    #[serde(default)]
    pub engine: EngineOptions,
}

/// Payload carrying a single molecule source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePayload {
    /// Molecule source text
    pub source: String,
}

/// Payload carrying a single query pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    /// Query pattern text
    pub query: String,
}

/// Payload for [`ActionTag::GetSvg`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SvgPayload {
    /// Molecule source text
    pub source: String,

    /// Rendering options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing: Option<DrawingOptions>,

    /// Source of a template molecule to align depiction to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub align_to: Option<String>,
}

/// Payload for [`ActionTag::GetCanonicalForm`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalFormPayload {
    /// Source text
    pub source: String,

    /// Target notation (default: smiles)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notation: Option<Notation>,

    /// Build the handle as a query pattern
    #[serde(default)]
    pub as_query: bool,
}

/// Payload for [`ActionTag::ConvertNotation`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertPayload {
    /// Source text
    pub source: String,

    /// Notation to convert into
    pub target: Notation,

    /// Declared notation of the input; when present it must differ from the
    /// target and the input must validate under it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_notation: Option<Notation>,

    /// Build the handle as a query pattern
    #[serde(default)]
    pub as_query: bool,
}

/// Payload pairing a molecule source with a query pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPayload {
    /// Molecule source text
    pub source: String,

    /// Query pattern text
    pub query: String,
}

/// Payload for [`ActionTag::RegenerateCoordinates`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatesPayload {
    /// Molecule source text
    pub source: String,

    /// Override the engine's coordinate generator preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_coordgen: Option<bool>,
}

/// Payload for [`ActionTag::BuildLibrary`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLibraryPayload {
    /// Library name, unique per worker
    pub name: String,

    /// Replace an existing library of the same name
    #[serde(default)]
    pub replace: bool,
}

/// Payload for [`ActionTag::ExtendLibrary`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLibraryPayload {
    /// Library name
    pub name: String,

    /// Sources to add
    pub sources: Vec<String>,

    /// Skip per-source validation (sources are known-good)
    #[serde(default)]
    pub pretrusted: bool,
}

/// Payload for [`ActionTag::QueryLibrary`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLibraryPayload {
    /// Library name
    pub name: String,

    /// Query pattern to screen with
    pub query: String,
}

/// Payload naming a library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryNamePayload {
    /// Library name
    pub name: String,
}

/// A correlated request sent to a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Correlation key; unique among in-flight jobs sharing an action tag
    pub key: String,

    /// Action and its typed payload
    #[serde(flatten)]
    pub payload: JobPayload,
}

impl Job {
    /// Create a job with a generated correlation key
    pub fn new(payload: JobPayload) -> Self {
        Self {
            key: Uuid::new_v4().to_string(),
            payload,
        }
    }

    /// Create a job with an explicit correlation key
    pub fn with_key(key: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// The job's action tag
    pub fn action(&self) -> ActionTag {
        self.payload.action()
    }
}

/// Outcome of a library build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LibraryStatus {
    /// A new library was created
    Created,
    /// An existing library was replaced
    Replaced,
    /// The library already existed and replace was not requested
    AlreadyExists,
}

/// Descriptor summary for a molecule source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoleculeStats {
    /// Atoms other than hydrogen
    pub heavy_atom_count: u32,
    /// Smallest set of smallest rings
    pub ring_count: u32,
    /// Average molecular weight
    pub molecular_weight: f64,
}

/// Atom and bond indices of one substructure match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchMapping {
    /// Matched atom indices
    pub atoms: Vec<u32>,
    /// Matched bond indices
    pub bonds: Vec<u32>,
}

/// Successful result payload for each action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum JobOutput {
    /// Engine loaded (or flags refreshed) on a worker
    EngineReady {
        /// Id of the worker that answered
        worker_id: String,
    },
    /// Rendered SVG, absent when the source does not parse
    Svg {
        /// SVG document text
        svg: Option<String>,
    },
    /// Molecule validity
    SourceValidity {
        /// True when the source parses as a molecule
        is_valid: bool,
    },
    /// Query validity
    QueryValidity {
        /// True when the query parses as a pattern
        is_valid: bool,
    },
    /// Canonical text form, absent when the source does not parse
    CanonicalForm {
        /// Canonical text
        canonical: Option<String>,
    },
    /// Converted notation, absent when the source does not parse
    ConvertedNotation {
        /// Converted text
        converted: Option<String>,
    },
    /// Containment check result
    SubstructureContainment {
        /// True when the query covers the whole source molecule
        matching: bool,
    },
    /// First-match indices, absent when either side does not parse or no
    /// match exists
    SubstructureMapping {
        /// Matched atom and bond indices
        mapping: Option<MatchMapping>,
    },
    /// Descriptor summary, absent when the source does not parse
    MoleculeDetails {
        /// Descriptor values
        details: Option<MoleculeStats>,
    },
    /// Edited structure as a molblock, absent when the source does not parse
    Molblock {
        /// Connection table text
        molblock: Option<String>,
    },
    /// Library build outcome
    LibraryBuilt {
        /// Created, replaced, or left untouched
        status: LibraryStatus,
    },
    /// Library extension outcome
    LibraryExtended {
        /// Number of sources actually added
        added: usize,
    },
    /// Library screening result
    LibraryMatches {
        /// Member sources matching the query
        matches: Vec<String>,
    },
    /// Library member count
    LibrarySize {
        /// Current size
        size: usize,
    },
    /// Library removal outcome
    LibraryDropped {
        /// True when a library was removed
        removed: bool,
    },
}

/// Worker-local emission, before the relay publishes it.
///
/// Never crosses the broadcast channel; [`Response`] is the published form.
#[derive(Debug, Clone)]
pub struct LocalResponse {
    /// Action the job carried
    pub action: ActionTag,
    /// Correlation key the job carried
    pub key: String,
    /// Success payload or typed failure
    pub outcome: std::result::Result<JobOutput, JobFailure>,
}

impl LocalResponse {
    /// Successful local response
    pub fn success(action: ActionTag, key: impl Into<String>, output: JobOutput) -> Self {
        Self {
            action,
            key: key.into(),
            outcome: Ok(output),
        }
    }

    /// Failed local response
    pub fn failure(action: ActionTag, key: impl Into<String>, failure: JobFailure) -> Self {
        Self {
            action,
            key: key.into(),
            outcome: Err(failure),
        }
    }

    /// Wire tag of this emission
    pub fn tag(&self) -> String {
        self.action.local_response_tag()
    }
}

/// Published response as observed by dispatchers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Action the originating job carried
    pub action: ActionTag,

    /// Correlation key the originating job carried
    pub key: String,

    /// Success payload, absent on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<JobOutput>,

    /// Failure details, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl Response {
    /// Wire tag of this response, `{action}_RESPONSE`
    pub fn tag(&self) -> String {
        self.action.response_tag()
    }

    /// True when the response carries a success payload
    pub fn is_success(&self) -> bool {
        self.payload.is_some()
    }

    /// Consume into a result, mapping a responseless failure to an internal
    /// error
    pub fn into_result(self) -> std::result::Result<JobOutput, JobFailure> {
        match (self.payload, self.error) {
            (Some(output), _) => Ok(output),
            (None, Some(failure)) => Err(failure),
            (None, None) => Err(JobFailure::internal_error("response carried no payload")),
        }
    }
}

impl From<LocalResponse> for Response {
    fn from(local: LocalResponse) -> Self {
        let (payload, error) = match local.outcome {
            Ok(output) => (Some(output), None),
            Err(failure) => (None, Some(failure)),
        };
        Self {
            action: local.action,
            key: local.key,
            payload,
            error,
        }
    }
}
