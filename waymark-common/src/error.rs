//! Error taxonomy for the waymark routing service
//!
//! Errors are split by the stage that produces them: loading persisted
//! graph/index files, building the hierarchy offline, and answering a
//! route request online. [`Error`] wraps all of them for callers that
//! drive several stages (the CLI and the server bootstrap).

use std::path::PathBuf;

use thiserror::Error;

/// Failure while loading or validating a road graph or hierarchy file.
#[derive(Debug, Error)]
pub enum GraphLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid magic in {path}: expected 0x{expected:08x}, found 0x{found:08x}")]
    BadMagic {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("unsupported format version {found} in {path} (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        expected: u16,
        found: u16,
    },

    #[error("{section} checksum mismatch in {path}: stored {stored:016x}, computed {computed:016x}")]
    ChecksumMismatch {
        path: PathBuf,
        section: &'static str,
        stored: u64,
        computed: u64,
    },

    #[error("{path} is truncated: {reason}")]
    Truncated { path: PathBuf, reason: String },

    #[error("graph has no nodes")]
    Empty,

    #[error("duplicate node id {0}")]
    DuplicateNode(i64),

    #[error("node {id} is invalid: {reason}")]
    InvalidNode { id: i64, reason: String },

    #[error("edge {from} -> {to} references unknown node {missing}")]
    UnknownNode { from: i64, to: i64, missing: i64 },

    #[error("edge {from} -> {to} is invalid: {reason}")]
    InvalidEdge { from: i64, to: i64, reason: String },

    /// The hierarchy file was built for a different graph, or its tables
    /// disagree with the graph it is being attached to.
    #[error("hierarchy does not match graph: {reason}")]
    IndexMismatch { reason: String },
}

/// A freshly contracted hierarchy failed its integrity checks.
///
/// A build that fails here must never replace a deployed index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildIntegrityError {
    #[error("contraction of {nodes} nodes produced no shortcuts")]
    NoShortcuts { nodes: usize },

    #[error("contraction order is not a bijection: {reason}")]
    OrderNotBijection { reason: String },

    #[error("shortcut {from} -> {to} stores {stored_mm} mm but unpacks to {unpacked_mm} mm")]
    ShortcutMismatch {
        from: i64,
        to: i64,
        stored_mm: u64,
        unpacked_mm: u64,
    },
}

/// Failure while answering a single route request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouteError {
    #[error("no road within {radius_m:.0} m of ({lat:.6}, {lon:.6})")]
    SnapFailure { lat: f64, lon: f64, radius_m: f64 },

    #[error("nodes {from} and {to} lie in different connected components")]
    Disconnected { from: i64, to: i64 },

    /// Same weak component, but one-way restrictions leave no directed path.
    #[error("no directed path from node {from} to node {to}")]
    NoPath { from: i64, to: i64 },

    #[error("provider {provider} timed out")]
    ProviderTimeout { provider: String },

    #[error("provider {provider} failed: {reason}")]
    ProviderError { provider: String, reason: String },

    #[error("no route available: {last}")]
    NoRouteAvailable { last: String },

    #[error("request timed out after {timeout_ms} ms")]
    RequestTimeout { timeout_ms: u64 },

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RouteError {
    /// Whether the request itself cannot be routed, so trying another
    /// provider would not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RouteError::SnapFailure { .. }
                | RouteError::Disconnected { .. }
                | RouteError::NoPath { .. }
                | RouteError::InvalidCoordinate(_)
                | RouteError::InvalidRequest(_)
        )
    }
}

/// Umbrella error for code paths that span several stages.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    GraphLoad(#[from] GraphLoadError),

    #[error(transparent)]
    BuildIntegrity(#[from] BuildIntegrityError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for waymark operations
pub type Result<T> = std::result::Result<T, Error>;
