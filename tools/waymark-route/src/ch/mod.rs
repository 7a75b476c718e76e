//! Contraction hierarchies over the road graph
//!
//! The builder contracts nodes offline and emits a node order plus the
//! shortcuts it had to add. [`ChIndex`] splits the resulting overlay into
//! upward and downward adjacency for the bidirectional query.
//!
//! All weights are integer millimetres, so a shortcut's weight is exactly
//! the sum of the base arcs it replaces.

pub mod contraction;
pub mod index;
pub(crate) mod ordering;
pub mod query;
pub mod unpack;
pub mod validate;

use serde::Serialize;

pub use contraction::{BuilderConfig, HierarchyBuilder};
pub use index::{ChArc, ChIndex, ShortcutEdge};
pub use query::{ChQuery, QueryResult};
pub use unpack::{unpack_path, MissingArc};

/// Path length in millimetres.
pub type Weight = u64;

pub const INFINITY: Weight = Weight::MAX;

/// Marks an overlay arc that is an original road segment.
pub const NO_VIA: u32 = u32::MAX;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStats {
    pub nodes: usize,
    pub base_arcs: usize,
    pub shortcuts: usize,
    pub up_arcs: usize,
    pub down_arcs: usize,
    pub witness_limit_hits: u64,
    pub elapsed_ms: u128,
}
