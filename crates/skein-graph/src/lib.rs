// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! skein-graph: indexed in-memory graph store for the skein state core.
//!
//! Owns the canonical node/edge records behind a rendering surface and
//! keeps type and adjacency indexes in lock-step with them. Memory is
//! bounded by a string intern pool, an LRU filter-result cache, and
//! TTL-based eviction of stale, unreferenced records. Render-only data
//! rides in a non-owning side-table keyed by generational references.

mod annot;
mod arena;
mod config;
mod filter;
mod ident;
mod intern;
pub mod props;
mod record;
mod snapshot;
mod store;

/// Render-only annotation payload for the side-table.
pub use annot::Annotation;
/// Generational node reference used by the annotation side-table.
pub use arena::NodeRef;
/// Store configuration and its validation error.
pub use config::{ConfigError, StoreConfig};
/// Predicate trait and cache counters for memoized filter queries.
pub use filter::{CacheStats, NodePredicate};
/// Identifier types.
pub use ident::{EdgeKey, NodeId, Sym};
/// String interning pool.
pub use intern::InternPool;
/// Property bag value kinds and patch type.
pub use props::{PropMap, PropPatch, PropValue};
/// Canonical records and wire-facing inputs.
pub use record::{EdgeInput, EdgeRecord, NodeInput, NodeRecord};
/// Immutable snapshots handed to the rendering surface.
pub use snapshot::{GraphSnapshot, SnapshotEdge, SnapshotNode};
/// The store itself plus its views, outcomes, and counters.
pub use store::{EdgeUpsert, EdgeView, GraphStore, NodeView, StoreStats, UpsertOutcome};
