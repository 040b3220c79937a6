// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The indexed, memory-managed graph store.
//!
//! Single logical writer: every `&mut self` entry point must be externally
//! serialized by the owner. Reads are `&self` and may run concurrently with
//! each other; last-access touches go through atomics and the filter cache
//! sits behind its own lock, so reads never observe a torn state.
//!
//! Index invariants:
//! - every edge's endpoints are present in the node set (removal cascades);
//! - the type index exactly reflects each live node's current type tag;
//! - the adjacency index lists every edge under both endpoints.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::annot::{Annotation, SideTable};
use crate::arena::{NodeRef, NodeSlot, SlotArena};
use crate::config::StoreConfig;
use crate::filter::{CacheStats, FilterCache, NodePredicate};
use crate::ident::{EdgeKey, NodeId, Sym};
use crate::intern::InternPool;
use crate::props::{apply_patches, approx_map_bytes, merge_shallow, PropMap, PropPatch};
use crate::record::{EdgeInput, EdgeRecord, NodeInput, NodeRecord};
use crate::snapshot::{GraphSnapshot, SnapshotEdge, SnapshotNode};

/// What a node upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Insert or re-type: secondary indexes changed shape.
    Structural,
    /// Pure data update: only the property bag changed.
    Data,
}

impl UpsertOutcome {
    /// Whether the upsert changed index shape.
    #[must_use]
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Structural)
    }
}

/// Disposition of an edge upsert.
///
/// A missing endpoint is a rejection, not an error: streamed data is
/// expected to occasionally arrive out of dependency order, and the delta
/// processor decides whether to retry or drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeUpsert {
    /// New edge inserted.
    Inserted,
    /// Existing key: weight/properties updated in place.
    Updated,
    /// One or both endpoints absent; nothing was applied.
    MissingEndpoint,
}

impl EdgeUpsert {
    /// Whether the edge reached the store.
    #[must_use]
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::MissingEndpoint)
    }
}

/// Read-only view of a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    /// Stable id.
    pub id: &'a NodeId,
    /// Resolved type tag.
    pub ty: &'a str,
    /// Property bag.
    pub props: &'a PropMap,
    /// Creation time on the store clock (ms).
    pub created_at_ms: u64,
    /// Last access time on the store clock (ms).
    pub last_access_ms: u64,
}

/// Read-only view of an edge.
#[derive(Debug, Clone, Copy)]
pub struct EdgeView<'a> {
    /// Source node id.
    pub src: &'a NodeId,
    /// Target node id.
    pub dst: &'a NodeId,
    /// Resolved type tag.
    pub ty: &'a str,
    /// Edge weight.
    pub weight: f64,
    /// Property bag.
    pub props: &'a PropMap,
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Live nodes.
    pub node_count: usize,
    /// Live edges.
    pub edge_count: usize,
    /// Distinct node types currently indexed.
    pub type_count: usize,
    /// Distinct interned strings.
    pub interned_strings: usize,
    /// Live annotation entries.
    pub annotation_count: usize,
    /// Mutation version (bumps on every committed mutation).
    pub version: u64,
    /// Nodes reclaimed by TTL cleanup over the store's lifetime.
    pub evicted_nodes: u64,
    /// Filter-cache counters.
    pub filter_cache: CacheStats,
    /// Rough estimate of backing bytes (records + indexes + intern pool).
    pub approx_bytes: usize,
}

/// Indexed in-memory graph store.
#[derive(Debug)]
pub struct GraphStore {
    cfg: StoreConfig,
    epoch: Instant,
    now_ms: AtomicU64,
    interner: InternPool,
    arena: SlotArena,
    by_id: FxHashMap<NodeId, NodeRef>,
    by_type: FxHashMap<Sym, BTreeSet<NodeId>>,
    edges: BTreeMap<EdgeKey, EdgeRecord>,
    adjacency: FxHashMap<NodeId, BTreeSet<EdgeKey>>,
    annotations: SideTable,
    filter_cache: Mutex<FilterCache>,
    version: u64,
    bulk_depth: u32,
    bulk_dirty: bool,
    evicted_nodes: u64,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl GraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(cfg: StoreConfig) -> Self {
        let capacity = cfg.filter_cache_capacity;
        Self {
            cfg,
            epoch: Instant::now(),
            now_ms: AtomicU64::new(0),
            interner: InternPool::new(),
            arena: SlotArena::default(),
            by_id: FxHashMap::default(),
            by_type: FxHashMap::default(),
            edges: BTreeMap::new(),
            adjacency: FxHashMap::default(),
            annotations: SideTable::default(),
            filter_cache: Mutex::new(FilterCache::new(capacity)),
            version: 0,
            bulk_depth: 0,
            bulk_dirty: false,
            evicted_nodes: 0,
        }
    }

    /// Advances the store clock; never moves it backwards.
    ///
    /// The owner is expected to call this once per pump/frame so that
    /// last-access touches and TTL math share one logical clock.
    pub fn advance_to(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.now_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// Current store clock in milliseconds.
    #[must_use]
    pub fn clock_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }

    /// Current mutation version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Live node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Live edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The store-owned intern pool (for resolving [`Sym`] handles).
    #[must_use]
    pub fn interner(&self) -> &InternPool {
        &self.interner
    }

    fn bump_version(&mut self) {
        if self.bulk_depth > 0 {
            self.bulk_dirty = true;
        } else {
            self.version += 1;
        }
    }

    /// Inserts or merges a node.
    ///
    /// Unknown id: insert. Known id: shallow-merge the property bag (new
    /// values win, unspecified fields preserved) and adopt the new type
    /// tag. A node update is non-destructive unless the operation is a
    /// full replace (see [`patch_node`](Self::patch_node)).
    pub fn upsert_node(&mut self, input: NodeInput) -> UpsertOutcome {
        let now_ms = self.clock_ms();
        let NodeInput { id, ty, props } = input;
        let sym = self.interner.intern(&ty);
        if let Some(&r) = self.by_id.get(&id) {
            let (retyped, old_ty) = {
                let Some(slot) = self.arena.get_mut(r) else {
                    debug_assert!(false, "node index referenced a missing arena slot: {id}");
                    return UpsertOutcome::Data;
                };
                slot.last_access.store(now_ms, Ordering::Relaxed);
                let old_ty = slot.record.ty;
                slot.record.ty = sym;
                merge_shallow(&mut slot.record.props, props);
                (old_ty != sym, old_ty)
            };
            if retyped {
                let mut emptied = false;
                if let Some(set) = self.by_type.get_mut(&old_ty) {
                    set.remove(&id);
                    emptied = set.is_empty();
                }
                if emptied {
                    self.by_type.remove(&old_ty);
                }
                self.by_type.entry(sym).or_default().insert(id);
            }
            self.bump_version();
            if retyped {
                UpsertOutcome::Structural
            } else {
                UpsertOutcome::Data
            }
        } else {
            let r = self.arena.insert(NodeSlot {
                id: id.clone(),
                record: NodeRecord {
                    ty: sym,
                    props,
                },
                created_at_ms: now_ms,
                last_access: AtomicU64::new(now_ms),
            });
            self.by_id.insert(id.clone(), r);
            self.by_type.entry(sym).or_default().insert(id);
            self.bump_version();
            UpsertOutcome::Structural
        }
    }

    /// Applies a patch list to an existing node's property bag.
    ///
    /// Returns `false` (without touching anything) when the id is unknown;
    /// the caller counts that as a structural drop.
    pub fn patch_node(&mut self, id: &NodeId, patches: &[PropPatch]) -> bool {
        let now_ms = self.clock_ms();
        let Some(&r) = self.by_id.get(id) else {
            return false;
        };
        let Some(slot) = self.arena.get_mut(r) else {
            debug_assert!(false, "node index referenced a missing arena slot: {id}");
            return false;
        };
        slot.last_access.store(now_ms, Ordering::Relaxed);
        apply_patches(&mut slot.record.props, patches);
        self.bump_version();
        true
    }

    /// Removes nodes, cascading removal of all incident edges.
    ///
    /// Returns the number of edges removed as a side effect.
    pub fn remove_nodes(&mut self, ids: &[NodeId]) -> usize {
        let mut edges_removed = 0;
        let mut any = false;
        for id in ids {
            if let Some(n) = self.remove_node_inner(id) {
                edges_removed += n;
                any = true;
            }
        }
        if any {
            self.bump_version();
        }
        edges_removed
    }

    fn remove_node_inner(&mut self, id: &NodeId) -> Option<usize> {
        let r = self.by_id.remove(id)?;
        let Some(slot) = self.arena.remove(r) else {
            debug_assert!(false, "node index referenced a missing arena slot: {id}");
            return None;
        };
        // Explicit removal hook: the side-table entry dies with the node.
        self.annotations.remove_slot(r.slot);
        let mut type_emptied = false;
        if let Some(set) = self.by_type.get_mut(&slot.record.ty) {
            set.remove(id);
            type_emptied = set.is_empty();
        }
        if type_emptied {
            self.by_type.remove(&slot.record.ty);
        }
        let mut removed = 0;
        if let Some(incident) = self.adjacency.remove(id) {
            for key in incident {
                if self.edges.remove(&key).is_some() {
                    removed += 1;
                }
                let other = if key.src == *id { &key.dst } else { &key.src };
                let mut emptied = false;
                if let Some(set) = self.adjacency.get_mut(other) {
                    set.remove(&key);
                    emptied = set.is_empty();
                }
                if emptied {
                    self.adjacency.remove(other);
                }
            }
        }
        Some(removed)
    }

    /// Inserts or updates an edge keyed `(source, target, type)`.
    ///
    /// Rejected (not an error) when either endpoint is absent.
    pub fn upsert_edge(&mut self, input: EdgeInput) -> EdgeUpsert {
        let EdgeInput {
            src,
            dst,
            ty,
            weight,
            props,
        } = input;
        if !self.by_id.contains_key(&src) || !self.by_id.contains_key(&dst) {
            tracing::debug!(%src, %dst, %ty, "edge rejected: missing endpoint");
            return EdgeUpsert::MissingEndpoint;
        }
        let sym = self.interner.intern(&ty);
        let key = EdgeKey { src, dst, ty: sym };
        let outcome = match self.edges.entry(key.clone()) {
            std::collections::btree_map::Entry::Occupied(mut e) => {
                let record = e.get_mut();
                record.weight = weight;
                merge_shallow(&mut record.props, props);
                EdgeUpsert::Updated
            }
            std::collections::btree_map::Entry::Vacant(v) => {
                v.insert(EdgeRecord { weight, props });
                EdgeUpsert::Inserted
            }
        };
        if matches!(outcome, EdgeUpsert::Inserted) {
            self.adjacency
                .entry(key.src.clone())
                .or_default()
                .insert(key.clone());
            self.adjacency.entry(key.dst.clone()).or_default().insert(key);
        }
        self.bump_version();
        outcome
    }

    /// Updates weight and/or properties of an existing edge.
    ///
    /// Returns `false` when the edge is unknown.
    pub fn patch_edge(
        &mut self,
        src: &NodeId,
        dst: &NodeId,
        ty: &str,
        weight: Option<f64>,
        patches: &[PropPatch],
    ) -> bool {
        let Some(sym) = self.interner.get(ty) else {
            return false;
        };
        let key = EdgeKey {
            src: src.clone(),
            dst: dst.clone(),
            ty: sym,
        };
        let Some(record) = self.edges.get_mut(&key) else {
            return false;
        };
        if let Some(w) = weight {
            record.weight = w;
        }
        apply_patches(&mut record.props, patches);
        self.bump_version();
        true
    }

    /// Removes a single edge. Returns whether it existed.
    pub fn remove_edge(&mut self, src: &NodeId, dst: &NodeId, ty: &str) -> bool {
        let Some(sym) = self.interner.get(ty) else {
            return false;
        };
        let key = EdgeKey {
            src: src.clone(),
            dst: dst.clone(),
            ty: sym,
        };
        if self.edges.remove(&key).is_none() {
            return false;
        }
        for endpoint in [key.src.clone(), key.dst.clone()] {
            let mut emptied = false;
            if let Some(set) = self.adjacency.get_mut(&endpoint) {
                set.remove(&key);
                emptied = set.is_empty();
            }
            if emptied {
                self.adjacency.remove(&endpoint);
            }
        }
        self.bump_version();
        true
    }

    /// Removes a batch of edges; returns how many existed.
    pub fn remove_edges<I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = (NodeId, NodeId, String)>,
    {
        keys.into_iter()
            .filter(|(src, dst, ty)| self.remove_edge(src, dst, ty))
            .count()
    }

    /// Whether a node id is present (does not count as an access).
    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Looks up a node and touches its last-access time.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<NodeView<'_>> {
        let r = *self.by_id.get(id)?;
        let slot = self.arena.get(r)?;
        let now_ms = self.clock_ms();
        slot.last_access.store(now_ms, Ordering::Relaxed);
        Some(NodeView {
            id: &slot.id,
            ty: self.interner.resolve(slot.record.ty),
            props: &slot.record.props,
            created_at_ms: slot.created_at_ms,
            last_access_ms: now_ms,
        })
    }

    /// Generational reference for the annotation side-table.
    #[must_use]
    pub fn node_ref(&self, id: &NodeId) -> Option<NodeRef> {
        self.by_id.get(id).copied()
    }

    /// All node ids of a type, via the type index.
    pub fn query_by_type<'a>(&'a self, ty: &str) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.interner
            .get(ty)
            .and_then(|sym| self.by_type.get(&sym))
            .into_iter()
            .flatten()
    }

    /// All edges incident to a node, via the adjacency index.
    pub fn edges_of<'a>(&'a self, id: &NodeId) -> impl Iterator<Item = EdgeView<'a>> + 'a {
        self.adjacency
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(move |key| self.edge_view_for(key))
    }

    /// Looks up a single edge.
    #[must_use]
    pub fn edge(&self, src: &NodeId, dst: &NodeId, ty: &str) -> Option<EdgeView<'_>> {
        let sym = self.interner.get(ty)?;
        let key = EdgeKey {
            src: src.clone(),
            dst: dst.clone(),
            ty: sym,
        };
        let (key_ref, record) = self.edges.get_key_value(&key)?;
        Some(EdgeView {
            src: &key_ref.src,
            dst: &key_ref.dst,
            ty: self.interner.resolve(key_ref.ty),
            weight: record.weight,
            props: &record.props,
        })
    }

    fn edge_view_for<'a>(&'a self, key: &'a EdgeKey) -> Option<EdgeView<'a>> {
        let record = self.edges.get(key)?;
        Some(EdgeView {
            src: &key.src,
            dst: &key.dst,
            ty: self.interner.resolve(key.ty),
            weight: record.weight,
            props: &record.props,
        })
    }

    /// Runs a predicate over all live nodes, memoizing the result.
    ///
    /// The memo key includes the store version, so any committed mutation
    /// invalidates every cached result. Mid-bulk queries compute without
    /// caching (the version is frozen until the bulk commits).
    pub fn filter(&self, pred: &dyn NodePredicate) -> Arc<[NodeId]> {
        let cacheable = self.bulk_depth == 0 && !self.bulk_dirty;
        if cacheable {
            if let Some(hit) = self.filter_cache.lock().get(pred.cache_key(), self.version) {
                return hit;
            }
        }
        let mut ids: Vec<NodeId> = Vec::new();
        for (_r, slot) in self.arena.iter() {
            let view = NodeView {
                id: &slot.id,
                ty: self.interner.resolve(slot.record.ty),
                props: &slot.record.props,
                created_at_ms: slot.created_at_ms,
                last_access_ms: slot.last_access.load(Ordering::Relaxed),
            };
            if pred.matches(&view) {
                ids.push(slot.id.clone());
            }
        }
        ids.sort_unstable();
        let shared: Arc<[NodeId]> = ids.into();
        if cacheable {
            self.filter_cache.lock().insert(
                pred.cache_key().to_owned(),
                self.version,
                Arc::clone(&shared),
            );
        }
        shared
    }

    /// Attaches render-only data to a live node.
    ///
    /// Returns `false` when the reference is stale. While present, the
    /// annotation counts as an external hold for TTL eviction.
    pub fn set_annotation(&mut self, r: NodeRef, value: Annotation) -> bool {
        if self.arena.get(r).is_none() {
            return false;
        }
        self.annotations.set(r, value);
        true
    }

    /// Reads an annotation; stale or destroyed nodes resolve to `None`.
    #[must_use]
    pub fn annotation(&self, r: NodeRef) -> Option<&Annotation> {
        self.annotations.get(r)
    }

    /// Removes an annotation through a still-valid reference.
    pub fn clear_annotation(&mut self, r: NodeRef) -> bool {
        self.annotations.clear(r)
    }

    /// Runs `f` as a bulk operation: cleanup is paused and the mutation
    /// version is bumped once at the end instead of per item.
    pub fn bulk<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.bulk_depth += 1;
        let out = f(self);
        self.bulk_depth -= 1;
        if self.bulk_depth == 0 && self.bulk_dirty {
            self.bulk_dirty = false;
            self.version += 1;
        }
        out
    }

    /// Bulk node upsert with amortized index/cache work.
    pub fn upsert_nodes_bulk(&mut self, batch: Vec<NodeInput>) -> usize {
        let n = batch.len();
        self.by_id.reserve(n);
        self.bulk(|s| {
            for input in batch {
                s.upsert_node(input);
            }
        });
        n
    }

    /// Bulk edge upsert; returns how many were applied.
    pub fn upsert_edges_bulk(&mut self, batch: Vec<EdgeInput>) -> usize {
        self.bulk(|s| {
            batch
                .into_iter()
                .map(|input| s.upsert_edge(input))
                .filter(|outcome| outcome.is_applied())
                .count()
        })
    }

    /// Evicts nodes whose last access is older than the TTL and which hold
    /// no annotation. Skipped while a bulk operation is in flight.
    ///
    /// Returns the number of nodes reclaimed.
    pub fn run_cleanup(&mut self, now: Instant) -> usize {
        self.advance_to(now);
        if self.bulk_depth > 0 {
            tracing::debug!("cleanup deferred: bulk operation in flight");
            return 0;
        }
        let now_ms = self.clock_ms();
        let ttl_ms = u64::try_from(self.cfg.ttl.as_millis()).unwrap_or(u64::MAX);
        let mut stale: Vec<NodeId> = Vec::new();
        for (r, slot) in self.arena.iter() {
            let last = slot.last_access.load(Ordering::Relaxed);
            if now_ms.saturating_sub(last) > ttl_ms && !self.annotations.holds(r.slot) {
                stale.push(slot.id.clone());
            }
        }
        if stale.is_empty() {
            return 0;
        }
        let count = stale.len();
        self.remove_nodes(&stale);
        self.evicted_nodes += count as u64;
        tracing::debug!(count, "evicted stale nodes");
        count
    }

    /// Replaces the store's contents wholesale (resync path).
    ///
    /// All-or-nothing: the replacement is built off to the side and swapped
    /// in, so the live store is never observed half-loaded. Edges whose
    /// endpoints are missing from the snapshot are dropped.
    pub fn replace_contents(&mut self, nodes: Vec<NodeInput>, edges: Vec<EdgeInput>) {
        let mut fresh = GraphStore::new(self.cfg.clone());
        fresh.epoch = self.epoch;
        fresh.now_ms = AtomicU64::new(self.clock_ms());
        fresh.evicted_nodes = self.evicted_nodes;
        fresh.bulk(|s| {
            for node in nodes {
                s.upsert_node(node);
            }
            for edge in edges {
                s.upsert_edge(edge);
            }
        });
        fresh.version = self.version + 1;
        *self = fresh;
    }

    /// Immutable, canonically ordered copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .arena
            .iter()
            .map(|(_, slot)| SnapshotNode {
                id: slot.id.clone(),
                ty: self.interner.resolve(slot.record.ty).to_owned(),
                props: slot.record.props.clone(),
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|(key, record)| SnapshotEdge {
                src: key.src.clone(),
                dst: key.dst.clone(),
                ty: self.interner.resolve(key.ty).to_owned(),
                weight: record.weight,
                props: record.props.clone(),
            })
            .collect();
        GraphSnapshot::new(self.version, nodes, edges)
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            node_count: self.arena.len(),
            edge_count: self.edges.len(),
            type_count: self.by_type.len(),
            interned_strings: self.interner.len(),
            annotation_count: self.annotations.len(),
            version: self.version,
            evicted_nodes: self.evicted_nodes,
            filter_cache: self.filter_cache.lock().stats(),
            approx_bytes: self.approx_bytes(),
        }
    }

    fn approx_bytes(&self) -> usize {
        let node_bytes: usize = self
            .arena
            .iter()
            .map(|(_, s)| s.id.as_str().len() + approx_map_bytes(&s.record.props) + 64)
            .sum();
        let edge_bytes: usize = self
            .edges
            .iter()
            .map(|(k, r)| {
                k.src.as_str().len() + k.dst.as_str().len() + approx_map_bytes(&r.props) + 80
            })
            .sum();
        node_bytes + edge_bytes + self.interner.approx_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct TypeIs(&'static str, String);

    impl TypeIs {
        fn new(ty: &'static str) -> Self {
            Self(ty, format!("type-is:{ty}"))
        }
    }

    impl NodePredicate for TypeIs {
        fn cache_key(&self) -> &str {
            &self.1
        }
        fn matches(&self, node: &NodeView<'_>) -> bool {
            node.ty == self.0
        }
    }

    fn props(pairs: &[(&str, f64)]) -> PropMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), crate::PropValue::Num(*v)))
            .collect()
    }

    #[test]
    fn upsert_merges_and_preserves_unspecified_fields() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "server").with_props(props(&[("cpu", 1.0)])));
        let outcome =
            store.upsert_node(NodeInput::new("a", "server").with_props(props(&[("mem", 2.0)])));
        assert_eq!(outcome, UpsertOutcome::Data);
        let view = store.node(&NodeId::from("a")).map(|v| v.props.clone());
        let bag = view.unwrap_or_default();
        assert_eq!(bag.len(), 2);
        assert!(bag.contains_key("cpu") && bag.contains_key("mem"));
    }

    #[test]
    fn retype_is_structural_and_moves_type_index() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "server"));
        let outcome = store.upsert_node(NodeInput::new("a", "client"));
        assert_eq!(outcome, UpsertOutcome::Structural);
        assert_eq!(store.query_by_type("server").count(), 0);
        assert_eq!(store.query_by_type("client").count(), 1);
    }

    #[test]
    fn node_removal_cascades_incident_edges() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "n"));
        store.upsert_node(NodeInput::new("b", "n"));
        assert!(store.upsert_edge(EdgeInput::new("a", "b", "link")).is_applied());
        let removed = store.remove_nodes(&[NodeId::from("a")]);
        assert_eq!(removed, 1);
        assert_eq!(store.node_count(), 1);
        assert_eq!(store.edge_count(), 0);
        assert!(store.contains_node(&NodeId::from("b")));
        assert_eq!(store.edges_of(&NodeId::from("b")).count(), 0);
    }

    #[test]
    fn edge_with_missing_endpoint_is_rejected_not_applied() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "n"));
        let outcome = store.upsert_edge(EdgeInput::new("a", "ghost", "link"));
        assert_eq!(outcome, EdgeUpsert::MissingEndpoint);
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn duplicate_edge_key_updates_in_place() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "n"));
        store.upsert_node(NodeInput::new("b", "n"));
        store.upsert_edge(EdgeInput::new("a", "b", "link").with_weight(1.0));
        let outcome = store.upsert_edge(EdgeInput::new("a", "b", "link").with_weight(7.0));
        assert_eq!(outcome, EdgeUpsert::Updated);
        assert_eq!(store.edge_count(), 1);
        let weight = store
            .edge(&NodeId::from("a"), &NodeId::from("b"), "link")
            .map(|e| e.weight);
        assert_eq!(weight, Some(7.0));
    }

    #[test]
    fn filter_is_cached_until_a_mutation() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "server"));
        store.upsert_node(NodeInput::new("b", "client"));
        let pred = TypeIs::new("server");
        let first = store.filter(&pred);
        let second = store.filter(&pred);
        assert_eq!(first, second);
        let stats = store.stats().filter_cache;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        store.upsert_node(NodeInput::new("c", "server"));
        let third = store.filter(&pred);
        assert_eq!(third.len(), 2);
        assert_eq!(store.stats().filter_cache.misses, 2);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn annotations_die_with_their_node() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "n"));
        let r = store.node_ref(&NodeId::from("a")).unwrap();
        assert!(store.set_annotation(r, Annotation::at(10.0, 20.0)));
        assert!(store.annotation(r).is_some());
        store.remove_nodes(&[NodeId::from("a")]);
        assert!(store.annotation(r).is_none());
        // A recycled slot must not resurrect the stale reference.
        store.upsert_node(NodeInput::new("b", "n"));
        assert!(store.annotation(r).is_none());
        assert!(!store.set_annotation(r, Annotation::default()));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn cleanup_evicts_stale_unannotated_nodes() {
        let mut store = GraphStore::new(StoreConfig {
            ttl: Duration::from_millis(100),
            ..StoreConfig::default()
        });
        let t0 = Instant::now();
        store.advance_to(t0);
        store.upsert_node(NodeInput::new("stale", "n"));
        store.upsert_node(NodeInput::new("fresh", "n"));
        store.upsert_node(NodeInput::new("held", "n"));
        let held = store.node_ref(&NodeId::from("held")).unwrap();
        assert!(store.set_annotation(held, Annotation::default()));

        // `fresh` is touched just before the boundary.
        store.advance_to(t0 + Duration::from_millis(90));
        assert!(store.node(&NodeId::from("fresh")).is_some());

        let reclaimed = store.run_cleanup(t0 + Duration::from_millis(150));
        assert_eq!(reclaimed, 1);
        assert!(!store.contains_node(&NodeId::from("stale")));
        assert!(store.contains_node(&NodeId::from("fresh")));
        assert!(store.contains_node(&NodeId::from("held")));
        assert_eq!(store.stats().evicted_nodes, 1);
    }

    #[test]
    fn cleanup_is_deferred_during_bulk() {
        let mut store = GraphStore::new(StoreConfig {
            ttl: Duration::from_millis(10),
            ..StoreConfig::default()
        });
        let t0 = Instant::now();
        store.advance_to(t0);
        store.upsert_node(NodeInput::new("a", "n"));
        let reclaimed = store.bulk(|s| s.run_cleanup(t0 + Duration::from_secs(60)));
        assert_eq!(reclaimed, 0);
        assert!(store.contains_node(&NodeId::from("a")));
    }

    #[test]
    fn bulk_bumps_version_once() {
        let mut store = GraphStore::default();
        let before = store.version();
        store.upsert_nodes_bulk(vec![
            NodeInput::new("a", "n"),
            NodeInput::new("b", "n"),
            NodeInput::new("c", "n"),
        ]);
        assert_eq!(store.version(), before + 1);
    }

    #[test]
    fn replace_contents_is_wholesale() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("old", "n"));
        store.replace_contents(
            vec![NodeInput::new("a", "n"), NodeInput::new("b", "n")],
            vec![
                EdgeInput::new("a", "b", "link"),
                EdgeInput::new("a", "ghost", "link"),
            ],
        );
        assert!(!store.contains_node(&NodeId::from("old")));
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn self_loop_cascade_removes_cleanly() {
        let mut store = GraphStore::default();
        store.upsert_node(NodeInput::new("a", "n"));
        store.upsert_edge(EdgeInput::new("a", "a", "loop"));
        let removed = store.remove_nodes(&[NodeId::from("a")]);
        assert_eq!(removed, 1);
        assert_eq!(store.edge_count(), 0);
        assert_eq!(store.node_count(), 0);
    }
}
