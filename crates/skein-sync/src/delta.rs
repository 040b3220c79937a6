// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta processing: minimal diffs between snapshots and ordered
//! application of operation batches to the store.
//!
//! Application is validate-first: a delta that fails its internal
//! consistency check is rejected wholesale, so the store never holds a
//! half-applied malformed delta. Structural misses (an edge ahead of its
//! endpoints, an update on an id that never arrived) are not errors —
//! edge/update ops get one retry pass after the rest of the batch has
//! landed, and whatever still misses is dropped and counted.

use std::collections::BTreeMap;
use std::slice;

use skein_graph::{
    EdgeInput, GraphSnapshot, GraphStore, NodeId, NodeInput, PropMap, PropPatch,
};
use skein_proto::{Delta, DeltaError, DeltaOp};

/// Outcome counters for one applied batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations that reached the store.
    pub applied: usize,
    /// Operations dropped after the retry pass (missing dependency).
    pub dropped: usize,
}

impl ApplyReport {
    /// Merges another report into this one.
    pub fn absorb(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.dropped += other.dropped;
    }
}

enum OpOutcome {
    Applied,
    MissingDependency,
}

/// Applies a full delta: validates first, then applies in list order.
pub fn apply(store: &mut GraphStore, delta: &Delta) -> Result<ApplyReport, DeltaError> {
    delta.validate()?;
    Ok(apply_ops(store, &delta.ops))
}

/// Applies a pre-validated (or batcher-coalesced) op list in order.
pub fn apply_ops(store: &mut GraphStore, ops: &[DeltaOp]) -> ApplyReport {
    let mut report = ApplyReport::default();
    let mut retry: Vec<&DeltaOp> = Vec::new();
    for op in ops {
        match apply_one(store, op) {
            OpOutcome::Applied => report.applied += 1,
            OpOutcome::MissingDependency => retry.push(op),
        }
    }
    for op in retry {
        match apply_one(store, op) {
            OpOutcome::Applied => report.applied += 1,
            OpOutcome::MissingDependency => {
                tracing::debug!(?op, "dropping op with missing dependency");
                report.dropped += 1;
            }
        }
    }
    report
}

fn apply_one(store: &mut GraphStore, op: &DeltaOp) -> OpOutcome {
    match op {
        DeltaOp::AddNode(input) => {
            store.upsert_node(input.clone());
            OpOutcome::Applied
        }
        DeltaOp::UpdateNode { id, patches } => {
            if store.patch_node(id, patches) {
                OpOutcome::Applied
            } else {
                OpOutcome::MissingDependency
            }
        }
        DeltaOp::RemoveNode { id } => {
            // Removing an id that is already gone is idempotent, not a drop.
            store.remove_nodes(slice::from_ref(id));
            OpOutcome::Applied
        }
        DeltaOp::AddEdge(input) => {
            if store.upsert_edge(input.clone()).is_applied() {
                OpOutcome::Applied
            } else {
                OpOutcome::MissingDependency
            }
        }
        DeltaOp::UpdateEdge {
            src,
            dst,
            ty,
            weight,
            patches,
        } => {
            if store.patch_edge(src, dst, ty, *weight, patches) {
                OpOutcome::Applied
            } else {
                OpOutcome::MissingDependency
            }
        }
        DeltaOp::RemoveEdge { src, dst, ty } => {
            store.remove_edge(src, dst, ty);
            OpOutcome::Applied
        }
    }
}

/// Computes a minimal op list taking `old` to `new`.
///
/// Removals come first (node removals cascade, so edges that die with an
/// endpoint are not re-stated), then node adds/updates, then edge work —
/// the produced list is always dependency-ordered.
#[must_use]
pub fn diff(old: &GraphSnapshot, new: &GraphSnapshot) -> Vec<DeltaOp> {
    let mut ops = Vec::new();

    let old_nodes: BTreeMap<&NodeId, &skein_graph::SnapshotNode> =
        old.nodes().iter().map(|n| (&n.id, n)).collect();
    let new_nodes: BTreeMap<&NodeId, &skein_graph::SnapshotNode> =
        new.nodes().iter().map(|n| (&n.id, n)).collect();

    for id in old_nodes.keys() {
        if !new_nodes.contains_key(*id) {
            ops.push(DeltaOp::RemoveNode { id: (*id).clone() });
        }
    }

    for (id, n) in &new_nodes {
        match old_nodes.get(*id) {
            None => {
                ops.push(DeltaOp::AddNode(NodeInput {
                    id: n.id.clone(),
                    ty: n.ty.clone(),
                    props: n.props.clone(),
                }));
            }
            Some(o) => {
                let retyped = o.ty != n.ty;
                let fields_removed = o.props.keys().any(|k| !n.props.contains_key(k));
                if retyped {
                    // Upsert re-types in place; a replace patch follows only
                    // when the new bag dropped fields the merge would keep.
                    ops.push(DeltaOp::AddNode(NodeInput {
                        id: n.id.clone(),
                        ty: n.ty.clone(),
                        props: if fields_removed {
                            PropMap::new()
                        } else {
                            changed_fields(&o.props, &n.props)
                        },
                    }));
                    if fields_removed {
                        ops.push(DeltaOp::UpdateNode {
                            id: n.id.clone(),
                            patches: vec![PropPatch::Replace(n.props.clone())],
                        });
                    }
                } else if fields_removed {
                    ops.push(DeltaOp::UpdateNode {
                        id: n.id.clone(),
                        patches: vec![PropPatch::Replace(n.props.clone())],
                    });
                } else if o.props != n.props {
                    ops.push(DeltaOp::UpdateNode {
                        id: n.id.clone(),
                        patches: vec![PropPatch::Merge(changed_fields(&o.props, &n.props))],
                    });
                }
            }
        }
    }

    let removed_nodes: Vec<&NodeId> = old_nodes
        .keys()
        .filter(|id| !new_nodes.contains_key(**id))
        .copied()
        .collect();

    let edge_identity =
        |e: &skein_graph::SnapshotEdge| (e.src.clone(), e.dst.clone(), e.ty.clone());
    let old_edges: BTreeMap<_, &skein_graph::SnapshotEdge> =
        old.edges().iter().map(|e| (edge_identity(e), e)).collect();
    let new_edges: BTreeMap<_, &skein_graph::SnapshotEdge> =
        new.edges().iter().map(|e| (edge_identity(e), e)).collect();

    for (key, e) in &old_edges {
        if new_edges.contains_key(key) {
            continue;
        }
        // Cascade already covers edges losing an endpoint.
        if removed_nodes.contains(&&e.src) || removed_nodes.contains(&&e.dst) {
            continue;
        }
        ops.push(DeltaOp::RemoveEdge {
            src: e.src.clone(),
            dst: e.dst.clone(),
            ty: e.ty.clone(),
        });
    }

    for (key, e) in &new_edges {
        match old_edges.get(key) {
            None => {
                ops.push(DeltaOp::AddEdge(EdgeInput {
                    src: e.src.clone(),
                    dst: e.dst.clone(),
                    ty: e.ty.clone(),
                    weight: e.weight,
                    props: e.props.clone(),
                }));
            }
            Some(o) => {
                let weight_changed = o.weight != e.weight;
                let fields_removed = o.props.keys().any(|k| !e.props.contains_key(k));
                let props_changed = o.props != e.props;
                if !weight_changed && !props_changed {
                    continue;
                }
                let patches = if fields_removed {
                    vec![PropPatch::Replace(e.props.clone())]
                } else if props_changed {
                    vec![PropPatch::Merge(changed_fields(&o.props, &e.props))]
                } else {
                    Vec::new()
                };
                ops.push(DeltaOp::UpdateEdge {
                    src: e.src.clone(),
                    dst: e.dst.clone(),
                    ty: e.ty.clone(),
                    weight: weight_changed.then_some(e.weight),
                    patches,
                });
            }
        }
    }

    ops
}

fn changed_fields(old: &PropMap, new: &PropMap) -> PropMap {
    let mut out = PropMap::new();
    for (k, v) in new {
        if old.get(k) != Some(v) {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

/// Convenience: applies `ops` produced by [`diff`] and checks nothing had
/// to be dropped (diffs are dependency-ordered by construction).
pub fn apply_diff(store: &mut GraphStore, ops: &[DeltaOp]) -> ApplyReport {
    let report = apply_ops(store, ops);
    debug_assert_eq!(report.dropped, 0, "diff produced a dangling dependency");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_graph::PropValue;

    fn seeded_store(nodes: &[(&str, &str)], edges: &[(&str, &str, &str)]) -> GraphStore {
        let mut store = GraphStore::default();
        for (id, ty) in nodes {
            store.upsert_node(NodeInput::new(*id, *ty));
        }
        for (src, dst, ty) in edges {
            store.upsert_edge(EdgeInput::new(*src, *dst, *ty));
        }
        store
    }

    #[test]
    fn diff_then_apply_reproduces_target_state() {
        let old = seeded_store(&[("a", "n"), ("b", "n")], &[("a", "b", "link")]).snapshot();

        let mut target = seeded_store(&[("b", "n"), ("c", "m")], &[("b", "c", "link")]);
        target.patch_node(
            &NodeId::from("c"),
            &[PropPatch::Merge(
                [("x".to_owned(), PropValue::Num(5.0))].into_iter().collect(),
            )],
        );
        let new = target.snapshot();

        let ops = diff(&old, &new);
        let mut store = seeded_store(&[("a", "n"), ("b", "n")], &[("a", "b", "link")]);
        let report = apply_diff(&mut store, &ops);
        assert_eq!(report.dropped, 0);
        assert_eq!(store.snapshot().state_hash(), new.state_hash());
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let snap = seeded_store(&[("a", "n")], &[]).snapshot();
        assert!(diff(&snap, &snap).is_empty());
    }

    #[test]
    fn diff_emits_field_level_merge_for_added_fields() {
        let old = seeded_store(&[("a", "n")], &[]).snapshot();
        let mut store = seeded_store(&[("a", "n")], &[]);
        store.patch_node(
            &NodeId::from("a"),
            &[PropPatch::Merge(
                [("x".to_owned(), PropValue::Num(1.0))].into_iter().collect(),
            )],
        );
        let ops = diff(&old, &store.snapshot());
        assert_eq!(ops.len(), 1);
        assert!(matches!(
            &ops[0],
            DeltaOp::UpdateNode { patches, .. }
                if matches!(&patches[..], [PropPatch::Merge(m)] if m.len() == 1)
        ));
    }

    #[test]
    fn edge_ahead_of_endpoint_lands_on_retry_pass() {
        let mut store = GraphStore::default();
        let ops = vec![
            DeltaOp::AddEdge(EdgeInput::new("a", "b", "link")),
            DeltaOp::AddNode(NodeInput::new("a", "n")),
            DeltaOp::AddNode(NodeInput::new("b", "n")),
        ];
        let report = apply_ops(&mut store, &ops);
        assert_eq!(report.dropped, 0);
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn update_on_missing_id_is_dropped_and_counted() {
        let mut store = GraphStore::default();
        let report = apply_ops(
            &mut store,
            &[DeltaOp::UpdateNode {
                id: NodeId::from("ghost"),
                patches: Vec::new(),
            }],
        );
        assert_eq!(report.applied, 0);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn malformed_delta_is_rejected_before_touching_the_store() {
        let mut store = seeded_store(&[("a", "n")], &[]);
        let before = store.snapshot().state_hash();
        let delta = Delta {
            sequence: 1,
            timestamp_ms: 0,
            ops: vec![
                DeltaOp::AddNode(NodeInput::new("b", "n")),
                DeltaOp::RemoveNode {
                    id: NodeId::from("a"),
                },
                DeltaOp::UpdateNode {
                    id: NodeId::from("a"),
                    patches: Vec::new(),
                },
            ],
        };
        assert!(apply(&mut store, &delta).is_err());
        assert_eq!(store.snapshot().state_hash(), before);
    }
}
