// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable store snapshots for the rendering surface.
//!
//! A snapshot is a copy-on-read view: the renderer owns it outright and
//! never holds a live reference into the store across a mutation boundary.
//! Ordering is canonical (nodes ascending by id, edges by `(src, dst, ty)`)
//! so equal graph states produce byte-identical canonical encodings and
//! therefore equal state hashes.

use ciborium::ser::into_writer;
use serde::{Deserialize, Serialize};

use crate::ident::NodeId;
use crate::props::PropMap;

/// Node entry in a snapshot; type tags are resolved back to strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    /// Stable id.
    pub id: NodeId,
    /// Type tag.
    pub ty: String,
    /// Property bag.
    pub props: PropMap,
}

/// Edge entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEdge {
    /// Source node id.
    pub src: NodeId,
    /// Target node id.
    pub dst: NodeId,
    /// Type tag.
    pub ty: String,
    /// Edge weight.
    pub weight: f64,
    /// Property bag.
    pub props: PropMap,
}

/// Immutable, canonically ordered copy of a store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    version: u64,
    nodes: Vec<SnapshotNode>,
    edges: Vec<SnapshotEdge>,
}

impl GraphSnapshot {
    pub(crate) fn new(
        version: u64,
        mut nodes: Vec<SnapshotNode>,
        mut edges: Vec<SnapshotEdge>,
    ) -> Self {
        nodes.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        edges.sort_unstable_by(|a, b| {
            (&a.src, &a.dst, &a.ty).cmp(&(&b.src, &b.dst, &b.ty))
        });
        Self {
            version,
            nodes,
            edges,
        }
    }

    /// Store mutation version this snapshot was taken at.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Nodes in canonical order.
    #[must_use]
    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Edges in canonical order.
    #[must_use]
    pub fn edges(&self) -> &[SnapshotEdge] {
        &self.edges
    }

    /// Node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Edge count.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the snapshot holds no nodes and no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Canonical CBOR encoding of the graph content (version excluded, so
    /// equal states hash equal regardless of how many mutations built them).
    #[must_use]
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        if into_writer(&(&self.nodes, &self.edges), &mut bytes).is_err() {
            debug_assert!(false, "canonical snapshot encoding cannot fail");
            bytes.clear();
        }
        bytes
    }

    /// BLAKE3 hash of the canonical form.
    #[must_use]
    pub fn state_hash(&self) -> [u8; 32] {
        *blake3::hash(&self.to_canonical_bytes()).as_bytes()
    }
}
