// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for skein sync streams.
//!
//! A server streams [`Delta`] frames at the client: ordered operation
//! batches carrying monotonically increasing sequence numbers. Gaps,
//! duplicates, and reordering are the client's problem (see
//! `skein-sync`); this crate defines the shapes, the intra-delta
//! consistency check, and a deterministic binary framing.

pub use skein_graph::{EdgeInput, NodeId, NodeInput, PropMap, PropPatch, PropValue};

use serde::{Deserialize, Serialize};

mod validate;
pub mod wire;

pub use validate::DeltaError;

/// Where an operation originated, for conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Issued by the local UI; optimistic until acknowledged.
    Local,
    /// Streamed from the server.
    Remote,
}

/// Entity addressed by an operation.
///
/// Node operations key on the node id; edge operations on the full
/// `(source, target, type)` identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKey {
    /// A node, by id.
    Node(NodeId),
    /// An edge, by identity.
    Edge {
        /// Source node id.
        src: NodeId,
        /// Target node id.
        dst: NodeId,
        /// Type tag.
        ty: String,
    },
}

/// One operation inside a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaOp {
    /// Insert or merge a node.
    AddNode(NodeInput),
    /// Patch an existing node's property bag.
    UpdateNode {
        /// Target node id.
        id: NodeId,
        /// Patches, applied in order.
        patches: Vec<PropPatch>,
    },
    /// Remove a node (incident edges removed implicitly).
    RemoveNode {
        /// Target node id.
        id: NodeId,
    },
    /// Insert or update an edge.
    AddEdge(EdgeInput),
    /// Patch an existing edge.
    UpdateEdge {
        /// Source node id.
        src: NodeId,
        /// Target node id.
        dst: NodeId,
        /// Type tag.
        ty: String,
        /// New weight, when present.
        weight: Option<f64>,
        /// Patches, applied in order.
        patches: Vec<PropPatch>,
    },
    /// Remove an edge.
    RemoveEdge {
        /// Source node id.
        src: NodeId,
        /// Target node id.
        dst: NodeId,
        /// Type tag.
        ty: String,
    },
}

impl DeltaOp {
    /// The entity this operation addresses.
    #[must_use]
    pub fn entity(&self) -> EntityKey {
        match self {
            Self::AddNode(n) => EntityKey::Node(n.id.clone()),
            Self::UpdateNode { id, .. } | Self::RemoveNode { id } => EntityKey::Node(id.clone()),
            Self::AddEdge(e) => EntityKey::Edge {
                src: e.src.clone(),
                dst: e.dst.clone(),
                ty: e.ty.clone(),
            },
            Self::UpdateEdge { src, dst, ty, .. } | Self::RemoveEdge { src, dst, ty } => {
                EntityKey::Edge {
                    src: src.clone(),
                    dst: dst.clone(),
                    ty: ty.clone(),
                }
            }
        }
    }

    /// Whether this is a remove (node or edge).
    #[must_use]
    pub fn is_remove(&self) -> bool {
        matches!(self, Self::RemoveNode { .. } | Self::RemoveEdge { .. })
    }

    /// Whether this is an update (node or edge).
    #[must_use]
    pub fn is_update(&self) -> bool {
        matches!(self, Self::UpdateNode { .. } | Self::UpdateEdge { .. })
    }
}

/// Ordered operation batch with a stream sequence number.
///
/// Sequence numbers increase by exactly one per delta on a healthy
/// stream; the timestamp is the server's send time and is what
/// last-writer-wins conflict resolution compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Stream sequence number.
    pub sequence: u64,
    /// Server timestamp (milliseconds).
    pub timestamp_ms: u64,
    /// Operations, applied in list order.
    pub ops: Vec<DeltaOp>,
}

/// Request for a full state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncRequest {
    /// Last sequence the client applied, `None` on first connect.
    pub since: Option<u64>,
}

/// Full state snapshot response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncResponse {
    /// Every node in the authoritative state.
    pub nodes: Vec<NodeInput>,
    /// Every edge in the authoritative state.
    pub edges: Vec<EdgeInput>,
    /// Sequence number the snapshot corresponds to.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_keys_distinguish_nodes_from_edges() {
        let node_op = DeltaOp::RemoveNode {
            id: NodeId::from("a"),
        };
        let edge_op = DeltaOp::RemoveEdge {
            src: NodeId::from("a"),
            dst: NodeId::from("b"),
            ty: "link".into(),
        };
        assert_ne!(node_op.entity(), edge_op.entity());
        assert!(node_op.is_remove() && edge_op.is_remove());
    }
}
