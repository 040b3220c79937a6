// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Graph record types: canonical store records and wire-facing inputs.

use serde::{Deserialize, Serialize};

use crate::ident::{NodeId, Sym};
use crate::props::PropMap;

/// Canonical node record owned by the store.
///
/// The `ty` handle is scoped to the owning store's intern pool; resolve it
/// through the store, not by index arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Interned type tag.
    pub ty: Sym,
    /// Property bag.
    pub props: PropMap,
}

/// Canonical edge payload owned by the store.
///
/// Edge identity (`source`, `target`, `type`) lives in
/// [`EdgeKey`](crate::EdgeKey); this record carries only the mutable part.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRecord {
    /// Edge weight.
    pub weight: f64,
    /// Property bag.
    pub props: PropMap,
}

/// Wire-facing node payload: what an `add` carries and what a resync
/// snapshot is made of. Type tags are strings here; interning happens at
/// the store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    /// Stable node id.
    pub id: NodeId,
    /// Type tag.
    pub ty: String,
    /// Property bag.
    #[serde(default)]
    pub props: PropMap,
}

impl NodeInput {
    /// Convenience constructor for an empty-property node.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, ty: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ty: ty.into(),
            props: PropMap::new(),
        }
    }

    /// Sets the property bag.
    #[must_use]
    pub fn with_props(mut self, props: PropMap) -> Self {
        self.props = props;
        self
    }
}

/// Wire-facing edge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInput {
    /// Source node id.
    pub src: NodeId,
    /// Target node id.
    pub dst: NodeId,
    /// Type tag.
    pub ty: String,
    /// Edge weight.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Property bag.
    #[serde(default)]
    pub props: PropMap,
}

fn default_weight() -> f64 {
    1.0
}

impl EdgeInput {
    /// Convenience constructor for a unit-weight, empty-property edge.
    #[must_use]
    pub fn new(src: impl Into<NodeId>, dst: impl Into<NodeId>, ty: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            ty: ty.into(),
            weight: 1.0,
            props: PropMap::new(),
        }
    }

    /// Sets the weight.
    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the property bag.
    #[must_use]
    pub fn with_props(mut self, props: PropMap) -> Self {
        self.props = props;
        self
    }
}
