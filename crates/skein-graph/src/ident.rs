// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for nodes, interned tags, and edge keys.

use std::fmt;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Stable, opaque node identifier.
///
/// Server-assigned ids arrive as strings; `NodeId` wraps them in an
/// `Arc<str>` so the same id can appear in every index without copying the
/// backing bytes. Ordering is lexicographic over the underlying string,
/// which is what gives snapshots their canonical node order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(Arc<str>);

impl NodeId {
    /// Wraps a string id.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(Arc::from(id))
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

// `Arc<str>` has no serde support without the `rc` feature; ids serialize
// as plain strings on the wire either way.
impl Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// Interned handle for a small repeated string (type tags, labels).
///
/// `Sym` values are only meaningful to the [`InternPool`](crate::InternPool)
/// that issued them and are never serialized; the wire carries the string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Sym(pub(crate) u32);

impl Sym {
    /// Returns the raw pool index backing this handle.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Canonical identity of an edge: `(source, target, type)`.
///
/// Upserting an identical key updates weight/properties in place rather
/// than creating a parallel edge.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EdgeKey {
    /// Source node id.
    pub src: NodeId,
    /// Target node id.
    pub dst: NodeId,
    /// Interned edge type tag.
    pub ty: Sym,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_compare_by_content() {
        let a = NodeId::from("alpha");
        let b = NodeId::new(String::from("alpha"));
        assert_eq!(a, b);
        assert!(NodeId::from("a") < NodeId::from("b"));
    }

    #[test]
    fn node_id_displays_raw_string() {
        assert_eq!(NodeId::from("n:1").to_string(), "n:1");
    }
}
