// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property bags: a typed, flat key→value map with a closed set of value
//! kinds, plus the merge/patch semantics shared by the store and the
//! update batcher.
//!
//! Merge is shallow by design: a node update is non-destructive unless the
//! operation is a full replace. Path-scoped patches (`a.b.c`) mutate only
//! the named nested field and leave siblings untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property map keyed by field name.
pub type PropMap = BTreeMap<String, PropValue>;

/// Closed set of property value kinds.
///
/// Untagged on the wire: booleans, numbers, strings, and maps round-trip
/// through CBOR/JSON in their natural encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// Boolean flag.
    Bool(bool),
    /// Numeric value (all numbers are f64 on this surface).
    Num(f64),
    /// UTF-8 string.
    Str(String),
    /// Nested map.
    Map(PropMap),
}

impl PropValue {
    /// Rough backing-byte estimate for memory accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        match self {
            Self::Bool(_) => 1,
            Self::Num(_) => 8,
            Self::Str(s) => s.len() + 24,
            Self::Map(m) => approx_map_bytes(m),
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        Self::Num(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A single patch against a property bag.
///
/// Updates on the wire carry a list of these; the batcher collapses
/// compatible runs before they reach the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropPatch {
    /// Replace the entire bag.
    Replace(PropMap),
    /// Shallow-merge fields into the bag; new values win, unspecified
    /// fields are preserved.
    Merge(PropMap),
    /// Set a single nested field addressed by a `.`-separated path.
    SetPath {
        /// Dot-separated field path, e.g. `layout.pos.x`.
        path: String,
        /// Value to place at the path.
        value: PropValue,
    },
}

/// Shallow-merges `src` into `dst`; `src` values win on overlap.
pub fn merge_shallow(dst: &mut PropMap, src: PropMap) {
    for (k, v) in src {
        dst.insert(k, v);
    }
}

/// Sets the value at a `.`-separated path, creating intermediate maps.
///
/// Non-map intermediates are replaced by maps; only the addressed leaf and
/// any created intermediates change, siblings are untouched.
pub fn set_path(map: &mut PropMap, path: &str, value: PropValue) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return;
    };
    let mut current = map;
    let mut key = first;
    for next in segments {
        let entry = current
            .entry(key.to_owned())
            .or_insert_with(|| PropValue::Map(PropMap::new()));
        if !matches!(entry, PropValue::Map(_)) {
            *entry = PropValue::Map(PropMap::new());
        }
        let PropValue::Map(inner) = entry else {
            return;
        };
        current = inner;
        key = next;
    }
    current.insert(key.to_owned(), value);
}

/// Applies one patch to a property bag.
pub fn apply_patch(props: &mut PropMap, patch: &PropPatch) {
    match patch {
        PropPatch::Replace(full) => {
            *props = full.clone();
        }
        PropPatch::Merge(fields) => {
            merge_shallow(props, fields.clone());
        }
        PropPatch::SetPath { path, value } => {
            set_path(props, path, value.clone());
        }
    }
}

/// Applies a patch list in order.
pub fn apply_patches(props: &mut PropMap, patches: &[PropPatch]) {
    for patch in patches {
        apply_patch(props, patch);
    }
}

/// Rough backing-byte estimate for a whole map.
#[must_use]
pub fn approx_map_bytes(map: &PropMap) -> usize {
    map.iter()
        .map(|(k, v)| k.len() + 32 + v.approx_bytes())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, PropValue)]) -> PropMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn shallow_merge_preserves_unspecified_fields() {
        let mut dst = map(&[("a", 1.0.into()), ("b", "old".into())]);
        merge_shallow(&mut dst, map(&[("b", "new".into()), ("c", true.into())]));
        assert_eq!(dst.get("a"), Some(&PropValue::Num(1.0)));
        assert_eq!(dst.get("b"), Some(&PropValue::Str("new".into())));
        assert_eq!(dst.get("c"), Some(&PropValue::Bool(true)));
    }

    #[test]
    fn set_path_leaves_siblings_untouched() {
        let mut props = map(&[(
            "layout",
            PropValue::Map(map(&[("x", 1.0.into()), ("y", 2.0.into())])),
        )]);
        set_path(&mut props, "layout.x", 9.0.into());
        let PropValue::Map(layout) = &props["layout"] else {
            unreachable!("layout stays a map");
        };
        assert_eq!(layout.get("x"), Some(&PropValue::Num(9.0)));
        assert_eq!(layout.get("y"), Some(&PropValue::Num(2.0)));
    }

    #[test]
    fn set_path_creates_missing_intermediates() {
        let mut props = PropMap::new();
        set_path(&mut props, "a.b.c", true.into());
        let PropValue::Map(a) = &props["a"] else {
            unreachable!();
        };
        let PropValue::Map(b) = &a["b"] else {
            unreachable!();
        };
        assert_eq!(b.get("c"), Some(&PropValue::Bool(true)));
    }

    #[test]
    fn replace_patch_drops_old_fields() {
        let mut props = map(&[("a", 1.0.into()), ("b", 2.0.into())]);
        apply_patch(&mut props, &PropPatch::Replace(map(&[("c", 3.0.into())])));
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("c"), Some(&PropValue::Num(3.0)));
    }

    #[test]
    fn patch_list_applies_in_order() {
        let mut props = PropMap::new();
        apply_patches(
            &mut props,
            &[
                PropPatch::Merge(map(&[("a", 1.0.into())])),
                PropPatch::SetPath {
                    path: "b.c".into(),
                    value: 2.0.into(),
                },
                PropPatch::Merge(map(&[("a", 3.0.into())])),
            ],
        );
        assert_eq!(props.get("a"), Some(&PropValue::Num(3.0)));
        let PropValue::Map(b) = &props["b"] else {
            unreachable!();
        };
        assert_eq!(b.get("c"), Some(&PropValue::Num(2.0)));
    }
}
