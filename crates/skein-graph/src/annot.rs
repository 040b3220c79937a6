// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Render-only annotation side-table.
//!
//! Entries associate derived rendering data (screen coordinates and the
//! like) with a node without owning it: the table keys on slot index and
//! validates the slot generation on every lookup, and the store invokes an
//! explicit removal hook when a node is destroyed. An annotation can never
//! outlive its node or block the node's collection — but while present it
//! does mark the node as externally referenced for TTL eviction.

use rustc_hash::FxHashMap;

use crate::arena::NodeRef;
use crate::props::PropMap;

/// Ephemeral, render-only data attached to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Annotation {
    /// Screen-space position.
    pub pos: [f32; 2],
    /// Free-form renderer payload (colors, badges, level-of-detail hints).
    pub data: PropMap,
}

impl Annotation {
    /// Annotation at a position with no extra payload.
    #[must_use]
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            pos: [x, y],
            data: PropMap::new(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    value: Annotation,
}

/// Slot-keyed annotation storage; see the module docs for the contract.
#[derive(Debug, Default)]
pub(crate) struct SideTable {
    entries: FxHashMap<u32, Entry>,
}

impl SideTable {
    /// Inserts or replaces the annotation for a live reference.
    pub(crate) fn set(&mut self, r: NodeRef, value: Annotation) {
        self.entries.insert(
            r.slot,
            Entry {
                generation: r.generation,
                value,
            },
        );
    }

    /// Looks up the annotation; stale references resolve to `None`.
    pub(crate) fn get(&self, r: NodeRef) -> Option<&Annotation> {
        self.entries
            .get(&r.slot)
            .filter(|e| e.generation == r.generation)
            .map(|e| &e.value)
    }

    /// Clears the annotation through a still-valid reference.
    pub(crate) fn clear(&mut self, r: NodeRef) -> bool {
        match self.entries.get(&r.slot) {
            Some(e) if e.generation == r.generation => {
                self.entries.remove(&r.slot);
                true
            }
            _ => false,
        }
    }

    /// Removal hook: drops whatever rides on `slot`, stale or not.
    pub(crate) fn remove_slot(&mut self, slot: u32) {
        self.entries.remove(&slot);
    }

    /// Whether `slot` currently holds an annotation (any generation).
    pub(crate) fn holds(&self, slot: u32) -> bool {
        self.entries.contains_key(&slot)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
