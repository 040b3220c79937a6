// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Generational slot arena holding the node records.
//!
//! Slots are reused after removal; each reuse bumps the slot's generation
//! so stale [`NodeRef`]s held by outside collaborators (the annotation
//! side-table, render layers) resolve to "absent" instead of aliasing a
//! newer record.

use std::sync::atomic::AtomicU64;

use crate::ident::NodeId;
use crate::record::NodeRecord;

/// Generational reference to a node slot.
///
/// Cheap to copy and safe to hold across mutations: once the node is
/// removed (explicitly or by eviction) the reference goes stale and every
/// lookup through it returns `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// One live node plus its per-slot bookkeeping.
#[derive(Debug)]
pub(crate) struct NodeSlot {
    pub(crate) id: NodeId,
    pub(crate) record: NodeRecord,
    pub(crate) created_at_ms: u64,
    /// Milliseconds on the store clock; atomic so `&self` reads can touch it.
    pub(crate) last_access: AtomicU64,
}

#[derive(Debug, Default)]
struct SlotEntry {
    generation: u32,
    node: Option<NodeSlot>,
}

/// Slot storage with a free list.
#[derive(Debug, Default)]
pub(crate) struct SlotArena {
    slots: Vec<SlotEntry>,
    free: Vec<u32>,
    live: usize,
}

impl SlotArena {
    pub(crate) fn insert(&mut self, node: NodeSlot) -> NodeRef {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.node = Some(node);
            return NodeRef {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(SlotEntry {
            generation: 0,
            node: Some(node),
        });
        NodeRef { slot, generation: 0 }
    }

    pub(crate) fn remove(&mut self, r: NodeRef) -> Option<NodeSlot> {
        let entry = self.slots.get_mut(r.slot as usize)?;
        if entry.generation != r.generation || entry.node.is_none() {
            return None;
        }
        let node = entry.node.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(r.slot);
        self.live -= 1;
        node
    }

    pub(crate) fn get(&self, r: NodeRef) -> Option<&NodeSlot> {
        let entry = self.slots.get(r.slot as usize)?;
        if entry.generation != r.generation {
            return None;
        }
        entry.node.as_ref()
    }

    pub(crate) fn get_mut(&mut self, r: NodeRef) -> Option<&mut NodeSlot> {
        let entry = self.slots.get_mut(r.slot as usize)?;
        if entry.generation != r.generation {
            return None;
        }
        entry.node.as_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeRef, &NodeSlot)> {
        self.slots.iter().enumerate().filter_map(|(i, entry)| {
            entry.node.as_ref().map(|node| {
                (
                    NodeRef {
                        slot: i as u32,
                        generation: entry.generation,
                    },
                    node,
                )
            })
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }
}
