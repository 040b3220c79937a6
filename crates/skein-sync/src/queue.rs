// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Update queue and batcher.
//!
//! Pending operations coalesce per `(entity, origin)` before they reach
//! the store:
//!
//! - add + update ⇒ one add carrying the merged data (update wins)
//! - update + update ⇒ one update, later fields winning
//! - update + remove ⇒ the remove alone
//! - add + remove ⇒ net no-op, nothing is emitted
//! - remove + add ⇒ flushed as remove-then-add, in order
//!
//! Local and remote ops never coalesce with each other — the conflict
//! resolver needs to see both sides of an overlap.
//!
//! Batches flush when they reach the configured size or age, whichever
//! first; within a batch, higher-priority entities are emitted first.
//! An adaptive throttle widens the age window multiplicatively
//! when the queue runs deep or flushes run long, and decays it
//! multiplicatively when load drops, bounded by a configured maximum.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use skein_graph::props::{self, PropPatch};
use skein_proto::{DeltaOp, EntityKey, Origin};

/// Scheduling class for an enqueued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Batched, may be delayed under load.
    Low,
    /// Batched on the normal cadence.
    Normal,
    /// Bypasses batching and flushes alone.
    Immediate,
}

/// Batcher tunables.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Flush when this many entities are pending.
    pub max_batch: usize,
    /// Flush when the oldest pending op reaches this age.
    pub max_age: Duration,
    /// First throttle step applied when overload is detected.
    pub throttle_start: Duration,
    /// Upper bound for the adaptive inter-flush delay.
    pub throttle_max: Duration,
    /// Queue depth beyond which a flush counts as overloaded.
    pub depth_high_water: usize,
    /// Flush duration beyond which a flush counts as overloaded.
    pub flush_budget: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch: 256,
            max_age: Duration::from_millis(50),
            throttle_start: Duration::from_millis(25),
            throttle_max: Duration::from_secs(2),
            depth_high_water: 1024,
            flush_budget: Duration::from_millis(8),
        }
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations enqueued (all priorities).
    pub enqueued: u64,
    /// Operations folded into an existing pending entry.
    pub coalesced: u64,
    /// Batches flushed (size or age).
    pub flushes: u64,
    /// Immediate-priority bypass flushes.
    pub immediate_flushes: u64,
}

/// One operation leaving the batcher.
#[derive(Debug, Clone)]
pub struct BatchedOp {
    /// The operation.
    pub op: DeltaOp,
    /// Where it came from.
    pub origin: Origin,
    /// Timestamp carried for conflict resolution (ms).
    pub timestamp_ms: u64,
}

/// A flushed batch: entities in priority order, arrival order within a
/// priority class.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Operations to apply, in order.
    pub ops: Vec<BatchedOp>,
}

#[derive(Debug)]
enum Pending {
    Add(DeltaOp),
    Update(DeltaOp),
    Remove(DeltaOp),
    Replace { remove: DeltaOp, add: DeltaOp },
    Chain(Vec<DeltaOp>),
}

#[derive(Debug)]
struct Entry {
    origin: Origin,
    priority: Priority,
    timestamp_ms: u64,
    state: Pending,
}

/// Priority queue with per-entity coalescing and adaptive flush pacing.
#[derive(Debug)]
pub struct UpdateQueue {
    cfg: BatcherConfig,
    entries: Vec<Option<Entry>>,
    index: FxHashMap<(EntityKey, Origin), usize>,
    live: usize,
    oldest: Option<Instant>,
    throttle: Duration,
    stats: QueueStats,
}

impl UpdateQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(cfg: BatcherConfig) -> Self {
        Self {
            cfg,
            entries: Vec::new(),
            index: FxHashMap::default(),
            live: 0,
            oldest: None,
            throttle: Duration::ZERO,
            stats: QueueStats::default(),
        }
    }

    /// Pending entity count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Queue counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Current adaptive delay added to the age window.
    #[must_use]
    pub fn current_throttle(&self) -> Duration {
        self.throttle
    }

    /// Enqueues an operation. Immediate priority yields a one-op batch at
    /// once; otherwise the op coalesces and a batch is returned only when
    /// the size threshold tripped.
    pub fn enqueue(
        &mut self,
        op: DeltaOp,
        priority: Priority,
        origin: Origin,
        timestamp_ms: u64,
        now: Instant,
    ) -> Option<Batch> {
        self.stats.enqueued += 1;
        if priority == Priority::Immediate {
            self.stats.immediate_flushes += 1;
            return Some(Batch {
                ops: vec![BatchedOp {
                    op,
                    origin,
                    timestamp_ms,
                }],
            });
        }
        self.coalesce(op, priority, origin, timestamp_ms);
        if self.oldest.is_none() && self.live > 0 {
            self.oldest = Some(now);
        }
        if self.live >= self.cfg.max_batch {
            return self.flush_now(now);
        }
        None
    }

    /// Flushes when the age window (plus throttle) has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Batch> {
        let deadline_hit = self.oldest.is_some_and(|t| {
            now.saturating_duration_since(t) >= self.cfg.max_age + self.throttle
        });
        if self.live >= self.cfg.max_batch || deadline_hit {
            self.flush_now(now)
        } else {
            None
        }
    }

    /// Drains everything pending right now.
    pub fn flush_now(&mut self, _now: Instant) -> Option<Batch> {
        if self.live == 0 {
            return None;
        }
        let depth = self.live;
        let mut drained: Vec<Entry> = self.entries.drain(..).flatten().collect();
        // Higher-priority entities leave first; arrival order breaks ties, so
        // per-entity op chains (remove-then-add) stay intact.
        drained.sort_by_key(|e| std::cmp::Reverse(e.priority));
        let mut ops = Vec::with_capacity(depth + 4);
        for entry in drained {
            let Entry {
                origin,
                priority: _,
                timestamp_ms,
                state,
            } = entry;
            let push = |ops: &mut Vec<BatchedOp>, op: DeltaOp| {
                ops.push(BatchedOp {
                    op,
                    origin,
                    timestamp_ms,
                });
            };
            match state {
                Pending::Add(op) | Pending::Update(op) | Pending::Remove(op) => {
                    push(&mut ops, op);
                }
                Pending::Replace { remove, add } => {
                    push(&mut ops, remove);
                    push(&mut ops, add);
                }
                Pending::Chain(chain) => {
                    for op in chain {
                        push(&mut ops, op);
                    }
                }
            }
        }
        self.index.clear();
        self.live = 0;
        self.oldest = None;
        self.stats.flushes += 1;
        if depth > self.cfg.depth_high_water {
            self.grow_throttle();
        } else {
            self.decay_throttle();
        }
        Some(Batch { ops })
    }

    /// Discards everything pending without emitting a batch.
    ///
    /// Used when the store is about to be replaced wholesale: queued
    /// mutations predate the authoritative snapshot and must not be
    /// applied on top of it. Returns the number of entities dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.live;
        self.entries.clear();
        self.index.clear();
        self.live = 0;
        self.oldest = None;
        dropped
    }

    /// Feeds the measured flush duration back into the load estimate.
    pub fn record_flush_duration(&mut self, took: Duration) {
        if took > self.cfg.flush_budget {
            self.grow_throttle();
        } else {
            self.decay_throttle();
        }
    }

    fn grow_throttle(&mut self) {
        let next = if self.throttle.is_zero() {
            self.cfg.throttle_start
        } else {
            self.throttle.saturating_mul(2)
        };
        self.throttle = next.min(self.cfg.throttle_max);
    }

    fn decay_throttle(&mut self) {
        self.throttle /= 2;
        if self.throttle < Duration::from_millis(1) {
            self.throttle = Duration::ZERO;
        }
    }

    fn coalesce(&mut self, op: DeltaOp, priority: Priority, origin: Origin, timestamp_ms: u64) {
        let key = (op.entity(), origin);
        let Some(&slot) = self.index.get(&key) else {
            let state = match &op {
                DeltaOp::AddNode(_) | DeltaOp::AddEdge(_) => Pending::Add(op),
                DeltaOp::UpdateNode { .. } | DeltaOp::UpdateEdge { .. } => Pending::Update(op),
                DeltaOp::RemoveNode { .. } | DeltaOp::RemoveEdge { .. } => Pending::Remove(op),
            };
            let slot = self.entries.len();
            self.entries.push(Some(Entry {
                origin,
                priority,
                timestamp_ms,
                state,
            }));
            self.index.insert(key, slot);
            self.live += 1;
            return;
        };
        self.stats.coalesced += 1;
        let Some(mut entry) = self.entries.get_mut(slot).and_then(Option::take) else {
            debug_assert!(false, "queue index referenced a drained slot");
            return;
        };
        entry.timestamp_ms = timestamp_ms;
        entry.priority = entry.priority.max(priority);
        let incoming_is_remove = op.is_remove();
        let incoming_is_update = op.is_update();

        let next = match (entry.state, op) {
            // add + update => single add with the update merged in.
            (Pending::Add(mut add), update) if incoming_is_update => {
                merge_update_into_add(&mut add, &update);
                Pending::Add(add)
            }
            // add + remove => net no-op.
            (Pending::Add(_), _op) if incoming_is_remove => {
                self.index.remove(&key);
                self.live -= 1;
                if self.live == 0 {
                    self.oldest = None;
                }
                return;
            }
            // duplicate add: later wins.
            (Pending::Add(_), newer_add) => Pending::Add(newer_add),

            // update + update => later fields win.
            (Pending::Update(mut current), update) if incoming_is_update => {
                merge_updates(&mut current, update);
                Pending::Update(current)
            }
            // update + remove => remove alone.
            (Pending::Update(_), remove) if incoming_is_remove => Pending::Remove(remove),
            // update + add: can't be collapsed exactly; keep both in order.
            (Pending::Update(update), add) => Pending::Chain(vec![update, add]),

            // update after a pending remove targets nothing; drop it.
            (Pending::Remove(remove), _update) if incoming_is_update => {
                tracing::debug!("dropping update queued after a pending remove");
                Pending::Remove(remove)
            }
            (Pending::Remove(remove), _dup_remove) if incoming_is_remove => {
                Pending::Remove(remove)
            }
            // remove + add => replace, flushed in order.
            (Pending::Remove(remove), add) => Pending::Replace { remove, add },

            (Pending::Replace { remove, mut add }, update) if incoming_is_update => {
                merge_update_into_add(&mut add, &update);
                Pending::Replace { remove, add }
            }
            // remove, add, remove => net just the remove.
            (Pending::Replace { remove, .. }, _op) if incoming_is_remove => Pending::Remove(remove),
            (Pending::Replace { remove, .. }, newer_add) => Pending::Replace {
                remove,
                add: newer_add,
            },

            (Pending::Chain(mut chain), op) => {
                chain.push(op);
                Pending::Chain(chain)
            }
        };
        entry.state = next;
        if let Some(s) = self.entries.get_mut(slot) {
            *s = Some(entry);
        }
    }
}

fn merge_update_into_add(add: &mut DeltaOp, update: &DeltaOp) {
    match (add, update) {
        (DeltaOp::AddNode(input), DeltaOp::UpdateNode { patches, .. }) => {
            props::apply_patches(&mut input.props, patches);
        }
        (DeltaOp::AddEdge(input), DeltaOp::UpdateEdge { weight, patches, .. }) => {
            if let Some(w) = weight {
                input.weight = *w;
            }
            props::apply_patches(&mut input.props, patches);
        }
        _ => debug_assert!(false, "entity kind mismatch while coalescing add+update"),
    }
}

fn merge_updates(current: &mut DeltaOp, incoming: DeltaOp) {
    match (current, incoming) {
        (
            DeltaOp::UpdateNode { patches, .. },
            DeltaOp::UpdateNode {
                patches: newer, ..
            },
        ) => {
            for patch in newer {
                push_patch(patches, patch);
            }
        }
        (
            DeltaOp::UpdateEdge {
                weight, patches, ..
            },
            DeltaOp::UpdateEdge {
                weight: newer_weight,
                patches: newer,
                ..
            },
        ) => {
            if newer_weight.is_some() {
                *weight = newer_weight;
            }
            for patch in newer {
                push_patch(patches, patch);
            }
        }
        _ => debug_assert!(false, "entity kind mismatch while coalescing updates"),
    }
}

/// Folds a patch into an accumulated list so the list stays minimal while
/// preserving apply-in-order semantics.
fn push_patch(list: &mut Vec<PropPatch>, patch: PropPatch) {
    match patch {
        PropPatch::Replace(map) => {
            list.clear();
            list.push(PropPatch::Replace(map));
        }
        PropPatch::Merge(map) => {
            // A shallow merge overwrites whole top-level fields; path
            // patches under those fields are dead.
            list.retain(|p| {
                !matches!(p, PropPatch::SetPath { path, .. } if map.contains_key(top_segment(path)))
            });
            match list.last_mut() {
                Some(PropPatch::Merge(prev) | PropPatch::Replace(prev)) => {
                    props::merge_shallow(prev, map);
                }
                _ => list.push(PropPatch::Merge(map)),
            }
        }
        PropPatch::SetPath { path, value } => {
            let pos = list
                .iter()
                .position(|p| matches!(p, PropPatch::SetPath { path: p2, .. } if *p2 == path));
            match pos.and_then(|i| list.get_mut(i)) {
                Some(slot) => *slot = PropPatch::SetPath { path, value },
                None => list.push(PropPatch::SetPath { path, value }),
            }
        }
    }
}

fn top_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or("")
}
