// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Conflict detection and resolution between locally-pending and
//! server-originated operations.
//!
//! A conflict exists when a local operation that the server has not yet
//! acknowledged and a remote operation target the same entity. Resolution
//! never breaks the store's count invariants: accepting a remote remove
//! always discards the pending local update for that entity.

use rustc_hash::FxHashMap;

use skein_proto::{DeltaOp, EntityKey, PropPatch};

/// Per-deployment resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionStrategy {
    /// Newer timestamp wins (default).
    #[default]
    LastWriterWins,
    /// Field-disjoint updates both apply; overlap falls back to
    /// last-writer-wins.
    Merge,
    /// Surface the conflict instead of auto-resolving.
    DeferToCaller,
}

/// A local operation applied optimistically, awaiting server ack.
#[derive(Debug, Clone)]
pub struct PendingLocal {
    /// The operation as it was applied locally.
    pub op: DeltaOp,
    /// Local wall-clock timestamp (ms), compared against remote deltas.
    pub timestamp_ms: u64,
}

/// A detected local/remote overlap.
#[derive(Debug, Clone)]
pub struct Conflict {
    /// Entity both sides target.
    pub entity: EntityKey,
    /// The unacknowledged local operation.
    pub local: PendingLocal,
    /// The remote operation.
    pub remote: DeltaOp,
    /// Timestamp of the remote delta (ms).
    pub remote_timestamp_ms: u64,
}

/// What to do with a remote operation after resolution.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Apply the remote op; any pending local entry is discarded.
    ApplyRemote(DeltaOp),
    /// Skip the remote op; the local pending op stands.
    KeepLocal,
    /// Apply the remote op but keep the local pending entry (field-disjoint
    /// merge: both sides survive).
    ApplyBoth(DeltaOp),
    /// Not auto-resolved; surfaced to the caller, remote op withheld.
    Deferred(Box<Conflict>),
}

/// Resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictStats {
    /// Overlaps detected.
    pub detected: u64,
    /// Resolutions that accepted the remote op.
    pub remote_wins: u64,
    /// Resolutions that kept the local op.
    pub local_wins: u64,
    /// Field-disjoint merges where both sides applied.
    pub merged: u64,
    /// Conflicts surfaced to the caller.
    pub deferred: u64,
}

/// Tracks unacknowledged local operations and resolves overlaps.
#[derive(Debug)]
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
    pending: FxHashMap<EntityKey, PendingLocal>,
    stats: ConflictStats,
}

impl ConflictResolver {
    /// Creates a resolver with the given strategy.
    #[must_use]
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            strategy,
            pending: FxHashMap::default(),
            stats: ConflictStats::default(),
        }
    }

    /// Active strategy.
    #[must_use]
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ConflictStats {
        self.stats
    }

    /// Number of unacknowledged local operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records a local operation after it was applied optimistically.
    pub fn record_local(&mut self, op: &DeltaOp, timestamp_ms: u64) {
        self.pending.insert(
            op.entity(),
            PendingLocal {
                op: op.clone(),
                timestamp_ms,
            },
        );
    }

    /// Acknowledges a local operation (server confirmed it).
    pub fn ack(&mut self, entity: &EntityKey) -> bool {
        self.pending.remove(entity).is_some()
    }

    /// Drops pending entries older than `cutoff_ms`; a silent server must
    /// not grow the ledger without bound.
    pub fn prune_older_than(&mut self, cutoff_ms: u64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.timestamp_ms >= cutoff_ms);
        before - self.pending.len()
    }

    /// Clears the ledger (resync replaced the store wholesale).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Pure detection pass: which remote ops overlap pending local ops.
    #[must_use]
    pub fn detect(&self, remote_ops: &[DeltaOp], remote_timestamp_ms: u64) -> Vec<Conflict> {
        remote_ops
            .iter()
            .filter_map(|op| {
                let entity = op.entity();
                self.pending.get(&entity).map(|local| Conflict {
                    entity,
                    local: local.clone(),
                    remote: op.clone(),
                    remote_timestamp_ms,
                })
            })
            .collect()
    }

    /// Resolves one remote operation against the ledger.
    ///
    /// Non-overlapping ops resolve to `ApplyRemote` without counting as
    /// conflicts.
    pub fn resolve_remote(&mut self, op: DeltaOp, remote_timestamp_ms: u64) -> Resolution {
        let entity = op.entity();
        let Some(local) = self.pending.get(&entity) else {
            return Resolution::ApplyRemote(op);
        };
        self.stats.detected += 1;

        match self.strategy {
            ResolutionStrategy::DeferToCaller => {
                self.stats.deferred += 1;
                let conflict = Conflict {
                    entity,
                    local: local.clone(),
                    remote: op,
                    remote_timestamp_ms,
                };
                Resolution::Deferred(Box::new(conflict))
            }
            ResolutionStrategy::Merge => {
                if let Some(merged) = disjoint_merge(&local.op, &op) {
                    self.stats.merged += 1;
                    return Resolution::ApplyBoth(merged);
                }
                self.last_writer_wins(entity, op, remote_timestamp_ms)
            }
            ResolutionStrategy::LastWriterWins => {
                self.last_writer_wins(entity, op, remote_timestamp_ms)
            }
        }
    }

    fn last_writer_wins(
        &mut self,
        entity: EntityKey,
        op: DeltaOp,
        remote_timestamp_ms: u64,
    ) -> Resolution {
        let local_ts = self
            .pending
            .get(&entity)
            .map_or(0, |local| local.timestamp_ms);
        if remote_timestamp_ms >= local_ts {
            self.stats.remote_wins += 1;
            // An accepted remote op supersedes the pending local one; in
            // particular an accepted remove always discards the local
            // update for the same entity.
            self.pending.remove(&entity);
            Resolution::ApplyRemote(op)
        } else {
            self.stats.local_wins += 1;
            Resolution::KeepLocal
        }
    }

    /// Applies a caller decision for a deferred conflict.
    pub fn resolve_deferred(&mut self, conflict: Conflict, accept_remote: bool) -> Resolution {
        if accept_remote {
            self.stats.remote_wins += 1;
            self.pending.remove(&conflict.entity);
            Resolution::ApplyRemote(conflict.remote)
        } else {
            self.stats.local_wins += 1;
            Resolution::KeepLocal
        }
    }
}

/// Attempts a field-disjoint union of a local and remote update.
///
/// Succeeds only when both sides are updates on the same entity and their
/// touched top-level fields do not overlap; the remote op then applies
/// as-is on top of the already-applied local op. Any overlap (or any
/// non-update op) returns `None` and falls back to last-writer-wins.
/// Whether overlap should instead merge at sub-field granularity is an
/// open question; this keeps the observed top-level behavior.
fn disjoint_merge(local: &DeltaOp, remote: &DeltaOp) -> Option<DeltaOp> {
    let local_fields = update_fields(local)?;
    let remote_fields = update_fields(remote)?;
    if local_fields.iter().any(|f| remote_fields.contains(f)) {
        return None;
    }
    Some(remote.clone())
}

/// Top-level fields an update touches; `None` when the op is not an
/// update or contains a full replace (which touches everything).
fn update_fields(op: &DeltaOp) -> Option<Vec<String>> {
    let patches = match op {
        DeltaOp::UpdateNode { patches, .. } => patches,
        DeltaOp::UpdateEdge {
            weight, patches, ..
        } => {
            if weight.is_some() {
                // Weight changes collide with any other weight change;
                // treat them as a reserved field.
                let mut fields = patch_fields(patches)?;
                fields.push("$weight".to_owned());
                return Some(fields);
            }
            patches
        }
        _ => return None,
    };
    patch_fields(patches)
}

fn patch_fields(patches: &[PropPatch]) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    for patch in patches {
        match patch {
            PropPatch::Replace(_) => return None,
            PropPatch::Merge(map) => fields.extend(map.keys().cloned()),
            PropPatch::SetPath { path, .. } => {
                fields.push(path.split('.').next().unwrap_or("").to_owned());
            }
        }
    }
    Some(fields)
}
