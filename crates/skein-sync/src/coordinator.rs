// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Synchronization coordinator: sequence tracking, gap repair, and the
//! full-resync fallback.
//!
//! State machine over `Synced | Buffering | Resyncing`:
//!
//! - **Synced** applies deltas whose sequence is exactly `last_applied + 1`
//!   and drops duplicates idempotently.
//! - **Buffering** holds out-of-order deltas in a bounded reorder buffer;
//!   the missing sequence arriving in time replays the run and returns to
//!   Synced, otherwise the coordinator falls back to a resync.
//! - **Resyncing** hands the caller a ticket (monotonic token + request);
//!   the transport performs the fetch and reports back through
//!   [`SyncCoordinator::complete_resync`]. A newer ticket cancels an older
//!   one: stale results are discarded, never applied.
//!
//! The coordinator owns the store. All entry points take `&mut self`,
//! which is the single-writer serialization the store requires; renderers
//! consume the owned snapshots emitted once per completed flush.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use skein_graph::{GraphSnapshot, GraphStore};
use skein_proto::{Delta, DeltaError, DeltaOp, Origin, ResyncRequest, ResyncResponse};

use crate::conflict::{
    Conflict, ConflictResolver, ConflictStats, Resolution, ResolutionStrategy,
};
use crate::delta;
use crate::queue::{Batch, BatchedOp, BatcherConfig, Priority, QueueStats, UpdateQueue};

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bound on the out-of-order reorder buffer.
    pub buffer_max: usize,
    /// How long a gap may stay open before falling back to resync.
    pub buffer_timeout: Duration,
    /// Failed resync attempts tolerated before the error is fatal.
    pub resync_retry_budget: u32,
    /// Cadence of TTL cleanup sweeps.
    pub cleanup_interval: Duration,
    /// Batcher configuration.
    pub batcher: BatcherConfig,
    /// Conflict resolution strategy.
    pub strategy: ResolutionStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_max: 64,
            buffer_timeout: Duration::from_secs(2),
            resync_retry_budget: 3,
            cleanup_interval: Duration::from_secs(30),
            batcher: BatcherConfig::default(),
            strategy: ResolutionStrategy::default(),
        }
    }
}

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Stream healthy; consecutive deltas apply directly.
    Synced,
    /// A sequence gap is open; out-of-order deltas are being buffered.
    Buffering,
    /// Incremental application is unsafe; awaiting a full snapshot.
    Resyncing,
}

/// Fatal synchronization failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The resync retry budget is exhausted; the caller owns further
    /// backoff/retry policy.
    #[error("connectivity lost after {attempts} failed resync attempts")]
    ConnectivityLost {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// Transport-reported resync failure.
#[derive(Debug, Clone, Error)]
#[error("resync transport failure: {reason}")]
pub struct ResyncFailure {
    /// Human-readable cause.
    pub reason: String,
}

impl ResyncFailure {
    /// Wraps a failure reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Handle for one resync round-trip.
///
/// The token is monotonically increasing; results reported with an older
/// token are discarded (the request was superseded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncTicket {
    /// Cancellation guard.
    pub token: u64,
    /// Request the transport should send.
    pub request: ResyncRequest,
}

/// Result of ingesting one delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Sequence was consecutive; the delta entered the pipeline.
    Accepted,
    /// Sequence at or below `last_applied`; dropped idempotently.
    Duplicate,
    /// Out-of-order; parked in the reorder buffer.
    Buffered,
    /// Buffer overflowed; incremental application is unsafe.
    ResyncNeeded(ResyncTicket),
    /// Failed internal consistency validation; nothing was applied.
    Rejected(DeltaError),
}

/// Result of one pump.
#[derive(Debug, Default)]
pub struct PumpOutcome {
    /// New immutable snapshot, when a flush completed since the last pump.
    pub snapshot: Option<GraphSnapshot>,
    /// Conflicts surfaced under the defer-to-caller strategy.
    pub conflicts: Vec<Conflict>,
    /// Set when the coordinator decided a resync is required.
    pub resync: Option<ResyncTicket>,
    /// Nodes reclaimed by this pump's cleanup sweep.
    pub reclaimed: usize,
}

/// Result of completing a resync round-trip.
#[derive(Debug)]
pub enum ResyncOutcome {
    /// Store replaced wholesale; stream healthy again.
    Loaded(GraphSnapshot),
    /// Attempt failed within budget; a fresh ticket to try again.
    Retry(ResyncTicket),
    /// The ticket was superseded; result discarded.
    Stale,
}

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Deltas accepted in sequence.
    pub deltas_accepted: u64,
    /// Duplicate deltas dropped.
    pub duplicates_dropped: u64,
    /// Deltas parked in the reorder buffer.
    pub deltas_buffered: u64,
    /// Malformed deltas rejected wholesale.
    pub deltas_rejected: u64,
    /// Operations applied to the store.
    pub ops_applied: u64,
    /// Operations dropped for missing dependencies.
    pub ops_dropped: u64,
    /// Resyncs started.
    pub resyncs_started: u64,
    /// Resyncs completed successfully.
    pub resyncs_completed: u64,
}

/// Owns the store and drives the full inbound pipeline:
/// sequence check → queue/batcher → conflict resolution → delta
/// application → snapshot emission.
#[derive(Debug)]
pub struct SyncCoordinator {
    cfg: SyncConfig,
    store: GraphStore,
    queue: UpdateQueue,
    resolver: ConflictResolver,
    state: SyncState,
    last_applied: Option<u64>,
    buffer: BTreeMap<u64, Delta>,
    gap_since: Option<Instant>,
    resync_token: u64,
    resync_failures: u32,
    outstanding_resync: Option<ResyncTicket>,
    last_cleanup: Option<Instant>,
    pending_snapshot: Option<GraphSnapshot>,
    deferred: Vec<Conflict>,
    stats: SyncStats,
}

impl SyncCoordinator {
    /// Creates a coordinator around `store`.
    ///
    /// Starts in `Resyncing` with an outstanding `since: None` ticket —
    /// take it with [`take_resync_ticket`](Self::take_resync_ticket) and
    /// perform the initial full load before streaming deltas.
    #[must_use]
    pub fn new(store: GraphStore, cfg: SyncConfig) -> Self {
        let queue = UpdateQueue::new(cfg.batcher.clone());
        let resolver = ConflictResolver::new(cfg.strategy);
        let ticket = ResyncTicket {
            token: 1,
            request: ResyncRequest { since: None },
        };
        Self {
            cfg,
            store,
            queue,
            resolver,
            state: SyncState::Resyncing,
            last_applied: None,
            buffer: BTreeMap::new(),
            gap_since: None,
            resync_token: 1,
            resync_failures: 0,
            outstanding_resync: Some(ticket),
            last_cleanup: None,
            pending_snapshot: None,
            deferred: Vec::new(),
            stats: SyncStats {
                resyncs_started: 1,
                ..SyncStats::default()
            },
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Last applied sequence, `None` before the initial load.
    #[must_use]
    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    /// Read access to the owned store.
    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Mutable access to the owned store (externally serialized by the
    /// `&mut self` receiver, like every other mutation entry point).
    pub fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    /// Pipeline counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Batcher counters.
    #[must_use]
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Conflict counters.
    #[must_use]
    pub fn conflict_stats(&self) -> ConflictStats {
        self.resolver.stats()
    }

    /// Takes the outstanding resync ticket, if one has not been claimed.
    pub fn take_resync_ticket(&mut self) -> Option<ResyncTicket> {
        self.outstanding_resync.take()
    }

    /// Acknowledges a locally-issued operation (server confirmed it).
    pub fn ack_local(&mut self, op: &DeltaOp) -> bool {
        self.resolver.ack(&op.entity())
    }

    /// Applies a caller decision for a previously surfaced conflict.
    pub fn resolve_conflict(&mut self, conflict: Conflict, accept_remote: bool) {
        if let Resolution::ApplyRemote(op) = self.resolver.resolve_deferred(conflict, accept_remote)
        {
            let report = delta::apply_ops(&mut self.store, &[op]);
            self.stats.ops_applied += report.applied as u64;
            self.stats.ops_dropped += report.dropped as u64;
            self.pending_snapshot = Some(self.store.snapshot());
        }
    }

    /// Ingests one inbound delta from the transport push callback.
    pub fn ingest(&mut self, delta: Delta, now: Instant) -> IngestOutcome {
        self.store.advance_to(now);
        if let Err(err) = delta.validate() {
            self.stats.deltas_rejected += 1;
            tracing::warn!(%err, sequence = delta.sequence, "rejecting malformed delta");
            return IngestOutcome::Rejected(err);
        }
        if self.state == SyncState::Resyncing {
            // Hold arrivals for replay once the snapshot lands.
            return self.buffer_delta(delta, now, false);
        }
        let Some(last) = self.last_applied else {
            return self.buffer_delta(delta, now, true);
        };
        if delta.sequence <= last {
            self.stats.duplicates_dropped += 1;
            tracing::debug!(sequence = delta.sequence, "dropping duplicate delta");
            return IngestOutcome::Duplicate;
        }
        if delta.sequence == last + 1 {
            self.accept(delta, now);
            self.drain_buffer(now);
            return IngestOutcome::Accepted;
        }
        self.buffer_delta(delta, now, true)
    }

    /// Enqueues a local (UI-originated) mutation.
    pub fn submit_local(
        &mut self,
        op: DeltaOp,
        priority: Priority,
        timestamp_ms: u64,
        now: Instant,
    ) {
        self.store.advance_to(now);
        if let Some(batch) = self
            .queue
            .enqueue(op, priority, Origin::Local, timestamp_ms, now)
        {
            self.apply_batch(batch);
        }
    }

    /// Drives the pipeline: age-based flushes, gap timeouts, periodic
    /// cleanup, snapshot emission.
    pub fn pump(&mut self, now: Instant) -> PumpOutcome {
        self.store.advance_to(now);
        let mut outcome = PumpOutcome::default();

        if self.state == SyncState::Buffering {
            let timed_out = self.gap_since.is_some_and(|t| {
                now.saturating_duration_since(t) >= self.cfg.buffer_timeout
            });
            if timed_out {
                tracing::warn!("gap not repaired within timeout; falling back to resync");
                outcome.resync = Some(self.begin_resync());
            }
        }

        if let Some(batch) = self.queue.poll(now) {
            self.apply_batch(batch);
        }

        if self.state != SyncState::Resyncing {
            let due = self
                .last_cleanup
                .is_none_or(|t| now.saturating_duration_since(t) >= self.cfg.cleanup_interval);
            if due {
                outcome.reclaimed = self.store.run_cleanup(now);
                self.last_cleanup = Some(now);
                if outcome.reclaimed > 0 {
                    self.pending_snapshot = Some(self.store.snapshot());
                }
            }
        }

        outcome.snapshot = self.pending_snapshot.take();
        outcome.conflicts = std::mem::take(&mut self.deferred);
        outcome
    }

    /// Forces a resync (e.g. after the transport reconnected).
    pub fn request_resync(&mut self) -> ResyncTicket {
        self.begin_resync()
    }

    /// Reports the result of a resync round-trip.
    ///
    /// Results carrying a superseded or already-consumed token are
    /// discarded. A successful load replaces the store wholesale and
    /// drops every queued mutation that predates the snapshot. Failures
    /// within the retry budget yield a fresh ticket; beyond it the error
    /// is fatal and the store is left exactly as it was.
    pub fn complete_resync(
        &mut self,
        token: u64,
        result: Result<ResyncResponse, ResyncFailure>,
        now: Instant,
    ) -> Result<ResyncOutcome, SyncError> {
        if token != self.resync_token {
            tracing::debug!(token, current = self.resync_token, "discarding stale resync");
            return Ok(ResyncOutcome::Stale);
        }
        self.store.advance_to(now);
        match result {
            Err(failure) => {
                self.resync_failures += 1;
                tracing::warn!(%failure, attempt = self.resync_failures, "resync attempt failed");
                if self.resync_failures > self.cfg.resync_retry_budget {
                    return Err(SyncError::ConnectivityLost {
                        attempts: self.resync_failures,
                    });
                }
                Ok(ResyncOutcome::Retry(self.begin_resync()))
            }
            Ok(response) => {
                let sequence = response.sequence;
                // Queued mutations and local pending state predate the
                // authoritative snapshot; none of it may apply on top.
                self.discard_pre_resync_state();
                self.resolver.clear();
                self.store.replace_contents(response.nodes, response.edges);
                self.last_applied = Some(sequence);
                self.resync_failures = 0;
                self.outstanding_resync = None;
                // Retire the consumed token: a redelivered copy of this
                // response must not reload the store.
                self.resync_token += 1;
                self.state = SyncState::Synced;
                self.gap_since = None;
                self.stats.resyncs_completed += 1;
                self.buffer.retain(|&seq, _| seq > sequence);
                self.drain_buffer(now);
                if !self.buffer.is_empty() {
                    self.state = SyncState::Buffering;
                    self.gap_since = Some(now);
                }
                tracing::info!(sequence, "resync complete");
                Ok(ResyncOutcome::Loaded(self.store.snapshot()))
            }
        }
    }

    fn begin_resync(&mut self) -> ResyncTicket {
        self.state = SyncState::Resyncing;
        self.resync_token += 1;
        self.gap_since = None;
        self.discard_pre_resync_state();
        self.stats.resyncs_started += 1;
        let ticket = ResyncTicket {
            token: self.resync_token,
            request: ResyncRequest {
                since: self.last_applied,
            },
        };
        self.outstanding_resync = Some(ticket);
        ticket
    }

    /// Drops queued mutations, surfaced-but-unresolved conflicts, and any
    /// un-emitted snapshot: all of it is superseded by the snapshot the
    /// resync will install.
    fn discard_pre_resync_state(&mut self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding queued ops superseded by resync");
        }
        self.deferred.clear();
        self.pending_snapshot = None;
    }

    fn accept(&mut self, delta: Delta, now: Instant) {
        let Delta {
            sequence,
            timestamp_ms,
            ops,
        } = delta;
        self.stats.deltas_accepted += 1;
        self.last_applied = Some(sequence);
        for op in ops {
            if let Some(batch) =
                self.queue
                    .enqueue(op, Priority::Normal, Origin::Remote, timestamp_ms, now)
            {
                self.apply_batch(batch);
            }
        }
    }

    fn drain_buffer(&mut self, now: Instant) {
        while let Some(last) = self.last_applied {
            let Some(next) = self.buffer.remove(&(last + 1)) else {
                break;
            };
            self.accept(next, now);
        }
        if self.buffer.is_empty() && self.state == SyncState::Buffering {
            tracing::info!("gap repaired from reorder buffer");
            self.state = SyncState::Synced;
            self.gap_since = None;
        }
    }

    fn buffer_delta(&mut self, delta: Delta, now: Instant, allow_trigger: bool) -> IngestOutcome {
        if self.buffer.len() >= self.cfg.buffer_max {
            if allow_trigger {
                tracing::warn!(len = self.buffer.len(), "reorder buffer overflow");
                return IngestOutcome::ResyncNeeded(self.begin_resync());
            }
            // Mid-resync the snapshot will supersede old arrivals anyway;
            // shed the oldest to stay bounded.
            if let Some(oldest) = self.buffer.keys().next().copied() {
                self.buffer.remove(&oldest);
            }
        }
        self.stats.deltas_buffered += 1;
        self.buffer.insert(delta.sequence, delta);
        if self.state == SyncState::Synced {
            tracing::debug!("sequence gap detected; buffering");
            self.state = SyncState::Buffering;
        }
        if self.state == SyncState::Buffering && self.gap_since.is_none() {
            self.gap_since = Some(now);
        }
        IngestOutcome::Buffered
    }

    fn apply_batch(&mut self, batch: Batch) {
        if batch.ops.is_empty() {
            return;
        }
        let started = Instant::now();
        let mut to_apply: Vec<DeltaOp> = Vec::with_capacity(batch.ops.len());
        for BatchedOp {
            op,
            origin,
            timestamp_ms,
        } in batch.ops
        {
            match origin {
                Origin::Local => {
                    self.resolver.record_local(&op, timestamp_ms);
                    to_apply.push(op);
                }
                Origin::Remote => match self.resolver.resolve_remote(op, timestamp_ms) {
                    Resolution::ApplyRemote(op) | Resolution::ApplyBoth(op) => to_apply.push(op),
                    Resolution::KeepLocal => {}
                    Resolution::Deferred(conflict) => self.deferred.push(*conflict),
                },
            }
        }
        let report = delta::apply_ops(&mut self.store, &to_apply);
        self.queue.record_flush_duration(started.elapsed());
        self.stats.ops_applied += report.applied as u64;
        self.stats.ops_dropped += report.dropped as u64;
        self.pending_snapshot = Some(self.store.snapshot());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use skein_graph::{NodeId, NodeInput};

    fn delta(sequence: u64, ops: Vec<DeltaOp>) -> Delta {
        Delta {
            sequence,
            timestamp_ms: sequence * 10,
            ops,
        }
    }

    fn add(id: &str) -> DeltaOp {
        DeltaOp::AddNode(NodeInput::new(id, "n"))
    }

    fn loaded_coordinator(sequence: u64) -> SyncCoordinator {
        let mut coord = SyncCoordinator::new(GraphStore::default(), SyncConfig::default());
        let ticket = coord.take_resync_ticket().unwrap();
        let response = ResyncResponse {
            nodes: Vec::new(),
            edges: Vec::new(),
            sequence,
        };
        let outcome = coord
            .complete_resync(ticket.token, Ok(response), Instant::now())
            .unwrap();
        assert!(matches!(outcome, ResyncOutcome::Loaded(_)));
        coord
    }

    fn settle(coord: &mut SyncCoordinator, now: Instant) -> GraphSnapshot {
        // Force the pending batch through and grab the emitted snapshot.
        coord.pump(now + Duration::from_secs(5));
        coord
            .pump(now + Duration::from_secs(6))
            .snapshot
            .unwrap_or_else(|| coord.store().snapshot())
    }

    #[test]
    fn consecutive_deltas_apply_and_duplicates_drop() {
        let mut coord = loaded_coordinator(4);
        let now = Instant::now();
        assert_eq!(
            coord.ingest(delta(5, vec![add("a")]), now),
            IngestOutcome::Accepted
        );
        assert_eq!(
            coord.ingest(delta(5, vec![add("a")]), now),
            IngestOutcome::Duplicate
        );
        let snap = settle(&mut coord, now);
        assert_eq!(snap.node_count(), 1);
        assert_eq!(coord.stats().duplicates_dropped, 1);
    }

    #[test]
    fn gap_buffers_then_replays_in_order() {
        let mut coord = loaded_coordinator(4);
        let now = Instant::now();
        assert_eq!(
            coord.ingest(delta(5, vec![add("a")]), now),
            IngestOutcome::Accepted
        );
        assert_eq!(
            coord.ingest(delta(7, vec![add("c")]), now),
            IngestOutcome::Buffered
        );
        assert_eq!(coord.state(), SyncState::Buffering);
        assert_eq!(
            coord.ingest(delta(6, vec![add("b")]), now),
            IngestOutcome::Accepted
        );
        assert_eq!(coord.state(), SyncState::Synced);
        assert_eq!(coord.last_applied(), Some(7));
        let replayed = settle(&mut coord, now);

        // Same stream delivered in order must land in the same state.
        let mut ordered = loaded_coordinator(4);
        for (seq, id) in [(5, "a"), (6, "b"), (7, "c")] {
            ordered.ingest(delta(seq, vec![add(id)]), now);
        }
        let reference = settle(&mut ordered, now);
        assert_eq!(replayed.state_hash(), reference.state_hash());
    }

    #[test]
    fn reingesting_an_applied_sequence_leaves_state_unchanged() {
        let mut coord = loaded_coordinator(0);
        let now = Instant::now();
        coord.ingest(delta(1, vec![add("a")]), now);
        let first = settle(&mut coord, now);
        coord.ingest(delta(1, vec![add("a")]), now);
        let second = settle(&mut coord, now);
        assert_eq!(first.state_hash(), second.state_hash());
    }

    #[test]
    fn buffer_overflow_forces_a_resync() {
        let cfg = SyncConfig {
            buffer_max: 2,
            ..SyncConfig::default()
        };
        let mut coord = SyncCoordinator::new(GraphStore::default(), cfg);
        let ticket = coord.take_resync_ticket().unwrap();
        coord
            .complete_resync(
                ticket.token,
                Ok(ResyncResponse {
                    nodes: Vec::new(),
                    edges: Vec::new(),
                    sequence: 0,
                }),
                Instant::now(),
            )
            .unwrap();
        let now = Instant::now();
        assert_eq!(coord.ingest(delta(5, vec![]), now), IngestOutcome::Buffered);
        assert_eq!(coord.ingest(delta(7, vec![]), now), IngestOutcome::Buffered);
        let outcome = coord.ingest(delta(9, vec![]), now);
        let IngestOutcome::ResyncNeeded(ticket) = outcome else {
            unreachable!("expected resync, got {outcome:?}");
        };
        assert_eq!(ticket.request.since, Some(0));
        assert_eq!(coord.state(), SyncState::Resyncing);
    }

    #[test]
    fn gap_timeout_falls_back_to_resync() {
        let cfg = SyncConfig {
            buffer_timeout: Duration::from_millis(100),
            ..SyncConfig::default()
        };
        let mut coord = SyncCoordinator::new(GraphStore::default(), cfg);
        let ticket = coord.take_resync_ticket().unwrap();
        coord
            .complete_resync(
                ticket.token,
                Ok(ResyncResponse {
                    nodes: Vec::new(),
                    edges: Vec::new(),
                    sequence: 0,
                }),
                Instant::now(),
            )
            .unwrap();
        let now = Instant::now();
        coord.ingest(delta(3, vec![]), now);
        assert_eq!(coord.state(), SyncState::Buffering);
        let outcome = coord.pump(now + Duration::from_millis(150));
        assert!(outcome.resync.is_some());
        assert_eq!(coord.state(), SyncState::Resyncing);
    }

    #[test]
    fn stale_resync_results_are_discarded() {
        let mut coord = SyncCoordinator::new(GraphStore::default(), SyncConfig::default());
        let first = coord.take_resync_ticket().unwrap();
        // A newer request supersedes the first.
        let second = coord.request_resync();
        let outcome = coord
            .complete_resync(
                first.token,
                Ok(ResyncResponse {
                    nodes: vec![NodeInput::new("stale", "n")],
                    edges: Vec::new(),
                    sequence: 9,
                }),
                Instant::now(),
            )
            .unwrap();
        assert!(matches!(outcome, ResyncOutcome::Stale));
        assert_eq!(coord.store().node_count(), 0);
        // The live ticket still works.
        let outcome = coord
            .complete_resync(
                second.token,
                Ok(ResyncResponse {
                    nodes: vec![NodeInput::new("live", "n")],
                    edges: Vec::new(),
                    sequence: 10,
                }),
                Instant::now(),
            )
            .unwrap();
        assert!(matches!(outcome, ResyncOutcome::Loaded(_)));
        assert_eq!(coord.store().node_count(), 1);
        assert_eq!(coord.last_applied(), Some(10));
    }

    #[test]
    fn resync_discards_ops_queued_before_the_snapshot() {
        let cfg = SyncConfig {
            buffer_max: 1,
            ..SyncConfig::default()
        };
        let mut coord = SyncCoordinator::new(GraphStore::default(), cfg);
        let ticket = coord.take_resync_ticket().unwrap();
        coord
            .complete_resync(
                ticket.token,
                Ok(ResyncResponse {
                    nodes: Vec::new(),
                    edges: Vec::new(),
                    sequence: 0,
                }),
                Instant::now(),
            )
            .unwrap();
        let now = Instant::now();
        // Accepted into the queue but never flushed.
        assert_eq!(
            coord.ingest(delta(1, vec![add("x")]), now),
            IngestOutcome::Accepted
        );
        coord.ingest(delta(5, vec![]), now);
        let outcome = coord.ingest(delta(7, vec![]), now);
        let IngestOutcome::ResyncNeeded(ticket) = outcome else {
            unreachable!("expected resync, got {outcome:?}");
        };
        // The authoritative snapshot deleted "x" server-side.
        coord
            .complete_resync(
                ticket.token,
                Ok(ResyncResponse {
                    nodes: vec![NodeInput::new("y", "n")],
                    edges: Vec::new(),
                    sequence: 10,
                }),
                now,
            )
            .unwrap();
        // A later pump must not resurrect the stranded add.
        coord.pump(now + Duration::from_secs(5));
        assert_eq!(coord.store().node_count(), 1);
        assert!(coord.store().contains_node(&NodeId::from("y")));
        assert!(!coord.store().contains_node(&NodeId::from("x")));
    }

    #[test]
    fn consumed_resync_token_cannot_reload_a_redelivered_snapshot() {
        let mut coord = SyncCoordinator::new(GraphStore::default(), SyncConfig::default());
        let ticket = coord.take_resync_ticket().unwrap();
        let response = ResyncResponse {
            nodes: Vec::new(),
            edges: Vec::new(),
            sequence: 5,
        };
        coord
            .complete_resync(ticket.token, Ok(response.clone()), Instant::now())
            .unwrap();
        let now = Instant::now();
        coord.ingest(delta(6, vec![add("a")]), now);
        assert_eq!(coord.last_applied(), Some(6));
        // The transport redelivers the already-consumed snapshot.
        let outcome = coord
            .complete_resync(ticket.token, Ok(response), now)
            .unwrap();
        assert!(matches!(outcome, ResyncOutcome::Stale));
        // The stream position did not regress.
        assert_eq!(coord.last_applied(), Some(6));
        assert_eq!(coord.state(), SyncState::Synced);
    }

    #[test]
    fn resync_failures_beyond_budget_are_fatal() {
        let cfg = SyncConfig {
            resync_retry_budget: 1,
            ..SyncConfig::default()
        };
        let mut coord = SyncCoordinator::new(GraphStore::default(), cfg);
        let ticket = coord.take_resync_ticket().unwrap();
        let retry = coord
            .complete_resync(
                ticket.token,
                Err(ResyncFailure::new("connection reset")),
                Instant::now(),
            )
            .unwrap();
        let ResyncOutcome::Retry(retry_ticket) = retry else {
            unreachable!("first failure should retry");
        };
        let fatal = coord.complete_resync(
            retry_ticket.token,
            Err(ResyncFailure::new("connection reset")),
            Instant::now(),
        );
        assert!(matches!(
            fatal,
            Err(SyncError::ConnectivityLost { attempts: 2 })
        ));
        // The store was never touched along the failure path.
        assert_eq!(coord.store().node_count(), 0);
    }

    #[test]
    fn immediate_local_ops_flush_alone_and_emit_a_snapshot() {
        let mut coord = loaded_coordinator(0);
        let now = Instant::now();
        coord.submit_local(add("ui-node"), Priority::Immediate, 100, now);
        let outcome = coord.pump(now);
        let snap = outcome.snapshot.unwrap();
        assert_eq!(snap.node_count(), 1);
        assert_eq!(coord.queue_stats().immediate_flushes, 1);
    }
}
