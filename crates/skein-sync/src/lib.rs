// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! skein-sync: the incremental synchronization pipeline.
//!
//! Control flow: transport → [`SyncCoordinator`] (sequence check) →
//! [`UpdateQueue`] (coalescing, batching, adaptive throttling) →
//! [`ConflictResolver`] (local-vs-remote overlaps) → delta application →
//! store → one immutable snapshot per completed flush for the rendering
//! surface. Gaps that the bounded reorder buffer cannot repair fall back
//! to a cancellable full resync.

mod conflict;
mod coordinator;
pub mod delta;
mod queue;

/// Conflict detection and resolution.
pub use conflict::{
    Conflict, ConflictResolver, ConflictStats, PendingLocal, Resolution, ResolutionStrategy,
};
/// The coordinator state machine and its outcome types.
pub use coordinator::{
    IngestOutcome, PumpOutcome, ResyncFailure, ResyncOutcome, ResyncTicket, SyncConfig,
    SyncCoordinator, SyncError, SyncState, SyncStats,
};
/// Delta processing (diff/apply) report type.
pub use delta::ApplyReport;
/// Update queue, batching, and priorities.
pub use queue::{Batch, BatchedOp, BatcherConfig, Priority, QueueStats, UpdateQueue};
