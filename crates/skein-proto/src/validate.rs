// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Intra-delta consistency checking.
//!
//! A delta's operations, applied in list order, must be internally
//! consistent: an update must not follow a remove of the same entity
//! within the same delta (a re-add clears the tombstone). Malformed
//! deltas are rejected wholesale before any operation reaches the store.

use std::collections::HashSet;

use thiserror::Error;

use crate::{Delta, DeltaOp, EntityKey};

/// Why a delta was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeltaError {
    /// An update targets an entity removed earlier in the same delta.
    #[error("op {index} updates {entity:?} after removing it in the same delta")]
    UpdateAfterRemove {
        /// Index of the offending operation.
        index: usize,
        /// Entity both operations target.
        entity: EntityKey,
    },
}

impl Delta {
    /// Checks internal consistency; `Err` means no part of the delta may
    /// be applied.
    pub fn validate(&self) -> Result<(), DeltaError> {
        let mut removed: HashSet<EntityKey> = HashSet::new();
        for (index, op) in self.ops.iter().enumerate() {
            let entity = op.entity();
            match op {
                DeltaOp::RemoveNode { .. } | DeltaOp::RemoveEdge { .. } => {
                    removed.insert(entity);
                }
                DeltaOp::AddNode(_) | DeltaOp::AddEdge(_) => {
                    removed.remove(&entity);
                }
                DeltaOp::UpdateNode { .. } | DeltaOp::UpdateEdge { .. } => {
                    if removed.contains(&entity) {
                        return Err(DeltaError::UpdateAfterRemove { index, entity });
                    }
                }
            }
        }
        Ok(())
    }
}
