// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Store configuration.

use std::time::Duration;

use thiserror::Error;

/// Tunables for a [`GraphStore`](crate::GraphStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Staleness horizon: nodes with no access for longer than this and no
    /// annotation holder are eligible for eviction in `run_cleanup`.
    pub ttl: Duration,
    /// Capacity bound of the filter-result cache (entries).
    pub filter_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            filter_cache_capacity: 64,
        }
    }
}

/// Rejected store configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// TTL of zero would evict everything on the next sweep.
    #[error("ttl must be non-zero")]
    ZeroTtl,
    /// A zero-capacity filter cache cannot memoize anything.
    #[error("filter cache capacity must be non-zero")]
    ZeroFilterCacheCapacity,
}

impl StoreConfig {
    /// Validates the configuration at a session boundary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        if self.filter_cache_capacity == 0 {
            return Err(ConfigError::ZeroFilterCacheCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(StoreConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let cfg = StoreConfig {
            ttl: Duration::ZERO,
            ..StoreConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTtl));
    }
}
