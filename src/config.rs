// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Configuration table from SPEC_FULL.md §6. Loadable from TOML; also
// constructible directly in code (tests, benches, demos).

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

/// One size class: `(chunk_size, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolClassConfig {
    pub chunk_size: u32,
    pub count: u32,
}

/// Overflow policy for a subscriber's delivery queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueFullPolicy {
    DiscardOldest,
    RejectNew,
}

impl Default for QueueFullPolicy {
    fn default() -> Self {
        Self::DiscardOldest
    }
}

/// The configuration table named in SPEC_FULL.md §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Size classes, in any order on input; `validate` sorts and checks them.
    pub mempool_config: Vec<MempoolClassConfig>,
    pub subscriber_queue_capacity: u32,
    #[serde(default)]
    pub subscriber_queue_full_policy: QueueFullPolicy,
    pub wait_set_capacity: u32,
    pub max_shm_size: u64,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, IpcError> {
        let mut cfg: Config =
            toml::from_str(s).map_err(|e| IpcError::InvalidConfig(e.to_string()))?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, IpcError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Sorts `mempool_config` by ascending `chunk_size` (required by §4.3's
    /// "mempools are sorted by ascending chunk_size") and validates the
    /// invariants this document relies on elsewhere.
    pub fn normalize_and_validate(&mut self) -> Result<(), IpcError> {
        if self.mempool_config.is_empty() {
            return Err(IpcError::InvalidConfig(
                "mempool_config must have at least one size class".into(),
            ));
        }
        self.mempool_config.sort_by_key(|c| c.chunk_size);
        for w in self.mempool_config.windows(2) {
            if w[0].chunk_size == w[1].chunk_size {
                return Err(IpcError::InvalidConfig(format!(
                    "duplicate chunk_size {} in mempool_config",
                    w[0].chunk_size
                )));
            }
        }
        for c in &self.mempool_config {
            if c.chunk_size == 0 {
                return Err(IpcError::InvalidConfig("chunk_size must be > 0".into()));
            }
            if c.count == 0 {
                return Err(IpcError::InvalidConfig("count must be > 0".into()));
            }
            if (c.chunk_size as u64) > self.max_shm_size {
                return Err(IpcError::InvalidConfig(format!(
                    "chunk_size {} exceeds max_shm_size {}",
                    c.chunk_size, self.max_shm_size
                )));
            }
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(IpcError::InvalidConfig(
                "subscriber_queue_capacity must be > 0".into(),
            ));
        }
        if self.wait_set_capacity == 0 {
            return Err(IpcError::InvalidConfig(
                "wait_set_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), IpcError> {
        self.clone().normalize_and_validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
            mempool_config = [ { chunk_size = 256, count = 16 }, { chunk_size = 128, count = 32 } ]
            subscriber_queue_capacity = 8
            subscriber_queue_full_policy = "DISCARD_OLDEST"
            wait_set_capacity = 4
            max_shm_size = 1048576
        "#;
        let cfg = Config::from_toml_str(toml).expect("parse");
        // normalize_and_validate sorts ascending.
        assert_eq!(cfg.mempool_config[0].chunk_size, 128);
        assert_eq!(cfg.mempool_config[1].chunk_size, 256);
    }

    #[test]
    fn rejects_empty_mempool_config() {
        let toml = r#"
            mempool_config = []
            subscriber_queue_capacity = 8
            wait_set_capacity = 4
            max_shm_size = 1048576
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_chunk_larger_than_segment() {
        let mut cfg = Config {
            mempool_config: vec![MempoolClassConfig {
                chunk_size: 2048,
                count: 1,
            }],
            subscriber_queue_capacity: 1,
            subscriber_queue_full_policy: QueueFullPolicy::RejectNew,
            wait_set_capacity: 1,
            max_shm_size: 1024,
        };
        assert!(cfg.normalize_and_validate().is_err());
    }
}
