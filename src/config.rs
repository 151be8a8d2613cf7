// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the migration engine.
//!
//! # Example
//!
//! ```
//! use dualwrite_engine::MigrationConfig;
//!
//! // Minimal config (uses defaults)
//! let config = MigrationConfig::default();
//! assert_eq!(config.sync_interval_secs, 300);
//! assert_eq!(config.sync_max_items, 1000);
//!
//! // Pin a fixed policy for a type that is not runtime-configurable
//! let mut config = MigrationConfig {
//!     sync_interval_secs: 60,
//!     sync_lock_stale_secs: 120,
//!     ..Default::default()
//! };
//! config.static_policies.insert("dashboards".into(), 2);
//! assert!(config.policy_for("dashboards").unwrap().is_some());
//! ```

use std::collections::HashMap;
use std::time::Duration;
use serde::Deserialize;

use crate::error::MigrationError;
use crate::policy::RoutingPolicy;

/// Configuration for the router, status service and syncer.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// How often the syncer runs a reconciliation pass per resource type
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// A pass is cancelled after `interval - margin`
    #[serde(default = "default_sync_timeout_margin_secs")]
    pub sync_timeout_margin_secs: u64,

    /// Staleness ceiling of the distributed sync lock (must exceed the interval)
    #[serde(default = "default_sync_lock_stale_secs")]
    pub sync_lock_stale_secs: u64,

    /// Max items listed from either store before a pass is refused
    #[serde(default = "default_sync_max_items")]
    pub sync_max_items: usize,

    /// Page size used while fully paginating a store
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: usize,

    /// First segment of the syncer lock key
    #[serde(default = "default_sync_job_name")]
    pub sync_job_name: String,

    /// A running migration older than this no longer blocks a new one
    #[serde(default = "default_migration_stale_secs")]
    pub migration_stale_secs: u64,

    /// Max concurrent detached secondary writes
    #[serde(default = "default_secondary_write_concurrency")]
    pub secondary_write_concurrency: usize,

    /// Shadow-read the non-authoritative store after Get and record the comparison
    #[serde(default)]
    pub compare_reads: bool,

    /// Resource type → static policy id (0–5) for non-runtime-configurable types
    #[serde(default)]
    pub static_policies: HashMap<String, u8>,
}

fn default_sync_interval_secs() -> u64 { 300 }
fn default_sync_timeout_margin_secs() -> u64 { 10 }
fn default_sync_lock_stale_secs() -> u64 { 600 }
fn default_sync_max_items() -> usize { 1000 }
fn default_sync_page_size() -> usize { 100 }
fn default_sync_job_name() -> String { "dualwrite-syncer".to_string() }
fn default_migration_stale_secs() -> u64 { 600 }
fn default_secondary_write_concurrency() -> usize { 32 }

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            sync_timeout_margin_secs: default_sync_timeout_margin_secs(),
            sync_lock_stale_secs: default_sync_lock_stale_secs(),
            sync_max_items: default_sync_max_items(),
            sync_page_size: default_sync_page_size(),
            sync_job_name: default_sync_job_name(),
            migration_stale_secs: default_migration_stale_secs(),
            secondary_write_concurrency: default_secondary_write_concurrency(),
            compare_reads: false,
            static_policies: HashMap::new(),
        }
    }
}

impl MigrationConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    /// Overall pass deadline, slightly shorter than the interval.
    #[must_use]
    pub fn sync_timeout(&self) -> Duration {
        let secs = self
            .sync_interval_secs
            .saturating_sub(self.sync_timeout_margin_secs)
            .max(1);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn sync_lock_stale(&self) -> Duration {
        Duration::from_secs(self.sync_lock_stale_secs)
    }

    #[must_use]
    pub fn migration_stale(&self) -> Duration {
        Duration::from_secs(self.migration_stale_secs)
    }

    /// Statically configured policy for a resource type, if any.
    ///
    /// Unknown policy ids are a configuration error, not a silent fallback.
    pub fn policy_for(&self, resource_type: &str) -> Result<Option<RoutingPolicy>, MigrationError> {
        match self.static_policies.get(resource_type) {
            None => Ok(None),
            Some(&id) => RoutingPolicy::from_id(id).map(Some).ok_or_else(|| {
                MigrationError::Invalid(format!(
                    "unknown policy id {} for resource type '{}'",
                    id, resource_type
                ))
            }),
        }
    }
}
