// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration status records and their lifecycle.
//!
//! One [`StatusRecord`] exists per resource type. It is created lazily with
//! safe defaults the first time anyone asks for it, and it only ever changes
//! through [`MigrationStatusService::start_migration`] and
//! [`MigrationStatusService::update`]. Every persisted change goes through the
//! store's compare-and-set on `updateKey`, so several service instances can
//! share one store without in-process locking.
//!
//! ```text
//!            start_migration            update(migratingAt=0, migratedAt=now)
//!  idle ───────────────────────► migrating ─────────────────────────────────► migrated
//!   ▲                               │
//!   └──── update(migratingAt=0) ────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::MigrationError;
use crate::storage::traits::StatusStore;

/// Concurrent first-access races are resolved by re-reading; this bounds the loop.
const MAX_CREATE_ATTEMPTS: usize = 3;

/// Current time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Persisted migration state of one resource type.
///
/// Serialized as a flat JSON object:
/// ```json
/// {"resourceType":"folders","writeLegacy":true,"writeUnified":true,"readUnified":false,
///  "migratedAt":0,"migratingAt":0,"runtimeConfigurable":true,"updateKey":1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub resource_type: String,
    pub write_legacy: bool,
    pub write_unified: bool,
    pub read_unified: bool,
    /// Epoch millis when the initial backfill completed, 0 if never
    pub migrated_at: i64,
    /// Epoch millis when the running migration started, 0 if none
    pub migrating_at: i64,
    pub runtime_configurable: bool,
    /// Optimistic-concurrency token
    pub update_key: i64,
}

impl StatusRecord {
    /// Defaults for a resource type seen for the first time.
    pub fn initial(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            write_legacy: true,
            write_unified: true,
            read_unified: false,
            migrated_at: 0,
            migrating_at: 0,
            runtime_configurable: true,
            update_key: 1,
        }
    }

    #[must_use]
    pub fn is_migrating(&self) -> bool {
        self.migrating_at > 0
    }

    #[must_use]
    pub fn is_migrated(&self) -> bool {
        self.migrated_at > 0
    }

    /// Check the record invariants.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if !self.write_legacy && !self.write_unified {
            return Err(MigrationError::Invalid(
                "at least one of writeLegacy or writeUnified must be set".into(),
            ));
        }
        if self.read_unified && !self.write_unified {
            return Err(MigrationError::Invalid("readUnified requires writeUnified".into()));
        }
        if self.read_unified && self.migrated_at <= 0 {
            return Err(MigrationError::Invalid(
                "readUnified requires a completed migration (migratedAt > 0)".into(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle and optimistic-concurrency rules over a [`StatusStore`].
pub struct MigrationStatusService {
    store: Arc<dyn StatusStore>,
    migration_stale: Duration,
}

impl MigrationStatusService {
    /// `migration_stale` is how long a started migration blocks a new one.
    pub fn new(store: Arc<dyn StatusStore>, migration_stale: Duration) -> Self {
        Self { store, migration_stale }
    }

    /// Return the record, creating and persisting the default one on first access.
    #[instrument(skip(self))]
    pub async fn status(&self, resource_type: &str) -> Result<StatusRecord, MigrationError> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            if let Some(record) = self.store.get(resource_type).await? {
                return Ok(record);
            }

            let record = StatusRecord::initial(resource_type);
            if self.store.compare_and_set(resource_type, None, &record).await? {
                info!(resource_type, "Created default migration status");
                return Ok(record);
            }
            // Another caller created it first: read theirs.
            debug!(resource_type, "Lost status create race, re-reading");
        }

        Err(MigrationError::Generic(format!(
            "status record for '{}' could not be created or read",
            resource_type
        )))
    }

    /// Mark a migration as running.
    ///
    /// The stale-key check comes first so a stale caller always sees
    /// `KeyMismatch`, whatever else changed since it last read.
    #[instrument(skip(self))]
    pub async fn start_migration(
        &self,
        resource_type: &str,
        expected_update_key: i64,
    ) -> Result<StatusRecord, MigrationError> {
        let current = self.status(resource_type).await?;

        if expected_update_key != current.update_key {
            return Err(MigrationError::KeyMismatch {
                expected: expected_update_key,
                actual: current.update_key,
            });
        }
        if current.is_migrated() {
            return Err(MigrationError::AlreadyMigrated(resource_type.to_string()));
        }

        let now = now_millis();
        if current.is_migrating() {
            let age = now.saturating_sub(current.migrating_at);
            if age < self.migration_stale.as_millis() as i64 {
                return Err(MigrationError::MigrationInProgress(resource_type.to_string()));
            }
            warn!(resource_type, age_ms = age, "Superseding stale migration");
        }

        let mut next = current.clone();
        next.migrating_at = now;
        next.update_key = current.update_key + 1;
        self.persist(resource_type, current.update_key, next).await
    }

    /// Replace the record. `migratingAt` may only be cleared here, never set.
    #[instrument(skip(self, record), fields(update_key = record.update_key))]
    pub async fn update(
        &self,
        resource_type: &str,
        record: StatusRecord,
    ) -> Result<StatusRecord, MigrationError> {
        let current = self.status(resource_type).await?;

        if record.update_key != current.update_key {
            return Err(MigrationError::KeyMismatch {
                expected: record.update_key,
                actual: current.update_key,
            });
        }
        if record.migrating_at > 0 {
            return Err(MigrationError::Invalid(
                "migratingAt can only be cleared by update; use start_migration to set it".into(),
            ));
        }
        if record.resource_type != resource_type {
            return Err(MigrationError::Invalid(format!(
                "record is for '{}', not '{}'",
                record.resource_type, resource_type
            )));
        }
        record.validate()?;

        let mut next = record;
        next.update_key = current.update_key + 1;
        self.persist(resource_type, current.update_key, next).await
    }

    /// Record a completed backfill: sets `migratedAt` and clears `migratingAt`.
    #[instrument(skip(self))]
    pub async fn finish_migration(
        &self,
        resource_type: &str,
        expected_update_key: i64,
    ) -> Result<StatusRecord, MigrationError> {
        let current = self.status(resource_type).await?;
        let mut next = current;
        next.update_key = expected_update_key;
        next.migrating_at = 0;
        next.migrated_at = now_millis();
        self.update(resource_type, next).await
    }

    async fn persist(
        &self,
        resource_type: &str,
        expected: i64,
        next: StatusRecord,
    ) -> Result<StatusRecord, MigrationError> {
        if self.store.compare_and_set(resource_type, Some(expected), &next).await? {
            debug!(resource_type, update_key = next.update_key, "Persisted migration status");
            return Ok(next);
        }

        // A concurrent writer got there between our read and our write.
        let actual = self
            .store
            .get(resource_type)
            .await?
            .map_or(0, |r| r.update_key);
        Err(MigrationError::KeyMismatch { expected, actual })
    }
}
