// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-write router.
//!
//! The [`DualWriter`] sits in front of the legacy and the unified store for
//! one resource type and routes every call according to a [`RoutingPolicy`]:
//!
//! ```text
//!   caller ──► resolve policy ──► migration gate ──► primary write ──┬─► Aborted(err)
//!              (status record      (mutations only)                  │
//!               or static id)                                        └─► secondary write ──┬─► Committed(result)
//!                                                                       (inline/detached)   └─► compensate + Aborted(err)
//! ```
//!
//! Reads never fan out: they go to the unified store when `read_unified` is
//! set and to the legacy store otherwise.
//!
//! # Cancellation
//!
//! Dropping the future of a routed call cancels whichever store call is in
//! flight. Detached secondary writes are spawned tasks owning their inputs, so
//! they complete regardless of what happens to the caller.

mod read;
mod secondary;
mod write;

pub use secondary::SecondaryWriteOutcome;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::metrics::{MetricsSink, WriteTimer};
use crate::policy::{RoutingPolicy, Store};
use crate::status::MigrationStatusService;
use crate::storage::traits::{ResourceStore, StorageError};

use secondary::SecondaryPool;

/// A routed operation (metrics label and log field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Create,
    Update,
    Delete,
    DeleteCollection,
    Get,
    List,
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DeleteCollection => "delete_collection",
            Self::Get => "get",
            Self::List => "list",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the routing policy of a resource type comes from.
#[derive(Clone)]
pub enum PolicySource {
    /// Statically configured; no status record, so no migration gate applies.
    Fixed(RoutingPolicy),
    /// Policy frozen at startup from a non-runtime-configurable record. The
    /// record is still consulted for the migration gate.
    Frozen(RoutingPolicy, Arc<MigrationStatusService>),
    /// Re-derived from the status record on every call.
    Runtime(Arc<MigrationStatusService>),
}

impl PolicySource {
    /// Static configuration wins; otherwise the status record decides whether
    /// the type is runtime-configurable or frozen at its current policy.
    pub async fn resolve(
        config: &MigrationConfig,
        resource_type: &str,
        status: Arc<MigrationStatusService>,
    ) -> Result<Self, MigrationError> {
        if let Some(policy) = config.policy_for(resource_type)? {
            return Ok(Self::Fixed(policy));
        }
        let record = status.status(resource_type).await?;
        if record.runtime_configurable {
            Ok(Self::Runtime(status))
        } else {
            Ok(Self::Frozen(RoutingPolicy::from_status(&record), status))
        }
    }

    /// Current policy, and whether a migration of the type is running.
    pub async fn current(&self, resource_type: &str) -> Result<(RoutingPolicy, bool), MigrationError> {
        match self {
            Self::Fixed(policy) => Ok((*policy, false)),
            Self::Frozen(policy, status) => {
                let record = status.status(resource_type).await?;
                Ok((*policy, record.is_migrating()))
            }
            Self::Runtime(status) => {
                let record = status.status(resource_type).await?;
                Ok((RoutingPolicy::from_status(&record), record.is_migrating()))
            }
        }
    }
}

/// Routes the operations of one resource type across both stores.
pub struct DualWriter {
    pub(super) resource_type: String,
    pub(super) legacy: Arc<dyn ResourceStore>,
    pub(super) unified: Arc<dyn ResourceStore>,
    pub(super) source: PolicySource,
    pub(super) metrics: Arc<dyn MetricsSink>,
    pub(super) secondary: SecondaryPool,
    pub(super) compare_reads: bool,
}

impl DualWriter {
    pub fn new(
        resource_type: impl Into<String>,
        legacy: Arc<dyn ResourceStore>,
        unified: Arc<dyn ResourceStore>,
        source: PolicySource,
        config: &MigrationConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            legacy,
            unified,
            source,
            secondary: SecondaryPool::new(config.secondary_write_concurrency, metrics.clone()),
            metrics,
            compare_reads: config.compare_reads,
        }
    }

    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Observe detached secondary writes and shadow-read comparisons.
    #[must_use]
    pub fn subscribe_secondary(&self) -> broadcast::Receiver<SecondaryWriteOutcome> {
        self.secondary.subscribe()
    }

    /// The policy a call made now would use.
    pub async fn policy(&self) -> Result<RoutingPolicy, MigrationError> {
        self.resolve(false).await
    }

    /// Resolve the policy; mutating calls are rejected while a migration runs.
    pub(super) async fn resolve(&self, mutating: bool) -> Result<RoutingPolicy, MigrationError> {
        let (policy, migrating) = self.source.current(&self.resource_type).await?;
        if mutating && migrating {
            debug!(resource_type = %self.resource_type, "Rejecting write during migration");
            return Err(MigrationError::TemporarilyUnavailable {
                resource_type: self.resource_type.clone(),
            });
        }
        Ok(policy)
    }

    pub(super) fn store(&self, store: Store) -> &Arc<dyn ResourceStore> {
        match store {
            Store::Legacy => &self.legacy,
            Store::Unified => &self.unified,
        }
    }

    /// Legacy cannot dry-run, so a dry run goes to unified whenever unified is live.
    pub(super) fn dry_run_store(policy: &RoutingPolicy) -> Store {
        if policy.write_unified { Store::Unified } else { Store::Legacy }
    }

    /// Run one store write, recording its duration and outcome.
    pub(super) async fn timed<T, F>(&self, store: Store, method: Method, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let timer = WriteTimer::start();
        let result = call.await;
        self.metrics
            .record_write(store, method.as_str(), &self.resource_type, result.is_ok(), timer.elapsed());
        result
    }
}
