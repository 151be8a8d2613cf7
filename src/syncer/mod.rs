// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reconciliation syncer.
//!
//! While writes go to both stores but reads still come from legacy, the
//! unified copy can drift: tolerated secondary failures, detached writes lost
//! to a crash, rollbacks that did not go through. The syncer converges unified
//! toward legacy on a fixed interval, one resource type per syncer.
//!
//! ```text
//!   tick ──► policy dual-write, legacy reads? ──► acquire lease ──► list unified (all pages)
//!                                                                  list legacy  (all pages)
//!                                                                        │
//!                                            release lease ◄── heal ◄── pair by name
//! ```
//!
//! A pass never works from a partial view: if either listing exceeds
//! `sync_max_items` the pass fails before touching anything. Individual item
//! failures are counted and logged, never fatal.
//!
//! # Cancellation
//!
//! Each pass runs under a timeout slightly shorter than the interval. On
//! expiry the pass future is dropped, so no further item fix starts; fixes
//! already applied stand.

mod diff;

pub use diff::{pair, SyncAction, SyncItem};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::MigrationConfig;
use crate::error::MigrationError;
use crate::metrics::MetricsSink;
use crate::policy::{RoutingPolicy, Store};
use crate::resource::ResourceObject;
use crate::router::PolicySource;
use crate::storage::traits::{ListOptions, LockService, ResourceStore, StorageError, WriteOptions};

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub resource_type: String,
    pub policy: String,
    /// Items whose copies disagreed
    pub divergent: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl SyncReport {
    /// Every divergent item was resolved.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.divergent == self.upserted + self.deleted
    }
}

/// Background reconciler for one resource type.
pub struct Syncer {
    resource_type: String,
    legacy: Arc<dyn ResourceStore>,
    unified: Arc<dyn ResourceStore>,
    source: PolicySource,
    locks: Arc<dyn LockService>,
    metrics: Arc<dyn MetricsSink>,
    /// Lease holder id, unique per syncer instance
    holder: String,
    job_name: String,
    interval: Duration,
    timeout: Duration,
    lock_stale: Duration,
    max_items: usize,
    page_size: usize,
    last_report: Mutex<Option<SyncReport>>,
}

impl Syncer {
    pub fn new(
        resource_type: impl Into<String>,
        legacy: Arc<dyn ResourceStore>,
        unified: Arc<dyn ResourceStore>,
        source: PolicySource,
        locks: Arc<dyn LockService>,
        config: &MigrationConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            legacy,
            unified,
            source,
            locks,
            metrics,
            holder: uuid::Uuid::new_v4().to_string(),
            job_name: config.sync_job_name.clone(),
            interval: config.sync_interval(),
            timeout: config.sync_timeout(),
            lock_stale: config.sync_lock_stale(),
            max_items: config.sync_max_items,
            page_size: config.sync_page_size.max(1),
            last_report: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// `<job-name>-<policyID>-<resourceType>`
    #[must_use]
    pub fn lock_key(&self, policy: &RoutingPolicy) -> String {
        format!("{}-{}-{}", self.job_name, policy.label(), self.resource_type)
    }

    /// Report of the most recent completed pass.
    #[must_use]
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().clone()
    }

    /// Run [`Syncer::run`] on its own task.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Tick until cancelled. A pass in flight when cancellation arrives is
    /// allowed to finish (it is bounded by the pass timeout).
    #[instrument(skip(self, cancel), fields(resource_type = %self.resource_type))]
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), holder = %self.holder, "Syncer running");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Syncer stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(Some(report)) if !report.is_synced() => {
                            warn!(failed = report.failed, divergent = report.divergent, "Pass left items unsynced");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Sync pass failed"),
                    }
                }
            }
        }
    }

    /// One locked pass.
    ///
    /// `Ok(None)` when the tick is skipped: the policy does not call for
    /// healing, a migration is running, or another holder owns the lease.
    /// `Err` is a failed pass; nothing was mutated unless the pass timed out
    /// midway.
    #[instrument(skip(self), fields(resource_type = %self.resource_type))]
    pub async fn run_once(&self) -> Result<Option<SyncReport>, MigrationError> {
        let (policy, migrating) = self.source.current(&self.resource_type).await?;
        if migrating {
            debug!("Migration running, skipping sync");
            return Ok(None);
        }
        if !policy.is_dual_write() || policy.read_store() != Store::Legacy {
            debug!(policy = %policy.label(), "Policy does not call for sync, skipping");
            return Ok(None);
        }

        let key = self.lock_key(&policy);
        if !self.locks.try_acquire(&key, &self.holder, self.lock_stale).await? {
            warn!(lock = %key, "Sync lease held elsewhere, skipping");
            return Ok(None);
        }

        let label = policy.label();
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.pass(&label, start)).await {
            Ok(result) => result,
            Err(_) => Err(MigrationError::Timeout),
        };

        if let Err(e) = self.locks.release(&key, &self.holder).await {
            warn!(lock = %key, error = %e, "Failed to release sync lease, it will go stale");
        }

        match result {
            Ok(report) => {
                self.metrics
                    .record_sync_pass(&self.resource_type, &label, report.is_synced(), report.duration);
                info!(
                    policy = %label,
                    divergent = report.divergent,
                    upserted = report.upserted,
                    deleted = report.deleted,
                    failed = report.failed,
                    duration_ms = report.duration.as_millis() as u64,
                    "Sync pass complete"
                );
                *self.last_report.lock() = Some(report.clone());
                Ok(Some(report))
            }
            Err(e) => {
                self.metrics.record_sync_pass(&self.resource_type, &label, false, start.elapsed());
                Err(e)
            }
        }
    }

    async fn pass(&self, label: &str, start: Instant) -> Result<SyncReport, MigrationError> {
        let unified = self.list_all(Store::Unified).await?;
        let legacy = self.list_all(Store::Legacy).await?;
        let items = pair(legacy, unified);

        let mut report = SyncReport {
            resource_type: self.resource_type.clone(),
            policy: label.to_string(),
            divergent: 0,
            upserted: 0,
            deleted: 0,
            failed: 0,
            duration: Duration::ZERO,
        };

        for item in &items {
            let action = item.action();
            if action == SyncAction::None {
                continue;
            }
            report.divergent += 1;

            let result = self.heal(item, action).await;
            self.metrics
                .record_sync_item(&self.resource_type, label, action.as_str(), result.is_ok());
            match result {
                Ok(()) if action == SyncAction::Upsert => report.upserted += 1,
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(name = %item.name, action = action.as_str(), error = %e, "Failed to heal item");
                }
            }
        }

        report.duration = start.elapsed();
        Ok(report)
    }

    async fn heal(&self, item: &SyncItem, action: SyncAction) -> Result<(), StorageError> {
        match action {
            SyncAction::Upsert => {
                let Some(request) = item.upsert_request() else {
                    return Ok(());
                };
                self.unified
                    .update(&item.name, &request, WriteOptions::default())
                    .await
                    .map(|_| ())
            }
            SyncAction::Delete => match self.unified.delete(&item.name, WriteOptions::default()).await {
                Ok(_) | Err(StorageError::NotFound) => Ok(()),
                Err(e) => Err(e),
            },
            SyncAction::None => Ok(()),
        }
    }

    /// Every object of one store, refusing to return a truncated view.
    async fn list_all(&self, store: Store) -> Result<Vec<ResourceObject>, MigrationError> {
        let target = match store {
            Store::Legacy => &self.legacy,
            Store::Unified => &self.unified,
        };

        let mut items = Vec::new();
        let mut options = ListOptions::with_limit(self.page_size);
        loop {
            let page = target.list(&options).await?;
            items.extend(page.items);
            if items.len() > self.max_items {
                warn!(%store, max = self.max_items, "Listing exceeds cap, refusing partial sync");
                return Err(MigrationError::ListLimitExceeded {
                    store: store.as_str().to_string(),
                    max: self.max_items,
                });
            }
            if page.continue_token.is_empty() {
                return Ok(items);
            }
            options = ListOptions::with_limit(self.page_size).continue_from(page.continue_token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::storage::memory::{InMemoryLockService, InMemoryResourceStore};
    use serde_json::json;

    fn syncer(
        policy: RoutingPolicy,
        legacy: Arc<InMemoryResourceStore>,
        unified: Arc<InMemoryResourceStore>,
        locks: Arc<InMemoryLockService>,
        config: &MigrationConfig,
    ) -> Syncer {
        Syncer::new(
            "folders",
            legacy,
            unified,
            PolicySource::Fixed(policy),
            locks,
            config,
            Arc::new(NoopMetrics),
        )
    }

    #[test]
    fn test_report_synced() {
        let mut report = SyncReport {
            resource_type: "folders".into(),
            policy: "2".into(),
            divergent: 2,
            upserted: 1,
            deleted: 1,
            failed: 0,
            duration: Duration::ZERO,
        };
        assert!(report.is_synced());
        report.upserted = 0;
        report.failed = 1;
        assert!(!report.is_synced());
    }

    #[test]
    fn test_lock_key_format() {
        let config = MigrationConfig::default();
        let s = syncer(
            RoutingPolicy::VALIDATED_DUAL_WRITE,
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(InMemoryLockService::new()),
            &config,
        );
        assert_eq!(s.lock_key(&RoutingPolicy::VALIDATED_DUAL_WRITE), "dualwrite-syncer-2-folders");
    }

    #[tokio::test]
    async fn test_skips_when_not_dual_write_with_legacy_reads() {
        let config = MigrationConfig::default();
        let legacy = Arc::new(InMemoryResourceStore::new());
        legacy
            .create(ResourceObject::new("a", json!({})), WriteOptions::default())
            .await
            .unwrap();

        for policy in [RoutingPolicy::LEGACY_ONLY, RoutingPolicy::UNIFIED_PRIMARY, RoutingPolicy::UNIFIED_ONLY] {
            let unified = Arc::new(InMemoryResourceStore::new());
            let s = syncer(policy, legacy.clone(), unified.clone(), Arc::new(InMemoryLockService::new()), &config);
            assert_eq!(s.run_once().await.unwrap(), None);
            assert!(unified.is_empty());
        }
    }

    #[tokio::test]
    async fn test_pass_releases_lock_and_keeps_report() {
        let config = MigrationConfig::default();
        let locks = Arc::new(InMemoryLockService::new());
        let legacy = Arc::new(InMemoryResourceStore::new());
        legacy
            .create(ResourceObject::new("a", json!({"v": 1})), WriteOptions::default())
            .await
            .unwrap();
        let unified = Arc::new(InMemoryResourceStore::new());

        let s = syncer(RoutingPolicy::SHADOW_WRITE, legacy, unified.clone(), locks.clone(), &config);
        let report = s.run_once().await.unwrap().unwrap();

        assert_eq!(report.upserted, 1);
        assert!(report.is_synced());
        assert_eq!(s.last_report(), Some(report));
        assert!(unified.contains("a"));
        assert_eq!(locks.holder(&s.lock_key(&RoutingPolicy::SHADOW_WRITE)), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let config = MigrationConfig {
            sync_interval_secs: 3600,
            ..Default::default()
        };
        let s = Arc::new(syncer(
            RoutingPolicy::SHADOW_WRITE,
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(InMemoryResourceStore::new()),
            Arc::new(InMemoryLockService::new()),
            &config,
        ));
        let cancel = CancellationToken::new();
        let handle = s.clone().spawn(cancel.clone());

        // The first tick fires immediately.
        tokio::time::timeout(Duration::from_secs(5), async {
            while s.last_report().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
