// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test doubles: a store wrapper with precise error injection and a
//! metrics sink that records every signal.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dualwrite_engine::{
    InMemoryResourceStore, ListOptions, ListPage, MetricsSink, ResourceObject, ResourceStore, StorageError, Store,
    UpdateRequest, WriteOptions,
};

// =============================================================================
// Failing Store Wrapper - Precise Error Injection
// =============================================================================

/// Wraps an in-memory store and fails chosen methods on demand.
pub struct FailingStore {
    pub inner: Arc<InMemoryResourceStore>,
    calls: AtomicU64,
    /// Method name -> error to return
    failures: Mutex<HashMap<&'static str, StorageError>>,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryResourceStore>) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Fail every call of `method` with a backend error.
    pub fn fail(&self, method: &'static str) {
        self.fail_with(method, StorageError::Backend(format!("injected {method} failure")));
    }

    pub fn fail_with(&self, method: &'static str, err: StorageError) {
        self.failures.lock().insert(method, err);
    }

    pub fn heal(&self) {
        self.failures.lock().clear();
    }

    /// Calls made through the wrapper, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, method: &'static str) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for FailingStore {
    async fn get(&self, name: &str) -> Result<ResourceObject, StorageError> {
        self.maybe_fail("get")?;
        self.inner.get(name).await
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage, StorageError> {
        self.maybe_fail("list")?;
        self.inner.list(options).await
    }

    async fn create(&self, obj: ResourceObject, options: WriteOptions) -> Result<ResourceObject, StorageError> {
        self.maybe_fail("create")?;
        self.inner.create(obj, options).await
    }

    async fn update(
        &self,
        name: &str,
        request: &UpdateRequest,
        options: WriteOptions,
    ) -> Result<(ResourceObject, bool), StorageError> {
        self.maybe_fail("update")?;
        self.inner.update(name, request, options).await
    }

    async fn delete(&self, name: &str, options: WriteOptions) -> Result<(ResourceObject, bool), StorageError> {
        self.maybe_fail("delete")?;
        self.inner.delete(name, options).await
    }

    async fn delete_collection(
        &self,
        list: &ListOptions,
        options: WriteOptions,
    ) -> Result<Vec<ResourceObject>, StorageError> {
        self.maybe_fail("delete_collection")?;
        self.inner.delete_collection(list, options).await
    }
}

// =============================================================================
// Recording Metrics Sink
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Write { store: Store, method: String, success: bool },
    ReadComparison { method: String, matched: bool },
    Rollback { success: bool },
    SyncPass { policy: String, synced: bool },
    SyncItem { action: String, success: bool },
}

#[derive(Default)]
pub struct RecordingMetrics {
    signals: Mutex<Vec<Signal>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().clone()
    }

    pub fn rollbacks(&self) -> Vec<bool> {
        self.signals()
            .into_iter()
            .filter_map(|s| match s {
                Signal::Rollback { success } => Some(success),
                _ => None,
            })
            .collect()
    }

    pub fn sync_passes(&self) -> Vec<bool> {
        self.signals()
            .into_iter()
            .filter_map(|s| match s {
                Signal::SyncPass { synced, .. } => Some(synced),
                _ => None,
            })
            .collect()
    }

    pub fn sync_items(&self) -> Vec<(String, bool)> {
        self.signals()
            .into_iter()
            .filter_map(|s| match s {
                Signal::SyncItem { action, success } => Some((action, success)),
                _ => None,
            })
            .collect()
    }

    pub fn comparisons(&self) -> Vec<bool> {
        self.signals()
            .into_iter()
            .filter_map(|s| match s {
                Signal::ReadComparison { matched, .. } => Some(matched),
                _ => None,
            })
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_write(&self, store: Store, method: &str, _resource_type: &str, success: bool, _duration: Duration) {
        self.signals.lock().push(Signal::Write { store, method: method.to_string(), success });
    }

    fn record_read_comparison(&self, _resource_type: &str, method: &str, matched: bool) {
        self.signals
            .lock()
            .push(Signal::ReadComparison { method: method.to_string(), matched });
    }

    fn record_rollback(&self, _resource_type: &str, success: bool) {
        self.signals.lock().push(Signal::Rollback { success });
    }

    fn record_sync_pass(&self, _resource_type: &str, policy: &str, synced: bool, _duration: Duration) {
        self.signals
            .lock()
            .push(Signal::SyncPass { policy: policy.to_string(), synced });
    }

    fn record_sync_item(&self, _resource_type: &str, _policy: &str, action: &str, success: bool) {
        self.signals
            .lock()
            .push(Signal::SyncItem { action: action.to_string(), success });
    }
}

/// Poll until `check` holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
