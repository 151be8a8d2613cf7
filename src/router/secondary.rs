// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Detached secondary work: fire-and-forget writes and shadow reads.
//!
//! Tasks are spawned immediately but run under a semaphore, so a burst of
//! writes never turns into an unbounded burst of concurrent secondary calls.
//! The only observable effects are logs, metrics, and the outcome broadcast.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};

use crate::metrics::{MetricsSink, WriteTimer};
use crate::policy::Store;
use crate::storage::traits::StorageError;

use super::Method;

const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

/// Result of one detached secondary call.
#[derive(Debug, Clone)]
pub struct SecondaryWriteOutcome {
    pub resource_type: String,
    pub method: Method,
    /// Object name, empty for collection calls
    pub name: String,
    pub store: Store,
    pub error: Option<StorageError>,
}

impl SecondaryWriteOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub(super) struct SecondaryPool {
    permits: Arc<Semaphore>,
    outcomes: broadcast::Sender<SecondaryWriteOutcome>,
    metrics: Arc<dyn MetricsSink>,
}

impl SecondaryPool {
    pub(super) fn new(concurrency: usize, metrics: Arc<dyn MetricsSink>) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            outcomes,
            metrics,
        }
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<SecondaryWriteOutcome> {
        self.outcomes.subscribe()
    }

    /// Spawn a secondary write. The caller never awaits it.
    pub(super) fn spawn_write<F>(&self, resource_type: &str, method: Method, name: &str, store: Store, write: F)
    where
        F: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let outcomes = self.outcomes.clone();
        let metrics = self.metrics.clone();
        let resource_type = resource_type.to_string();
        let name = name.to_string();

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let timer = WriteTimer::start();
            let result = write.await;
            metrics.record_write(store, method.as_str(), &resource_type, result.is_ok(), timer.elapsed());

            match &result {
                Ok(()) => debug!(%resource_type, %method, %name, %store, "Detached secondary write succeeded"),
                Err(e) => warn!(%resource_type, %method, %name, %store, error = %e, "Detached secondary write failed"),
            }

            // No subscribers is fine.
            let _ = outcomes.send(SecondaryWriteOutcome {
                resource_type,
                method,
                name,
                store,
                error: result.err(),
            });
        });
    }

    /// Spawn a read of the non-authoritative store and compare it with what
    /// the caller was served. `read` yields whether the two agree.
    pub(super) fn spawn_comparison<F>(&self, resource_type: &str, method: Method, name: &str, read: F)
    where
        F: Future<Output = Result<bool, StorageError>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();
        let resource_type = resource_type.to_string();
        let name = name.to_string();

        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            match read.await {
                Ok(matched) => {
                    metrics.record_read_comparison(&resource_type, method.as_str(), matched);
                    if !matched {
                        warn!(%resource_type, %method, %name, "Stores disagree on read");
                    }
                }
                Err(e) => debug!(%resource_type, %method, %name, error = %e, "Shadow read failed"),
            }
        });
    }
}
