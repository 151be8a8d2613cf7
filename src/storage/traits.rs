// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Contracts of the external collaborators: the two resource stores, the
//! status record persistence and the distributed lock service.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use thiserror::Error;

use crate::resource::ResourceObject;
use crate::status::StatusRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Options shared by every mutating call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Validate and compute the result without persisting
    pub dry_run: bool,
}

impl WriteOptions {
    #[must_use]
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Paginated list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Max items per call (0 = store default / unbounded)
    pub limit: usize,
    /// Opaque token from the previous page, empty for the first page
    pub continue_token: String,
}

impl ListOptions {
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit, continue_token: String::new() }
    }

    #[must_use]
    pub fn continue_from(mut self, token: impl Into<String>) -> Self {
        self.continue_token = token.into();
        self
    }
}

/// One page of a list call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<ResourceObject>,
    /// Empty when there are no more pages
    pub continue_token: String,
}

/// Computes the new object from the current one (`None` if absent).
pub type Mutator =
    Arc<dyn Fn(Option<ResourceObject>) -> Result<ResourceObject, StorageError> + Send + Sync>;

/// An update that can be replayed against more than one store.
#[derive(Clone)]
pub struct UpdateRequest {
    pub mutator: Mutator,
    /// Create the object if it does not exist
    pub force_create: bool,
}

impl UpdateRequest {
    pub fn new<F>(mutator: F) -> Self
    where
        F: Fn(Option<ResourceObject>) -> Result<ResourceObject, StorageError> + Send + Sync + 'static,
    {
        Self { mutator: Arc::new(mutator), force_create: false }
    }

    /// Replace whatever is stored with `obj`.
    pub fn replace(obj: ResourceObject) -> Self {
        Self::new(move |_| Ok(obj.clone()))
    }

    /// Write `source`'s payload over whatever the target store holds, keeping
    /// the target's own identity. Creates the object if it is missing.
    pub fn mirror(source: ResourceObject) -> Self {
        Self::new(move |current| {
            let mut next = source.clone();
            match current {
                Some(existing) => next.adopt_identity(&existing),
                None => next.clear_identity(),
            }
            Ok(next)
        })
        .force_create()
    }

    /// Same mutation, but identity fields the caller copied from the other
    /// store are replaced by the target store's own.
    #[must_use]
    pub fn with_target_identity(&self) -> Self {
        let inner = self.mutator.clone();
        let mut request = Self::new(move |current| {
            let mut next = inner(current.clone())?;
            match current {
                Some(existing) => next.adopt_identity(&existing),
                None => next.clear_identity(),
            }
            Ok(next)
        });
        request.force_create = self.force_create;
        request
    }

    #[must_use]
    pub fn force_create(mut self) -> Self {
        self.force_create = true;
        self
    }

    pub fn apply(&self, current: Option<ResourceObject>) -> Result<ResourceObject, StorageError> {
        (self.mutator)(current)
    }
}

impl std::fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("force_create", &self.force_create)
            .finish_non_exhaustive()
    }
}

/// A store holding the objects of one resource type.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<ResourceObject, StorageError>;

    async fn list(&self, options: &ListOptions) -> Result<ListPage, StorageError>;

    async fn create(&self, obj: ResourceObject, options: WriteOptions) -> Result<ResourceObject, StorageError>;

    /// Returns the stored object and whether it was created.
    async fn update(
        &self,
        name: &str,
        request: &UpdateRequest,
        options: WriteOptions,
    ) -> Result<(ResourceObject, bool), StorageError>;

    /// Returns the deleted object and whether deletion completes asynchronously.
    async fn delete(&self, name: &str, options: WriteOptions) -> Result<(ResourceObject, bool), StorageError>;

    /// Deletes the objects `list` would return: one page when a limit is set,
    /// starting after the store's own continue token.
    async fn delete_collection(
        &self,
        list: &ListOptions,
        options: WriteOptions,
    ) -> Result<Vec<ResourceObject>, StorageError>;
}

/// Raw persistence of migration status records, keyed by resource type.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, resource_type: &str) -> Result<Option<StatusRecord>, StorageError>;

    /// Write `record` only if the stored update key equals `expected`
    /// (`None` = only if no record exists). Returns whether it was written.
    async fn compare_and_set(
        &self,
        resource_type: &str,
        expected: Option<i64>,
        record: &StatusRecord,
    ) -> Result<bool, StorageError>;
}

/// Cluster-wide mutual exclusion with stale-lease takeover.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Try to take the lease. A lease older than `stale_after` is superseded.
    async fn try_acquire(&self, key: &str, holder: &str, stale_after: Duration) -> Result<bool, StorageError>;

    /// Release the lease if `holder` still owns it.
    async fn release(&self, key: &str, holder: &str) -> Result<(), StorageError>;
}
