// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routed writes: create, update, delete, delete_collection.
//!
//! Legacy is always written first when it is written at all, so legacy-only
//! side effects happen before anything reaches unified. What happens after
//! depends on who is authoritative:
//!
//! - **legacy authoritative**: unified is the secondary. It is written
//!   detached or inline; inline failures are swallowed (tolerant) or surfaced
//!   with a best-effort compensating delete of what legacy just created.
//! - **unified authoritative**: unified is written inline and its result is
//!   returned. Legacy is never rolled back; the syncer cleans up leftovers.

use tracing::{info, instrument, warn};

use crate::error::MigrationError;
use crate::policy::{RoutingPolicy, Store};
use crate::resource::ResourceObject;
use crate::storage::traits::{ListOptions, StorageError, UpdateRequest, WriteOptions};

use super::{DualWriter, Method};

impl DualWriter {
    #[instrument(skip(self, obj, options), fields(resource_type = %self.resource_type, name = %obj.name))]
    pub async fn create(&self, obj: ResourceObject, options: WriteOptions) -> Result<ResourceObject, MigrationError> {
        let policy = self.resolve(true).await?;

        if options.dry_run {
            let store = Self::dry_run_store(&policy);
            return Ok(self.store(store).create(obj, options).await?);
        }
        if !policy.write_legacy {
            return Ok(self.timed(Store::Unified, Method::Create, self.unified.create(obj, options)).await?);
        }

        let created = self.timed(Store::Legacy, Method::Create, self.legacy.create(obj, options)).await?;
        if !policy.write_unified {
            return Ok(created);
        }

        // Each store assigns its own uid and resource version.
        let forward = created.clone().without_identity();

        if policy.write_authority() == Store::Unified {
            return Ok(self.timed(Store::Unified, Method::Create, self.unified.create(forward, options)).await?);
        }

        if !policy.synchronous_secondary {
            let unified = self.unified.clone();
            self.secondary.spawn_write(&self.resource_type, Method::Create, &created.name, Store::Unified, async move {
                unified.create(forward, options).await.map(|_| ())
            });
            return Ok(created);
        }

        match self.timed(Store::Unified, Method::Create, self.unified.create(forward, options)).await {
            Ok(_) => Ok(created),
            Err(e) => {
                self.secondary_failed(&policy, Method::Create, &created.name, e, true).await?;
                Ok(created)
            }
        }
    }

    #[instrument(skip(self, request, options), fields(resource_type = %self.resource_type))]
    pub async fn update(
        &self,
        name: &str,
        request: UpdateRequest,
        options: WriteOptions,
    ) -> Result<(ResourceObject, bool), MigrationError> {
        let policy = self.resolve(true).await?;

        if options.dry_run {
            let store = Self::dry_run_store(&policy);
            let request = Self::request_for(store, &policy, &request);
            return Ok(self.store(store).update(name, &request, options).await?);
        }
        if !policy.write_legacy {
            let request = Self::request_for(Store::Unified, &policy, &request);
            return Ok(self
                .timed(Store::Unified, Method::Update, self.unified.update(name, &request, options))
                .await?);
        }

        let unified_authority = policy.write_unified && policy.write_authority() == Store::Unified;
        let mut legacy_request = Self::request_for(Store::Legacy, &policy, &request);
        if unified_authority {
            // Legacy may have lost the row; unified decides whether it exists.
            legacy_request = legacy_request.force_create();
        }

        let (updated, created) = self
            .timed(Store::Legacy, Method::Update, self.legacy.update(name, &legacy_request, options))
            .await?;
        if !policy.write_unified {
            return Ok((updated, created));
        }

        if unified_authority {
            let request = Self::request_for(Store::Unified, &policy, &request);
            return Ok(self
                .timed(Store::Unified, Method::Update, self.unified.update(name, &request, options))
                .await?);
        }

        let mirror = UpdateRequest::mirror(updated.clone());
        if !policy.synchronous_secondary {
            let unified = self.unified.clone();
            let target = name.to_string();
            self.secondary.spawn_write(&self.resource_type, Method::Update, name, Store::Unified, async move {
                unified.update(&target, &mirror, options).await.map(|_| ())
            });
            return Ok((updated, created));
        }

        match self.timed(Store::Unified, Method::Update, self.unified.update(name, &mirror, options)).await {
            Ok(_) => Ok((updated, created)),
            Err(e) => {
                // Only an object this call created can be compensated by deleting it.
                self.secondary_failed(&policy, Method::Update, name, e, created).await?;
                Ok((updated, created))
            }
        }
    }

    #[instrument(skip(self, options), fields(resource_type = %self.resource_type))]
    pub async fn delete(&self, name: &str, options: WriteOptions) -> Result<(ResourceObject, bool), MigrationError> {
        let policy = self.resolve(true).await?;

        if options.dry_run {
            let store = Self::dry_run_store(&policy);
            return Ok(self.store(store).delete(name, options).await?);
        }
        if !policy.write_legacy {
            return Ok(self.timed(Store::Unified, Method::Delete, self.unified.delete(name, options)).await?);
        }
        if !policy.write_unified {
            return Ok(self.timed(Store::Legacy, Method::Delete, self.legacy.delete(name, options)).await?);
        }

        if policy.write_authority() == Store::Unified {
            match self.timed(Store::Legacy, Method::Delete, self.legacy.delete(name, options)).await {
                Ok(_) | Err(StorageError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(self.timed(Store::Unified, Method::Delete, self.unified.delete(name, options)).await?);
        }

        let deleted = self.timed(Store::Legacy, Method::Delete, self.legacy.delete(name, options)).await?;

        if !policy.synchronous_secondary {
            let unified = self.unified.clone();
            let target = name.to_string();
            self.secondary.spawn_write(&self.resource_type, Method::Delete, name, Store::Unified, async move {
                match unified.delete(&target, options).await {
                    Ok(_) | Err(StorageError::NotFound) => Ok(()),
                    Err(e) => Err(e),
                }
            });
            return Ok(deleted);
        }

        match self.timed(Store::Unified, Method::Delete, self.unified.delete(name, options)).await {
            Ok(_) | Err(StorageError::NotFound) => Ok(deleted),
            Err(e) => {
                self.secondary_failed(&policy, Method::Delete, name, e, false).await?;
                Ok(deleted)
            }
        }
    }

    #[instrument(skip(self, list, options), fields(resource_type = %self.resource_type))]
    pub async fn delete_collection(
        &self,
        list: &ListOptions,
        options: WriteOptions,
    ) -> Result<Vec<ResourceObject>, MigrationError> {
        let policy = self.resolve(true).await?;

        if options.dry_run {
            let store = Self::dry_run_store(&policy);
            return Ok(self.store(store).delete_collection(list, options).await?);
        }
        if !policy.write_legacy {
            return Ok(self
                .timed(Store::Unified, Method::DeleteCollection, self.unified.delete_collection(list, options))
                .await?);
        }

        let deleted = self
            .timed(Store::Legacy, Method::DeleteCollection, self.legacy.delete_collection(list, options))
            .await?;
        if !policy.write_unified {
            return Ok(deleted);
        }

        if policy.write_authority() == Store::Unified {
            return Ok(self
                .timed(Store::Unified, Method::DeleteCollection, self.unified.delete_collection(list, options))
                .await?);
        }

        if !policy.synchronous_secondary {
            let unified = self.unified.clone();
            let list = list.clone();
            self.secondary.spawn_write(&self.resource_type, Method::DeleteCollection, "", Store::Unified, async move {
                unified.delete_collection(&list, options).await.map(|_| ())
            });
            return Ok(deleted);
        }

        match self
            .timed(Store::Unified, Method::DeleteCollection, self.unified.delete_collection(list, options))
            .await
        {
            Ok(_) => Ok(deleted),
            Err(e) => {
                self.secondary_failed(&policy, Method::DeleteCollection, "", e, false).await?;
                Ok(deleted)
            }
        }
    }

    /// The caller's identity fields belong to the store it reads from; any
    /// other store gets the request with its own identity substituted.
    fn request_for(store: Store, policy: &RoutingPolicy, request: &UpdateRequest) -> UpdateRequest {
        if store == policy.read_store() {
            request.clone()
        } else {
            request.with_target_identity()
        }
    }

    /// Apply the failure policy to an inline secondary failure.
    async fn secondary_failed(
        &self,
        policy: &RoutingPolicy,
        method: Method,
        name: &str,
        err: StorageError,
        compensate: bool,
    ) -> Result<(), MigrationError> {
        if policy.error_tolerant {
            warn!(resource_type = %self.resource_type, %method, name, error = %err, "Secondary write failed, tolerated");
            return Ok(());
        }

        warn!(resource_type = %self.resource_type, %method, name, error = %err, "Secondary write failed");
        if compensate {
            self.rollback_legacy(name).await;
        }
        Err(err.into())
    }

    /// Best-effort compensating delete. Failures are logged, never surfaced.
    async fn rollback_legacy(&self, name: &str) {
        match self.legacy.delete(name, WriteOptions::default()).await {
            Ok(_) => {
                self.metrics.record_rollback(&self.resource_type, true);
                info!(resource_type = %self.resource_type, name, "Rolled back legacy write");
            }
            Err(e) => {
                self.metrics.record_rollback(&self.resource_type, false);
                warn!(resource_type = %self.resource_type, name, error = %e, "Legacy rollback failed, stores may diverge until the next sync");
            }
        }
    }
}
