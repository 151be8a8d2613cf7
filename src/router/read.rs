// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Routed reads. Reads go to exactly one store, the current read authority.

use tracing::instrument;

use crate::continuation;
use crate::error::MigrationError;
use crate::policy::Store;
use crate::resource::ResourceObject;
use crate::storage::traits::{ListOptions, ListPage, StorageError};

use super::{DualWriter, Method};

impl DualWriter {
    /// Read one object. Never blocked by a running migration.
    #[instrument(skip(self), fields(resource_type = %self.resource_type))]
    pub async fn get(&self, name: &str) -> Result<ResourceObject, MigrationError> {
        let policy = self.resolve(false).await?;
        let authority = policy.read_store();
        let result = self.store(authority).get(name).await;

        if self.compare_reads && policy.is_dual_write() {
            self.compare_get(authority, name, &result);
        }
        Ok(result?)
    }

    /// List one page from the read authority.
    ///
    /// The returned token is a combined token; only the authority's half is
    /// populated. After the read authority changes, pagination restarts on
    /// the new authority since the old half means nothing there.
    #[instrument(skip(self, options), fields(resource_type = %self.resource_type, limit = options.limit))]
    pub async fn list(&self, options: &ListOptions) -> Result<ListPage, MigrationError> {
        let policy = self.resolve(false).await?;
        let authority = policy.read_store();

        let request = ListOptions {
            limit: options.limit,
            continue_token: continuation::token_for(&options.continue_token, authority, authority)?,
        };
        let page = self.store(authority).list(&request).await?;

        let continue_token = match authority {
            Store::Legacy => continuation::encode(&page.continue_token, ""),
            Store::Unified => continuation::encode("", &page.continue_token),
        };
        Ok(ListPage { items: page.items, continue_token })
    }

    /// Shadow-read the other store in the background and record agreement.
    fn compare_get(&self, authority: Store, name: &str, served: &Result<ResourceObject, StorageError>) {
        let served = match served {
            Ok(obj) => Some(obj.clone()),
            Err(StorageError::NotFound) => None,
            // Nothing meaningful to compare against.
            Err(_) => return,
        };
        let other = self.store(authority.other()).clone();
        let target = name.to_string();

        self.secondary.spawn_comparison(&self.resource_type, Method::Get, name, async move {
            match (other.get(&target).await, served) {
                (Ok(shadow), Some(served)) => Ok(shadow.payload_eq(&served)),
                (Err(StorageError::NotFound), None) => Ok(true),
                (Ok(_), None) | (Err(StorageError::NotFound), Some(_)) => Ok(false),
                (Err(e), _) => Err(e),
            }
        });
    }
}
