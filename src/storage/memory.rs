// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory implementations of the storage contracts.
//!
//! Used by tests and the demo, and handy as a stand-in for either store while
//! wiring a deployment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::resource::ResourceObject;
use crate::status::{now_millis, StatusRecord};
use super::traits::{
    ListOptions, ListPage, LockService, ResourceStore, StatusStore, StorageError, UpdateRequest,
    WriteOptions,
};

/// A resource store keeping objects in a `DashMap`, keyed by name.
///
/// Assigns a UUID `uid` on insert and a store-wide increasing
/// `resource_version` on every write.
pub struct InMemoryResourceStore {
    data: DashMap<String, ResourceObject>,
    version: AtomicU64,
}

impl InMemoryResourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// Get current item count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check existence without going through the trait
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    /// Sorted names of all stored objects
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Clear all items
    pub fn clear(&self) {
        self.data.clear();
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn stamp_new(&self, mut obj: ResourceObject) -> ResourceObject {
        obj.uid = uuid::Uuid::new_v4().to_string();
        obj.resource_version = self.next_version();
        obj.updated_at = now_millis();
        obj
    }

    fn encode_token(last_name: &str) -> String {
        general_purpose::STANDARD.encode(last_name)
    }

    fn decode_token(token: &str) -> Result<String, StorageError> {
        let bytes = general_purpose::STANDARD
            .decode(token)
            .map_err(|e| StorageError::Invalid(format!("bad continue token: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| StorageError::Invalid(format!("bad continue token: {}", e)))
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn get(&self, name: &str) -> Result<ResourceObject, StorageError> {
        self.data
            .get(name)
            .map(|r| r.value().clone())
            .ok_or(StorageError::NotFound)
    }

    async fn list(&self, options: &ListOptions) -> Result<ListPage, StorageError> {
        let after = if options.continue_token.is_empty() {
            None
        } else {
            Some(Self::decode_token(&options.continue_token)?)
        };

        let names: Vec<String> = self
            .names()
            .into_iter()
            .filter(|n| after.as_ref().map_or(true, |a| n > a))
            .collect();
        let limit = if options.limit == 0 { names.len() } else { options.limit };

        let mut items = Vec::with_capacity(limit.min(names.len()));
        for name in names.iter().take(limit) {
            // Deleted between the key scan and now: skip it.
            if let Some(obj) = self.data.get(name) {
                items.push(obj.value().clone());
            }
        }

        let continue_token = if names.len() > limit {
            names.get(limit - 1).map(|n| Self::encode_token(n)).unwrap_or_default()
        } else {
            String::new()
        };
        Ok(ListPage { items, continue_token })
    }

    async fn create(&self, obj: ResourceObject, options: WriteOptions) -> Result<ResourceObject, StorageError> {
        if obj.name.is_empty() {
            return Err(StorageError::Invalid("name is required".into()));
        }
        if !obj.resource_version.is_empty() {
            return Err(StorageError::Invalid("resourceVersion must not be set on create".into()));
        }

        match self.data.entry(obj.name.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(format!("'{}' already exists", obj.name))),
            Entry::Vacant(entry) => {
                let stored = self.stamp_new(obj);
                if !options.dry_run {
                    entry.insert(stored.clone());
                }
                Ok(stored)
            }
        }
    }

    async fn update(
        &self,
        name: &str,
        request: &UpdateRequest,
        options: WriteOptions,
    ) -> Result<(ResourceObject, bool), StorageError> {
        match self.data.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get().clone();
                let mut next = request.apply(Some(current.clone()))?;
                if !next.resource_version.is_empty() && next.resource_version != current.resource_version {
                    return Err(StorageError::Conflict(format!(
                        "resourceVersion {} is stale (stored {})",
                        next.resource_version, current.resource_version
                    )));
                }
                if !next.uid.is_empty() && next.uid != current.uid {
                    return Err(StorageError::Conflict(format!("uid mismatch for '{}'", name)));
                }
                next.name = name.to_string();
                next.uid = current.uid;
                next.resource_version = self.next_version();
                next.updated_at = now_millis();
                if !options.dry_run {
                    entry.insert(next.clone());
                }
                Ok((next, false))
            }
            Entry::Vacant(entry) => {
                if !request.force_create {
                    return Err(StorageError::NotFound);
                }
                let mut next = request.apply(None)?;
                next.name = name.to_string();
                let stored = self.stamp_new(next);
                if !options.dry_run {
                    entry.insert(stored.clone());
                }
                Ok((stored, true))
            }
        }
    }

    async fn delete(&self, name: &str, options: WriteOptions) -> Result<(ResourceObject, bool), StorageError> {
        let deleted = if options.dry_run {
            self.data.get(name).map(|r| r.value().clone())
        } else {
            self.data.remove(name).map(|(_, obj)| obj)
        };
        deleted.map(|obj| (obj, false)).ok_or(StorageError::NotFound)
    }

    async fn delete_collection(
        &self,
        list: &ListOptions,
        options: WriteOptions,
    ) -> Result<Vec<ResourceObject>, StorageError> {
        let selected = self.list(list).await?;
        if options.dry_run {
            return Ok(selected.items);
        }
        let mut deleted = Vec::with_capacity(selected.items.len());
        for obj in selected.items {
            deleted.extend(self.data.remove(&obj.name).map(|(_, obj)| obj));
        }
        Ok(deleted)
    }
}

/// Status records in a `DashMap`; compare-and-set runs under the shard lock.
pub struct InMemoryStatusStore {
    data: DashMap<String, StatusRecord>,
}

impl InMemoryStatusStore {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, resource_type: &str) -> Result<Option<StatusRecord>, StorageError> {
        Ok(self.data.get(resource_type).map(|r| r.value().clone()))
    }

    async fn compare_and_set(
        &self,
        resource_type: &str,
        expected: Option<i64>,
        record: &StatusRecord,
    ) -> Result<bool, StorageError> {
        match self.data.entry(resource_type.to_string()) {
            Entry::Occupied(mut entry) => {
                if expected == Some(entry.get().update_key) {
                    entry.insert(record.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(record.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// Process-local leases. Only meaningful for a single process.
pub struct InMemoryLockService {
    leases: DashMap<String, (String, Instant)>,
}

impl InMemoryLockService {
    #[must_use]
    pub fn new() -> Self {
        Self { leases: DashMap::new() }
    }

    /// Current holder of a lease, if any
    #[must_use]
    pub fn holder(&self, key: &str) -> Option<String> {
        self.leases.get(key).map(|r| r.value().0.clone())
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, key: &str, holder: &str, stale_after: Duration) -> Result<bool, StorageError> {
        match self.leases.entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert((holder.to_string(), Instant::now()));
                Ok(true)
            }
            Entry::Occupied(mut entry) => {
                let (current, acquired) = entry.get();
                if current == holder || acquired.elapsed() >= stale_after {
                    entry.insert((holder.to_string(), Instant::now()));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), StorageError> {
        self.leases.remove_if(key, |_, (current, _)| current == holder);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(name: &str) -> ResourceObject {
        ResourceObject::new(name, json!({"title": name}))
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = InMemoryResourceStore::new();
        let created = store.create(obj("a"), WriteOptions::default()).await.unwrap();
        assert!(!created.uid.is_empty());
        assert_eq!(created.resource_version, "1");
        assert!(created.updated_at > 0);
        assert_eq!(store.get("a").await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_create_existing_conflicts() {
        let store = InMemoryResourceStore::new();
        store.create(obj("a"), WriteOptions::default()).await.unwrap();
        let err = store.create(obj("a"), WriteOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_with_foreign_version_is_invalid() {
        let store = InMemoryResourceStore::new();
        let mut o = obj("a");
        o.resource_version = "99".into();
        assert!(matches!(
            store.create(o, WriteOptions::default()).await,
            Err(StorageError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_dry_run_does_not_persist() {
        let store = InMemoryResourceStore::new();
        store.create(obj("a"), WriteOptions::dry_run()).await.unwrap();
        assert!(store.is_empty());

        store.create(obj("b"), WriteOptions::default()).await.unwrap();
        store.delete("b", WriteOptions::dry_run()).await.unwrap();
        assert!(store.contains("b"));
    }

    #[tokio::test]
    async fn test_update_keeps_uid_and_bumps_version() {
        let store = InMemoryResourceStore::new();
        let created = store.create(obj("a"), WriteOptions::default()).await.unwrap();
        let request = UpdateRequest::new(|current| {
            let mut next = current.ok_or(StorageError::NotFound)?;
            next.payload = json!({"title": "changed"});
            Ok(next)
        });
        let (updated, created_flag) = store.update("a", &request, WriteOptions::default()).await.unwrap();
        assert!(!created_flag);
        assert_eq!(updated.uid, created.uid);
        assert_ne!(updated.resource_version, created.resource_version);
        assert_eq!(updated.payload["title"], "changed");
    }

    #[tokio::test]
    async fn test_update_stale_version_conflicts() {
        let store = InMemoryResourceStore::new();
        store.create(obj("a"), WriteOptions::default()).await.unwrap();
        let mut stale = obj("a");
        stale.resource_version = "0".into();
        let err = store
            .update("a", &UpdateRequest::replace(stale), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_requires_force_create() {
        let store = InMemoryResourceStore::new();
        let request = UpdateRequest::replace(obj("a"));
        assert_eq!(
            store.update("a", &request, WriteOptions::default()).await.unwrap_err(),
            StorageError::NotFound
        );

        let (stored, created) = store
            .update("a", &request.force_create(), WriteOptions::default())
            .await
            .unwrap();
        assert!(created);
        assert!(!stored.uid.is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryResourceStore::new();
        store.create(obj("a"), WriteOptions::default()).await.unwrap();
        let (deleted, pending) = store.delete("a", WriteOptions::default()).await.unwrap();
        assert_eq!(deleted.name, "a");
        assert!(!pending);
        assert_eq!(store.get("a").await.unwrap_err(), StorageError::NotFound);
        assert_eq!(
            store.delete("a", WriteOptions::default()).await.unwrap_err(),
            StorageError::NotFound
        );
    }

    #[tokio::test]
    async fn test_list_paginates_in_name_order() {
        let store = InMemoryResourceStore::new();
        for name in ["c", "a", "e", "b", "d"] {
            store.create(obj(name), WriteOptions::default()).await.unwrap();
        }

        let page1 = store.list(&ListOptions::with_limit(2)).await.unwrap();
        assert_eq!(page1.items.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert!(!page1.continue_token.is_empty());
        assert!(!page1.continue_token.contains(crate::continuation::SEPARATOR));

        let page2 = store
            .list(&ListOptions::with_limit(2).continue_from(page1.continue_token))
            .await
            .unwrap();
        assert_eq!(page2.items.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), ["c", "d"]);

        let page3 = store
            .list(&ListOptions::with_limit(2).continue_from(page2.continue_token))
            .await
            .unwrap();
        assert_eq!(page3.items.len(), 1);
        assert!(page3.continue_token.is_empty());
    }

    #[tokio::test]
    async fn test_list_exact_fit_has_no_token() {
        let store = InMemoryResourceStore::new();
        store.create(obj("a"), WriteOptions::default()).await.unwrap();
        store.create(obj("b"), WriteOptions::default()).await.unwrap();
        let page = store.list(&ListOptions::with_limit(2)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.continue_token.is_empty());
    }

    #[tokio::test]
    async fn test_list_bad_token() {
        let store = InMemoryResourceStore::new();
        let err = store
            .list(&ListOptions::default().continue_from("%%%"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let store = InMemoryResourceStore::new();
        for i in 0..5 {
            store.create(obj(&format!("item-{}", i)), WriteOptions::default()).await.unwrap();
        }
        let dry = store.delete_collection(&ListOptions::default(), WriteOptions::dry_run()).await.unwrap();
        assert_eq!(dry.len(), 5);
        assert_eq!(store.len(), 5);

        let deleted = store.delete_collection(&ListOptions::default(), WriteOptions::default()).await.unwrap();
        assert_eq!(deleted.len(), 5);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_collection_honours_list_options() {
        let store = InMemoryResourceStore::new();
        for i in 0..5 {
            store.create(obj(&format!("item-{}", i)), WriteOptions::default()).await.unwrap();
        }

        let deleted = store.delete_collection(&ListOptions::with_limit(2), WriteOptions::default()).await.unwrap();
        let names: Vec<_> = deleted.into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["item-0", "item-1"]);
        assert_eq!(store.names(), vec!["item-2", "item-3", "item-4"]);

        let page = store.list(&ListOptions::with_limit(1)).await.unwrap();
        let rest = ListOptions::default().continue_from(page.continue_token);
        let deleted = store.delete_collection(&rest, WriteOptions::default()).await.unwrap();
        assert_eq!(deleted.len(), 2);
        assert_eq!(store.names(), vec!["item-2"]);
    }

    #[tokio::test]
    async fn test_status_cas() {
        let store = InMemoryStatusStore::new();
        let record = StatusRecord::initial("folders");
        assert!(store.compare_and_set("folders", None, &record).await.unwrap());
        assert!(!store.compare_and_set("folders", None, &record).await.unwrap());

        let mut next = record.clone();
        next.update_key = 2;
        assert!(!store.compare_and_set("folders", Some(5), &next).await.unwrap());
        assert!(store.compare_and_set("folders", Some(1), &next).await.unwrap());
        assert_eq!(store.get("folders").await.unwrap().unwrap().update_key, 2);
    }

    #[tokio::test]
    async fn test_status_cas_missing_with_expected_key() {
        let store = InMemoryStatusStore::new();
        let record = StatusRecord::initial("folders");
        assert!(!store.compare_and_set("folders", Some(1), &record).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lock_exclusive_until_released() {
        let locks = InMemoryLockService::new();
        let stale = Duration::from_secs(60);
        assert!(locks.try_acquire("k", "a", stale).await.unwrap());
        assert!(!locks.try_acquire("k", "b", stale).await.unwrap());

        // Release by a non-holder is a no-op
        locks.release("k", "b").await.unwrap();
        assert_eq!(locks.holder("k").as_deref(), Some("a"));

        locks.release("k", "a").await.unwrap();
        assert!(locks.try_acquire("k", "b", stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_stale_takeover() {
        let locks = InMemoryLockService::new();
        assert!(locks.try_acquire("k", "a", Duration::from_millis(5)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(locks.try_acquire("k", "b", Duration::from_millis(5)).await.unwrap());
        assert_eq!(locks.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_concurrent_creates() {
        use std::sync::Arc;

        let store = Arc::new(InMemoryResourceStore::new());
        let mut handles = vec![];

        for batch in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .create(obj(&format!("batch-{}-item-{}", batch, i)), WriteOptions::default())
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 100);
    }
}
