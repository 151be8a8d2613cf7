// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration status lifecycle through the public API.
//!
//! # Running
//! ```bash
//! cargo test --test status
//! ```

use std::sync::Arc;
use std::time::Duration;

use dualwrite_engine::{InMemoryStatusStore, MigrationError, MigrationStatusService, StatusRecord, StatusStore};

fn service(stale: Duration) -> (Arc<InMemoryStatusStore>, Arc<MigrationStatusService>) {
    let store = Arc::new(InMemoryStatusStore::new());
    let svc = Arc::new(MigrationStatusService::new(store.clone(), stale));
    (store, svc)
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (_, svc) = service(Duration::from_secs(600));

    // Lazily created with safe defaults.
    let record = svc.status("dashboards").await.unwrap();
    assert!(record.write_legacy && record.write_unified && !record.read_unified);
    assert!(record.runtime_configurable);
    assert_eq!(record.update_key, 1);

    let record = svc.start_migration("dashboards", 1).await.unwrap();
    assert!(record.is_migrating());
    assert_eq!(record.update_key, 2);

    let record = svc.finish_migration("dashboards", 2).await.unwrap();
    assert!(!record.is_migrating());
    assert!(record.is_migrated());
    assert_eq!(record.update_key, 3);

    let mut next = record.clone();
    next.read_unified = true;
    let record = svc.update("dashboards", next).await.unwrap();
    assert_eq!(record.update_key, 4);

    let mut next = record.clone();
    next.write_legacy = false;
    let record = svc.update("dashboards", next).await.unwrap();
    assert_eq!(record.update_key, 5);
    assert!(!record.write_legacy);

    // Once migrated, a second migration is refused.
    let err = svc.start_migration("dashboards", 5).await.unwrap_err();
    assert_eq!(err, MigrationError::AlreadyMigrated("dashboards".into()));
}

#[tokio::test]
async fn test_status_is_stable_without_updates() {
    let (_, svc) = service(Duration::from_secs(600));
    let first = serde_json::to_vec(&svc.status("folders").await.unwrap()).unwrap();
    let second = serde_json::to_vec(&svc.status("folders").await.unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_stale_key_never_mutates() {
    let (store, svc) = service(Duration::from_secs(600));
    svc.status("folders").await.unwrap();
    svc.start_migration("folders", 1).await.unwrap();
    let before = store.get("folders").await.unwrap();

    // Stale even though the record is also mid-migration: the key check wins.
    let err = svc.start_migration("folders", 1).await.unwrap_err();
    assert_eq!(err, MigrationError::KeyMismatch { expected: 1, actual: 2 });
    assert_eq!(store.get("folders").await.unwrap(), before);
}

#[tokio::test]
async fn test_invalid_updates_are_rejected() {
    let (store, svc) = service(Duration::from_secs(600));
    let record = svc.status("folders").await.unwrap();

    let mut bad = record.clone();
    bad.write_unified = false;
    bad.read_unified = true;
    assert!(matches!(svc.update("folders", bad).await, Err(MigrationError::Invalid(_))));

    let mut bad = record.clone();
    bad.write_legacy = false;
    bad.write_unified = false;
    assert!(matches!(svc.update("folders", bad).await, Err(MigrationError::Invalid(_))));

    let mut bad = record.clone();
    bad.migrating_at = 1;
    assert!(matches!(svc.update("folders", bad).await, Err(MigrationError::Invalid(_))));

    assert_eq!(store.get("folders").await.unwrap(), Some(record));
}

#[tokio::test]
async fn test_concurrent_starts_have_one_winner() {
    let (_, svc) = service(Duration::from_secs(600));
    svc.status("folders").await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move { svc.start_migration("folders", 1).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => {
                assert_eq!(record.update_key, 2);
                winners += 1;
            }
            Err(MigrationError::KeyMismatch { expected: 1, actual: 2 }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_stale_migration_is_superseded() {
    let (_, svc) = service(Duration::ZERO);
    svc.status("folders").await.unwrap();
    svc.start_migration("folders", 1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2)).await;
    let record = svc.start_migration("folders", 2).await.unwrap();
    assert_eq!(record.update_key, 3);
}

#[tokio::test]
async fn test_recent_migration_blocks_restart() {
    let (_, svc) = service(Duration::from_secs(600));
    svc.status("folders").await.unwrap();
    svc.start_migration("folders", 1).await.unwrap();

    let err = svc.start_migration("folders", 2).await.unwrap_err();
    assert_eq!(err, MigrationError::MigrationInProgress("folders".into()));
}

#[tokio::test]
async fn test_persisted_shape_is_flat_camel_case() {
    let (store, svc) = service(Duration::from_secs(600));
    svc.status("folders").await.unwrap();

    let record = store.get("folders").await.unwrap().unwrap();
    let value = serde_json::to_value(&record).unwrap();
    let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "migratedAt",
            "migratingAt",
            "readUnified",
            "resourceType",
            "runtimeConfigurable",
            "updateKey",
            "writeLegacy",
            "writeUnified",
        ]
    );

    let parsed: StatusRecord = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, record);
}
