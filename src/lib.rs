// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Dual-Write Engine
//!
//! Zero-downtime migration of persisted resources from a legacy store to a
//! unified store, one resource type at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Migration Status                        │
//! │  • One record per resource type, CAS on updateKey          │
//! │  • Drives the policy of runtime-configurable types         │
//! │  • migratingAt gates writes while a migration runs         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ (policy)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Dual-Write Router                        │
//! │  • Reads go to exactly one store                           │
//! │  • Writes: legacy first, then unified (inline/detached)    │
//! │  • Strict policies compensate, tolerant ones swallow       │
//! │  • Combined continuation tokens for paginated lists        │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//! ┌───────────────────────────┐  ┌───────────────────────────┐
//! │       Legacy Store        │  │       Unified Store       │
//! └───────────────────────────┘  └───────────────────────────┘
//!                 ▲                              ▲
//!                 └──────────────┬───────────────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Reconciliation Syncer                      │
//! │  • Interval pass under a cluster-wide lease                │
//! │  • Full listing of both stores, diff by name               │
//! │  • Upserts/deletes unified toward legacy                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dualwrite_engine::{
//!     DualWriter, InMemoryResourceStore, InMemoryStatusStore, MetricsRecorder,
//!     MigrationConfig, MigrationStatusService, PolicySource, ResourceObject, WriteOptions,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = MigrationConfig::default();
//!     let status = Arc::new(MigrationStatusService::new(
//!         Arc::new(InMemoryStatusStore::new()),
//!         config.migration_stale(),
//!     ));
//!
//!     let source = PolicySource::resolve(&config, "folders", status.clone()).await.unwrap();
//!     let router = DualWriter::new(
//!         "folders",
//!         Arc::new(InMemoryResourceStore::new()),
//!         Arc::new(InMemoryResourceStore::new()),
//!         source,
//!         &config,
//!         Arc::new(MetricsRecorder),
//!     );
//!
//!     let folder = ResourceObject::new("team-a", json!({"title": "Team A"}));
//!     router.create(folder, WriteOptions::default()).await.unwrap();
//!     println!("{:?}", router.get("team-a").await.unwrap().payload);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`status`]: Migration status record and its CAS transitions
//! - [`policy`]: Routing policy tuple and the six canonical points
//! - [`router`]: The [`DualWriter`] routing reads and writes
//! - [`syncer`]: The [`Syncer`] reconciling unified toward legacy
//! - [`continuation`]: Combined continuation-token codec
//! - [`storage`]: Store contracts plus in-memory and Redis backends
//! - [`resilience`]: Retry with exponential backoff
//! - [`metrics`]: Injected metrics sink

pub mod config;
pub mod error;
pub mod resource;
pub mod storage;
pub mod status;
pub mod policy;
pub mod continuation;
pub mod router;
pub mod syncer;
pub mod resilience;
pub mod metrics;

pub use config::MigrationConfig;
pub use error::MigrationError;
pub use resource::ResourceObject;
pub use storage::traits::{
    ListOptions, ListPage, LockService, ResourceStore, StatusStore, StorageError, UpdateRequest, WriteOptions,
};
pub use storage::memory::{InMemoryLockService, InMemoryResourceStore, InMemoryStatusStore};
pub use storage::redis::{RedisLockService, RedisStatusStore};
pub use status::{MigrationStatusService, StatusRecord};
pub use policy::{RoutingPolicy, Store};
pub use router::{DualWriter, Method, PolicySource, SecondaryWriteOutcome};
pub use syncer::{SyncAction, SyncItem, SyncReport, Syncer};
pub use metrics::{MetricsRecorder, MetricsSink, NoopMetrics};
pub use resilience::retry::RetryConfig;
