// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Walks one resource type through a full migration.
//!
//! Demonstrates:
//! 1. Legacy-only writes
//! 2. Switching on dual writes at runtime
//! 3. Backfilling the unified store with the syncer
//! 4. The migration gate rejecting writes
//! 5. Moving reads to the unified store
//! 6. Displaying metrics
//!
//! Everything runs in memory; no backends required.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_migration
//! ```

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use dualwrite_engine::{
    DualWriter, InMemoryLockService, InMemoryResourceStore, InMemoryStatusStore, ListOptions, MetricsRecorder,
    MigrationConfig, MigrationError, MigrationStatusService, PolicySource, ResourceObject, Syncer, WriteOptions,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

const RESOURCE_TYPE: &str = "folders";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the engine emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║         dualwrite-engine: Basic Migration Example             ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Wire up the stores, status service, router and syncer
    // ─────────────────────────────────────────────────────────────────────────
    let config = MigrationConfig {
        sync_interval_secs: 30,
        ..Default::default()
    };
    let status = Arc::new(MigrationStatusService::new(
        Arc::new(InMemoryStatusStore::new()),
        config.migration_stale(),
    ));
    let legacy = Arc::new(InMemoryResourceStore::new());
    let unified = Arc::new(InMemoryResourceStore::new());
    let metrics = Arc::new(MetricsRecorder);

    let source = PolicySource::resolve(&config, RESOURCE_TYPE, status.clone()).await?;
    let router = DualWriter::new(
        RESOURCE_TYPE,
        legacy.clone(),
        unified.clone(),
        source.clone(),
        &config,
        metrics.clone(),
    );
    let syncer = Syncer::new(
        RESOURCE_TYPE,
        legacy.clone(),
        unified.clone(),
        source,
        Arc::new(InMemoryLockService::new()),
        &config,
        metrics,
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Legacy-only phase
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Phase 1: legacy only");
    let mut record = status.status(RESOURCE_TYPE).await?;
    record.write_unified = false;
    let record = status.update(RESOURCE_TYPE, record).await?;
    println!("   └─ Policy: {}", router.policy().await?);

    for team in ["alpha", "bravo", "charlie", "delta", "echo"] {
        let folder = ResourceObject::new(team, json!({"title": format!("Team {}", team)}));
        router.create(folder, WriteOptions::default()).await?;
    }
    println!("   └─ legacy={} unified={}", legacy.len(), unified.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Turn on dual writes
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔀 Phase 2: dual write, legacy reads");
    let mut next = record.clone();
    next.write_unified = true;
    let record = status.update(RESOURCE_TYPE, next).await?;
    println!("   └─ Policy: {}", router.policy().await?);

    let folder = ResourceObject::new("foxtrot", json!({"title": "Team foxtrot"}));
    router.create(folder, WriteOptions::default()).await?;
    println!("   └─ legacy={} unified={} (only new writes reach unified)", legacy.len(), unified.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Backfill with the migration gate up
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🚧 Phase 3: migration");
    let record = status.start_migration(RESOURCE_TYPE, record.update_key).await?;

    let blocked = router
        .create(ResourceObject::new("golf", json!({})), WriteOptions::default())
        .await;
    match blocked {
        Err(MigrationError::TemporarilyUnavailable { .. }) => println!("   └─ Writes rejected while migrating ✅"),
        other => println!("   └─ ⚠️  Unexpected: {:?}", other),
    }

    let record = status.finish_migration(RESOURCE_TYPE, record.update_key).await?;
    match syncer.run_once().await? {
        Some(report) => println!(
            "   └─ Sync pass: divergent={} upserted={} deleted={} synced={} ({:?})",
            report.divergent,
            report.upserted,
            report.deleted,
            report.is_synced(),
            report.duration
        ),
        None => println!("   └─ Sync pass skipped"),
    }
    println!("   └─ legacy={} unified={}", legacy.len(), unified.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Reads move to unified
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Phase 4: unified reads");
    let mut next = record.clone();
    next.read_unified = true;
    status.update(RESOURCE_TYPE, next).await?;
    println!("   └─ Policy: {}", router.policy().await?);

    let mut options = ListOptions::with_limit(4);
    loop {
        let page = router.list(&options).await?;
        for obj in &page.items {
            println!("   └─ {} (uid {}) → {}", obj.name, obj.uid, obj.payload);
        }
        if page.continue_token.is_empty() {
            break;
        }
        options = ListOptions::with_limit(4).continue_from(page.continue_token);
    }

    // Let any detached work settle before snapshotting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Dump raw metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((key.name().to_string(), label_str, v)),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((key.name().to_string(), label_str, count, sum));
            }
            DebugValue::Gauge(_) => {}
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            println!("   │  └─ {}{} count={} sum={:.6}", name, labels, count, sum);
        }
    }
    if counters.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
