//! Failure injection tests for staged reconciliation.
//!
//! Each stage commits its table before the next stage reads. A failure in a
//! later stage therefore leaves earlier stages applied.
//!
//! # Invariants Tested
//!
//! 1. **Stage ordering**: a failed Metadata commit leaves Resources and Fields
//!    reconciled while Metadata and Relationships keep their previous state
//! 2. **No snapshot on failure**: a failed run records no commit snapshot
//! 3. **Recovery**: the next run picks up where the failed one stopped
//! 4. **Flag release**: the single-flight flag is cleared after any failure
//! 5. **No partial snapshots**: a run skipped after a partial failure does not
//!    capture the partially applied catalog under the head commit

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use mirror_catalog::snapshot::catalog_tree;
use mirror_catalog::store::paths;
use mirror_catalog::{
    CatalogError, EntityKind, Field, Metadata, Relationship, Resource, SnapshotOutcome,
};
use mirror_core::storage::{
    MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};
use mirror_core::{Error as CoreError, Result as CoreResult};

use support::{Harness, customer, order};

// ============================================================================
// FailingBackend - Configurable failure injection
// ============================================================================

/// Backend wrapper that injects failures at configurable paths.
#[derive(Debug, Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    /// Paths that should fail on next write (exact match).
    fail_on_write: RwLock<HashSet<String>>,
    /// Paths that should fail on next read (exact match).
    fail_on_read: RwLock<HashSet<String>>,
    /// If true, fail all operations.
    fail_all: AtomicBool,
}

impl FailingBackend {
    /// Fails the next write to `path`. Single-shot.
    pub fn fail_on_write(&self, path: &str) {
        self.fail_on_write.write().unwrap().insert(path.to_string());
    }

    /// Fails the next read of `path`. Single-shot.
    pub fn fail_on_read(&self, path: &str) {
        self.fail_on_read.write().unwrap().insert(path.to_string());
    }

    /// Fails every operation until reset.
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    fn should_fail_write(&self, path: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst) || self.fail_on_write.write().unwrap().remove(path)
    }

    fn should_fail_read(&self, path: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst) || self.fail_on_read.write().unwrap().remove(path)
    }
}

fn injected(op: &str, path: &str) -> CoreError {
    CoreError::Storage {
        message: format!("Injected {op} failure: {path}"),
        source: None,
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, path: &str) -> CoreResult<Bytes> {
        if self.should_fail_read(path) {
            return Err(injected("read", path));
        }
        self.inner.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> CoreResult<WriteResult> {
        if self.should_fail_write(path) {
            return Err(injected("write", path));
        }
        self.inner.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> CoreResult<()> {
        if self.should_fail_write(path) {
            return Err(injected("delete", path));
        }
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> CoreResult<Vec<ObjectMeta>> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(injected("list", prefix));
        }
        self.inner.list(prefix).await
    }

    async fn head(&self, path: &str) -> CoreResult<Option<ObjectMeta>> {
        if self.should_fail_read(path) {
            return Err(injected("head", path));
        }
        self.inner.head(path).await
    }
}

fn harness() -> (Arc<FailingBackend>, Harness) {
    let backend = Arc::new(FailingBackend::default());
    let harness = Harness::with_backend(Arc::clone(&backend) as _, Vec::new());
    (backend, harness)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn metadata_commit_failure_leaves_earlier_stages_applied() {
    let (backend, harness) = harness();
    harness.publish("c1", vec![customer()]);
    harness.orchestrator.run_once(false).await.expect("baseline");

    backend.fail_on_write(&paths::table(EntityKind::Metadata));
    harness.publish("c2", vec![order(), customer()]);
    let err = harness.orchestrator.run_once(false).await.unwrap_err();
    assert!(matches!(err, CatalogError::Core(_)), "got {err:?}");

    // Resources and Fields reflect c2.
    let resources = harness.store.rows::<Resource>().await.unwrap();
    assert!(resources.iter().any(|r| r.name == "app.Order"));
    let fields = harness.store.rows::<Field>().await.unwrap();
    assert!(fields.iter().any(|f| f.name == "app.Order.customer_id"));

    // Metadata and Relationships still reflect c1.
    assert!(harness.store.rows::<Metadata>().await.unwrap().is_empty());
    assert!(harness.store.rows::<Relationship>().await.unwrap().is_empty());

    // Only the baseline commit has a snapshot.
    let history = harness.orchestrator.snapshots().history().await.unwrap();
    let commits: Vec<&str> = history.iter().map(|s| s.commit_id.as_str()).collect();
    assert_eq!(commits, vec!["c1"]);
    assert!(!harness.orchestrator.is_running());
}

#[tokio::test]
async fn skipped_run_after_partial_failure_defers_snapshot() {
    let (backend, harness) = harness();
    harness.publish("c1", vec![customer()]);
    harness.orchestrator.run_once(false).await.expect("baseline");

    backend.fail_on_write(&paths::table(EntityKind::Metadata));
    harness.publish("c2", vec![order(), customer()]);
    harness.orchestrator.run_once(false).await.unwrap_err();
    assert_eq!(harness.store.reconciled_commit().await.unwrap(), None);

    // c2 is already pulled, so this run skips reconciliation.
    let skipped = harness.orchestrator.run_once(false).await.expect("skipped");
    assert!(skipped.skipped);
    assert_eq!(
        skipped.snapshot,
        SnapshotOutcome::Unreconciled {
            commit_id: "c2".into()
        }
    );

    let forced = harness.orchestrator.run_once(true).await.expect("forced");
    assert_eq!(forced.stages[2].created, 2);
    assert!(matches!(forced.snapshot, SnapshotOutcome::Created { sequence: 2, .. }));

    let replayed = harness
        .orchestrator
        .snapshots()
        .state_at("c2")
        .await
        .unwrap()
        .expect("snapshot for c2");
    let live = catalog_tree(&harness.store.load_all().await.unwrap()).unwrap();
    assert_eq!(replayed, live);
    assert_eq!(
        harness
            .store
            .reconciled_commit()
            .await
            .unwrap()
            .map(|r| r.commit_id)
            .as_deref(),
        Some("c2")
    );
}

#[tokio::test]
async fn forced_rerun_completes_a_partial_refresh() {
    let (backend, harness) = harness();
    backend.fail_on_write(&paths::table(EntityKind::Relationship));
    harness.publish("c1", vec![order(), customer()]);
    harness.orchestrator.run_once(false).await.unwrap_err();

    // The failed pull already consumed the new commit, so the retry is forced.
    let report = harness.orchestrator.run_once(true).await.expect("retry");

    assert_eq!(report.commit_id, "c1");
    assert_eq!(report.stages[0].total(), 0);
    assert_eq!(report.stages[1].total(), 0);
    assert_eq!(report.stages[2].total(), 0);
    assert_eq!(report.stages[3].created, 1);

    let history = harness.orchestrator.snapshots().history().await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn unavailable_source_leaves_catalog_untouched() {
    let (_backend, harness) = harness();
    harness.publish("c1", vec![order()]);
    harness.source.set_unavailable(true).unwrap();

    let err = harness.orchestrator.run_once(false).await.unwrap_err();
    assert!(matches!(err, CatalogError::SourceUnavailable { .. }));
    assert!(harness.store.rows::<Resource>().await.unwrap().is_empty());
    assert!(harness.orchestrator.snapshots().history().await.unwrap().is_empty());

    harness.source.set_unavailable(false).unwrap();
    let report = harness.orchestrator.run_once(false).await.expect("recovered");
    assert_eq!(report.stages[0].created, 1);
}

#[tokio::test]
async fn unreadable_table_aborts_the_stage() {
    let (backend, harness) = harness();
    harness.publish("c1", vec![order()]);
    harness.orchestrator.run_once(false).await.expect("baseline");

    backend.fail_on_read(&paths::table(EntityKind::Resource));
    harness.publish("c2", vec![order(), customer()]);
    let err = harness.orchestrator.run_once(false).await.unwrap_err();

    assert!(matches!(err, CatalogError::Core(_)));
    let names: Vec<String> = harness
        .store
        .rows::<Resource>()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["app.Order"]);
}

#[tokio::test]
async fn snapshot_write_failure_fails_the_run_after_all_stages() {
    let (backend, harness) = harness();
    backend.fail_on_write(&paths::snapshot("c1").unwrap());
    harness.publish("c1", vec![order(), customer()]);

    let err = harness.orchestrator.run_once(false).await.unwrap_err();
    assert!(matches!(err, CatalogError::Core(_)));
    assert_eq!(harness.store.rows::<Relationship>().await.unwrap().len(), 1);
    assert!(harness.orchestrator.snapshots().history().await.unwrap().is_empty());

    // Every stage committed, so an unforced run may capture c1.
    let (tx, rx) = tokio::sync::oneshot::channel();
    harness
        .orchestrator
        .trigger(false, move |outcome| {
            let _ = tx.send(outcome);
        })
        .expect("idle after failure")
        .await
        .expect("join");
    let report = rx.await.expect("callback").expect("retry");
    assert!(report.skipped);
    assert!(matches!(report.snapshot, SnapshotOutcome::Created { sequence: 1, .. }));
    assert_eq!(harness.orchestrator.snapshots().history().await.unwrap().len(), 1);
}

#[tokio::test]
async fn total_backend_failure_is_reported_through_callback() {
    let (backend, harness) = harness();
    harness.publish("c1", vec![order()]);
    backend.fail_all(true);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = harness
        .orchestrator
        .trigger(false, move |outcome| {
            let _ = tx.send(outcome);
        })
        .expect("idle");
    handle.await.expect("join");

    let outcome = rx.await.expect("callback invoked exactly once");
    assert!(outcome.is_err());
    assert!(!harness.orchestrator.is_running());
}
