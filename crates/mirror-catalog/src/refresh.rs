//! Single-flight refresh orchestration.
//!
//! A refresh pulls the source, reconciles the four entity kinds in
//! dependency order, and records a commit snapshot:
//!
//! ```text
//! pull -> Resources -> Fields -> Metadata -> Relationships -> snapshot
//!              \-> Relationships (children of processed resources)
//! ```
//!
//! Each stage commits before the next begins; the run as a whole is not
//! atomic. A failure aborts the remaining stages and leaves earlier ones
//! committed. No snapshot is taken for a failed run.
//!
//! The reconciliation marker is cleared before the first stage and set to the
//! commit after the last one. A run skipped for lack of upstream changes only
//! snapshots when the marker names the head commit, which recovers a snapshot
//! whose write failed without capturing a partially applied catalog.
//!
//! The orchestrator owns an `idle`/`running` flag. [`RefreshOrchestrator::trigger`]
//! flips it, spawns the run, and returns immediately; a concurrent trigger is
//! rejected with [`CatalogError::RefreshInProgress`]. The flag is cleared
//! before the completion callback runs, whatever the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use mirror_core::observability::refresh_span;

use crate::error::{CatalogError, Result};
use crate::extract::{SchemaExtractor, fields_of, metadata_of, relationships_of};
use crate::flight::RefreshGate;
use crate::metrics;
use crate::reconcile::{Scope, StageReport, run_stage};
use crate::snapshot::{CommitSnapshotManager, SnapshotOutcome};
use crate::source::SourceRepository;
use crate::store::CatalogStore;

/// Outcome delivered to the completion callback.
pub type RefreshOutcome = Result<RefreshReport>;

/// Summary of a finished refresh run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Commit the catalog was reconciled against.
    pub commit_id: String,
    /// Whether reconciliation was forced.
    pub forced: bool,
    /// Whether the source had new commits.
    pub source_changed: bool,
    /// True when reconciliation was skipped because nothing changed.
    pub skipped: bool,
    /// Per-stage counters, in stage order. Empty when skipped.
    pub stages: Vec<StageReport>,
    /// Result of the snapshot step.
    pub snapshot: SnapshotOutcome,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RefreshReport {
    /// Total changed rows across all stages.
    #[must_use]
    pub fn total_changes(&self) -> u64 {
        self.stages.iter().map(StageReport::total).sum()
    }
}

struct Pipeline {
    store: CatalogStore,
    source: Arc<dyn SourceRepository>,
    extractor: Arc<dyn SchemaExtractor>,
    snapshots: CommitSnapshotManager,
}

impl Pipeline {
    async fn run(&self, operation: &str, force: bool) -> RefreshOutcome {
        let span = refresh_span(operation, force);
        let recorder = span.clone();

        async move {
            let started_at = Utc::now();
            info!("refresh started");

            let source_changed = self.source.pull().await?;
            let commit_id = self.source.head_commit().await?;
            recorder.record("commit", commit_id.as_str());

            if !source_changed && !force {
                info!("no upstream changes, skipping reconciliation");
                let snapshot = self
                    .snapshots
                    .take_reconciled_snapshot_for(&commit_id)
                    .await?;
                return Ok(RefreshReport {
                    commit_id,
                    forced: force,
                    source_changed,
                    skipped: true,
                    stages: Vec::new(),
                    snapshot,
                    started_at,
                    finished_at: Utc::now(),
                });
            }

            let resources = self.extractor.extract().await?;
            self.store.clear_reconciled().await?;

            let resource_stage = run_stage(&self.store, resources, &Scope::All).await?;
            let resource_scope = Scope::children_of(&resource_stage.processed);
            let fields = fields_of(&resource_stage.processed);
            let relationships = relationships_of(&resource_stage.processed);

            let field_stage = run_stage(&self.store, fields, &resource_scope).await?;
            let field_scope = Scope::children_of(&field_stage.processed);
            let metadata = metadata_of(&field_stage.processed);

            let metadata_stage = run_stage(&self.store, metadata, &field_scope).await?;
            let relationship_stage =
                run_stage(&self.store, relationships, &resource_scope).await?;

            let stages = vec![
                resource_stage.report,
                field_stage.report,
                metadata_stage.report,
                relationship_stage.report,
            ];

            self.store.mark_reconciled(&commit_id).await?;
            let snapshot = self.snapshots.take_snapshot_for(&commit_id).await?;

            let report = RefreshReport {
                commit_id,
                forced: force,
                source_changed,
                skipped: false,
                stages,
                snapshot,
                started_at,
                finished_at: Utc::now(),
            };
            info!(changes = report.total_changes(), "refresh completed");
            Ok(report)
        }
        .instrument(span)
        .await
    }
}

/// Runs refreshes one at a time.
///
/// Cheap to clone; clones share the same single-flight flag.
#[derive(Clone)]
pub struct RefreshOrchestrator {
    pipeline: Arc<Pipeline>,
    gate: RefreshGate,
}

impl std::fmt::Debug for RefreshOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshOrchestrator")
            .field("running", &self.gate.is_running())
            .finish_non_exhaustive()
    }
}

impl RefreshOrchestrator {
    /// Creates an idle orchestrator.
    #[must_use]
    pub fn new(
        store: CatalogStore,
        source: Arc<dyn SourceRepository>,
        extractor: Arc<dyn SchemaExtractor>,
    ) -> Self {
        let snapshots = CommitSnapshotManager::new(store.clone(), Arc::clone(&source));
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                source,
                extractor,
                snapshots,
            }),
            gate: RefreshGate::new(),
        }
    }

    /// Returns the snapshot manager sharing this orchestrator's store and source.
    #[must_use]
    pub fn snapshots(&self) -> &CommitSnapshotManager {
        &self.pipeline.snapshots
    }

    /// Returns the catalog store.
    #[must_use]
    pub fn store(&self) -> &CatalogStore {
        &self.pipeline.store
    }

    /// Returns true while a refresh is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.gate.is_running()
    }

    /// Starts a refresh on a background task and returns immediately.
    ///
    /// `on_complete` is invoked exactly once with the outcome, after the
    /// running flag has been cleared. A panic inside the run is reported as
    /// [`CatalogError::Internal`].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RefreshInProgress`] if a refresh is already
    /// running. The callback is not invoked in that case.
    pub fn trigger<F>(&self, force: bool, on_complete: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(RefreshOutcome) + Send + 'static,
    {
        let Some(guard) = self.gate.try_acquire("trigger") else {
            metrics::record_refresh_rejected();
            return Err(CatalogError::RefreshInProgress);
        };

        let pipeline = Arc::clone(&self.pipeline);

        Ok(tokio::spawn(async move {
            let started = Instant::now();
            let run = tokio::spawn(async move { pipeline.run("trigger", force).await });

            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => Err(CatalogError::Internal {
                    message: format!("refresh task failed: {e}"),
                }),
            };

            finish(&outcome, started);
            drop(guard);
            on_complete(outcome);
        }))
    }

    /// Runs a refresh inline, guarded by the same single-flight flag.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::RefreshInProgress`] if a refresh is already
    /// running, or the run's failure.
    pub async fn run_once(&self, force: bool) -> RefreshOutcome {
        let Some(_guard) = self.gate.try_acquire("run_once") else {
            metrics::record_refresh_rejected();
            return Err(CatalogError::RefreshInProgress);
        };

        let started = Instant::now();
        let outcome = self.pipeline.run("run_once", force).await;
        finish(&outcome, started);
        outcome
    }
}

fn finish(outcome: &RefreshOutcome, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    match outcome {
        Ok(report) => {
            let label = if report.skipped { "skipped" } else { "success" };
            metrics::record_refresh(label, elapsed);
        }
        Err(e) => {
            error!(error = %e, "refresh failed");
            metrics::record_refresh(e.outcome_label(), elapsed);
        }
    }
}
