//! Commit snapshots: an append-only history of catalog states.
//!
//! Each snapshot stores the RFC 6902 JSON Patch that turns the state
//! reconstructed from all earlier snapshots into the catalog as it stood when
//! the snapshot was taken. Any historic state is recovered by replaying the
//! patches from an empty object.
//!
//! The catalog tree is an object keyed by resource name. Each resource
//! carries its attributes plus `fields` (keyed by name, each with nested
//! `metadata` keyed by name) and `relationships` (keyed by name). Archived
//! rows are included with their `is_archived` flag.
//!
//! Every snapshot also records the SHA-256 of the full state it describes;
//! replay verifies it so a corrupted or reordered log is detected.
//!
//! A snapshot is only meaningful for a catalog that was fully reconciled
//! against its commit. The refresh pipeline snapshots after its last stage;
//! [`CommitSnapshotManager::take_reconciled_snapshot`] serves callers outside
//! a refresh and declines while the reconciliation marker names another
//! commit.
//!
//! Sequence numbers are assigned as `last + 1`. Writers in different
//! processes can both claim the same number; after inserting, a writer that
//! finds another snapshot holding its sequence withdraws its own entry and
//! fails with `CasFailed`, leaving the log replayable for the next attempt.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use json_patch::{Patch, PatchOperation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};
use crate::metrics;
use crate::source::SourceRepository;
use crate::store::{CatalogStore, CatalogTables};

/// One entry of the snapshot log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSnapshot {
    /// Commit id of the external codebase.
    pub commit_id: String,
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// `sha256:` digest of the full state after applying `diff`.
    pub state_hash: String,
    /// Patch from the previous state to this one.
    pub diff: Patch,
}

/// Result of [`CommitSnapshotManager::take_commit_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SnapshotOutcome {
    /// A new snapshot was appended.
    Created {
        /// Commit id of the snapshot.
        commit_id: String,
        /// Position in the log.
        sequence: u64,
        /// Number of patch operations recorded.
        operations: usize,
    },
    /// The commit was already captured; nothing was written.
    AlreadyExists {
        /// Commit id of the existing snapshot.
        commit_id: String,
    },
    /// The catalog was not fully reconciled against the commit; nothing was written.
    Unreconciled {
        /// Commit id that was not captured.
        commit_id: String,
    },
}

/// Patch operation counts of one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    /// `add` operations.
    pub add: usize,
    /// `remove` operations.
    pub remove: usize,
    /// `replace` operations.
    pub replace: usize,
    /// `move`, `copy` and `test` operations.
    pub other: usize,
}

impl OperationCounts {
    fn of(patch: &Patch) -> Self {
        let mut counts = Self::default();
        for op in &patch.0 {
            match op {
                PatchOperation::Add(_) => counts.add += 1,
                PatchOperation::Remove(_) => counts.remove += 1,
                PatchOperation::Replace(_) => counts.replace += 1,
                _ => counts.other += 1,
            }
        }
        counts
    }

    /// Total number of operations.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.add + self.remove + self.replace + self.other
    }
}

/// A history entry without the patch body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    /// Commit id of the external codebase.
    pub commit_id: String,
    /// Position in the log.
    pub sequence: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Digest of the state after this snapshot.
    pub state_hash: String,
    /// Operation counts of the recorded patch.
    pub operations: OperationCounts,
}

impl From<&CommitSnapshot> for SnapshotSummary {
    fn from(snapshot: &CommitSnapshot) -> Self {
        Self {
            commit_id: snapshot.commit_id.clone(),
            sequence: snapshot.sequence,
            created_at: snapshot.created_at,
            state_hash: snapshot.state_hash.clone(),
            operations: OperationCounts::of(&snapshot.diff),
        }
    }
}

/// Records and replays commit snapshots.
#[derive(Clone)]
pub struct CommitSnapshotManager {
    store: CatalogStore,
    source: Arc<dyn SourceRepository>,
}

impl std::fmt::Debug for CommitSnapshotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitSnapshotManager")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CommitSnapshotManager {
    /// Creates a manager resolving commit ids through `source`.
    #[must_use]
    pub fn new(store: CatalogStore, source: Arc<dyn SourceRepository>) -> Self {
        Self { store, source }
    }

    /// Captures the current catalog against the source's current commit.
    ///
    /// Idempotent per commit id: a second call for the same commit returns
    /// [`SnapshotOutcome::AlreadyExists`] without writing.
    pub async fn take_commit_snapshot(&self) -> Result<SnapshotOutcome> {
        let commit_id = self.source.head_commit().await?;
        self.take_snapshot_for(&commit_id).await
    }

    /// Captures the catalog against the source's current commit, provided the
    /// last complete refresh reconciled against that commit.
    pub async fn take_reconciled_snapshot(&self) -> Result<SnapshotOutcome> {
        let commit_id = self.source.head_commit().await?;
        self.take_reconciled_snapshot_for(&commit_id).await
    }

    /// Captures the catalog against `commit_id` if it is the reconciled commit.
    ///
    /// Returns [`SnapshotOutcome::Unreconciled`] without writing when the
    /// tables may not reflect `commit_id`.
    pub async fn take_reconciled_snapshot_for(
        &self,
        commit_id: &str,
    ) -> Result<SnapshotOutcome> {
        if !self.store.snapshot_exists(commit_id).await? {
            let reconciled = self.store.reconciled_commit().await?;
            if reconciled.as_ref().is_none_or(|r| r.commit_id != commit_id) {
                info!(commit = commit_id, "catalog not reconciled, snapshot deferred");
                metrics::record_snapshot_operation("unreconciled");
                return Ok(SnapshotOutcome::Unreconciled {
                    commit_id: commit_id.to_string(),
                });
            }
        }
        self.take_snapshot_for(commit_id).await
    }

    /// Captures the current catalog against `commit_id`.
    pub async fn take_snapshot_for(&self, commit_id: &str) -> Result<SnapshotOutcome> {
        info!(commit = commit_id, "taking commit snapshot");

        if self.store.snapshot_exists(commit_id).await? {
            warn!(commit = commit_id, "commit already has snapshot");
            metrics::record_snapshot_operation("already_exists");
            return Ok(SnapshotOutcome::AlreadyExists {
                commit_id: commit_id.to_string(),
            });
        }

        let log = self.store.snapshots().await?;
        let previous_state = replay(&log)?;
        let current_state = catalog_tree(&self.store.load_all().await?)?;

        let diff = json_patch::diff(&previous_state, &current_state);
        let sequence = log.last().map_or(1, |s| s.sequence + 1);
        let operations = diff.0.len();

        let snapshot = CommitSnapshot {
            commit_id: commit_id.to_string(),
            sequence,
            created_at: Utc::now(),
            state_hash: state_hash(&current_state)?,
            diff,
        };

        if !self.store.insert_snapshot(&snapshot).await? {
            // Lost a race with another writer for the same commit.
            warn!(commit = commit_id, "commit snapshot written concurrently");
            metrics::record_snapshot_operation("already_exists");
            return Ok(SnapshotOutcome::AlreadyExists {
                commit_id: commit_id.to_string(),
            });
        }

        let rivals: Vec<String> = self
            .store
            .snapshots()
            .await?
            .into_iter()
            .filter(|s| s.sequence == sequence && s.commit_id != commit_id)
            .map(|s| s.commit_id)
            .collect();
        if !rivals.is_empty() {
            warn!(
                commit = commit_id,
                sequence,
                ?rivals,
                "snapshot sequence claimed concurrently"
            );
            self.store.remove_snapshot(commit_id).await?;
            metrics::record_snapshot_operation("conflict");
            return Err(CatalogError::CasFailed {
                message: format!(
                    "snapshot sequence {sequence} for commit {commit_id} also claimed by {}",
                    rivals.join(", ")
                ),
            });
        }

        metrics::record_snapshot_operation("created");
        info!(commit = commit_id, sequence, operations, "commit snapshot created");

        Ok(SnapshotOutcome::Created {
            commit_id: commit_id.to_string(),
            sequence,
            operations,
        })
    }

    /// Lists snapshots in creation order.
    pub async fn history(&self) -> Result<Vec<SnapshotSummary>> {
        Ok(self
            .store
            .snapshots()
            .await?
            .iter()
            .map(SnapshotSummary::from)
            .collect())
    }

    /// Reconstructs the catalog tree as of `commit_id`.
    ///
    /// Returns `None` if no snapshot exists for the commit.
    pub async fn state_at(&self, commit_id: &str) -> Result<Option<Value>> {
        let log = self.store.snapshots().await?;
        let Some(position) = log.iter().position(|s| s.commit_id == commit_id) else {
            return Ok(None);
        };
        replay(&log[..=position]).map(Some)
    }

    /// Reconstructs the catalog tree recorded by the most recent snapshot.
    pub async fn latest_state(&self) -> Result<Value> {
        replay(&self.store.snapshots().await?)
    }
}

/// Replays `log` from an empty object, verifying each recorded digest.
pub fn replay(log: &[CommitSnapshot]) -> Result<Value> {
    let mut state = Value::Object(Map::new());

    for snapshot in log {
        json_patch::patch(&mut state, &snapshot.diff.0).map_err(|e| CatalogError::Patch {
            commit_id: snapshot.commit_id.clone(),
            message: e.to_string(),
        })?;

        if state_hash(&state)? != snapshot.state_hash {
            return Err(CatalogError::Patch {
                commit_id: snapshot.commit_id.clone(),
                message: "replayed state does not match recorded digest".into(),
            });
        }
    }

    Ok(state)
}

/// Builds the nested catalog tree from flat tables.
///
/// Children whose owner is missing are left out.
pub fn catalog_tree(tables: &CatalogTables) -> Result<Value> {
    let mut metadata_by_field: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
    for meta in &tables.metadata {
        metadata_by_field
            .entry(meta.field_name.as_str())
            .or_default()
            .insert(meta.name.clone(), serde_json::to_value(meta)?);
    }

    let mut fields_by_resource: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
    for field in &tables.fields {
        let mut node = object(serde_json::to_value(field)?);
        node.insert(
            "metadata".into(),
            Value::Object(metadata_by_field.remove(field.name.as_str()).unwrap_or_default()),
        );
        fields_by_resource
            .entry(field.resource_name.as_str())
            .or_default()
            .insert(field.name.clone(), Value::Object(node));
    }

    let mut relationships_by_resource: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
    for rel in &tables.relationships {
        relationships_by_resource
            .entry(rel.resource_name.as_str())
            .or_default()
            .insert(rel.name.clone(), serde_json::to_value(rel)?);
    }

    let mut tree = Map::new();
    for resource in &tables.resources {
        let mut node = object(serde_json::to_value(resource)?);
        node.insert(
            "fields".into(),
            Value::Object(
                fields_by_resource
                    .remove(resource.name.as_str())
                    .unwrap_or_default(),
            ),
        );
        node.insert(
            "relationships".into(),
            Value::Object(
                relationships_by_resource
                    .remove(resource.name.as_str())
                    .unwrap_or_default(),
            ),
        );
        tree.insert(resource.name.clone(), Value::Object(node));
    }

    Ok(Value::Object(tree))
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `sha256:` digest of the canonical serialization of `state`.
pub fn state_hash(state: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(format!("sha256:{:x}", Sha256::digest(&bytes)))
}
