//! Persisted catalog tables and the commit snapshot log.
//!
//! # Storage Layout
//!
//! ```text
//! {root}/
//! ├── tables/
//! │   ├── resource.json
//! │   ├── field.json
//! │   ├── metadata.json
//! │   └── relationship.json
//! ├── snapshots/
//! │   └── {commit_id}.json
//! └── state/
//!     └── reconciled.json
//! ```
//!
//! Each table is a single object holding every row of its kind. A stage
//! commit rewrites the whole object with a `MatchesVersion` precondition, so
//! a stage is applied entirely or not at all. Snapshots are written with
//! `DoesNotExist`, which makes the store the arbiter of "one snapshot per
//! commit id".
//!
//! `state/reconciled.json` names the commit the last complete refresh
//! reconciled against. It is removed before a refresh touches any table and
//! written back once all four stages have committed, so it is absent while
//! the tables may be partially applied.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mirror_core::storage::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{CatalogError, Result};
use crate::model::{CatalogRow, EntityKind, Field, Metadata, Relationship, Resource};
use crate::snapshot::CommitSnapshot;

/// Canonical object paths.
pub mod paths {
    use crate::error::{CatalogError, Result};
    use crate::model::EntityKind;

    /// Prefix of every table object.
    pub const TABLES_PREFIX: &str = "tables/";

    /// Prefix of every snapshot object.
    pub const SNAPSHOTS_PREFIX: &str = "snapshots/";

    /// Marker naming the last fully reconciled commit.
    pub const RECONCILED: &str = "state/reconciled.json";

    /// Path of the table holding rows of `kind`.
    #[must_use]
    pub fn table(kind: EntityKind) -> String {
        format!("{TABLES_PREFIX}{}.json", kind.as_str())
    }

    /// Path of the snapshot for `commit_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the id is empty or contains path separators.
    pub fn snapshot(commit_id: &str) -> Result<String> {
        if commit_id.is_empty()
            || commit_id.contains(['/', '\\'])
            || commit_id.starts_with('.')
        {
            return Err(CatalogError::Core(mirror_core::Error::InvalidInput(format!(
                "invalid commit id: '{commit_id}'"
            ))));
        }
        Ok(format!("{SNAPSHOTS_PREFIX}{commit_id}.json"))
    }
}

/// A mutation of one row within a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp<R> {
    /// Create a row; conflicts if the name exists.
    Insert(R),
    /// Overwrite an existing row in place.
    Update(R),
    /// Overwrite an archived row with fresh attributes and clear `is_archived`.
    Unarchive(R),
    /// Set `is_archived` on an existing row, leaving other attributes untouched.
    Archive(String),
    /// Physically remove a row.
    Delete(String),
}

impl<R: CatalogRow> RowOp<R> {
    /// The row written by this op, if it writes one.
    #[must_use]
    pub fn written_row(&self) -> Option<&R> {
        match self {
            Self::Insert(row) | Self::Update(row) | Self::Unarchive(row) => Some(row),
            Self::Archive(_) | Self::Delete(_) => None,
        }
    }
}

/// All rows of one kind, plus the version they were read at.
#[derive(Debug, Clone)]
pub struct Table<R> {
    rows: BTreeMap<String, R>,
    version: Option<String>,
}

impl<R: CatalogRow> Table<R> {
    /// Creates an empty, never-written table.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rows: BTreeMap::new(),
            version: None,
        }
    }

    /// Looks up a row by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&R> {
        self.rows.get(name)
    }

    /// Returns true if a row with `name` exists (archived included).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.rows.contains_key(name)
    }

    /// Iterates rows in name order.
    pub fn rows(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    /// Consumes the table, returning rows in name order.
    #[must_use]
    pub fn into_rows(self) -> Vec<R> {
        self.rows.into_values().collect()
    }

    /// Number of rows (archived included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Version token the table was read at; `None` if never written.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Applies ops in order.
    ///
    /// # Errors
    ///
    /// Returns `EntityConflict` if an insert targets an existing name, and
    /// `Internal` if an op targets a row that does not exist.
    pub fn apply(&mut self, ops: &[RowOp<R>]) -> Result<()> {
        for op in ops {
            match op {
                RowOp::Insert(row) => {
                    if self.rows.contains_key(row.name()) {
                        return Err(CatalogError::EntityConflict {
                            kind: R::KIND,
                            name: row.name().to_string(),
                        });
                    }
                    self.rows.insert(row.name().to_string(), row.clone());
                }
                RowOp::Update(row) | RowOp::Unarchive(row) => {
                    let slot = self.existing_mut(row.name())?;
                    *slot = row.clone();
                    if matches!(op, RowOp::Unarchive(_)) {
                        slot.set_archived(false);
                    }
                }
                RowOp::Archive(name) => {
                    self.existing_mut(name)?.set_archived(true);
                }
                RowOp::Delete(name) => {
                    if self.rows.remove(name).is_none() {
                        return Err(missing_row(R::KIND, name));
                    }
                }
            }
        }
        Ok(())
    }

    fn existing_mut(&mut self, name: &str) -> Result<&mut R> {
        self.rows
            .get_mut(name)
            .ok_or_else(|| missing_row(R::KIND, name))
    }
}

fn missing_row(kind: EntityKind, name: &str) -> CatalogError {
    CatalogError::Internal {
        message: format!("{kind} '{name}' vanished between load and apply"),
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile<R> {
    kind: EntityKind,
    updated_at: DateTime<Utc>,
    rows: Vec<R>,
}

/// Every row of the catalog, read table by table.
#[derive(Debug, Clone, Default)]
pub struct CatalogTables {
    /// Resource rows in name order.
    pub resources: Vec<Resource>,
    /// Field rows in name order.
    pub fields: Vec<Field>,
    /// Metadata rows in name order.
    pub metadata: Vec<Metadata>,
    /// Relationship rows in name order.
    pub relationships: Vec<Relationship>,
}

/// Commit the tables were last fully reconciled against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledCommit {
    /// Commit id of the external codebase.
    pub commit_id: String,
    /// When the last stage committed.
    pub reconciled_at: DateTime<Utc>,
}

/// Typed access to the catalog's objects in a storage backend.
#[derive(Clone)]
pub struct CatalogStore {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore").finish_non_exhaustive()
    }
}

impl CatalogStore {
    /// Creates a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Returns the underlying backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Loads the table for `R`, empty if it was never written.
    pub async fn load_table<R: CatalogRow>(&self) -> Result<Table<R>> {
        let path = paths::table(R::KIND);
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(Table::empty());
        };

        let bytes = self.storage.get(&path).await?;
        let file: TableFile<R> =
            serde_json::from_slice(&bytes).map_err(|e| CatalogError::Serialization {
                message: format!("parse JSON at {path}: {e}"),
            })?;

        let rows = file
            .rows
            .into_iter()
            .map(|row| (row.name().to_string(), row))
            .collect();

        Ok(Table {
            rows,
            version: Some(meta.version),
        })
    }

    /// Loads all rows of `R` in name order.
    pub async fn rows<R: CatalogRow>(&self) -> Result<Vec<R>> {
        Ok(self.load_table::<R>().await?.into_rows())
    }

    /// Loads every table.
    pub async fn load_all(&self) -> Result<CatalogTables> {
        Ok(CatalogTables {
            resources: self.rows().await?,
            fields: self.rows().await?,
            metadata: self.rows().await?,
            relationships: self.rows().await?,
        })
    }

    /// Writes `table` if nobody changed it since it was loaded.
    ///
    /// Returns `false` when the version precondition failed.
    pub async fn write_table<R: CatalogRow>(&self, table: &Table<R>) -> Result<bool> {
        let path = paths::table(R::KIND);
        let file = TableFile {
            kind: R::KIND,
            updated_at: Utc::now(),
            rows: table.rows.values().collect::<Vec<_>>(),
        };
        let precondition = match &table.version {
            Some(version) => WritePrecondition::MatchesVersion(version.clone()),
            None => WritePrecondition::DoesNotExist,
        };

        match self
            .storage
            .put(&path, json_bytes(&file)?, precondition)
            .await?
        {
            WriteResult::Success { .. } => Ok(true),
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }

    /// Verifies that every row written by `ops` references an existing owner.
    ///
    /// Archived owners count as existing.
    pub async fn check_references<R: CatalogRow>(&self, ops: &[RowOp<R>]) -> Result<()> {
        let mut owners: Option<(EntityKind, BTreeSet<String>)> = None;

        for row in ops.iter().filter_map(RowOp::written_row) {
            let Some((owner_kind, owner_name)) = row.owner() else {
                continue;
            };

            if owners.as_ref().is_none_or(|(kind, _)| *kind != owner_kind) {
                owners = Some((owner_kind, self.names(owner_kind).await?));
            }

            let known = owners
                .as_ref()
                .is_some_and(|(_, names)| names.contains(owner_name));
            if !known {
                return Err(CatalogError::MissingReference {
                    kind: R::KIND,
                    name: row.name().to_string(),
                    reference: owner_name.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn names(&self, kind: EntityKind) -> Result<BTreeSet<String>> {
        fn collect<R: CatalogRow>(table: Table<R>) -> BTreeSet<String> {
            table.rows.into_keys().collect()
        }

        Ok(match kind {
            EntityKind::Resource => collect(self.load_table::<Resource>().await?),
            EntityKind::Field => collect(self.load_table::<Field>().await?),
            EntityKind::Metadata => collect(self.load_table::<Metadata>().await?),
            EntityKind::Relationship => collect(self.load_table::<Relationship>().await?),
        })
    }

    // ========================================================================
    // Reconciliation marker
    // ========================================================================

    /// Reads the commit of the last complete refresh, if any.
    pub async fn reconciled_commit(&self) -> Result<Option<ReconciledCommit>> {
        match self.storage.get(paths::RECONCILED).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                CatalogError::Serialization {
                    message: format!("parse JSON at {}: {e}", paths::RECONCILED),
                }
            }),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Records that every stage has committed against `commit_id`.
    pub async fn mark_reconciled(&self, commit_id: &str) -> Result<()> {
        let marker = ReconciledCommit {
            commit_id: commit_id.to_string(),
            reconciled_at: Utc::now(),
        };
        self.storage
            .put(paths::RECONCILED, json_bytes(&marker)?, WritePrecondition::None)
            .await?;
        Ok(())
    }

    /// Removes the marker before tables are touched.
    pub async fn clear_reconciled(&self) -> Result<()> {
        self.storage.delete(paths::RECONCILED).await?;
        Ok(())
    }

    // ========================================================================
    // Snapshot log
    // ========================================================================

    /// Returns true if a snapshot exists for `commit_id`.
    pub async fn snapshot_exists(&self, commit_id: &str) -> Result<bool> {
        let path = paths::snapshot(commit_id)?;
        Ok(self.storage.head(&path).await?.is_some())
    }

    /// Reads the snapshot for `commit_id`, if any.
    pub async fn snapshot(&self, commit_id: &str) -> Result<Option<CommitSnapshot>> {
        let path = paths::snapshot(commit_id)?;
        match self.storage.get(&path).await {
            Ok(bytes) => Ok(Some(parse_snapshot(&path, &bytes)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every snapshot, ordered by sequence.
    pub async fn snapshots(&self) -> Result<Vec<CommitSnapshot>> {
        let mut metas = self.storage.list(paths::SNAPSHOTS_PREFIX).await?;
        metas.sort_by(|a, b| a.path.cmp(&b.path));

        let mut snapshots = Vec::with_capacity(metas.len());
        for meta in metas {
            let bytes = self.storage.get(&meta.path).await?;
            snapshots.push(parse_snapshot(&meta.path, &bytes)?);
        }
        snapshots.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(snapshots)
    }

    /// Removes the snapshot for `commit_id`. Missing snapshots are ignored.
    pub async fn remove_snapshot(&self, commit_id: &str) -> Result<()> {
        let path = paths::snapshot(commit_id)?;
        self.storage.delete(&path).await?;
        Ok(())
    }

    /// Inserts a snapshot. Returns `false` if one already exists for its commit.
    pub async fn insert_snapshot(&self, snapshot: &CommitSnapshot) -> Result<bool> {
        let path = paths::snapshot(&snapshot.commit_id)?;
        match self
            .storage
            .put(&path, json_bytes(snapshot)?, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(true),
            WriteResult::PreconditionFailed { .. } => Ok(false),
        }
    }
}

fn parse_snapshot(path: &str, bytes: &[u8]) -> Result<CommitSnapshot> {
    serde_json::from_slice(bytes).map_err(|e| CatalogError::Serialization {
        message: format!("parse JSON at {path}: {e}"),
    })
}

fn json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CatalogError::Serialization {
            message: format!("serialize JSON: {e}"),
        })
}
