//! Per-kind reconciliation of extracted entities against stored rows.
//!
//! A stage loads one table, classifies the extraction against it, turns the
//! delta into row ops, and commits the whole table with a single CAS write:
//!
//! | Bucket    | Archivable kinds               | Hard-deleted kinds |
//! |-----------|--------------------------------|--------------------|
//! | new       | insert                         | insert             |
//! | restored  | overwrite + clear `is_archived`| n/a                |
//! | removed   | set `is_archived`              | delete             |
//! | persisted | overwrite if changed           | overwrite if changed |
//!
//! Change detection compares the scalar attributes of the stored row and of
//! the row built from the extraction, ignoring `is_archived` and the kind's
//! volatile attributes.
//!
//! The entities processed by a stage (new, restored, persisted) are returned
//! so the caller can feed their children to the next stage. Removed entities
//! contribute no children.
//!
//! Child stages are scoped to the parents processed in the same run: stored
//! rows whose owner was not processed are neither archived nor deleted. An
//! archived resource therefore keeps its fields and relationships as they were.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument, info};

use mirror_core::observability::stage_span;

use crate::delta::{Archival, Keyed, classify, duplicate_key};
use crate::error::{CatalogError, Result};
use crate::extract::{
    ExtractedField, ExtractedMetadata, ExtractedRelationship, ExtractedResource,
};
use crate::metrics;
use crate::model::{CatalogRow, EntityKind, Field, Metadata, Relationship, Resource};
use crate::store::{CatalogStore, RowOp, Table};

/// Maximum CAS retries for a stage commit.
const DEFAULT_MAX_CAS_RETRIES: u32 = 5;

/// An extracted entity that maps onto a catalog row.
pub trait Reconcilable: Keyed + Clone + Send + Sync + 'static {
    /// Row type stored for this entity.
    type Row: CatalogRow;

    /// Builds the row for this entity, unarchived.
    fn to_row(&self) -> Self::Row;
}

impl Reconcilable for ExtractedResource {
    type Row = Resource;

    fn to_row(&self) -> Resource {
        Resource {
            name: self.name.clone(),
            resource_type: self.resource_type.clone(),
            app: self.app.clone(),
            source_system: self.source_system,
            source_link: self.source_link.clone(),
            description: self.description.clone(),
            primary_key: self.primary_key.clone(),
            is_archived: false,
        }
    }
}

impl Reconcilable for ExtractedField {
    type Row = Field;

    fn to_row(&self) -> Field {
        Field {
            name: self.name.clone(),
            field_type: self.field_type.clone(),
            resource_name: self.resource_name.clone(),
            is_primary_key: self.is_primary_key,
            is_virtual: self.is_virtual,
            description: self.description.clone(),
            is_archived: false,
        }
    }
}

impl Reconcilable for ExtractedMetadata {
    type Row = Metadata;

    fn to_row(&self) -> Metadata {
        Metadata {
            name: self.name.clone(),
            value: self.value.clone(),
            field_name: self.field_name.clone(),
            description: self.description.clone(),
        }
    }
}

impl Reconcilable for ExtractedRelationship {
    type Row = Relationship;

    fn to_row(&self) -> Relationship {
        Relationship {
            name: self.name(),
            relationship_type: self.relationship_type.clone(),
            field_name: self.field_name.clone(),
            related_field_name: self.related_field_name.clone(),
            resource_name: self.resource_name.clone(),
            related_resource_name: self.related_resource_name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Stored rows a stage is allowed to classify as removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Every stored row.
    All,
    /// Rows owned by one of these names.
    OwnedBy(BTreeSet<String>),
}

impl Scope {
    /// Scope covering the children of `parents`.
    #[must_use]
    pub fn children_of<P: Keyed>(parents: &[P]) -> Self {
        Self::OwnedBy(parents.iter().map(|p| p.key().into_owned()).collect())
    }

    fn covers<R: CatalogRow>(&self, row: &R) -> bool {
        match self {
            Self::All => true,
            Self::OwnedBy(owners) => row.owner().is_some_and(|(_, owner)| owners.contains(owner)),
        }
    }
}

/// Change applied to one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Row inserted.
    Create,
    /// Archived row restored.
    Unarchive,
    /// Row archived.
    Archive,
    /// Row overwritten in place.
    Update,
    /// Row physically removed.
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Unarchive => "UNARCHIVE",
            Self::Archive => "ARCHIVE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// Counters for one committed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Kind reconciled by the stage.
    pub kind: EntityKind,
    /// Rows inserted.
    pub created: u64,
    /// Archived rows restored.
    pub unarchived: u64,
    /// Rows archived.
    pub archived: u64,
    /// Rows updated in place.
    pub updated: u64,
    /// Rows deleted.
    pub deleted: u64,
}

impl StageReport {
    /// Creates an all-zero report for `kind`.
    #[must_use]
    pub const fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            created: 0,
            unarchived: 0,
            archived: 0,
            updated: 0,
            deleted: 0,
        }
    }

    fn record(&mut self, action: Action) {
        let slot = match action {
            Action::Create => &mut self.created,
            Action::Unarchive => &mut self.unarchived,
            Action::Archive => &mut self.archived,
            Action::Update => &mut self.updated,
            Action::Delete => &mut self.deleted,
        };
        *slot += 1;
    }

    /// Counters as `(action label, count)` pairs.
    #[must_use]
    pub const fn counts(&self) -> [(&'static str, u64); 5] {
        [
            ("created", self.created),
            ("unarchived", self.unarchived),
            ("archived", self.archived),
            ("updated", self.updated),
            ("deleted", self.deleted),
        ]
    }

    /// Total number of changed rows.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.created + self.unarchived + self.archived + self.updated + self.deleted
    }
}

/// Row ops planned for one stage.
#[derive(Debug, Clone)]
pub struct StagePlan<E: Reconcilable> {
    /// Ops in application order.
    pub ops: Vec<RowOp<E::Row>>,
    /// Counters matching `ops`.
    pub report: StageReport,
    /// New, restored and persisted entities, whose children feed later stages.
    pub processed: Vec<E>,
}

/// Plans the ops that bring the rows of `table` within `scope` in line with `next`.
///
/// # Errors
///
/// Returns `EntityConflict` if `next` names the same entity twice.
pub fn plan<E: Reconcilable>(
    table: &Table<E::Row>,
    next: Vec<E>,
    scope: &Scope,
) -> Result<StagePlan<E>> {
    let kind = E::Row::KIND;
    if let Some(name) = duplicate_key(&next) {
        return Err(CatalogError::EntityConflict { kind, name });
    }
    let previous: Vec<E::Row> = table.rows().filter(|r| scope.covers(*r)).cloned().collect();
    let delta = classify(previous, next, kind.archival());

    let mut ops = Vec::new();
    let mut report = StageReport::new(kind);
    let mut processed =
        Vec::with_capacity(delta.new.len() + delta.restored.len() + delta.persisted.len());

    let note = |action: Action, name: &str, report: &mut StageReport| {
        info!("{}[{action}] {name}", kind.label());
        report.record(action);
    };

    for entity in delta.new {
        let row = entity.to_row();
        note(Action::Create, row.name(), &mut report);
        ops.push(RowOp::Insert(row));
        processed.push(entity);
    }

    for entity in delta.restored {
        let row = entity.to_row();
        note(Action::Unarchive, row.name(), &mut report);
        ops.push(RowOp::Unarchive(row));
        processed.push(entity);
    }

    for row in delta.removed {
        let name = row.name().to_string();
        match kind.archival() {
            Archival::Soft => {
                note(Action::Archive, &name, &mut report);
                ops.push(RowOp::Archive(name));
            }
            Archival::Hard => {
                note(Action::Delete, &name, &mut report);
                ops.push(RowOp::Delete(name));
            }
        }
    }

    for entity in delta.persisted {
        let mut candidate = entity.to_row();
        let stored = table.get(candidate.name()).ok_or_else(|| CatalogError::Internal {
            message: format!("persisted {kind} '{}' missing from table", candidate.name()),
        })?;
        candidate.set_archived(stored.is_archived());

        if projection(stored)? != projection(&candidate)? {
            note(Action::Update, candidate.name(), &mut report);
            ops.push(RowOp::Update(candidate));
        }
        processed.push(entity);
    }

    Ok(StagePlan {
        ops,
        report,
        processed,
    })
}

/// Scalar attributes compared by change detection.
fn projection<R: CatalogRow>(row: &R) -> Result<Value> {
    let mut value = serde_json::to_value(row)?;
    if let Value::Object(map) = &mut value {
        map.retain(|key, attr| {
            !(key == "is_archived"
                || R::VOLATILE.contains(&key.as_str())
                || attr.is_array()
                || attr.is_object())
        });
    }
    Ok(value)
}

/// Result of a committed stage.
#[derive(Debug, Clone)]
pub struct StageOutcome<E> {
    /// Counters of the committed changes.
    pub report: StageReport,
    /// Entities whose children feed later stages.
    pub processed: Vec<E>,
}

/// Reconciles one kind and commits it atomically.
///
/// A lost CAS race replans against the fresh table.
///
/// # Errors
///
/// Returns `EntityConflict` if the extraction names an entity twice or creates
/// an existing name, `MissingReference` if a written row has no owner, or a storage error.
pub async fn run_stage<E: Reconcilable>(
    store: &CatalogStore,
    next: Vec<E>,
    scope: &Scope,
) -> Result<StageOutcome<E>> {
    let kind = E::Row::KIND;

    async move {
        for attempt in 1..=DEFAULT_MAX_CAS_RETRIES {
            let mut table = store.load_table::<E::Row>().await?;
            let staged = plan(&table, next.clone(), scope)?;

            if staged.ops.is_empty() {
                info!(kind = %kind, "{} stage unchanged", kind.label());
                return Ok(StageOutcome {
                    report: staged.report,
                    processed: staged.processed,
                });
            }

            table.apply(&staged.ops)?;
            store.check_references(&staged.ops).await?;

            if store.write_table(&table).await? {
                metrics::record_entity_changes(&staged.report);
                let r = &staged.report;
                info!(
                    kind = %kind,
                    created = r.created,
                    unarchived = r.unarchived,
                    archived = r.archived,
                    updated = r.updated,
                    deleted = r.deleted,
                    "{} stage committed",
                    kind.label()
                );
                return Ok(StageOutcome {
                    report: staged.report,
                    processed: staged.processed,
                });
            }

            metrics::record_cas_retry(kind);
            if attempt == DEFAULT_MAX_CAS_RETRIES {
                return Err(CatalogError::CasFailed {
                    message: format!("{kind} table update lost CAS race after max retries"),
                });
            }
        }

        Err(CatalogError::Internal {
            message: "unreachable: CAS retry loop exhausted".into(),
        })
    }
    .instrument(stage_span(kind.as_str()))
    .await
}
