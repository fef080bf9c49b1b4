//! # mirror-catalog
//!
//! Keeps a persistent catalog in step with the schema of an external,
//! independently evolving codebase.
//!
//! This crate implements the reconciliation pipeline:
//!
//! - **Delta Classification**: Splits stored and extracted entities into
//!   new, restored, removed, and persisted buckets by name
//! - **Staged Reconciliation**: Applies deltas per entity kind with archival
//!   semantics, one atomic table write per stage
//! - **Commit Snapshots**: An append-only log of JSON Patch diffs keyed by
//!   commit id, replayable to any historic state
//! - **Single-Flight Refresh**: Pull, reconcile, snapshot, at most one run at a time
//!
//! ## Entity Kinds
//!
//! | Kind         | Removal  | Owner    |
//! |--------------|----------|----------|
//! | Resource     | archived | -        |
//! | Field        | archived | Resource |
//! | Metadata     | deleted  | Field    |
//! | Relationship | deleted  | Resource |
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mirror_catalog::prelude::*;
//! use mirror_core::LocalFsBackend;
//!
//! let store = CatalogStore::new(Arc::new(LocalFsBackend::new("./.mirror")));
//! let source = Arc::new(GitSource::new("./source", "./scripts/refresh.sh"));
//! let extractor = Arc::new(DocumentExtractor::new(vec!["web.json".into()]));
//!
//! let orchestrator = RefreshOrchestrator::new(store, source, extractor);
//! orchestrator.trigger(false, |outcome| match outcome {
//!     Ok(report) => println!("{} changes", report.total_changes()),
//!     Err(e) => eprintln!("refresh failed: {e}"),
//! })?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod delta;
pub mod error;
pub mod extract;
pub mod flight;
pub mod metrics;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod refresh;
pub mod snapshot;
pub mod source;
pub mod store;

// Re-export main types at crate root
pub use delta::{Archival, Delta, Keyed, classify, duplicate_key};
pub use error::{CatalogError, Result};
pub use extract::{
    DocumentExtractor, ExtractedField, ExtractedMetadata, ExtractedRelationship,
    ExtractedResource, ExtractionDocument, SchemaExtractor, SourceSystem, StaticExtractor,
};
pub use model::{CatalogRow, EntityKind, Field, Metadata, Relationship, Resource};
pub use query::{CatalogQuery, ExclusionRules, FieldView, ResourceFilter, ResourceView};
pub use reconcile::StageReport;
pub use refresh::{RefreshOrchestrator, RefreshOutcome, RefreshReport};
pub use snapshot::{CommitSnapshot, CommitSnapshotManager, SnapshotOutcome, SnapshotSummary};
pub use source::{GitSource, MemorySource, SourceRepository};
pub use store::CatalogStore;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{CatalogError, Result};
    pub use crate::extract::{DocumentExtractor, ExtractedResource, SchemaExtractor};
    pub use crate::query::{CatalogQuery, ExclusionRules, ResourceFilter};
    pub use crate::refresh::{RefreshOrchestrator, RefreshReport};
    pub use crate::snapshot::{CommitSnapshotManager, SnapshotOutcome};
    pub use crate::source::{GitSource, SourceRepository};
    pub use crate::store::CatalogStore;
}
