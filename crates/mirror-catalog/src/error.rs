//! Error types for mirror-catalog operations.

use thiserror::Error;

use crate::model::EntityKind;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The external source could not be pulled or inspected.
    ///
    /// Raised before any reconciliation begins; the catalog is untouched.
    #[error("source unavailable: {message}")]
    SourceUnavailable {
        /// Description of the source failure.
        message: String,
    },

    /// A refresh was requested while another one is running.
    #[error("refresh already in progress")]
    RefreshInProgress,

    /// A name is claimed twice for its kind, by a create over an existing
    /// row or by repeated entries in one extraction.
    #[error("{kind} '{name}' already exists")]
    EntityConflict {
        /// Kind of the conflicting entity.
        kind: EntityKind,
        /// Name that was already taken.
        name: String,
    },

    /// A child row references an owner that does not exist.
    #[error("{kind} '{name}' references missing {reference}")]
    MissingReference {
        /// Kind of the referencing row.
        kind: EntityKind,
        /// Name of the referencing row.
        name: String,
        /// Name of the missing owner.
        reference: String,
    },

    /// Extraction output could not be read or parsed.
    #[error("extraction error: {message}")]
    Extraction {
        /// Description of the extraction failure.
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A stored snapshot diff could not be replayed.
    #[error("snapshot replay failed at commit {commit_id}: {message}")]
    Patch {
        /// Commit whose diff failed to apply.
        commit_id: String,
        /// Description of the patch failure.
        message: String,
    },

    /// CAS (Compare-And-Swap) operation failed due to concurrent modification.
    #[error("CAS failed: {message}")]
    CasFailed {
        /// Description of the CAS failure.
        message: String,
    },

    /// Error from the storage layer.
    #[error(transparent)]
    Core(#[from] mirror_core::Error),

    /// Internal invariant violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl CatalogError {
    /// Returns the outcome label used in refresh metrics.
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::RefreshInProgress => "rejected",
            Self::EntityConflict { .. } => "conflict",
            Self::MissingReference { .. } => "missing_reference",
            _ => "failed",
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}
