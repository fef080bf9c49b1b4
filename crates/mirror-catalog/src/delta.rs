//! Delta classification between stored and freshly extracted entities.
//!
//! Entities are compared purely by name. For archivable kinds:
//!
//! ```text
//! new       = next - (prev_active + prev_archived)
//! restored  = prev_archived & next
//! removed   = prev_active - next
//! persisted = prev_active & next
//! ```
//!
//! For hard-deleted kinds `restored` is always empty and the archived flag is
//! ignored. Buckets keep input order: next-side objects for
//! new/restored/persisted and previous-side objects for removed.
//!
//! Next-side names must be unique. Callers reject extractions for which
//! [`duplicate_key`] finds a name before classifying them.

use std::borrow::Cow;
use std::collections::HashSet;

/// Removal semantics of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archival {
    /// Removed entities are flagged `is_archived` and kept.
    Soft,
    /// Removed entities are physically deleted.
    Hard,
}

/// Anything that can be matched by name during classification.
pub trait Keyed {
    /// Reconciliation key.
    fn key(&self) -> Cow<'_, str>;

    /// Whether the stored entity is archived. Ignored for next-side entities.
    fn archived(&self) -> bool {
        false
    }
}

/// Classification of previous and next entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<P, N> {
    /// Names never seen before.
    pub new: Vec<N>,
    /// Archived names that reappeared.
    pub restored: Vec<N>,
    /// Active names that disappeared.
    pub removed: Vec<P>,
    /// Active names still present.
    pub persisted: Vec<N>,
}

impl<P, N> Delta<P, N> {
    /// Returns true if nothing is new, restored, or removed.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.new.is_empty() && self.restored.is_empty() && self.removed.is_empty()
    }
}

impl<P, N> Default for Delta<P, N> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            restored: Vec::new(),
            removed: Vec::new(),
            persisted: Vec::new(),
        }
    }
}

/// Returns the first key that occurs more than once in `entities`.
#[must_use]
pub fn duplicate_key<N: Keyed>(entities: &[N]) -> Option<String> {
    let mut seen = HashSet::with_capacity(entities.len());
    entities
        .iter()
        .map(Keyed::key)
        .find(|key| !seen.insert(key.clone()))
        .map(Cow::into_owned)
}

/// Classifies `previous` catalog entities against `next` extracted entities.
#[must_use]
pub fn classify<P, N>(previous: Vec<P>, next: Vec<N>, archival: Archival) -> Delta<P, N>
where
    P: Keyed,
    N: Keyed,
{
    let soft = archival == Archival::Soft;

    let mut prev_active: HashSet<String> = HashSet::new();
    let mut prev_archived: HashSet<String> = HashSet::new();
    for entity in &previous {
        if soft && entity.archived() {
            prev_archived.insert(entity.key().into_owned());
        } else {
            prev_active.insert(entity.key().into_owned());
        }
    }

    let next_names: HashSet<String> = next.iter().map(|e| e.key().into_owned()).collect();

    let mut delta = Delta::default();

    for entity in next {
        let key = entity.key();
        if prev_active.contains(key.as_ref()) {
            delta.persisted.push(entity);
        } else if prev_archived.contains(key.as_ref()) {
            delta.restored.push(entity);
        } else {
            delta.new.push(entity);
        }
    }

    delta.removed = previous
        .into_iter()
        .filter(|e| !(soft && e.archived()) && !next_names.contains(e.key().as_ref()))
        .collect();

    delta
}
