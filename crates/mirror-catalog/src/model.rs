//! Catalog rows as persisted by the store.
//!
//! Every entity is identified by its unique dotted name (`app.Module.Class`
//! for resources, `resource.field` for fields, `field.meta` for metadata).
//! The name is the reconciliation key; there is no surrogate identity.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::delta::{Archival, Keyed};
use crate::extract::SourceSystem;

/// The four catalog entity kinds, in reconciliation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A model/collection of the external codebase.
    Resource,
    /// A column/attribute of a resource.
    Field,
    /// A key/value annotation on a field.
    Metadata,
    /// A link between two resources through their fields.
    Relationship,
}

impl EntityKind {
    /// All kinds in the order stages run.
    pub const ALL: [Self; 4] = [
        Self::Resource,
        Self::Field,
        Self::Metadata,
        Self::Relationship,
    ];

    /// Lowercase identifier used in storage paths and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Field => "field",
            Self::Metadata => "metadata",
            Self::Relationship => "relationship",
        }
    }

    /// Capitalized label used in change log lines (`Resource[CREATE] ...`).
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Resource => "Resource",
            Self::Field => "Field",
            Self::Metadata => "Metadata",
            Self::Relationship => "Relationship",
        }
    }

    /// Whether removal archives or deletes rows of this kind.
    #[must_use]
    pub const fn archival(self) -> Archival {
        match self {
            Self::Resource | Self::Field => Archival::Soft,
            Self::Metadata | Self::Relationship => Archival::Hard,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row that can live in a catalog table.
pub trait CatalogRow:
    Keyed + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind of entity stored in this row.
    const KIND: EntityKind;

    /// Attributes ignored by change detection besides `is_archived`.
    const VOLATILE: &'static [&'static str] = &[];

    /// Unique name within the kind.
    fn name(&self) -> &str;

    /// Whether the row is currently archived. Always false for hard-deleted kinds.
    fn is_archived(&self) -> bool {
        false
    }

    /// Sets the archived flag. No-op for hard-deleted kinds.
    fn set_archived(&mut self, _archived: bool) {}

    /// The owning row this one references, if any.
    fn owner(&self) -> Option<(EntityKind, &str)> {
        None
    }
}

/// A catalog resource (model, table, or collection of the external codebase).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique dotted name, e.g. `app.Module.Order`.
    pub name: String,
    /// Resource type as reported by the extractor.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Application the resource belongs to.
    pub app: String,
    /// System the resource was extracted from.
    pub source_system: SourceSystem,
    /// Link to the resource definition in the external codebase.
    pub source_link: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Primary key attribute name.
    pub primary_key: Option<String>,
    /// True once the resource disappeared from the extraction.
    pub is_archived: bool,
}

impl CatalogRow for Resource {
    const KIND: EntityKind = EntityKind::Resource;
    const VOLATILE: &'static [&'static str] = &["source_system"];

    fn name(&self) -> &str {
        &self.name
    }

    fn is_archived(&self) -> bool {
        self.is_archived
    }

    fn set_archived(&mut self, archived: bool) {
        self.is_archived = archived;
    }
}

/// A field of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Unique dotted name, `resource.field`.
    pub name: String,
    /// Field type string as reported by the extractor.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Owning resource.
    pub resource_name: String,
    /// Whether the field is (part of) the primary key.
    pub is_primary_key: bool,
    /// Whether the field is computed rather than stored.
    pub is_virtual: bool,
    /// Free-form description.
    pub description: Option<String>,
    /// True once the field disappeared from the extraction.
    pub is_archived: bool,
}

impl CatalogRow for Field {
    const KIND: EntityKind = EntityKind::Field;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_archived(&self) -> bool {
        self.is_archived
    }

    fn set_archived(&mut self, archived: bool) {
        self.is_archived = archived;
    }

    fn owner(&self) -> Option<(EntityKind, &str)> {
        Some((EntityKind::Resource, &self.resource_name))
    }
}

/// A metadata entry attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique dotted name, `field.meta`.
    pub name: String,
    /// Stringified value.
    pub value: String,
    /// Owning field.
    pub field_name: String,
    /// Free-form description.
    pub description: Option<String>,
}

impl CatalogRow for Metadata {
    const KIND: EntityKind = EntityKind::Metadata;

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<(EntityKind, &str)> {
        Some((EntityKind::Field, &self.field_name))
    }
}

/// A relationship between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Derived name, `field(type)related_field`.
    pub name: String,
    /// Relationship type, e.g. `ForeignKey`.
    #[serde(rename = "type")]
    pub relationship_type: String,
    /// Field on the owning resource.
    pub field_name: String,
    /// Field on the related resource.
    pub related_field_name: String,
    /// Owning resource.
    pub resource_name: String,
    /// Related resource.
    pub related_resource_name: String,
    /// Free-form description.
    pub description: Option<String>,
}

impl CatalogRow for Relationship {
    const KIND: EntityKind = EntityKind::Relationship;

    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> Option<(EntityKind, &str)> {
        Some((EntityKind::Resource, &self.resource_name))
    }
}

macro_rules! keyed_by_row_name {
    ($($row:ty),+ $(,)?) => {
        $(
            impl Keyed for $row {
                fn key(&self) -> Cow<'_, str> {
                    Cow::Borrowed(CatalogRow::name(self))
                }

                fn archived(&self) -> bool {
                    CatalogRow::is_archived(self)
                }
            }
        )+
    };
}

keyed_by_row_name!(Resource, Field, Metadata, Relationship);
