//! Extraction contract consumed by the reconciler.
//!
//! Adapters that introspect a live schema (Postgres models, Mongo documents,
//! the catalog itself) emit [`ExtractedResource`] trees. The reconciler only
//! depends on this contract, never on how an adapter produced it.
//!
//! Adapters run out of process and write one [`ExtractionDocument`] per
//! source system; [`DocumentExtractor`] reads and concatenates them in the
//! configured order.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::delta::Keyed;
use crate::error::{CatalogError, Result};

/// System an entity was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    /// Relational models.
    Postgres,
    /// Document collections.
    Mongo,
    /// The catalog's own representation.
    #[default]
    Catalog,
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Postgres => "postgres",
            Self::Mongo => "mongo",
            Self::Catalog => "catalog",
        })
    }
}

/// A resource as reported by an adapter, with its fields and relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedResource {
    /// Unique dotted name.
    pub name: String,
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Owning application.
    pub app: String,
    /// Source system tag; stamped from the enclosing document when read from one.
    #[serde(default)]
    pub source_system: SourceSystem,
    /// Link to the definition in the external codebase.
    #[serde(default)]
    pub source_link: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Primary key attribute name.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Stored and virtual fields.
    #[serde(default)]
    pub fields: Vec<ExtractedField>,
    /// Outgoing relationships.
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// A field as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedField {
    /// Unique dotted name.
    pub name: String,
    /// Field type string.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Owning resource.
    pub resource_name: String,
    /// Whether the field is (part of) the primary key.
    #[serde(default)]
    pub is_primary_key: bool,
    /// Whether the field is computed rather than stored.
    #[serde(default)]
    pub is_virtual: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Field metadata.
    #[serde(default)]
    pub metadata: Vec<ExtractedMetadata>,
}

/// A metadata entry as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    /// Unique dotted name.
    pub name: String,
    /// Value, stringified when the adapter emits a non-string scalar.
    #[serde(deserialize_with = "stringified")]
    pub value: String,
    /// Owning field.
    pub field_name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A relationship as reported by an adapter. Its name is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Relationship type.
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
    #[serde(default)]
    pub description: Option<String>,
}

impl ExtractedRelationship {
    /// Derived unique name, `field(type)related_field`.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "{}({}){}",
            self.field_name, self.relationship_type, self.related_field_name
        )
    }
}

fn stringified<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl Keyed for ExtractedResource {
    fn key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl Keyed for ExtractedField {
    fn key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl Keyed for ExtractedMetadata {
    fn key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl Keyed for ExtractedRelationship {
    fn key(&self) -> Cow<'_, str> {
        Cow::Owned(self.name())
    }
}

/// One adapter's output: every resource of a single source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionDocument {
    /// System every resource in the document belongs to.
    pub source_system: SourceSystem,
    /// Extracted resources.
    pub resources: Vec<ExtractedResource>,
}

/// Produces the current schema of the external codebase.
#[async_trait]
pub trait SchemaExtractor: Send + Sync + 'static {
    /// Extracts every resource, with nested fields and relationships.
    async fn extract(&self) -> Result<Vec<ExtractedResource>>;
}

/// Reads adapter output documents from disk.
#[derive(Debug, Clone)]
pub struct DocumentExtractor {
    paths: Vec<PathBuf>,
}

impl DocumentExtractor {
    /// Creates an extractor over the given documents, read in order.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

#[async_trait]
impl SchemaExtractor for DocumentExtractor {
    async fn extract(&self) -> Result<Vec<ExtractedResource>> {
        if self.paths.is_empty() {
            return Err(CatalogError::Extraction {
                message: "no extraction documents configured".into(),
            });
        }

        let mut resources = Vec::new();
        for path in &self.paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| CatalogError::Extraction {
                    message: format!("read {}: {e}", path.display()),
                })?;
            let document: ExtractionDocument =
                serde_json::from_slice(&bytes).map_err(|e| CatalogError::Extraction {
                    message: format!("parse {}: {e}", path.display()),
                })?;

            debug!(
                path = %path.display(),
                source_system = %document.source_system,
                resources = document.resources.len(),
                "read extraction document"
            );

            resources.extend(document.resources.into_iter().map(|mut r| {
                r.source_system = document.source_system;
                r
            }));
        }

        info!(resources = resources.len(), "extracted resources");
        Ok(resources)
    }
}

/// Extractor serving a fixed, replaceable set of resources.
///
/// Used for embedding and tests, where the schema is produced in process.
#[derive(Debug, Default)]
pub struct StaticExtractor {
    resources: RwLock<Vec<ExtractedResource>>,
}

impl StaticExtractor {
    /// Creates an extractor returning `resources`.
    #[must_use]
    pub fn new(resources: Vec<ExtractedResource>) -> Self {
        Self {
            resources: RwLock::new(resources),
        }
    }

    /// Replaces the resources returned by subsequent extractions.
    pub fn replace(&self, resources: Vec<ExtractedResource>) -> Result<()> {
        let mut guard = self.resources.write().map_err(|_| poison_err())?;
        *guard = resources;
        Ok(())
    }
}

fn poison_err() -> CatalogError {
    CatalogError::Internal {
        message: "extractor lock poisoned".into(),
    }
}

#[async_trait]
impl SchemaExtractor for StaticExtractor {
    async fn extract(&self) -> Result<Vec<ExtractedResource>> {
        let guard = self.resources.read().map_err(|_| poison_err())?;
        Ok(guard.clone())
    }
}

/// Flattens the fields of the given resources, in resource order.
#[must_use]
pub fn fields_of(resources: &[ExtractedResource]) -> Vec<ExtractedField> {
    resources.iter().flat_map(|r| r.fields.clone()).collect()
}

/// Flattens the relationships of the given resources, in resource order.
#[must_use]
pub fn relationships_of(resources: &[ExtractedResource]) -> Vec<ExtractedRelationship> {
    resources
        .iter()
        .flat_map(|r| r.relationships.clone())
        .collect()
}

/// Flattens the metadata of the given fields, in field order.
#[must_use]
pub fn metadata_of(fields: &[ExtractedField]) -> Vec<ExtractedMetadata> {
    fields.iter().flat_map(|f| f.metadata.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WEB_DOCUMENT: &str = r#"{
        "source_system": "postgres",
        "resources": [{
            "name": "web.orders.Order",
            "type": "table",
            "app": "web",
            "primary_key": "id",
            "fields": [{
                "name": "web.orders.Order.total",
                "type": "DecimalField",
                "resource_name": "web.orders.Order",
                "metadata": [
                    {"name": "web.orders.Order.total.max_digits", "value": 10, "field_name": "web.orders.Order.total"},
                    {"name": "web.orders.Order.total.null", "value": false, "field_name": "web.orders.Order.total"}
                ]
            }],
            "relationships": [{
                "type": "ForeignKey",
                "field_name": "customer",
                "related_field_name": "id",
                "resource_name": "web.orders.Order",
                "related_resource_name": "web.customers.Customer"
            }]
        }]
    }"#;

    fn write_document(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(body.as_bytes()).expect("write");
        path
    }

    #[test]
    fn relationship_name_is_derived() {
        let rel = ExtractedRelationship {
            relationship_type: "ForeignKey".into(),
            field_name: "customer".into(),
            related_field_name: "id".into(),
            resource_name: "app.Order".into(),
            related_resource_name: "app.Customer".into(),
            description: None,
        };
        assert_eq!(rel.name(), "customer(ForeignKey)id");
        assert_eq!(rel.key(), "customer(ForeignKey)id");
    }

    #[tokio::test]
    async fn document_extractor_stamps_source_and_stringifies_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let web = write_document(&dir, "web.json", WEB_DOCUMENT);
        let mongo = write_document(
            &dir,
            "mongo.json",
            r#"{"source_system": "mongo", "resources": [
                {"name": "mongo.Event", "type": "collection", "app": "mongo", "source_system": "postgres"}
            ]}"#,
        );

        let extractor = DocumentExtractor::new(vec![web, mongo]);
        let resources = extractor.extract().await.expect("extract");

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].source_system, SourceSystem::Postgres);
        assert_eq!(resources[1].source_system, SourceSystem::Mongo);

        let metadata = metadata_of(&fields_of(&resources));
        let values: Vec<&str> = metadata.iter().map(|m| m.value.as_str()).collect();
        assert_eq!(values, vec!["10", "false"]);
        assert_eq!(relationships_of(&resources).len(), 1);
    }

    #[tokio::test]
    async fn document_extractor_reports_unreadable_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = write_document(&dir, "broken.json", "{not json");

        let err = DocumentExtractor::new(vec![broken]).extract().await.unwrap_err();
        assert!(matches!(err, CatalogError::Extraction { .. }));

        let err = DocumentExtractor::new(vec![dir.path().join("missing.json")])
            .extract()
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Extraction { .. }));

        let err = DocumentExtractor::new(Vec::new()).extract().await.unwrap_err();
        assert!(matches!(err, CatalogError::Extraction { .. }));
    }

    #[tokio::test]
    async fn static_extractor_replaces_resources() {
        let extractor = StaticExtractor::default();
        assert!(extractor.extract().await.unwrap().is_empty());

        let document: ExtractionDocument = serde_json::from_str(WEB_DOCUMENT).unwrap();
        extractor.replace(document.resources).unwrap();
        assert_eq!(extractor.extract().await.unwrap().len(), 1);
    }
}
