//! Shared fixtures for catalog integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use mirror_catalog::{
    CatalogStore, ExtractedField, ExtractedMetadata, ExtractedRelationship, ExtractedResource,
    MemorySource, RefreshOrchestrator, SourceSystem, StaticExtractor,
};
use mirror_core::storage::{MemoryBackend, StorageBackend};

/// Resource with no children.
pub fn resource(name: &str) -> ExtractedResource {
    ExtractedResource {
        name: name.into(),
        resource_type: "table".into(),
        app: app_of(name).into(),
        source_system: SourceSystem::Postgres,
        source_link: Some(format!("https://git.example.com/{name}")),
        description: None,
        primary_key: Some("id".into()),
        fields: Vec::new(),
        relationships: Vec::new(),
    }
}

/// Field of `resource`, named `{resource}.{name}`.
pub fn field(resource: &str, name: &str) -> ExtractedField {
    ExtractedField {
        name: format!("{resource}.{name}"),
        field_type: "integer".into(),
        resource_name: resource.into(),
        is_primary_key: name == "id",
        is_virtual: false,
        description: None,
        metadata: Vec::new(),
    }
}

/// Metadata of `field`, named `{field}.{name}`.
pub fn metadata(field: &str, name: &str, value: &str) -> ExtractedMetadata {
    ExtractedMetadata {
        name: format!("{field}.{name}"),
        value: value.into(),
        field_name: field.into(),
        description: None,
    }
}

/// Foreign key from `resource.field` to `related.related_field`.
pub fn foreign_key(
    resource: &str,
    field: &str,
    related: &str,
    related_field: &str,
) -> ExtractedRelationship {
    ExtractedRelationship {
        relationship_type: "ForeignKey".into(),
        field_name: format!("{resource}.{field}"),
        related_field_name: format!("{related}.{related_field}"),
        resource_name: resource.into(),
        related_resource_name: related.into(),
        description: None,
    }
}

/// `app.Order` with `id`, `customer_id` (carrying metadata), and a foreign key
/// to `app.Customer`.
pub fn order() -> ExtractedResource {
    let mut customer_id = field("app.Order", "customer_id");
    customer_id.metadata = vec![
        metadata("app.Order.customer_id", "null", "false"),
        metadata("app.Order.customer_id", "db_index", "true"),
    ];

    let mut order = resource("app.Order");
    order.fields = vec![field("app.Order", "id"), customer_id];
    order.relationships = vec![foreign_key("app.Order", "customer_id", "app.Customer", "id")];
    order
}

/// `app.Customer` with `id` and `email`.
pub fn customer() -> ExtractedResource {
    let mut customer = resource("app.Customer");
    customer.fields = vec![field("app.Customer", "id"), field("app.Customer", "email")];
    customer
}

fn app_of(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// In-memory catalog wired to a scriptable source and extractor.
pub struct Harness {
    pub backend: Arc<dyn StorageBackend>,
    pub store: CatalogStore,
    pub source: Arc<MemorySource>,
    pub extractor: Arc<StaticExtractor>,
    pub orchestrator: RefreshOrchestrator,
}

impl Harness {
    pub fn new(resources: Vec<ExtractedResource>) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), resources)
    }

    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        resources: Vec<ExtractedResource>,
    ) -> Self {
        let store = CatalogStore::new(Arc::clone(&backend));
        let source = Arc::new(MemorySource::new("c0"));
        let extractor = Arc::new(StaticExtractor::new(resources));
        let orchestrator = RefreshOrchestrator::new(
            store.clone(),
            Arc::clone(&source) as _,
            Arc::clone(&extractor) as _,
        );
        Self {
            backend,
            store,
            source,
            extractor,
            orchestrator,
        }
    }

    /// Publishes `commit` with `resources` as its schema.
    pub fn publish(&self, commit: &str, resources: Vec<ExtractedResource>) {
        self.extractor.replace(resources).unwrap();
        self.source.push_commit(commit).unwrap();
    }
}
