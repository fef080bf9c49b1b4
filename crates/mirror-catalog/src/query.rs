//! Read-side views of the reconciled catalog.
//!
//! Lookups that find nothing return `None` or an empty list; they never
//! error for a missing name. Exclusion rules hide resources, fields, and
//! metadata from every view. Archived rows are hidden unless requested.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Field, Metadata, Relationship, Resource};
use crate::store::{CatalogStore, CatalogTables};

/// Names hidden from served views.
///
/// A pattern matches a name exactly, or as a prefix when it ends with `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRules {
    /// Resource name patterns.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Field name patterns.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Metadata name patterns.
    #[serde(default)]
    pub metadata: Vec<String>,
}

impl ExclusionRules {
    fn hides(patterns: &[String], name: &str) -> bool {
        patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => pattern == name,
        })
    }
}

/// Filter for resource listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    /// Restrict to one application.
    pub app: Option<String>,
    /// Include archived resources and fields.
    pub include_archived: bool,
}

/// A field with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldView {
    /// The field row.
    #[serde(flatten)]
    pub field: Field,
    /// Metadata of the field, in name order.
    pub metadata: Vec<Metadata>,
}

/// A resource with its fields and relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceView {
    /// The resource row.
    #[serde(flatten)]
    pub resource: Resource,
    /// Fields of the resource, in name order.
    pub fields: Vec<FieldView>,
    /// Outgoing relationships, in name order.
    pub relationships: Vec<Relationship>,
}

/// Serves catalog data filtered by exclusion rules.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    store: CatalogStore,
    rules: ExclusionRules,
}

impl CatalogQuery {
    /// Creates a query layer with no exclusions.
    #[must_use]
    pub fn new(store: CatalogStore) -> Self {
        Self {
            store,
            rules: ExclusionRules::default(),
        }
    }

    /// Sets the exclusion rules.
    #[must_use]
    pub fn with_rules(mut self, rules: ExclusionRules) -> Self {
        self.rules = rules;
        self
    }

    /// Lists resources matching `filter`.
    pub async fn resources(&self, filter: &ResourceFilter) -> Result<Vec<ResourceView>> {
        let tables = self.store.load_all().await?;
        Ok(self.views(&tables, filter, |r| {
            filter.app.as_deref().is_none_or(|app| r.app == app)
        }))
    }

    /// Lists active resources of `app`. Empty if the app is unknown.
    pub async fn app_resources(&self, app: &str) -> Result<Vec<ResourceView>> {
        self.resources(&ResourceFilter {
            app: Some(app.to_string()),
            include_archived: false,
        })
        .await
    }

    /// Finds the active resource of `app` whose name ends with `.{name}`.
    pub async fn resource(&self, app: &str, name: &str) -> Result<Option<ResourceView>> {
        let tables = self.store.load_all().await?;
        let suffix = format!(".{name}");
        Ok(self
            .views(&tables, &ResourceFilter::default(), |r| {
                r.app == app && r.name.ends_with(&suffix)
            })
            .into_iter()
            .next())
    }

    /// Finds an active field of a resource by the last segment of its name.
    pub async fn field(
        &self,
        app: &str,
        resource: &str,
        field: &str,
    ) -> Result<Option<FieldView>> {
        let Some(view) = self.resource(app, resource).await? else {
            return Ok(None);
        };
        let suffix = format!(".{field}");
        Ok(view
            .fields
            .into_iter()
            .find(|f| f.field.name.ends_with(&suffix)))
    }

    fn views<P>(
        &self,
        tables: &CatalogTables,
        filter: &ResourceFilter,
        predicate: P,
    ) -> Vec<ResourceView>
    where
        P: Fn(&Resource) -> bool,
    {
        let visible = |archived: bool| filter.include_archived || !archived;

        tables
            .resources
            .iter()
            .filter(|r| visible(r.is_archived))
            .filter(|r| !ExclusionRules::hides(&self.rules.resources, &r.name))
            .filter(|r| predicate(r))
            .map(|resource| {
                let fields = tables
                    .fields
                    .iter()
                    .filter(|f| f.resource_name == resource.name && visible(f.is_archived))
                    .filter(|f| !ExclusionRules::hides(&self.rules.fields, &f.name))
                    .map(|field| FieldView {
                        field: field.clone(),
                        metadata: tables
                            .metadata
                            .iter()
                            .filter(|m| m.field_name == field.name)
                            .filter(|m| !ExclusionRules::hides(&self.rules.metadata, &m.name))
                            .cloned()
                            .collect(),
                    })
                    .collect();

                let relationships = tables
                    .relationships
                    .iter()
                    .filter(|rel| rel.resource_name == resource.name)
                    .cloned()
                    .collect();

                ResourceView {
                    resource: resource.clone(),
                    fields,
                    relationships,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_patterns_match_exactly_or_by_prefix() {
        let patterns = vec!["web.admin.*".to_string(), "web.orders.Secret".to_string()];
        assert!(ExclusionRules::hides(&patterns, "web.admin.LogEntry"));
        assert!(ExclusionRules::hides(&patterns, "web.orders.Secret"));
        assert!(!ExclusionRules::hides(&patterns, "web.orders.SecretSauce"));
        assert!(!ExclusionRules::hides(&[], "anything"));
    }
}
