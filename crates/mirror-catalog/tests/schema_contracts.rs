//! Serialized format contract tests.
//!
//! Table rows, snapshot entries, and adapter documents are read by other
//! tools. Renaming a field is a breaking change; these tests make it loud.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod support;

use serde_json::{Value, json};

use mirror_catalog::{ExtractionDocument, Resource, SourceSystem};

use support::{Harness, order};

fn keys(value: &Value) -> Vec<&str> {
    let mut keys: Vec<&str> = value
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    keys.sort_unstable();
    keys
}

#[test]
fn contract_resource_row_fields() {
    let row = Resource {
        name: "app.Order".into(),
        resource_type: "table".into(),
        app: "app".into(),
        source_system: SourceSystem::Postgres,
        source_link: None,
        description: None,
        primary_key: Some("id".into()),
        is_archived: false,
    };
    let value = serde_json::to_value(&row).unwrap();

    assert_eq!(
        keys(&value),
        vec![
            "app",
            "description",
            "is_archived",
            "name",
            "primary_key",
            "source_link",
            "source_system",
            "type",
        ]
    );
    assert_eq!(value["source_system"], "postgres");
}

#[tokio::test]
async fn contract_table_file_envelope() {
    let harness = Harness::new(Vec::new());
    harness.publish("c1", vec![order()]);
    harness.orchestrator.run_once(false).await.expect("refresh");

    let bytes = harness.backend.get("tables/field.json").await.unwrap();
    let file: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(keys(&file), vec!["kind", "rows", "updated_at"]);
    assert_eq!(file["kind"], "field");
    let names: Vec<&str> = file["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["app.Order.customer_id", "app.Order.id"]);
}

#[tokio::test]
async fn contract_reconciled_marker() {
    let harness = Harness::new(Vec::new());
    harness.publish("c1", vec![order()]);
    harness.orchestrator.run_once(false).await.expect("refresh");

    let bytes = harness.backend.get("state/reconciled.json").await.unwrap();
    let marker: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(keys(&marker), vec!["commit_id", "reconciled_at"]);
    assert_eq!(marker["commit_id"], "c1");
}

#[tokio::test]
async fn contract_snapshot_entry_is_json_patch() {
    let harness = Harness::new(Vec::new());
    harness.publish("c1", vec![order()]);
    harness.orchestrator.run_once(false).await.expect("refresh");

    let bytes = harness.backend.get("snapshots/c1.json").await.unwrap();
    let entry: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(
        keys(&entry),
        vec!["commit_id", "created_at", "diff", "sequence", "state_hash"]
    );
    assert_eq!(entry["sequence"], 1);
    assert!(entry["state_hash"].as_str().unwrap().starts_with("sha256:"));

    let diff = entry["diff"].as_array().unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0]["op"], "add");
    assert_eq!(diff[0]["path"], "/app.Order");
    assert_eq!(diff[0]["value"]["fields"]["app.Order.customer_id"]["type"], "integer");
}

#[test]
fn contract_adapter_document() {
    let document: ExtractionDocument = serde_json::from_value(json!({
        "source_system": "mongo",
        "resources": [{
            "name": "app.events.Click",
            "type": "collection",
            "app": "app",
            "fields": [{
                "name": "app.events.Click._id",
                "type": "ObjectId",
                "resource_name": "app.events.Click",
                "is_primary_key": true,
                "metadata": [{
                    "name": "app.events.Click._id.max_length",
                    "value": 24,
                    "field_name": "app.events.Click._id"
                }]
            }],
            "relationships": []
        }]
    }))
    .unwrap();

    assert_eq!(document.source_system, SourceSystem::Mongo);
    let field = &document.resources[0].fields[0];
    assert!(field.is_primary_key);
    assert!(!field.is_virtual);
    assert_eq!(field.metadata[0].value, "24");
}
