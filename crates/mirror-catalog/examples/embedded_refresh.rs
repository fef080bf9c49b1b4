//! Embedding the refresh pipeline in another process.
//!
//! Run with: `cargo run -p mirror-catalog --example embedded_refresh`

use std::sync::Arc;

use mirror_catalog::prelude::*;
use mirror_catalog::{ExtractedField, MemorySource, SourceSystem, StaticExtractor};
use mirror_core::MemoryBackend;
use mirror_core::observability::{LogFormat, init_logging};

fn order() -> ExtractedResource {
    ExtractedResource {
        name: "shop.Order".into(),
        resource_type: "table".into(),
        app: "shop".into(),
        source_system: SourceSystem::Postgres,
        source_link: None,
        description: Some("Placed orders".into()),
        primary_key: Some("id".into()),
        fields: vec![ExtractedField {
            name: "shop.Order.id".into(),
            field_type: "bigint".into(),
            resource_name: "shop.Order".into(),
            is_primary_key: true,
            is_virtual: false,
            description: None,
            metadata: Vec::new(),
        }],
        relationships: Vec::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::Pretty, false);

    let store = CatalogStore::new(Arc::new(MemoryBackend::new()));
    let source = Arc::new(MemorySource::new("initial"));
    let extractor = Arc::new(StaticExtractor::new(vec![order()]));
    let orchestrator = RefreshOrchestrator::new(store.clone(), source.clone(), extractor);

    source.push_commit("4f2a9c1")?;
    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = orchestrator.trigger(false, move |outcome| {
        let _ = tx.send(outcome);
    })?;

    // A second trigger while the first is in flight is rejected.
    if let Err(e) = orchestrator.trigger(false, |_| {}) {
        println!("second trigger: {e}");
    }

    let _ = handle.await;
    if let Ok(outcome) = rx.await {
        let report = outcome?;
        println!("{} changes at {}", report.total_changes(), report.commit_id);
    }

    let views = CatalogQuery::new(store).app_resources("shop").await?;
    for view in views {
        println!("{} ({} fields)", view.resource.name, view.fields.len());
    }
    Ok(())
}
