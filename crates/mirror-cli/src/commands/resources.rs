//! Resources command - list catalog resources.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Args;
use owo_colors::OwoColorize;

use mirror_catalog::{CatalogQuery, ExclusionRules, ResourceFilter, ResourceView};

use crate::{Context, OutputFormat};

/// Arguments for the resources command.
#[derive(Debug, Args)]
pub struct ResourcesArgs {
    /// Only list resources of this application.
    #[arg(long)]
    pub app: Option<String>,

    /// Include archived resources and fields.
    #[arg(long)]
    pub include_archived: bool,

    /// JSON file with exclusion rules (`resources`, `fields`, `metadata`).
    #[arg(long)]
    pub exclusions: Option<PathBuf>,

    /// Show fields under each resource.
    #[arg(long, short = 'F')]
    pub fields: bool,
}

/// Execute the resources command.
///
/// # Errors
///
/// Returns an error if the exclusion file is invalid or the catalog cannot be read.
pub async fn execute(args: ResourcesArgs, ctx: &Context) -> Result<()> {
    let rules = match &args.exclusions {
        Some(path) => load_rules(path).await?,
        None => ExclusionRules::default(),
    };
    let query = CatalogQuery::new(ctx.store.clone()).with_rules(rules);
    let views = query
        .resources(&ResourceFilter {
            app: args.app.clone(),
            include_archived: args.include_archived,
        })
        .await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&views)?),
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ResourceRow {
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Type")]
                resource_type: String,
                #[tabled(rename = "Source")]
                source: String,
                #[tabled(rename = "Fields")]
                fields: usize,
                #[tabled(rename = "Archived")]
                archived: bool,
            }

            if views.is_empty() {
                println!("No resources found");
                return Ok(());
            }
            let rows: Vec<_> = views
                .iter()
                .map(|v| ResourceRow {
                    name: v.resource.name.clone(),
                    resource_type: v.resource.resource_type.clone(),
                    source: v.resource.source_system.to_string(),
                    fields: v.fields.len(),
                    archived: v.resource.is_archived,
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Text => {
            if views.is_empty() {
                println!("No resources found");
                return Ok(());
            }
            for view in &views {
                print_view(view, args.fields);
            }
        }
    }

    Ok(())
}

async fn load_rules(path: &Path) -> Result<ExclusionRules> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading exclusion rules from {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing exclusion rules from {}", path.display()))
}

fn print_view(view: &ResourceView, show_fields: bool) {
    let resource = &view.resource;
    let name = if resource.is_archived {
        format!("{} (archived)", resource.name).dimmed().to_string()
    } else {
        resource.name.bold().to_string()
    };
    println!(
        "{name}  {} [{}] {} fields",
        resource.resource_type, resource.source_system, view.fields.len()
    );

    if show_fields {
        for field in &view.fields {
            let marker = if field.field.is_primary_key { "*" } else { " " };
            println!(
                "  {marker} {} {}",
                field.field.name,
                field.field.field_type.dimmed()
            );
        }
    }
}
