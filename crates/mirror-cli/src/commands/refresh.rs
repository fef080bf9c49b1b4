//! Refresh and init commands - reconcile the catalog with the source.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use owo_colors::OwoColorize;
use tokio::sync::oneshot;

use mirror_catalog::{RefreshReport, Resource, SnapshotOutcome, StageReport};

use crate::{Context, OutputFormat};

/// Arguments for the refresh command.
#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Reconcile even if the pull fetched nothing new.
    #[arg(long, short = 'f')]
    pub force: bool,
}

/// Execute the refresh command.
///
/// The run is started in the background; the command waits for its
/// completion callback before printing the report.
///
/// # Errors
///
/// Returns an error if a refresh is already running or the run fails.
pub async fn execute(args: RefreshArgs, ctx: &Context) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    let handle = ctx.orchestrator.trigger(args.force, move |outcome| {
        let _ = tx.send(outcome);
    })?;

    let outcome = rx.await.context("refresh ended without reporting")?;
    handle.await.context("refresh task failed")?;
    let report = outcome?;
    print_report(&report, ctx.format)
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the catalog already holds resources or the refresh fails.
pub async fn init(ctx: &Context) -> Result<()> {
    if !ctx.store.rows::<Resource>().await?.is_empty() {
        bail!("catalog is already initialized; use `mirror refresh` instead");
    }

    let report = ctx.orchestrator.run_once(true).await?;
    print_report(&report, ctx.format)
}

fn print_report(report: &RefreshReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct StageRow {
                #[tabled(rename = "Kind")]
                kind: String,
                #[tabled(rename = "Created")]
                created: u64,
                #[tabled(rename = "Unarchived")]
                unarchived: u64,
                #[tabled(rename = "Archived")]
                archived: u64,
                #[tabled(rename = "Updated")]
                updated: u64,
                #[tabled(rename = "Deleted")]
                deleted: u64,
            }

            print_header(report);
            let rows: Vec<_> = report
                .stages
                .iter()
                .map(|s| StageRow {
                    kind: s.kind.label().to_string(),
                    created: s.created,
                    unarchived: s.unarchived,
                    archived: s.archived,
                    updated: s.updated,
                    deleted: s.deleted,
                })
                .collect();
            if !rows.is_empty() {
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Text => {
            print_header(report);
            for stage in &report.stages {
                println!("  {}", format_stage(stage));
            }
        }
    }

    Ok(())
}

fn print_header(report: &RefreshReport) {
    let status = if report.skipped {
        "SKIPPED".dimmed().to_string()
    } else {
        "RECONCILED".green().to_string()
    };
    println!("Commit: {}", report.commit_id);
    println!("Status: {status}");
    if report.forced {
        println!("Forced: yes");
    }
    println!("Snapshot: {}", format_snapshot(&report.snapshot));
    println!(
        "Duration: {} ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );
}

fn format_stage(stage: &StageReport) -> String {
    if stage.total() == 0 {
        return format!("{:<13} {}", stage.kind.label(), "unchanged".dimmed());
    }

    let mut parts = Vec::new();
    if stage.created > 0 {
        parts.push(format!("+{} created", stage.created).green().to_string());
    }
    if stage.unarchived > 0 {
        parts.push(format!("{} unarchived", stage.unarchived).blue().to_string());
    }
    if stage.updated > 0 {
        parts.push(format!("~{} updated", stage.updated).yellow().to_string());
    }
    if stage.archived > 0 {
        parts.push(format!("{} archived", stage.archived).yellow().to_string());
    }
    if stage.deleted > 0 {
        parts.push(format!("-{} deleted", stage.deleted).red().to_string());
    }
    format!("{:<13} {}", stage.kind.label(), parts.join(", "))
}

fn format_snapshot(outcome: &SnapshotOutcome) -> String {
    match outcome {
        SnapshotOutcome::Created {
            sequence,
            operations,
            ..
        } => format!("#{sequence} ({operations} operations)"),
        SnapshotOutcome::AlreadyExists { .. } => "already captured".to_string(),
        SnapshotOutcome::Unreconciled { .. } => "deferred until reconciled".to_string(),
    }
}
