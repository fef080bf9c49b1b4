//! Snapshot, history and show commands - the commit snapshot log.

use anyhow::{Context as _, Result};
use clap::Args;
use owo_colors::OwoColorize;

use mirror_catalog::{CommitSnapshotManager, SnapshotOutcome, SnapshotSummary};

use crate::{Context, OutputFormat};

/// Arguments for the show command.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Commit to reconstruct. Defaults to the latest snapshot.
    #[arg(long)]
    pub commit: Option<String>,
}

/// Execute the snapshot command.
///
/// Only captures the head commit once a refresh has fully reconciled it.
///
/// # Errors
///
/// Returns an error if the source head cannot be resolved or the write fails.
pub async fn take(ctx: &Context) -> Result<()> {
    let outcome = ctx.orchestrator.snapshots().take_reconciled_snapshot().await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text | OutputFormat::Table => match outcome {
            SnapshotOutcome::Created {
                commit_id,
                sequence,
                operations,
            } => println!(
                "{} snapshot #{sequence} for {commit_id} ({operations} operations)",
                "Created".green()
            ),
            SnapshotOutcome::AlreadyExists { commit_id } => {
                println!("{} {commit_id} already has a snapshot", "Skipped".dimmed());
            }
            SnapshotOutcome::Unreconciled { commit_id } => println!(
                "{} {commit_id} is not fully reconciled; run `mirror refresh --force` first",
                "Deferred".yellow()
            ),
        },
    }

    Ok(())
}

/// Execute the history command.
///
/// # Errors
///
/// Returns an error if the snapshot log cannot be read.
pub async fn history(ctx: &Context) -> Result<()> {
    let history = ctx.orchestrator.snapshots().history().await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct SnapshotRow {
                #[tabled(rename = "#")]
                sequence: u64,
                #[tabled(rename = "Commit")]
                commit: String,
                #[tabled(rename = "Created")]
                created: String,
                #[tabled(rename = "Add")]
                add: usize,
                #[tabled(rename = "Remove")]
                remove: usize,
                #[tabled(rename = "Replace")]
                replace: usize,
            }

            if history.is_empty() {
                println!("No snapshots found");
                return Ok(());
            }
            let rows: Vec<_> = history
                .iter()
                .map(|s| SnapshotRow {
                    sequence: s.sequence,
                    commit: s.commit_id.clone(),
                    created: s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    add: s.operations.add,
                    remove: s.operations.remove,
                    replace: s.operations.replace,
                })
                .collect();
            println!("{}", Table::new(rows));
        }
        OutputFormat::Text => {
            if history.is_empty() {
                println!("No snapshots found");
                return Ok(());
            }
            for summary in &history {
                println!("{}", format_summary(summary));
            }
        }
    }

    Ok(())
}

fn format_summary(summary: &SnapshotSummary) -> String {
    let ops = &summary.operations;
    format!(
        "{:>4}  {}  {}  {} {} {}",
        summary.sequence,
        summary.commit_id,
        summary.created_at.format("%Y-%m-%d %H:%M:%S"),
        format!("+{}", ops.add).green(),
        format!("-{}", ops.remove).red(),
        format!("~{}", ops.replace).yellow(),
    )
}

/// Execute the show command.
///
/// Prints the reconstructed catalog tree as JSON regardless of `--format`.
///
/// # Errors
///
/// Returns an error if the commit has no snapshot or the log fails to replay.
pub async fn show(args: ShowArgs, ctx: &Context) -> Result<()> {
    let snapshots: &CommitSnapshotManager = ctx.orchestrator.snapshots();

    let state = match &args.commit {
        Some(commit) => snapshots
            .state_at(commit)
            .await?
            .with_context(|| format!("no snapshot for commit {commit}"))?,
        None => snapshots.latest_state().await?,
    };

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: ShowArgs,
        }

        let cli = TestCli::parse_from(["test", "--commit", "abc123"]);
        assert_eq!(cli.args.commit.as_deref(), Some("abc123"));
        assert!(TestCli::parse_from(["test"]).args.commit.is_none());
    }
}
