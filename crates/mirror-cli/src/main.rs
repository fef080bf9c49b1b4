//! Mirror CLI - keep a schema catalog in step with an external codebase.
//!
//! The main entry point for the `mirror` CLI binary.

use anyhow::Result;
use clap::Parser;

use mirror_cli::commands::{refresh, resources, snapshot};
use mirror_cli::{Cli, Commands, Context};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    mirror_core::init_logging(config.log_format, config.debug);
    mirror_catalog::metrics::register_metrics();
    tracing::debug!(data_dir = %config.data_dir.display(), "opening catalog");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let ctx = Context::open(&config, cli.format);
        match cli.command {
            Commands::Refresh(args) => refresh::execute(args, &ctx).await,
            Commands::Init => refresh::init(&ctx).await,
            Commands::Snapshot => snapshot::take(&ctx).await,
            Commands::History => snapshot::history(&ctx).await,
            Commands::Show(args) => snapshot::show(args, &ctx).await,
            Commands::Resources(args) => resources::execute(args, &ctx).await,
        }
    })
}
