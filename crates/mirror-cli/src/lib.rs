//! # mirror-cli
//!
//! Command-line interface for the mirror schema catalog.
//!
//! ## Commands
//!
//! - `mirror refresh` - Pull the source and reconcile the catalog
//! - `mirror init` - Bootstrap an empty catalog
//! - `mirror snapshot` - Capture the catalog against the current commit
//! - `mirror history` - List commit snapshots
//! - `mirror show` - Print the catalog as of a commit
//! - `mirror resources` - List catalog resources
//!
//! ## Configuration
//!
//! Every flag falls back to its `MIRROR_*` environment variable:
//!
//! - `MIRROR_DATA_DIR` - Catalog root (default: `./.mirror`)
//! - `MIRROR_SOURCE_REPO` - Checked-out external codebase (default: `./source`)
//! - `MIRROR_REFRESH_SCRIPT` - Pull script (default: `./scripts/refresh.sh`)
//! - `MIRROR_EXTRACTION_PATHS` - Comma separated extraction documents

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use mirror_catalog::{CatalogStore, DocumentExtractor, GitSource, RefreshOrchestrator};
use mirror_core::{Config, LocalFsBackend};

/// Mirror CLI - schema catalog reconciliation.
#[derive(Debug, Parser)]
#[command(name = "mirror")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog root directory.
    #[arg(long, env = "MIRROR_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Checked-out external codebase.
    #[arg(long, env = "MIRROR_SOURCE_REPO", global = true)]
    pub source_repo: Option<PathBuf>,

    /// Script that pulls new commits into the source repository.
    #[arg(long, env = "MIRROR_REFRESH_SCRIPT", global = true)]
    pub refresh_script: Option<PathBuf>,

    /// Extraction documents, one per source system.
    #[arg(
        long = "extraction",
        env = "MIRROR_EXTRACTION_PATHS",
        value_delimiter = ',',
        global = true
    )]
    pub extraction_paths: Vec<PathBuf>,

    /// Verbose logging.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Loads the environment configuration and applies flag overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a `MIRROR_*` variable fails to parse.
    pub fn config(&self) -> mirror_core::Result<Config> {
        Ok(self.apply(Config::from_env()?))
    }

    /// Applies flag overrides to `config`.
    #[must_use]
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(repo) = &self.source_repo {
            config.source_repo.clone_from(repo);
        }
        if let Some(script) = &self.refresh_script {
            config.refresh_script.clone_from(script);
        }
        if !self.extraction_paths.is_empty() {
            config.extraction_paths.clone_from(&self.extraction_paths);
        }
        config.debug |= self.debug;
        config
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Pull the source and reconcile the catalog.
    Refresh(commands::refresh::RefreshArgs),
    /// Bootstrap an empty catalog with a forced refresh.
    Init,
    /// Capture the catalog against the current commit.
    Snapshot,
    /// List commit snapshots.
    History,
    /// Print the catalog as of a commit.
    Show(commands::snapshot::ShowArgs),
    /// List catalog resources.
    Resources(commands::resources::ResourcesArgs),
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Catalog handles shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Persisted catalog.
    pub store: CatalogStore,
    /// Refresh pipeline over the configured source and extraction documents.
    pub orchestrator: RefreshOrchestrator,
    /// Output format.
    pub format: OutputFormat,
}

impl Context {
    /// Opens the catalog under `config.data_dir`.
    #[must_use]
    pub fn open(config: &Config, format: OutputFormat) -> Self {
        let store = CatalogStore::new(Arc::new(LocalFsBackend::new(&config.data_dir)));
        let source = Arc::new(GitSource::new(&config.source_repo, &config.refresh_script));
        let extractor = Arc::new(DocumentExtractor::new(config.extraction_paths.clone()));
        let orchestrator = RefreshOrchestrator::new(store.clone(), source, extractor);
        Self {
            store,
            orchestrator,
            format,
        }
    }
}
