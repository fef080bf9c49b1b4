//! Workspace automation tasks.
//!
//! Run with: `cargo xtask <command>`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Mirror workspace automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks locally
    Ci,
    /// Validate workspace conventions
    Lint,
    /// Run the reconciliation benchmarks
    Bench,
    /// Generate coverage report
    Coverage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => run_ci(),
        Commands::Lint => run_lint(),
        Commands::Bench => run_cmd("cargo", &["bench", "-p", "mirror-catalog"]),
        Commands::Coverage => run_coverage(),
    }
}

fn run_ci() -> Result<()> {
    println!("Running CI checks...\n");

    run_cmd("cargo", &["fmt", "--check"])?;
    run_cmd(
        "cargo",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )?;
    run_cmd("cargo", &["test", "--workspace"])?;
    run_cmd("cargo", &["doc", "--workspace", "--no-deps"])?;
    run_lint()?;

    println!("\nAll CI checks passed!");
    Ok(())
}

fn run_lint() -> Result<()> {
    println!("Validating workspace conventions...\n");

    for entry in fs::read_dir("crates")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("mirror-") {
            anyhow::bail!("Crate '{name}' does not follow mirror-* naming");
        }

        let manifest = entry.path().join("Cargo.toml");
        let contents = fs::read_to_string(&manifest)
            .with_context(|| format!("Failed to read {}", manifest.display()))?;
        if !contents.contains("[lints]") || !contents.contains("workspace = true") {
            anyhow::bail!("Crate '{name}' does not inherit workspace lints");
        }

        check_forbid_unsafe(&name, &entry.path())?;
    }

    println!("All conventions validated!");
    Ok(())
}

/// Library crates must carry `#![forbid(unsafe_code)]` at their root.
fn check_forbid_unsafe(name: &str, crate_dir: &Path) -> Result<()> {
    let lib = crate_dir.join("src/lib.rs");
    if !lib.exists() {
        return Ok(());
    }
    let source = fs::read_to_string(&lib)?;
    if !source.contains("#![forbid(unsafe_code)]") {
        anyhow::bail!("Crate '{name}' is missing #![forbid(unsafe_code)] in src/lib.rs");
    }
    Ok(())
}

fn run_coverage() -> Result<()> {
    run_cmd("cargo", &["llvm-cov", "--workspace", "--html"])?;
    println!("\nCoverage report: target/llvm-cov/html/index.html");
    Ok(())
}

fn run_cmd(cmd: &str, args: &[&str]) -> Result<()> {
    println!("$ {} {}", cmd, args.join(" "));
    let status = Command::new(cmd)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run: {} {}", cmd, args.join(" ")))?;

    if !status.success() {
        anyhow::bail!("Command failed: {} {}", cmd, args.join(" "));
    }
    Ok(())
}
