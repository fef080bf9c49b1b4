//! The external codebase whose schema the catalog mirrors.
//!
//! The refresh pipeline only needs two answers from it: did a pull fetch
//! anything new, and which commit is checked out now.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};

/// A pullable, versioned source repository.
#[async_trait]
pub trait SourceRepository: Send + Sync + 'static {
    /// Fetches upstream changes. Returns true if new commits were fetched.
    async fn pull(&self) -> Result<bool>;

    /// Resolves the commit id currently checked out.
    async fn head_commit(&self) -> Result<String>;
}

/// A git checkout refreshed by an external script.
///
/// The script's exit code reports the outcome: `0` when new commits were
/// fetched, `1` when the checkout was already current. Anything else is a
/// failure.
#[derive(Debug, Clone)]
pub struct GitSource {
    repo: PathBuf,
    refresh_script: PathBuf,
}

impl GitSource {
    /// Creates a source for the checkout at `repo`, refreshed by `refresh_script`.
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>, refresh_script: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            refresh_script: refresh_script.into(),
        }
    }
}

fn unavailable(message: impl Into<String>) -> CatalogError {
    CatalogError::SourceUnavailable {
        message: message.into(),
    }
}

#[async_trait]
impl SourceRepository for GitSource {
    async fn pull(&self) -> Result<bool> {
        info!(script = %self.refresh_script.display(), "pulling source repository");

        let output = Command::new("sh")
            .arg(&self.refresh_script)
            .env("MIRROR_SOURCE_REPO", &self.repo)
            .output()
            .await
            .map_err(|e| {
                unavailable(format!(
                    "failed to run {}: {e}",
                    self.refresh_script.display()
                ))
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("  {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("  {line}");
        }

        match output.status.code() {
            Some(0) => {
                info!("source repository updated");
                Ok(true)
            }
            Some(1) => {
                info!("source repository already up to date");
                Ok(false)
            }
            code => Err(unavailable(format!(
                "{} exited with {}",
                self.refresh_script.display(),
                code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}"))
            ))),
        }
    }

    async fn head_commit(&self) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .map_err(|e| unavailable(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            return Err(unavailable(format!(
                "git rev-parse HEAD failed in {}: {}",
                self.repo.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(unavailable("git rev-parse HEAD returned no commit"));
        }

        debug!(commit = %commit, "resolved source commit");
        Ok(commit)
    }
}

#[derive(Debug)]
struct MemorySourceState {
    commit: String,
    pending: bool,
    unavailable: bool,
    pulls: u64,
}

/// In-process source for tests and embedding.
///
/// [`push_commit`](Self::push_commit) simulates upstream activity: the next
/// pull reports new commits, later pulls report none.
#[derive(Debug)]
pub struct MemorySource {
    state: Mutex<MemorySourceState>,
}

impl MemorySource {
    /// Creates a source checked out at `commit` with nothing pending.
    #[must_use]
    pub fn new(commit: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemorySourceState {
                commit: commit.into(),
                pending: false,
                unavailable: false,
                pulls: 0,
            }),
        }
    }

    /// Publishes a new upstream commit.
    pub fn push_commit(&self, commit: impl Into<String>) -> Result<()> {
        let mut state = self.lock()?;
        state.commit = commit.into();
        state.pending = true;
        Ok(())
    }

    /// Makes subsequent pulls fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) -> Result<()> {
        self.lock()?.unavailable = unavailable;
        Ok(())
    }

    /// Number of pulls attempted so far.
    pub fn pull_count(&self) -> Result<u64> {
        Ok(self.lock()?.pulls)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemorySourceState>> {
        self.state.lock().map_err(|_| CatalogError::Internal {
            message: "source lock poisoned".into(),
        })
    }
}

#[async_trait]
impl SourceRepository for MemorySource {
    async fn pull(&self) -> Result<bool> {
        let mut state = self.lock()?;
        state.pulls += 1;
        if state.unavailable {
            return Err(unavailable("source repository unreachable"));
        }
        Ok(std::mem::take(&mut state.pending))
    }

    async fn head_commit(&self) -> Result<String> {
        Ok(self.lock()?.commit.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("refresh.sh");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(body.as_bytes()).expect("write");
        path
    }

    #[tokio::test]
    async fn refresh_script_exit_codes_map_to_outcomes() {
        let dir = tempfile::tempdir().expect("tempdir");

        let updated = GitSource::new(dir.path(), script(&dir, "echo fetched 3 commits\nexit 0\n"));
        assert!(updated.pull().await.expect("pull"));

        let current = GitSource::new(dir.path(), script(&dir, "echo up to date\nexit 1\n"));
        assert!(!current.pull().await.expect("pull"));

        let broken = GitSource::new(dir.path(), script(&dir, "echo boom >&2\nexit 2\n"));
        assert!(matches!(
            broken.pull().await,
            Err(CatalogError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn head_commit_outside_repository_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = GitSource::new(dir.path().join("not-a-repo"), "refresh.sh");
        assert!(matches!(
            source.head_commit().await,
            Err(CatalogError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn memory_source_reports_pending_commit_once() {
        let source = MemorySource::new("c1");
        assert!(!source.pull().await.unwrap());

        source.push_commit("c2").unwrap();
        assert!(source.pull().await.unwrap());
        assert!(!source.pull().await.unwrap());
        assert_eq!(source.head_commit().await.unwrap(), "c2");

        source.set_unavailable(true).unwrap();
        assert!(source.pull().await.is_err());
        assert_eq!(source.pull_count().unwrap(), 4);
    }
}
