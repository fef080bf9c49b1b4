//! Local filesystem storage backend.
//!
//! Objects are plain files under a root directory. The version token of an
//! object is the SHA-256 of its contents, so a compare-and-swap succeeds only
//! if nobody rewrote the file since it was read. Writes land in a temporary
//! sibling and are renamed into place.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Storage backend rooted at a local directory.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    // Serializes conditional writes within this process.
    write_lock: Mutex<()>,
}

impl LocalFsBackend {
    /// Creates a backend rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::InvalidInput(format!("invalid object path: '{path}'")));
        }
        Ok(self.root.join(relative))
    }

    async fn read_optional(file: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(file).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("failed to read {}", file.display()),
                e,
            )),
        }
    }
}

fn content_version(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        Self::read_optional(&file)
            .await?
            .map(Bytes::from)
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let file = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        let current = Self::read_optional(&file)
            .await?
            .map(|existing| content_version(&existing));

        match (&precondition, &current) {
            (WritePrecondition::DoesNotExist, Some(version)) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(expected), Some(version)) if expected != version => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(_), None) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: String::new(),
                });
            }
            _ => {}
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage_with_source(format!("failed to create {}", parent.display()), e)
            })?;
        }

        let staging = file.with_extension("tmp");
        tokio::fs::write(&staging, &data).await.map_err(|e| {
            Error::storage_with_source(format!("failed to write {}", staging.display()), e)
        })?;
        tokio::fs::rename(&staging, &file).await.map_err(|e| {
            Error::storage_with_source(format!("failed to move {}", file.display()), e)
        })?;

        Ok(WriteResult::Success {
            version: content_version(&data),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("failed to delete {}", file.display()),
                e,
            )),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut results = Vec::new();
        let mut pending = vec![(self.root.clone(), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::storage_with_source(
                        format!("failed to list {}", dir.display()),
                        e,
                    ));
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source("failed to read directory entry", e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if relative.is_empty() {
                    name
                } else {
                    format!("{relative}/{name}")
                };
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage_with_source("failed to stat entry", e))?;

                if file_type.is_dir() {
                    pending.push((entry.path(), key));
                } else if key.starts_with(prefix) && !key.ends_with(".tmp") {
                    if let Some(meta) = self.head(&key).await? {
                        results.push(meta);
                    }
                }
            }
        }

        Ok(results)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let file = self.resolve(path)?;
        let Some(data) = Self::read_optional(&file).await? else {
            return Ok(None);
        };
        let last_modified = tokio::fs::metadata(&file)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        Ok(Some(ObjectMeta {
            path: path.to_string(),
            size: data.len() as u64,
            version: content_version(&data),
            last_modified,
        }))
    }
}
