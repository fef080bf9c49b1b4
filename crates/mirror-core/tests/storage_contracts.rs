//! Storage backend contract tests.
//!
//! Every backend must give the catalog the same conditional-write semantics.
//! Each test runs against the memory and local filesystem backends.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use bytes::Bytes;

use mirror_core::storage::{MemoryBackend, StorageBackend, WritePrecondition, WriteResult};
use mirror_core::LocalFsBackend;

fn backends() -> Vec<(&'static str, Arc<dyn StorageBackend>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().expect("tempdir");
    let local: Arc<dyn StorageBackend> = Arc::new(LocalFsBackend::new(dir.path()));
    vec![
        ("memory", Arc::new(MemoryBackend::new()), None),
        ("local", local, Some(dir)),
    ]
}

#[tokio::test]
async fn contract_create_only_write() {
    for (name, backend, _dir) in backends() {
        let first = backend
            .put("tables/a.json", Bytes::from("1"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(first.is_success(), "{name}");

        let second = backend
            .put("tables/a.json", Bytes::from("2"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(
            matches!(second, WriteResult::PreconditionFailed { .. }),
            "{name}"
        );
        assert_eq!(backend.get("tables/a.json").await.unwrap(), Bytes::from("1"));
    }
}

#[tokio::test]
async fn contract_compare_and_swap() {
    for (name, backend, _dir) in backends() {
        let WriteResult::Success { version } = backend
            .put("t.json", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap()
        else {
            panic!("{name}: unconditional write failed");
        };

        let swapped = backend
            .put(
                "t.json",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion(version.clone()),
            )
            .await
            .unwrap();
        assert!(swapped.is_success(), "{name}");

        // The old token is stale now.
        let stale = backend
            .put(
                "t.json",
                Bytes::from("v3"),
                WritePrecondition::MatchesVersion(version),
            )
            .await
            .unwrap();
        assert!(!stale.is_success(), "{name}");
        assert_eq!(backend.get("t.json").await.unwrap(), Bytes::from("v2"));
    }
}

#[tokio::test]
async fn contract_head_and_list() {
    for (name, backend, _dir) in backends() {
        assert!(backend.head("snapshots/c1.json").await.unwrap().is_none(), "{name}");

        for path in ["snapshots/c2.json", "snapshots/c1.json", "tables/resource.json"] {
            backend
                .put(path, Bytes::from("{}"), WritePrecondition::None)
                .await
                .unwrap();
        }

        let meta = backend.head("snapshots/c1.json").await.unwrap().expect("meta");
        assert_eq!(meta.size, 2, "{name}");

        let mut listed: Vec<String> = backend
            .list("snapshots/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["snapshots/c1.json", "snapshots/c2.json"], "{name}");
    }
}

#[tokio::test]
async fn contract_missing_objects() {
    for (name, backend, _dir) in backends() {
        let err = backend.get("absent.json").await.unwrap_err();
        assert!(err.is_not_found(), "{name}: {err}");

        backend.put("gone.json", Bytes::from("x"), WritePrecondition::None).await.unwrap();
        backend.delete("gone.json").await.unwrap();
        assert!(backend.head("gone.json").await.unwrap().is_none(), "{name}");
    }
}
