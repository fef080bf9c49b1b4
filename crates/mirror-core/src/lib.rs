//! # mirror-core
//!
//! Shared primitives for the mirror schema catalog.
//!
//! This crate provides the foundational pieces used by the catalog and the CLI:
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Storage**: Object storage contract with conditional writes, plus
//!   in-memory and local filesystem backends
//! - **Observability**: Logging initialization and span constructors
//! - **Configuration**: `MIRROR_*` environment loading
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mirror_core::prelude::*;
//!
//! let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//! let config = Config::default();
//! assert!(config.extraction_paths.is_empty());
//! # drop(storage);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod local;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use mirror_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::local::LocalFsBackend;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use config::Config;
pub use error::{Error, Result};
pub use local::LocalFsBackend;
pub use observability::{LogFormat, init_logging};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
