//! Persistence seams for workflow state and work nudges.
//!
//! This module hides the backend choice. The engine only sees two traits:
//! [`BlobStore`] for single-key CAS-versioned persistence and [`WorkQueue`]
//! for nudge transport. The bundled implementations are in-memory; object
//! stores plug in by mapping the CAS token onto their version tag (S3/GCS
//! ETag or generation) and expressing create-if-absent as "write iff no
//! such version".

mod memory;
mod queue;

pub use memory::MemoryBlobStore;
pub use queue::{MemoryWorkQueue, QueueMessage, WorkMessage, WorkQueue};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Storage layer error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The write precondition failed: either the CAS token is stale or the
    /// presence expectation (create-if-absent) was violated. Recoverable;
    /// the engine retries from load.
    #[error("compare-and-swap conflict on {key}")]
    Conflict {
        key: String,
        /// Version currently stored, when known.
        current_version: Option<String>,
    },

    /// The blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(String),

    /// An I/O operation failed.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A blob together with the opaque CAS token it was read at.
#[derive(Debug, Clone)]
pub struct VersionedBlob {
    pub data: Bytes,
    /// Opaque version token; backends interpret it according to their
    /// semantics (numeric generation, ETag, version id).
    pub version: String,
}

/// Linearizable single-key CAS-versioned persistence.
///
/// Guarantees: no partial writes; a successful `put` is visible to every
/// subsequent `get`; concurrent conditional writes against the same key
/// admit at most one winner per version.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads the blob at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<VersionedBlob>>;

    /// Writes `data` at `key`, returning the new version token.
    ///
    /// With `cas = None`, writes only if no blob exists; with
    /// `cas = Some(v)`, writes only if the stored version equals `v`.
    /// Either violation fails with [`StorageError::Conflict`].
    async fn put(&self, key: &str, data: Bytes, cas: Option<&str>) -> Result<String>;
}
