//! Expiring artifact storage.
//!
//! Uploaded inputs and produced outputs live here under unguessable
//! [`ArtifactId`]s. Artifacts are write-once and become unreadable once
//! their expiry passes, whether or not the reaper has run yet.
//!
//! - [`ArtifactStore`] -- the storage seam the executor writes through.
//! - [`LocalArtifactStore`] -- local-disk implementation with an in-memory
//!   index and reference-counted read leases.

pub mod error;
pub mod local;
pub mod models;

use async_trait::async_trait;
use magetool_core::types::ArtifactId;

pub use error::StoreError;
pub use local::{ArtifactHandle, LocalArtifactStore, StoreConfig};
pub use models::{ArtifactMeta, NewArtifact};

/// Content storage used by the job engine.
///
/// Implementations must tolerate concurrent writes of distinct artifacts and
/// concurrent reads of the same artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `data` under a fresh id.
    async fn put(&self, data: &[u8], new: NewArtifact) -> Result<ArtifactMeta, StoreError>;

    /// Read an artifact's bytes and metadata.
    ///
    /// Fails with [`StoreError::NotFound`] if absent or expired.
    async fn get(&self, id: &ArtifactId) -> Result<(Vec<u8>, ArtifactMeta), StoreError>;

    /// Metadata only.
    async fn head(&self, id: &ArtifactId) -> Result<ArtifactMeta, StoreError>;

    /// Remove an artifact. Deleting a missing artifact is not an error.
    async fn delete(&self, id: &ArtifactId) -> Result<(), StoreError>;

    /// Evict everything past its expiry. Returns the number evicted.
    async fn sweep_expired(&self) -> usize;

    /// Bytes that can still be written before [`StoreError::StorageFull`].
    fn available_bytes(&self) -> u64;
}
