//! Local-disk artifact store.
//!
//! Content lives in one flat directory, one file per artifact, named by its
//! id. The index (metadata + expiry) is kept in memory, so files left over
//! from a previous process are orphans and are removed by
//! [`LocalArtifactStore::open`].
//!
//! Each indexed file is held through an `Arc<StoredFile>`. Readers clone the
//! `Arc` (a read lease) before touching the disk; eviction only drops the
//! index's reference and marks the file doomed. The file is unlinked when
//! the last lease goes away, so an artifact being read is never removed
//! mid-read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use magetool_core::hashing::sha256_hex;
use magetool_core::types::{ArtifactId, Timestamp};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{ArtifactMeta, NewArtifact};
use crate::ArtifactStore;

/// Default artifact time-to-live: one hour.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default capacity ceiling: 10 GiB.
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Suffix for partially written files.
const PART_SUFFIX: &str = ".part";

/// Configuration for [`LocalArtifactStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding artifact files. Created if missing.
    pub root: PathBuf,
    /// Time-to-live applied when [`NewArtifact::ttl`] is unset.
    pub default_ttl: Duration,
    /// Total bytes the store may hold.
    pub max_total_bytes: u64,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            default_ttl: DEFAULT_TTL,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

// ---------------------------------------------------------------------------
// StoredFile / ArtifactHandle
// ---------------------------------------------------------------------------

/// One artifact file on disk, shared between the index and active readers.
#[derive(Debug)]
struct StoredFile {
    path: PathBuf,
    size: u64,
    doomed: AtomicBool,
    used_bytes: Arc<AtomicU64>,
}

impl Drop for StoredFile {
    fn drop(&mut self) {
        if !self.doomed.load(Ordering::Acquire) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove artifact file");
            }
        }
        self.used_bytes.fetch_sub(self.size, Ordering::AcqRel);
    }
}

/// A read lease on one artifact.
///
/// While a handle is alive the artifact's file stays on disk, even if the
/// artifact expires or is deleted in the meantime.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    meta: ArtifactMeta,
    file: Arc<StoredFile>,
}

impl ArtifactHandle {
    pub fn meta(&self) -> &ArtifactMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    /// Read the whole artifact into memory.
    pub async fn read_all(&self) -> Result<Vec<u8>, StoreError> {
        Ok(tokio::fs::read(&self.file.path).await?)
    }

    /// Open the artifact for streaming reads.
    pub async fn open_file(&self) -> Result<tokio::fs::File, StoreError> {
        Ok(tokio::fs::File::open(&self.file.path).await?)
    }
}

// ---------------------------------------------------------------------------
// LocalArtifactStore
// ---------------------------------------------------------------------------

struct Entry {
    meta: ArtifactMeta,
    file: Arc<StoredFile>,
}

/// Artifact store backed by a local directory.
pub struct LocalArtifactStore {
    config: StoreConfig,
    index: RwLock<HashMap<ArtifactId, Entry>>,
    used_bytes: Arc<AtomicU64>,
}

impl LocalArtifactStore {
    /// Create the root directory and clear orphan files from earlier runs.
    pub async fn open(config: StoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.root).await?;

        let mut removed = 0usize;
        let mut dir = tokio::fs::read_dir(&config.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, root = %config.root.display(), "Removed orphan artifact files");
        }

        Ok(Self {
            config,
            index: RwLock::new(HashMap::new()),
            used_bytes: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Bytes currently held on disk, including doomed files still leased.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Acquire)
    }

    /// Number of live (indexed) artifacts.
    pub async fn artifact_count(&self) -> usize {
        self.index.read().await.len()
    }

    /// Take a read lease on an artifact.
    ///
    /// Expired artifacts are evicted on the spot and reported as not found.
    pub async fn open_artifact(&self, id: &ArtifactId) -> Result<ArtifactHandle, StoreError> {
        let now = Utc::now();
        let expired = {
            let index = self.index.read().await;
            let entry = index
                .get(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if !entry.meta.is_expired(now) {
                return Ok(ArtifactHandle {
                    meta: entry.meta.clone(),
                    file: Arc::clone(&entry.file),
                });
            }
            true
        };

        if expired {
            self.evict(id).await;
        }
        Err(StoreError::NotFound(id.to_string()))
    }

    /// Reserve capacity for `size` bytes, atomically.
    fn reserve(&self, size: u64) -> Result<(), StoreError> {
        let max = self.config.max_total_bytes;
        self.used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= max)
            })
            .map(|_| ())
            .map_err(|used| StoreError::StorageFull {
                requested: size,
                available: max.saturating_sub(used),
            })
    }

    fn release(&self, size: u64) {
        self.used_bytes.fetch_sub(size, Ordering::AcqRel);
    }

    async fn write_file(&self, id: &ArtifactId, data: &[u8]) -> Result<PathBuf, StoreError> {
        let path = self.config.root.join(id.as_str());
        let part = self.config.root.join(format!("{id}{PART_SUFFIX}"));

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&part)
                .await?;
            file.write_all(data).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&part, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e.into());
        }
        Ok(path)
    }

    async fn evict(&self, id: &ArtifactId) -> bool {
        let removed = self.index.write().await.remove(id);
        match removed {
            Some(entry) => {
                entry.file.doomed.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

fn expiry_after(now: Timestamp, ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, data: &[u8], new: NewArtifact) -> Result<ArtifactMeta, StoreError> {
        let size = data.len() as u64;
        self.reserve(size)?;

        let id = ArtifactId::generate(new.extension.as_deref());
        let path = match self.write_file(&id, data).await {
            Ok(path) => path,
            Err(e) => {
                self.release(size);
                return Err(e);
            }
        };

        let now = Utc::now();
        let meta = ArtifactMeta {
            id: id.clone(),
            client_id: new.client_id,
            original_name: new.original_name,
            content_type: new.content_type,
            size_bytes: size,
            sha256: sha256_hex(data),
            created_at: now,
            expires_at: expiry_after(now, new.ttl.unwrap_or(self.config.default_ttl)),
        };
        let file = Arc::new(StoredFile {
            path,
            size,
            doomed: AtomicBool::new(false),
            used_bytes: Arc::clone(&self.used_bytes),
        });

        self.index.write().await.insert(
            id,
            Entry {
                meta: meta.clone(),
                file,
            },
        );

        tracing::debug!(
            artifact_id = %meta.id,
            size_bytes = size,
            client_id = %meta.client_id,
            "Artifact stored",
        );
        Ok(meta)
    }

    async fn get(&self, id: &ArtifactId) -> Result<(Vec<u8>, ArtifactMeta), StoreError> {
        let handle = self.open_artifact(id).await?;
        let data = handle.read_all().await?;
        Ok((data, handle.meta))
    }

    async fn head(&self, id: &ArtifactId) -> Result<ArtifactMeta, StoreError> {
        self.open_artifact(id).await.map(|h| h.meta)
    }

    async fn delete(&self, id: &ArtifactId) -> Result<(), StoreError> {
        if self.evict(id).await {
            tracing::debug!(artifact_id = %id, "Artifact deleted");
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut index = self.index.write().await;
        let expired: Vec<ArtifactId> = index
            .iter()
            .filter(|(_, entry)| entry.meta.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = index.remove(id) {
                entry.file.doomed.store(true, Ordering::Release);
            }
        }
        expired.len()
    }

    fn available_bytes(&self) -> u64 {
        self.config
            .max_total_bytes
            .saturating_sub(self.used_bytes.load(Ordering::Acquire))
    }
}
