/// Errors returned by artifact storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The artifact never existed, was deleted, or has expired.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Storage full: {requested} bytes requested, {available} bytes available")]
    StorageFull { requested: u64, available: u64 },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}
