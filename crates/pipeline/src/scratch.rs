//! Per-call working directories for external processes.

use std::path::{Path, PathBuf};

/// A uniquely named directory under the scratch root, removed on drop.
///
/// Dropping happens on success, on error, and when the owning task is
/// aborted (e.g. on timeout), so no process leaves files behind.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(uuid::Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    }
}
