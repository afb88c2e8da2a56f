use std::time::Duration;

use magetool_core::types::{ArtifactId, ClientId, Timestamp};
use serde::Serialize;

/// Parameters for storing a new artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub client_id: ClientId,
    pub original_name: String,
    pub content_type: String,
    /// Extension for the generated id (and thus the download filename).
    pub extension: Option<String>,
    /// Overrides the store's default time-to-live.
    pub ttl: Option<Duration>,
}

impl NewArtifact {
    pub fn new(
        client_id: impl Into<ClientId>,
        original_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        let original_name = original_name.into();
        Self {
            extension: magetool_core::naming::extension_of(&original_name),
            client_id: client_id.into(),
            original_name,
            content_type: content_type.into(),
            ttl: None,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Metadata recorded for every stored artifact. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactMeta {
    pub id: ArtifactId,
    pub client_id: ClientId,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// SHA-256 hex digest of the content.
    pub sha256: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl ArtifactMeta {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}
