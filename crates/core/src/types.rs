use std::fmt;

use serde::{Deserialize, Serialize};

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque job identifier, unique per creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Parse a job id from its hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier a browser generates once and attaches to every request.
///
/// Scopes job ownership and per-client limits. It is not a credential.
pub type ClientId = String;

/// Reference to a stored artifact.
///
/// The token is an unguessable random hex string followed by the artifact's
/// file extension (e.g. `3f1c…9a.png`), so it doubles as the download
/// filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Generate a fresh random id carrying `extension` (without the dot).
    pub fn generate(extension: Option<&str>) -> Self {
        let token = uuid::Uuid::new_v4().simple().to_string();
        match extension.filter(|e| !e.is_empty()) {
            Some(ext) => Self(format!("{token}.{}", ext.to_ascii_lowercase())),
            None => Self(token),
        }
    }

    /// Wrap a token received from a client.
    ///
    /// Returns `None` for anything that could not have been produced by
    /// [`ArtifactId::generate`], which also rules out path traversal.
    pub fn parse(s: &str) -> Option<Self> {
        let (token, ext) = match s.split_once('.') {
            Some((t, e)) => (t, Some(e)),
            None => (s, None),
        };
        let token_ok = token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit());
        let ext_ok = ext.map_or(true, |e| {
            !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric())
        });
        (token_ok && ext_ok).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension carried by the id, if any.
    pub fn extension(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, ext)| ext)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
