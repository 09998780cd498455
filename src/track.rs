// Resolved track descriptors and progress samples

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A resolved, playable track. Immutable once produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLocator {
    /// Stable identifier (video id, library-relative path, URL hash)
    pub id: String,
    /// Playable target: local path, `file://` URI or remote URL
    pub source_uri: String,
    pub title: String,
    /// Zero when unknown
    pub duration_seconds: u64,
}

impl TrackLocator {
    pub fn new(
        id: impl Into<String>,
        source_uri: impl Into<String>,
        title: impl Into<String>,
        duration_seconds: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            title: title.into(),
            duration_seconds,
        }
    }

    /// Local filesystem path of the track, if the source is not remote
    pub fn local_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.source_uri.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if self.source_uri.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.source_uri))
    }
}

/// Elapsed/duration pair reported by the active worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSample {
    pub elapsed_seconds: u64,
    pub duration_seconds: u64,
}
