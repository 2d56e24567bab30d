use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Cache key: a source identifier plus a content fingerprint.
///
/// Two keys for the same source with different fingerprints are distinct
/// entries, so a modified source never hits a stale value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    source: String,
    fingerprint: String,
}

impl CacheKey {
    pub fn new(source: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Key for a file, fingerprinted by modification time and length.
    pub fn for_path(path: &Path) -> Result<Self> {
        let metadata =
            std::fs::metadata(path).map_err(|e| Error::io_path("reading metadata of", path, e))?;

        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        Ok(Self::new(
            path.to_string_lossy(),
            format!("{}-{}", modified_nanos, metadata.len()),
        ))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_for_path_changes_with_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("frame.png");

        std::fs::write(&path, b"abc").unwrap();
        let first = CacheKey::for_path(&path).unwrap();
        assert_eq!(first.source(), path.to_string_lossy());

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"def").unwrap();
        drop(file);

        let second = CacheKey::for_path(&path).unwrap();
        assert_eq!(first.source(), second.source());
        assert_ne!(first, second);
    }

    #[test]
    fn test_for_missing_path_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = CacheKey::for_path(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::IoPath { .. }));
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::new("a.png", "1-2").to_string(), "a.png#1-2");
    }
}
