//! Embedding gallery — immutable per process lifetime, swap-on-reload.
//!
//! The gallery file is a JSON object mapping identity to embedding vector:
//! `{ "1": [0.01, ...], "2": [...] }`. Regeneration happens out-of-band;
//! a running process picks it up through [`GalleryHandle::reload`], which
//! swaps the whole gallery atomically. In-flight matches keep the snapshot
//! they started with.

use crate::types::Embedding;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery source not found: {0}")]
    SourceMissing(String),
    #[error("failed to read gallery: {0}")]
    Read(#[from] std::io::Error),
    #[error("malformed gallery: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("gallery contains no entries")]
    Empty,
    #[error("duplicate identity in gallery: {0}")]
    DuplicateIdentity(String),
    #[error("identity {identity} has a {got}-dim vector, gallery dimension is {expected}")]
    DimensionMismatch {
        identity: String,
        expected: usize,
        got: usize,
    },
}

/// Immutable collection of (identity, embedding) pairs.
///
/// Identities are unique and vectors are never mutated after load; all
/// accessors are read-only, so sharing an `Arc<Gallery>` across threads is
/// safe by construction.
#[derive(Debug, Clone)]
pub struct Gallery {
    identities: Vec<String>,
    embeddings: Vec<Embedding>,
    dim: usize,
}

impl Gallery {
    /// Load a gallery from a JSON file.
    ///
    /// Fails when the file is missing, malformed, empty, carries duplicate
    /// identities, or mixes vector dimensions. Entries load in sorted
    /// identity order, which fixes the tie-break order for matching.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GalleryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GalleryError::SourceMissing(path.display().to_string()));
        }
        let file = std::fs::File::open(path)?;
        let gallery = Self::from_reader(std::io::BufReader::new(file))?;
        if gallery.dim() != crate::types::EMBEDDING_DIM {
            tracing::warn!(
                dim = gallery.dim(),
                expected = crate::types::EMBEDDING_DIM,
                "gallery dimension differs from the standard extractor output"
            );
        }
        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            dim = gallery.dim(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Parse a gallery from a JSON reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, GalleryError> {
        let raw: BTreeMap<String, Vec<f32>> = serde_json::from_reader(reader)?;
        Self::from_entries(raw.into_iter().collect())
    }

    /// Build a gallery from (identity, vector) pairs.
    pub fn from_entries(entries: Vec<(String, Vec<f32>)>) -> Result<Self, GalleryError> {
        if entries.is_empty() {
            return Err(GalleryError::Empty);
        }

        let dim = entries[0].1.len();
        let mut identities = Vec::with_capacity(entries.len());
        let mut embeddings = Vec::with_capacity(entries.len());

        for (identity, values) in entries {
            if identities.contains(&identity) {
                return Err(GalleryError::DuplicateIdentity(identity));
            }
            if values.len() != dim {
                return Err(GalleryError::DimensionMismatch {
                    identity,
                    expected: dim,
                    got: values.len(),
                });
            }
            identities.push(identity);
            embeddings.push(Embedding::new(values));
        }

        Ok(Self {
            identities,
            embeddings,
            dim,
        })
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Vector dimension shared by every entry.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Iterate (identity, embedding) pairs in load order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.identities
            .iter()
            .map(String::as_str)
            .zip(self.embeddings.iter())
    }

    pub fn identity_at(&self, idx: usize) -> Option<&str> {
        self.identities.get(idx).map(String::as_str)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.identities.iter().any(|i| i == identity)
    }
}

/// Shared handle implementing swap-on-reload.
///
/// Readers take a snapshot `Arc` for the duration of one match call and
/// never observe a swap mid-query.
pub struct GalleryHandle {
    inner: RwLock<Arc<Gallery>>,
}

impl GalleryHandle {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            inner: RwLock::new(Arc::new(gallery)),
        }
    }

    /// Current gallery snapshot. Holding the returned `Arc` pins a
    /// consistent view regardless of concurrent reloads.
    pub fn snapshot(&self) -> Arc<Gallery> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the gallery wholesale.
    pub fn swap(&self, gallery: Gallery) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(gallery);
    }

    /// Reload from the given path and swap atomically on success.
    ///
    /// A failed load leaves the current gallery in place.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<usize, GalleryError> {
        let gallery = Gallery::load(path)?;
        let size = gallery.len();
        self.swap(gallery);
        tracing::info!(entries = size, "gallery swapped");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reader_sorted_order() {
        let json = br#"{"2": [1.0, 0.0], "1": [0.0, 1.0]}"#;
        let gallery = Gallery::from_reader(&json[..]).unwrap();
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.dim(), 2);
        let ids: Vec<&str> = gallery.entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_from_reader_malformed() {
        let err = Gallery::from_reader(&b"not json"[..]).unwrap_err();
        assert!(matches!(err, GalleryError::Malformed(_)));
    }

    #[test]
    fn test_from_reader_empty() {
        let err = Gallery::from_reader(&b"{}"[..]).unwrap_err();
        assert!(matches!(err, GalleryError::Empty));
    }

    #[test]
    fn test_from_entries_duplicate() {
        let err = Gallery::from_entries(vec![
            ("1".into(), vec![0.0]),
            ("1".into(), vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, GalleryError::DuplicateIdentity(id) if id == "1"));
    }

    #[test]
    fn test_from_entries_dimension_mismatch() {
        let err = Gallery::from_entries(vec![
            ("1".into(), vec![0.0, 0.0]),
            ("2".into(), vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { expected: 2, got: 1, .. }
        ));
    }

    #[test]
    fn test_load_missing_source() {
        let path = std::env::temp_dir().join("rollcall-test-no-such-gallery.json");
        let err = Gallery::load(&path).unwrap_err();
        assert!(matches!(err, GalleryError::SourceMissing(_)));
    }

    #[test]
    fn test_handle_snapshot_survives_swap() {
        let handle = GalleryHandle::new(
            Gallery::from_entries(vec![("1".into(), vec![0.0])]).unwrap(),
        );
        let before = handle.snapshot();
        handle.swap(
            Gallery::from_entries(vec![
                ("1".into(), vec![0.0]),
                ("2".into(), vec![1.0]),
            ])
            .unwrap(),
        );
        // The old snapshot is unchanged; new readers see the swap.
        assert_eq!(before.len(), 1);
        assert_eq!(handle.snapshot().len(), 2);
    }

    #[test]
    fn test_reload_failure_keeps_current() {
        let handle = GalleryHandle::new(
            Gallery::from_entries(vec![("1".into(), vec![0.0])]).unwrap(),
        );
        let missing = std::env::temp_dir().join("rollcall-test-reload-missing.json");
        assert!(handle.reload(&missing).is_err());
        assert_eq!(handle.snapshot().len(), 1);
    }
}
