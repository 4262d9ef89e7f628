//! Immutable snapshot of enrolled identities and their representative embeddings.

use crate::store::{AttendanceStore, DataUnavailable};
use crate::types::{Embedding, EmbeddingError, Identity};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),
    #[error("malformed stored encoding for {identity}: {source}")]
    MalformedEncoding {
        identity: String,
        #[source]
        source: EmbeddingError,
    },
    #[error("identity {0} appears more than once")]
    DuplicateIdentity(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Enrolled faces in the order the store returned them.
///
/// Built once and never mutated; a reload produces a new snapshot.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dim: usize,
}

/// A freshly loaded gallery plus the records that were left out of it.
#[derive(Debug)]
pub struct GalleryLoad {
    pub gallery: Gallery,
    pub skipped: Vec<GalleryError>,
}

impl Gallery {
    /// Load every enrolled identity's embedding from the store.
    ///
    /// Identities without an embedding are omitted silently. Corrupt or
    /// wrong-sized encodings are skipped and reported in
    /// [`GalleryLoad::skipped`]; only an unreachable store fails the load.
    pub fn load(store: &dyn AttendanceStore, dim: usize) -> Result<GalleryLoad, GalleryError> {
        let rows = store.enrolled_faces()?;
        let total = rows.len();

        let mut entries = Vec::with_capacity(total);
        let mut seen = HashSet::with_capacity(total);
        let mut skipped = Vec::new();

        for row in rows {
            let Some(bytes) = row.encoding else {
                tracing::debug!(identity = %row.identity.id, "no stored embedding; not enrolled");
                continue;
            };

            if !seen.insert(row.identity.id.clone()) {
                tracing::warn!(identity = %row.identity.id, "duplicate identity row skipped");
                skipped.push(GalleryError::DuplicateIdentity(row.identity.id));
                continue;
            }

            match Embedding::from_bytes(&bytes, dim) {
                Ok(embedding) => entries.push(GalleryEntry {
                    identity: row.identity,
                    embedding,
                }),
                Err(source) => {
                    tracing::warn!(
                        identity = %row.identity.id,
                        error = %source,
                        "skipping malformed stored embedding"
                    );
                    skipped.push(GalleryError::MalformedEncoding {
                        identity: row.identity.id,
                        source,
                    });
                }
            }
        }

        tracing::info!(
            rows = total,
            loaded = entries.len(),
            skipped = skipped.len(),
            dim,
            "gallery loaded"
        );

        Ok(GalleryLoad {
            gallery: Gallery { entries, dim },
            skipped,
        })
    }

    /// Build a gallery from already-decoded entries, rejecting any bad one.
    pub fn from_entries(entries: Vec<GalleryEntry>, dim: usize) -> Result<Self, GalleryError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            let malformed = |source| GalleryError::MalformedEncoding {
                identity: entry.identity.id.clone(),
                source,
            };
            entry.embedding.validate().map_err(malformed)?;
            entry.embedding.check_dim(dim).map_err(malformed)?;
            if !seen.insert(entry.identity.id.as_str()) {
                return Err(GalleryError::DuplicateIdentity(entry.identity.id.clone()));
            }
        }
        Ok(Self { entries, dim })
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimensionality every entry (and every probe) must have.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, identity_id: &str) -> Option<&GalleryEntry> {
        self.entries.iter().find(|e| e.identity.id == identity_id)
    }
}
