//! Persistent-store collaborator interface.
//!
//! The core never talks to a database directly. Everything it needs from
//! persistence goes through [`AttendanceStore`], with failures collapsed
//! into [`DataUnavailable`] tagged by the stage that hit them.

use crate::types::{AttendanceMark, Embedding, Identity};
use chrono::NaiveDate;
use thiserror::Error;

/// The store could not be reached or refused the operation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("data unavailable while {stage}: {reason}")]
pub struct DataUnavailable {
    pub stage: &'static str,
    pub reason: String,
}

impl DataUnavailable {
    pub fn new(stage: &'static str, reason: impl std::fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// A typed enrolled-identity row as it comes out of the store.
///
/// `encoding` is the raw stored blob; it is decoded and validated once,
/// when the gallery is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolledFace {
    pub identity: Identity,
    pub encoding: Option<Vec<u8>>,
}

pub trait AttendanceStore: Send + Sync {
    /// All enrolled identities, ordered by identity key.
    fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, DataUnavailable>;

    /// Every mark already recorded for `date`.
    fn marks_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, DataUnavailable>;

    /// Append one attendance mark.
    fn append_mark(&self, mark: &AttendanceMark) -> Result<(), DataUnavailable>;

    /// Replace the representative embedding stored for `student_id`.
    fn save_embedding(&self, student_id: &str, embedding: &Embedding)
        -> Result<(), DataUnavailable>;

    /// Look up an identity by key, whether or not it has an embedding.
    fn find_identity(&self, student_id: &str) -> Result<Option<Identity>, DataUnavailable>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// In-memory store for unit tests.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub faces: Mutex<Vec<EnrolledFace>>,
        pub marks: Mutex<Vec<AttendanceMark>>,
        pub offline: AtomicBool,
        pub fail_writes: AtomicBool,
    }

    impl MemoryStore {
        pub fn with_faces(faces: Vec<(Identity, Option<Embedding>)>) -> Self {
            let store = Self::default();
            *store.faces.lock().unwrap() = faces
                .into_iter()
                .map(|(identity, emb)| EnrolledFace {
                    identity,
                    encoding: emb.map(|e| e.to_bytes()),
                })
                .collect();
            store
        }

        pub fn marks(&self) -> Vec<AttendanceMark> {
            self.marks.lock().unwrap().clone()
        }

        fn check(&self, stage: &'static str) -> Result<(), DataUnavailable> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(DataUnavailable::new(stage, "store offline"));
            }
            Ok(())
        }
    }

    impl AttendanceStore for MemoryStore {
        fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, DataUnavailable> {
            self.check("loading enrolled faces")?;
            Ok(self.faces.lock().unwrap().clone())
        }

        fn marks_for_date(&self, date: NaiveDate) -> Result<Vec<AttendanceMark>, DataUnavailable> {
            self.check("loading marks")?;
            Ok(self
                .marks
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.date == date)
                .cloned()
                .collect())
        }

        fn append_mark(&self, mark: &AttendanceMark) -> Result<(), DataUnavailable> {
            self.check("appending mark")?;
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DataUnavailable::new("appending mark", "disk full"));
            }
            self.marks.lock().unwrap().push(mark.clone());
            Ok(())
        }

        fn save_embedding(
            &self,
            student_id: &str,
            embedding: &Embedding,
        ) -> Result<(), DataUnavailable> {
            self.check("saving embedding")?;
            let mut faces = self.faces.lock().unwrap();
            match faces.iter_mut().find(|f| f.identity.id == student_id) {
                Some(face) => {
                    face.encoding = Some(embedding.to_bytes());
                    Ok(())
                }
                None => Err(DataUnavailable::new("saving embedding", "unknown student")),
            }
        }

        fn find_identity(&self, student_id: &str) -> Result<Option<Identity>, DataUnavailable> {
            self.check("looking up identity")?;
            Ok(self
                .faces
                .lock()
                .unwrap()
                .iter()
                .find(|f| f.identity.id == student_id)
                .map(|f| f.identity.clone()))
        }
    }
}
