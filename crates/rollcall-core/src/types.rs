use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bytes per stored dimension. Embeddings are persisted as little-endian f64.
const STORED_BYTES_PER_DIM: usize = 8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding has no values")]
    Empty,
    #[error("embedding value at index {0} is not finite")]
    NonFinite(usize),
    #[error("stored encoding is {0} bytes, not a whole number of f64 values")]
    InvalidByteLength(usize),
}

/// Bounding region of a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face embedding vector (128-dimensional for the default encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject empty vectors and NaN/infinite components.
    pub fn validate(&self) -> Result<(), EmbeddingError> {
        if self.values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(idx) => Err(EmbeddingError::NonFinite(idx)),
            None => Ok(()),
        }
    }

    /// Fails unless this embedding has exactly `expected` dimensions.
    pub fn check_dim(&self, expected: usize) -> Result<(), EmbeddingError> {
        if self.dim() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }

    /// Euclidean distance, refusing to compare vectors of different length.
    pub fn distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        other.check_dim(self.dim())?;
        Ok(self.euclidean_distance(other))
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must have checked dimensionality; extra trailing values
    /// on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| {
                let d = f64::from(*a) - f64::from(*b);
                d * d
            })
            .sum::<f64>()
            .sqrt() as f32
    }

    /// Serialize for storage: each value as a little-endian f64.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * STORED_BYTES_PER_DIM);
        for v in &self.values {
            out.extend_from_slice(&f64::from(*v).to_le_bytes());
        }
        out
    }

    /// Parse a stored encoding and validate it against the expected dimensionality.
    pub fn from_bytes(bytes: &[u8], expected_dim: usize) -> Result<Self, EmbeddingError> {
        if bytes.len() % STORED_BYTES_PER_DIM != 0 {
            return Err(EmbeddingError::InvalidByteLength(bytes.len()));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(STORED_BYTES_PER_DIM)
            .map(|chunk| {
                let mut buf = [0u8; STORED_BYTES_PER_DIM];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf) as f32
            })
            .collect();

        let embedding = Self { values };
        embedding.validate()?;
        embedding.check_dim(expected_dim)?;
        Ok(embedding)
    }
}

/// An enrolled person: stable key plus display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Student identifier, unique per enrolled person.
    pub id: String,
    /// Display name.
    pub label: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// One face found in a frame by the external detector/encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// A persisted attendance record: one per (student, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceMark {
    pub student_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceMark {
    pub fn at(student_id: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            student_id: student_id.into(),
            date: timestamp.date(),
            time: timestamp.time(),
        }
    }
}

/// Emitted to collaborators each time a new mark is persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEvent {
    pub identity: Identity,
    pub distance: f32,
    pub timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let a = emb(&[0.1, -0.4, 0.9, 0.25]);
        assert_eq!(a.distance(&a).unwrap(), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = emb(&[0.1, 0.2, 0.3]);
        let b = emb(&[-0.5, 0.7, 0.05]);
        assert_eq!(a.distance(&b).unwrap(), b.distance(&a).unwrap());
    }

    #[test]
    fn test_distance_known_value() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch() {
        let a = emb(&[0.0, 0.0, 0.0]);
        let b = emb(&[0.0, 0.0]);
        assert_eq!(
            a.distance(&b),
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_validate_rejects_empty_and_nan() {
        assert_eq!(emb(&[]).validate(), Err(EmbeddingError::Empty));
        assert_eq!(
            emb(&[0.1, f32::NAN]).validate(),
            Err(EmbeddingError::NonFinite(1))
        );
        assert!(emb(&[0.1, 0.2]).validate().is_ok());
    }

    #[test]
    fn test_stored_bytes_roundtrip() {
        let a = emb(&[0.125, -0.5, 0.75]);
        let bytes = a.to_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(Embedding::from_bytes(&bytes, 3).unwrap(), a);
    }

    #[test]
    fn test_from_bytes_rejects_truncated_blob() {
        let bytes = vec![0u8; 13];
        assert_eq!(
            Embedding::from_bytes(&bytes, 2),
            Err(EmbeddingError::InvalidByteLength(13))
        );
    }

    #[test]
    fn test_from_bytes_rejects_wrong_dimension() {
        let bytes = emb(&[0.1, 0.2]).to_bytes();
        assert_eq!(
            Embedding::from_bytes(&bytes, 128),
            Err(EmbeddingError::DimensionMismatch {
                expected: 128,
                actual: 2
            })
        );
    }

    #[test]
    fn test_detection_deserializes_without_region() {
        let det: Detection = serde_json::from_str(r#"{"embedding":[0.5,0.25]}"#).unwrap();
        assert_eq!(det.embedding.values, vec![0.5, 0.25]);
        assert_eq!(det.region, BoundingBox::default());
    }

    #[test]
    fn test_mark_splits_timestamp() {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let mark = AttendanceMark::at("S1", ts);
        assert_eq!(mark.date, ts.date());
        assert_eq!(mark.time, ts.time());
    }
}
