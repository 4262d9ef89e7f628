//! Enrollment: turn several captured embeddings into one representative embedding.

use crate::feed::FaceFeed;
use crate::store::{AttendanceStore, DataUnavailable};
use crate::types::{Embedding, EmbeddingError, Identity};
use std::time::Duration;
use thiserror::Error;

/// Default number of usable samples an enrollment must collect.
pub const DEFAULT_MIN_SAMPLES: usize = 5;

/// Default number of frames an enrollment may read before giving up.
pub const DEFAULT_MAX_FRAMES: usize = 30;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollError {
    #[error("insufficient samples: collected {collected}, need {required}")]
    InsufficientSamples { collected: usize, required: usize },
    #[error("sample {index} rejected: {source}")]
    InvalidSample {
        index: usize,
        #[source]
        source: EmbeddingError,
    },
    #[error("unknown student: {0}")]
    UnknownIdentity(String),
    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),
}

/// Average `samples` element-wise into one embedding.
///
/// Every sample must be finite and share the first sample's dimensionality.
/// Fewer than `minimum` samples (never less than one) is an error; nothing
/// is averaged in that case.
pub fn aggregate(samples: &[Embedding], minimum: usize) -> Result<Embedding, EnrollError> {
    let required = minimum.max(1);
    if samples.len() < required {
        return Err(EnrollError::InsufficientSamples {
            collected: samples.len(),
            required,
        });
    }

    let dim = samples[0].dim();
    let mut sums = vec![0f64; dim];
    for (index, sample) in samples.iter().enumerate() {
        sample
            .validate()
            .and_then(|()| sample.check_dim(dim))
            .map_err(|source| EnrollError::InvalidSample { index, source })?;
        for (acc, v) in sums.iter_mut().zip(&sample.values) {
            *acc += f64::from(*v);
        }
    }

    let n = samples.len() as f64;
    Ok(Embedding::new(
        sums.into_iter().map(|s| (s / n) as f32).collect(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollConfig {
    pub minimum_samples: usize,
    /// Frames to read before giving up on reaching `minimum_samples`.
    pub max_frames: usize,
    /// Upper bound on each frame read.
    pub frame_timeout: Duration,
    /// Required sample width; `None` takes the first sample's.
    pub expected_dim: Option<usize>,
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            minimum_samples: DEFAULT_MIN_SAMPLES,
            max_frames: DEFAULT_MAX_FRAMES,
            frame_timeout: Duration::from_millis(100),
            expected_dim: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentResult {
    pub identity: Identity,
    pub embedding: Embedding,
    pub samples_used: usize,
}

/// Capture samples for `student_id` from `feed` and aggregate them.
///
/// Takes the first face of each frame that has one. Faceless frames,
/// transient read errors and non-finite samples are skipped and do not
/// count. A sample whose width differs from `expected_dim` (or from the
/// first accepted sample) fails the enrollment. Stops once
/// `minimum_samples` are collected, the frame budget runs out, or the feed
/// is exhausted. Nothing is persisted here; see [`enroll_and_save`].
pub fn enroll(
    store: &dyn AttendanceStore,
    feed: &mut dyn FaceFeed,
    student_id: &str,
    config: &EnrollConfig,
) -> Result<EnrollmentResult, EnrollError> {
    let identity = store
        .find_identity(student_id)?
        .ok_or_else(|| EnrollError::UnknownIdentity(student_id.to_string()))?;

    let required = config.minimum_samples.max(1);
    let mut samples: Vec<Embedding> = Vec::with_capacity(required);
    let mut dim = config.expected_dim;

    for frame in 0..config.max_frames {
        if samples.len() >= required {
            break;
        }
        match feed.next_faces(config.frame_timeout) {
            Ok(faces) => match faces.into_iter().next() {
                Some(face) => {
                    if let Err(e) = face.embedding.validate() {
                        tracing::warn!(frame, error = %e, "enrollment sample skipped");
                        continue;
                    }
                    let expected = *dim.get_or_insert(face.embedding.dim());
                    face.embedding
                        .check_dim(expected)
                        .map_err(|source| EnrollError::InvalidSample {
                            index: samples.len(),
                            source,
                        })?;
                    samples.push(face.embedding);
                    tracing::debug!(
                        identity = %identity.id,
                        frame,
                        collected = samples.len(),
                        required,
                        "enrollment sample captured"
                    );
                }
                None => tracing::trace!(frame, "no face in enrollment frame"),
            },
            Err(e) if !e.is_transient() => break,
            Err(e) => tracing::warn!(frame, error = %e, "enrollment frame read failed"),
        }
    }

    let embedding = aggregate(&samples, required)?;
    tracing::info!(
        identity = %identity.id,
        samples = samples.len(),
        dim = embedding.dim(),
        "enrollment aggregated"
    );

    Ok(EnrollmentResult {
        identity,
        embedding,
        samples_used: samples.len(),
    })
}

/// [`enroll`], then persist the aggregated embedding.
pub fn enroll_and_save(
    store: &dyn AttendanceStore,
    feed: &mut dyn FaceFeed,
    student_id: &str,
    config: &EnrollConfig,
) -> Result<EnrollmentResult, EnrollError> {
    let result = enroll(store, feed, student_id, config)?;
    store.save_embedding(&result.identity.id, &result.embedding)?;
    Ok(result)
}
