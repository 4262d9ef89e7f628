//! Frame and face-detection collaborator interfaces.
//!
//! Camera capture and the detector/encoder live outside this crate. The
//! recognition loop and enrollment only consume a [`FaceFeed`]: something
//! that, per frame, yields the faces found in it.

use crate::types::Detection;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    /// No frame arrived within the allotted interval.
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    /// The source or encoder failed on this frame; the next one may succeed.
    #[error("frame unavailable: {0}")]
    Unavailable(String),
    /// A finite source has no more frames.
    #[error("frame source exhausted")]
    Exhausted,
}

impl FeedError {
    /// Transient errors are reported and the caller moves on to the next frame.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FeedError::Exhausted)
    }
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed pixel data, layout defined by the source.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Yields raw frames on demand.
pub trait FrameSource: Send {
    /// Wait at most `timeout` for the next frame.
    fn read_frame(&mut self, timeout: Duration) -> Result<Frame, FeedError>;
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("face encoder failed: {0}")]
pub struct EncoderError(pub String);

/// Turns one frame into zero or more (region, embedding) detections.
pub trait FaceEncoder: Send {
    fn encode(&mut self, frame: &Frame) -> Result<Vec<Detection>, EncoderError>;
}

/// Per-frame face detections. An empty vector means no face in the frame.
pub trait FaceFeed: Send {
    fn next_faces(&mut self, timeout: Duration) -> Result<Vec<Detection>, FeedError>;
}

/// A [`FrameSource`] and a [`FaceEncoder`] run back to back.
pub struct CameraFeed<S, E> {
    source: S,
    encoder: E,
}

impl<S: FrameSource, E: FaceEncoder> CameraFeed<S, E> {
    pub fn new(source: S, encoder: E) -> Self {
        Self { source, encoder }
    }
}

impl<S: FrameSource, E: FaceEncoder> FaceFeed for CameraFeed<S, E> {
    fn next_faces(&mut self, timeout: Duration) -> Result<Vec<Detection>, FeedError> {
        let frame = self.source.read_frame(timeout)?;
        self.encoder.encode(&frame).map_err(|e| {
            tracing::debug!(sequence = frame.sequence, error = %e, "encoder failed on frame");
            FeedError::Unavailable(e.to_string())
        })
    }
}
