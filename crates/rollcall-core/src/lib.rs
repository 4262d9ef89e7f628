//! rollcall-core: Face-embedding matching and once-per-day attendance marking.
//!
//! Probes from an external face encoder are matched against an enrolled
//! gallery by Euclidean distance; resolved identities are marked at most
//! once per calendar date through a lock-guarded daily ledger.

pub mod clock;
pub mod enroll;
pub mod feed;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod session;
pub mod store;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use enroll::{aggregate, enroll, enroll_and_save, EnrollConfig, EnrollError, EnrollmentResult};
pub use feed::{CameraFeed, EncoderError, FaceEncoder, FaceFeed, FeedError, Frame, FrameSource};
pub use gallery::{Gallery, GalleryEntry, GalleryError, GalleryLoad};
pub use ledger::{DailyLedger, LedgerGuard, MarkDecision};
pub use matcher::{
    EuclideanMatcher, MatchOutcome, MatchResult, Matcher, DEFAULT_TOLERANCE, TIE_EPSILON,
};
pub use session::{Session, SessionConfig, SessionError, SessionEvent, SessionHandle, SessionSummary};
pub use store::{AttendanceStore, DataUnavailable, EnrolledFace};
pub use types::{
    AttendanceEvent, AttendanceMark, BoundingBox, Detection, Embedding, EmbeddingError, Identity,
};
