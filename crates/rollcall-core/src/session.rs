//! Recognition session: the per-frame match-and-mark loop.
//!
//! A [`Session`] owns one gallery snapshot and one day's ledger. Both are
//! built in [`Session::open`] and dropped when the session ends; restarting
//! means opening a new session. The loop runs on its own OS thread, reads
//! one frame at a time and checks the stop flag only between frames, so a
//! frame's probes are always fully decided before the loop exits.

use crate::clock::Clock;
use crate::feed::FaceFeed;
use crate::gallery::{Gallery, GalleryError};
use crate::ledger::{DailyLedger, LedgerGuard, MarkDecision};
use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
use crate::store::{AttendanceStore, DataUnavailable};
use crate::types::{AttendanceEvent, AttendanceMark, Detection, EmbeddingError, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default embedding width of the face encoder.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

/// Default bound on a single frame read.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no enrolled faces in the gallery; enroll a student before starting")]
    EmptyGallery,
    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailable),
    #[error("probe rejected: {0}")]
    InvalidProbe(#[from] EmbeddingError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session thread panicked")]
    Panicked,
    #[error("session already joined")]
    AlreadyJoined,
}

impl From<GalleryError> for SessionError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::DataUnavailable(inner) => SessionError::DataUnavailable(inner),
            // Gallery::load reports per-record problems in `skipped`, never as Err.
            other => SessionError::DataUnavailable(DataUnavailable::new(
                "loading gallery",
                other,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Maximum match distance.
    pub tolerance: f32,
    /// Dimensionality of gallery and probe embeddings.
    pub embedding_dim: usize,
    /// Upper bound on each frame read.
    pub frame_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

/// Status and attendance signals published while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session_id: Uuid,
        gallery_size: usize,
        date: NaiveDate,
        already_marked: usize,
    },
    Marked(AttendanceEvent),
    AlreadyMarked {
        identity: Identity,
    },
    Unknown {
        nearest: Option<f32>,
    },
    /// A probe the matcher refused (e.g. NaN components); skipped.
    RejectedProbe {
        reason: String,
    },
    /// Transient; the loop moves on to the next frame.
    FrameReadError {
        message: String,
    },
    /// Store write failed; the identity stays unmarked so a later frame retries.
    MarkFailed {
        identity: Identity,
        reason: String,
    },
    DateRolledOver {
        from: NaiveDate,
        to: NaiveDate,
    },
    Stopped(SessionSummary),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub faces: u64,
    pub marks: u64,
    pub unknown: u64,
    pub frame_errors: u64,
}

impl SessionSummary {
    fn record(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Marked(_) => {
                self.faces += 1;
                self.marks += 1;
            }
            SessionEvent::Unknown { .. } => {
                self.faces += 1;
                self.unknown += 1;
            }
            SessionEvent::AlreadyMarked { .. }
            | SessionEvent::RejectedProbe { .. }
            | SessionEvent::MarkFailed { .. } => self.faces += 1,
            SessionEvent::FrameReadError { .. } => self.frame_errors += 1,
            _ => {}
        }
    }
}

/// One start-to-stop recognition session.
pub struct Session {
    id: Uuid,
    gallery: Arc<Gallery>,
    ledger: LedgerGuard,
    store: Arc<dyn AttendanceStore>,
    clock: Arc<dyn Clock>,
    matcher: EuclideanMatcher,
    config: SessionConfig,
}

impl Session {
    /// Load a gallery snapshot and today's existing marks.
    ///
    /// Fails with [`SessionError::EmptyGallery`] before touching the ledger
    /// if nobody is enrolled.
    pub fn open(
        store: Arc<dyn AttendanceStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let load = Gallery::load(store.as_ref(), config.embedding_dim)?;
        if load.gallery.is_empty() {
            tracing::warn!(skipped = load.skipped.len(), "refusing to start: gallery empty");
            return Err(SessionError::EmptyGallery);
        }

        let today = clock.now().date();
        let ledger = load_ledger(store.as_ref(), today)?;

        let id = Uuid::new_v4();
        tracing::info!(
            session = %id,
            gallery = load.gallery.size(),
            skipped = load.skipped.len(),
            %today,
            already_marked = ledger.len(),
            tolerance = config.tolerance,
            "session opened"
        );

        Ok(Self {
            id,
            gallery: Arc::new(load.gallery),
            ledger: LedgerGuard::new(ledger),
            store,
            clock,
            matcher: EuclideanMatcher,
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &LedgerGuard {
        &self.ledger
    }

    /// Decide every probe of one frame observed at `now`.
    ///
    /// Probes are checked for dimensionality up front: a mismatch is a fatal
    /// precondition violation and nothing in the frame is marked. Valid
    /// probes are matched in parallel; marking goes through the ledger's
    /// check-and-set. Events come back in probe order.
    pub fn process_frame(
        &self,
        faces: &[Detection],
        now: NaiveDateTime,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let mut events = Vec::with_capacity(faces.len() + 1);

        match self.refresh_date(now) {
            Ok(Some((from, to))) => events.push(SessionEvent::DateRolledOver { from, to }),
            Ok(None) => {}
            Err(e) => {
                // Without today's ledger we cannot tell duplicates apart.
                tracing::warn!(error = %e, "ledger refresh failed; frame skipped");
                events.push(SessionEvent::FrameReadError {
                    message: e.to_string(),
                });
                return Ok(events);
            }
        }

        for face in faces {
            face.embedding.check_dim(self.gallery.dim())?;
        }

        match faces {
            [] => {}
            [only] => events.push(self.process_probe(only, now)),
            many => {
                let decided = std::thread::scope(|s| {
                    let handles: Vec<_> = many
                        .iter()
                        .map(|face| s.spawn(move || self.process_probe(face, now)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().map_err(|_| SessionError::Panicked))
                        .collect::<Result<Vec<_>, _>>()
                })?;
                events.extend(decided);
            }
        }

        Ok(events)
    }

    fn process_probe(&self, face: &Detection, now: NaiveDateTime) -> SessionEvent {
        let outcome = match self
            .matcher
            .find(&face.embedding, &self.gallery, self.config.tolerance)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "probe rejected");
                return SessionEvent::RejectedProbe {
                    reason: e.to_string(),
                };
            }
        };

        let found = match outcome {
            MatchOutcome::Match(found) => found,
            MatchOutcome::NoMatch { nearest } => {
                tracing::debug!(?nearest, "unknown face");
                return SessionEvent::Unknown { nearest };
            }
        };

        let mark = AttendanceMark::at(found.identity.id.clone(), now);
        match self
            .ledger
            .mark_with(&found.identity.id, || self.store.append_mark(&mark))
        {
            Ok(MarkDecision::Marked) => {
                tracing::info!(
                    session = %self.id,
                    identity = %found.identity.id,
                    name = %found.identity.label,
                    distance = found.distance,
                    "attendance marked"
                );
                SessionEvent::Marked(AttendanceEvent {
                    identity: found.identity,
                    distance: found.distance,
                    timestamp: now,
                })
            }
            Ok(MarkDecision::AlreadyMarked) => {
                tracing::trace!(identity = %found.identity.id, "already marked today");
                SessionEvent::AlreadyMarked {
                    identity: found.identity,
                }
            }
            Err(e) => {
                tracing::warn!(identity = %found.identity.id, error = %e, "failed to persist mark");
                SessionEvent::MarkFailed {
                    identity: found.identity,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Install a fresh ledger when the calendar date has moved on.
    fn refresh_date(
        &self,
        now: NaiveDateTime,
    ) -> Result<Option<(NaiveDate, NaiveDate)>, DataUnavailable> {
        let today = now.date();
        if today == self.ledger.date() {
            return Ok(None);
        }
        let next = load_ledger(self.store.as_ref(), today)?;
        let previous = self.ledger.roll_over(next);
        tracing::info!(session = %self.id, from = %previous, to = %today, "date rolled over");
        Ok(Some((previous, today)))
    }

    /// Start the loop on a dedicated thread.
    ///
    /// `Started` is sent before this returns; `Stopped` is the last event of
    /// a clean shutdown. The channel closes when the thread exits.
    pub fn spawn(
        self,
        feed: Box<dyn FaceFeed>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionHandle, SessionError> {
        let id = self.id;
        let stop = Arc::new(AtomicBool::new(false));

        let _ = events.send(SessionEvent::Started {
            session_id: id,
            gallery_size: self.gallery.size(),
            date: self.ledger.date(),
            already_marked: self.ledger.marked_count(),
        });

        let thread = std::thread::Builder::new()
            .name("rollcall-session".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || self.run(feed, &stop, &events)
            })
            .map_err(SessionError::Spawn)?;

        Ok(SessionHandle {
            id,
            stop,
            thread: Some(thread),
        })
    }

    fn run(
        self,
        mut feed: Box<dyn FaceFeed>,
        stop: &AtomicBool,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionSummary, SessionError> {
        tracing::info!(session = %self.id, "session thread started");
        let mut summary = SessionSummary::default();

        while !stop.load(Ordering::Acquire) {
            let faces = match feed.next_faces(self.config.frame_interval) {
                Ok(faces) => faces,
                Err(e) if !e.is_transient() => {
                    tracing::info!(session = %self.id, reason = %e, "frame source ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!(session = %self.id, error = %e, "frame read failed");
                    let event = SessionEvent::FrameReadError {
                        message: e.to_string(),
                    };
                    summary.record(&event);
                    let _ = events.send(event);
                    continue;
                }
            };
            summary.frames += 1;

            let now = self.clock.now();
            let decided = self.process_frame(&faces, now).map_err(|e| {
                tracing::error!(session = %self.id, error = %e, "session aborted");
                e
            })?;
            for event in decided {
                summary.record(&event);
                let _ = events.send(event);
            }
        }

        tracing::info!(
            session = %self.id,
            frames = summary.frames,
            marks = summary.marks,
            unknown = summary.unknown,
            frame_errors = summary.frame_errors,
            "session stopped"
        );
        let _ = events.send(SessionEvent::Stopped(summary));
        Ok(summary)
    }
}

fn load_ledger(store: &dyn AttendanceStore, date: NaiveDate) -> Result<DailyLedger, DataUnavailable> {
    let marks = store.marks_for_date(date)?;
    Ok(DailyLedger::with_marks(
        date,
        marks.into_iter().map(|m| m.student_id),
    ))
}

/// Owner-side handle of a running session thread.
///
/// Dropping the handle stops the session and waits for it.
pub struct SessionHandle {
    id: Uuid,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<SessionSummary, SessionError>>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the loop to exit after the frame in flight.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub fn stop(mut self) -> Result<SessionSummary, SessionError> {
        self.request_stop();
        self.join()
    }

    /// Wait for the loop to end by itself (feed exhausted or fatal error).
    pub fn wait(mut self) -> Result<SessionSummary, SessionError> {
        self.join()
    }

    fn join(&mut self) -> Result<SessionSummary, SessionError> {
        let thread = self.thread.take().ok_or(SessionError::AlreadyJoined)?;
        thread.join().map_err(|_| SessionError::Panicked)?
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.request_stop();
            let _ = thread.join();
        }
    }
}
