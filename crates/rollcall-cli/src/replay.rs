//! JSON-Lines replay of encoder output.
//!
//! Each non-blank line is one frame, either
//! `{"faces":[{"region":{..},"embedding":[..]}]}` or `{"error":"message"}`.
//! End of input exhausts the feed.

use rollcall_core::{Detection, FaceFeed, FeedError};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Faces { faces: Vec<Detection> },
    Error { error: String },
}

pub struct ReplayFeed<R> {
    reader: R,
    line: usize,
    buf: Vec<u8>,
}

impl ReplayFeed<BufReader<File>> {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> ReplayFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead + Send> FaceFeed for ReplayFeed<R> {
    fn next_faces(&mut self, _timeout: Duration) -> Result<Vec<Detection>, FeedError> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .map_err(|e| FeedError::Unavailable(format!("replay read failed: {e}")))?;
            if read == 0 {
                return Err(FeedError::Exhausted);
            }
            self.line += 1;

            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim(),
                Err(e) => {
                    tracing::warn!(line = self.line, error = %e, "replay line is not UTF-8");
                    return Err(FeedError::Unavailable(format!(
                        "replay line {}: {e}",
                        self.line
                    )));
                }
            };
            if text.is_empty() {
                continue;
            }
            return match serde_json::from_str::<ReplayLine>(text) {
                Ok(ReplayLine::Faces { faces }) => Ok(faces),
                Ok(ReplayLine::Error { error }) => Err(FeedError::Unavailable(error)),
                Err(e) => {
                    tracing::warn!(line = self.line, error = %e, "malformed replay line");
                    Err(FeedError::Unavailable(format!(
                        "replay line {}: {e}",
                        self.line
                    )))
                }
            };
        }
    }
}
