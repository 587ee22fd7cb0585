//! JSON-lines detection feed.
//!
//! One frame per line, either a bare array of detections or an object with a
//! `detections` array. Blank lines are skipped.

use std::path::Path;

use serde::Deserialize;
use shelfscan_models::Detection;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::FeedError;

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

#[derive(Deserialize)]
#[serde(untagged)]
enum FrameLine {
    Bare(Vec<Detection>),
    Wrapped { detections: Vec<Detection> },
}

impl FrameLine {
    fn into_detections(self) -> Vec<Detection> {
        match self {
            FrameLine::Bare(detections) | FrameLine::Wrapped { detections } => detections,
        }
    }
}

pub struct DetectionFeed<R> {
    lines: Lines<BufReader<R>>,
    line: usize,
}

impl DetectionFeed<BoxedReader> {
    /// Read frames from `path`, or stdin when no path is given.
    pub async fn open(path: Option<&Path>) -> Result<Self, FeedError> {
        let reader: BoxedReader = match path {
            Some(path) => Box::new(tokio::fs::File::open(path).await?),
            None => Box::new(tokio::io::stdin()),
        };
        Ok(Self::new(reader))
    }
}

impl<R: AsyncRead + Unpin> DetectionFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line: 0,
        }
    }

    /// Lines consumed so far.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Next frame, or `None` at end of input.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<Detection>>, FeedError> {
        loop {
            let Some(raw) = self.lines.next_line().await? else {
                return Ok(None);
            };
            self.line += 1;
            if raw.trim().is_empty() {
                continue;
            }

            let line = self.line;
            let detections = serde_json::from_str::<FrameLine>(&raw)
                .map_err(|source| FeedError::Malformed { line, source })?
                .into_detections();

            for (index, detection) in detections.iter().enumerate() {
                detection
                    .validate()
                    .map_err(|source| FeedError::InvalidDetection { line, index, source })?;
            }
            return Ok(Some(detections));
        }
    }
}
