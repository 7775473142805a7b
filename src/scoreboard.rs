//! Expected-vs-received frame comparison
//!
//! Reports the first difference only: a geometry mismatch fails before any
//! sample is compared, otherwise the first differing sample in row-major
//! order (channel-minor for RGB) is named with its position and both values.

use serde::Serialize;
use thiserror::Error;

use crate::image_model::{Image, PixelFormat};

/// A received frame that does not match the expected one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreboardError {
    /// Width, height or channel count differ.
    #[error("{what} dimensions mismatch: expected={expected}, received={received}")]
    DimensionMismatch {
        /// Label of the compared stream
        what: String,
        /// Expected geometry, `WxH` or `WxHxC`
        expected: String,
        /// Received geometry
        received: String,
    },

    /// First differing sample.
    #[error(
        "first {what} mismatch at index={index} (x={x}, y={y}{}): expected={expected}, received={received}",
        channel_suffix(.channel)
    )]
    SampleMismatch {
        /// Label of the compared stream
        what: String,
        /// Linear pixel index
        index: usize,
        /// Column
        x: usize,
        /// Row
        y: usize,
        /// Channel, for multi-channel frames
        channel: Option<usize>,
        /// Expected sample
        expected: u8,
        /// Received sample
        received: u8,
    },
}

fn channel_suffix(channel: &Option<usize>) -> String {
    channel.map(|c| format!(", channel={}", c)).unwrap_or_default()
}

/// Result type alias for scoreboard operations.
pub type Result<T> = std::result::Result<T, ScoreboardError>;

fn geometry(image: &Image) -> String {
    match image.format() {
        PixelFormat::Gray => format!("{}x{}", image.width(), image.height()),
        PixelFormat::Rgb => format!("{}x{}x{}", image.width(), image.height(), image.channels()),
    }
}

/// Compare two frames, naming the stream `what` in any failure.
///
/// # Errors
///
/// Returns the first mismatch found.
pub fn compare_frames(what: &str, expected: &Image, received: &Image) -> Result<()> {
    if expected.width() != received.width()
        || expected.height() != received.height()
        || expected.channels() != received.channels()
    {
        return Err(ScoreboardError::DimensionMismatch {
            what: what.to_string(),
            expected: geometry(expected),
            received: geometry(received),
        });
    }

    let channels = expected.channels();
    let width = expected.width();
    let first = expected
        .samples()
        .iter()
        .zip(received.samples())
        .position(|(e, r)| e != r);

    match first {
        None => Ok(()),
        Some(pos) => {
            let index = pos / channels;
            Err(ScoreboardError::SampleMismatch {
                what: what.to_string(),
                index,
                x: index % width,
                y: index / width,
                channel: (channels > 1).then_some(pos % channels),
                expected: expected.samples()[pos],
                received: received.samples()[pos],
            })
        }
    }
}

/// Running tally of frame comparisons for one stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct Scoreboard {
    name: String,
    frames_compared: u64,
    frames_matched: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_failure: Option<String>,
}

impl Scoreboard {
    /// Scoreboard labelled `name` (used in mismatch messages, e.g. `pixel`).
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Compare one frame pair and update the tally.
    ///
    /// # Errors
    ///
    /// Returns the first mismatch in this pair.
    pub fn compare(&mut self, expected: &Image, received: &Image) -> Result<()> {
        self.frames_compared += 1;
        match compare_frames(&self.name, expected, received) {
            Ok(()) => {
                self.frames_matched += 1;
                log::debug!("{} scoreboard: frame {} matched", self.name, self.frames_compared);
                Ok(())
            }
            Err(e) => {
                log::error!("{} scoreboard: {}", self.name, e);
                if self.first_failure.is_none() {
                    self.first_failure = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Frames compared so far
    pub fn frames_compared(&self) -> u64 {
        self.frames_compared
    }

    /// Frames that matched exactly
    pub fn frames_matched(&self) -> u64 {
        self.frames_matched
    }

    /// Whether every comparison so far matched
    pub fn is_clean(&self) -> bool {
        self.frames_compared == self.frames_matched
    }
}
