//! Beat-level packing of frames onto an AXI4-Stream data bus
//!
//! A frame is sent row by row. Each row is flattened into bytes (grayscale:
//! one byte per pixel; RGB: `B, G, R` per pixel) and cut into beats of
//! `lanes` bytes, byte lane `i` occupying `tdata[8i+7:8i]`. The first beat of
//! the frame carries SOF on `tuser`, the last beat of every row carries EOL on
//! `tlast`.
//!
//! The same [`StreamFormat`] drives encoding, decoding and the protocol
//! checker's framing expectations, so all three agree on lane order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::image_model::{self, Image, PixelFormat};

/// Widest beat in bytes (limited by the 128-bit signal model)
pub const MAX_BYTE_LANES: usize = 16;

/// One data transfer with its framing sideband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Beat {
    /// `tdata` word
    pub data: u128,
    /// Start of frame (`tuser`)
    pub sof: bool,
    /// End of line (`tlast`)
    pub eol: bool,
}

impl Beat {
    /// Beat with markers cleared
    pub fn plain(data: u128) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// Framing marker carried on a sideband signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    /// Start of frame on `tuser`
    Sof,
    /// End of line on `tlast`
    Eol,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marker::Sof => f.write_str("SOF/TUSER"),
            Marker::Eol => f.write_str("EOL/TLAST"),
        }
    }
}

/// How pixels map onto beats.
///
/// Built only through the constants and [`StreamFormat::byte_lanes`], so the
/// lane count always fits a data word. Deserialisation applies the same check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamFormat")]
pub struct StreamFormat {
    pub(crate) pixel: PixelFormat,
    pub(crate) lanes: usize,
}

#[derive(Deserialize)]
struct RawStreamFormat {
    pixel: PixelFormat,
    lanes: usize,
}

impl TryFrom<RawStreamFormat> for StreamFormat {
    type Error = ConfigError;

    fn try_from(raw: RawStreamFormat) -> Result<Self, ConfigError> {
        Self::byte_lanes(raw.pixel, raw.lanes)
    }
}

impl StreamFormat {
    /// One grayscale pixel per 8-bit beat
    pub const GRAY8: StreamFormat = StreamFormat {
        pixel: PixelFormat::Gray,
        lanes: 1,
    };

    /// One RGB pixel per 24-bit beat: B at `[7:0]`, G at `[15:8]`, R at `[23:16]`
    pub const RGB24: StreamFormat = StreamFormat {
        pixel: PixelFormat::Rgb,
        lanes: 3,
    };

    /// Generic line packing with `lanes` bytes per beat.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidLanes` for zero lanes or more than
    /// [`MAX_BYTE_LANES`].
    pub fn byte_lanes(pixel: PixelFormat, lanes: usize) -> Result<Self, ConfigError> {
        if lanes == 0 || lanes > MAX_BYTE_LANES {
            return Err(ConfigError::InvalidLanes {
                lanes,
                max: MAX_BYTE_LANES,
            });
        }
        Ok(Self { pixel, lanes })
    }

    /// Natural one-pixel-per-beat format for a pixel layout
    pub fn for_pixel(pixel: PixelFormat) -> Self {
        match pixel {
            PixelFormat::Gray => Self::GRAY8,
            PixelFormat::Rgb => Self::RGB24,
        }
    }

    /// Pixel layout of the frames carried
    pub fn pixel(&self) -> PixelFormat {
        self.pixel
    }

    /// Bytes per beat
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// `tdata` width in bits
    pub fn data_width(&self) -> u32 {
        (self.lanes * 8) as u32
    }

    /// Number of beats carrying one row of `width` pixels.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LineAlignment` when the row byte count is not a
    /// multiple of the lane count (partial beats are not modelled).
    pub fn beats_per_line(&self, width: usize) -> Result<usize, ConfigError> {
        let line_bytes = width * self.pixel.channels();
        if self.lanes == 0 || line_bytes % self.lanes != 0 {
            return Err(ConfigError::LineAlignment {
                width,
                line_bytes,
                lanes: self.lanes,
            });
        }
        Ok(line_bytes / self.lanes)
    }

    /// Serialise a frame into beats.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::FormatMismatch` if the image layout differs from
    /// the stream's, or `ConfigError::LineAlignment` for unaligned rows.
    pub fn encode(&self, image: &Image) -> Result<Vec<Beat>, ConfigError> {
        if image.format() != self.pixel {
            return Err(ConfigError::FormatMismatch {
                image: image.format(),
                stream: self.pixel,
            });
        }
        let per_line = self.beats_per_line(image.width())?;
        let mut beats = Vec::with_capacity(per_line * image.height());

        for y in 0..image.height() {
            let line = wire_line(image, y);
            for (i, chunk) in line.chunks(self.lanes).enumerate() {
                beats.push(Beat {
                    data: pack_bytes(chunk),
                    sof: y == 0 && i == 0,
                    eol: i + 1 == per_line,
                });
            }
        }

        log::debug!(
            "Encoded {}x{} frame into {} beats ({} per line, {} lanes)",
            image.width(),
            image.height(),
            beats.len(),
            per_line,
            self.lanes
        );
        Ok(beats)
    }

    /// Split a data word into its byte lanes, lane 0 first.
    pub fn beat_bytes(&self, word: u128) -> Vec<u8> {
        (0..self.lanes).map(|i| (word >> (8 * i)) as u8).collect()
    }

    /// Rebuild a frame from the data words of `height * beats_per_line` beats.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the word count does not fill the frame.
    pub fn decode(
        &self,
        width: usize,
        height: usize,
        words: &[u128],
    ) -> image_model::Result<Image> {
        let mut wire: Vec<u8> = Vec::with_capacity(words.len() * self.lanes);
        for &word in words {
            wire.extend(self.beat_bytes(word));
        }
        let samples = match self.pixel {
            PixelFormat::Gray => wire,
            PixelFormat::Rgb => wire
                .chunks(3)
                .flat_map(|bgr| match *bgr {
                    [b, g, r] => vec![r, g, b],
                    _ => bgr.to_vec(),
                })
                .collect(),
        };
        Image::new(width, height, self.pixel, samples)
    }

    /// Expected `(sof, eol)` for the accepted beat at `index` within a frame.
    pub fn expected_markers(index: usize, beats_per_line: usize) -> (bool, bool) {
        (index == 0, (index + 1) % beats_per_line.max(1) == 0)
    }
}

/// Row `y` in wire byte order
fn wire_line(image: &Image, y: usize) -> Vec<u8> {
    match image.format() {
        PixelFormat::Gray => image.row(y).to_vec(),
        PixelFormat::Rgb => image
            .row(y)
            .chunks(3)
            .flat_map(|rgb| [rgb[2], rgb[1], rgb[0]])
            .collect(),
    }
}

/// Pack bytes into a word, byte `i` at bits `[8i+7:8i]`.
pub fn pack_bytes(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .enumerate()
        .fold(0u128, |word, (i, &b)| word | (u128::from(b) << (8 * i)))
}
