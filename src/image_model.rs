//! Frame model shared by stimulus, capture and checking
//!
//! An [`Image`] is an immutable row-major grid of 8-bit samples with either one
//! (grayscale) or three (RGB, stored `R, G, B` per pixel) channels. Drivers
//! serialise it into beats, monitors rebuild it from beats, and the scoreboard
//! compares two of them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::image_model::Image;
//!
//! let frame = Image::gradient(8, 6)?;
//! assert_eq!(frame.pixel_at(1, 1)?, 9);
//! assert!(frame.is_last_in_line(7));
//! frame.save_png("frame.png")?;
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building, loading or saving an [`Image`].
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Width or height is zero.
    #[error("frame must have a non-zero area, got {width}x{height}")]
    EmptyFrame {
        /// Requested width
        width: usize,
        /// Requested height
        height: usize,
    },

    /// Sample buffer length does not match the geometry.
    #[error("expected {expected} samples, got {actual}")]
    SampleCount {
        /// `width * height * channels`
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// A sample lies outside `0..=255`.
    #[error("sample value out of range [0, 255] at index {index}: {value}")]
    SampleOutOfRange {
        /// Linear sample index
        index: usize,
        /// Offending value
        value: i64,
    },

    /// Coordinate outside the frame.
    #[error("pixel coordinate out of bounds: ({x}, {y}) in {width}x{height} frame")]
    OutOfBounds {
        /// Column
        x: usize,
        /// Row
        y: usize,
        /// Frame width
        width: usize,
        /// Frame height
        height: usize,
    },

    /// Decoding or encoding an image file failed.
    #[error("image file error: {0}")]
    File(#[from] image::ImageError),
}

/// Result type alias for frame model operations.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Sample layout of an [`Image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// One 8-bit luma sample per pixel
    Gray,
    /// Three 8-bit samples per pixel, stored `R, G, B`
    Rgb,
}

impl PixelFormat {
    /// Samples per pixel
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
        }
    }
}

/// Immutable 2-D frame of 8-bit samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    width: usize,
    height: usize,
    format: PixelFormat,
    samples: Vec<u8>,
}

impl Image {
    /// Build an image from an owned sample buffer.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyFrame` for a zero width or height and
    /// `ValidationError::SampleCount` when `samples` has the wrong length.
    pub fn new(width: usize, height: usize, format: PixelFormat, samples: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ValidationError::EmptyFrame { width, height });
        }
        let expected = width * height * format.channels();
        if samples.len() != expected {
            return Err(ValidationError::SampleCount {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            samples,
        })
    }

    /// Build an image from wide integer values, checking each lies in `0..=255`.
    ///
    /// # Errors
    ///
    /// Same as [`Image::new`], plus `ValidationError::SampleOutOfRange`.
    pub fn from_values(
        width: usize,
        height: usize,
        format: PixelFormat,
        values: &[i64],
    ) -> Result<Self> {
        let samples = values
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                u8::try_from(value).map_err(|_| ValidationError::SampleOutOfRange { index, value })
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::new(width, height, format, samples)
    }

    /// Build an image by evaluating `f(x, y, channel)` for every sample.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyFrame` for a zero width or height.
    pub fn from_fn<F>(width: usize, height: usize, format: PixelFormat, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize, usize) -> u8,
    {
        let channels = format.channels();
        let mut samples = Vec::with_capacity(width * height * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    samples.push(f(x, y, c));
                }
            }
        }
        Self::new(width, height, format, samples)
    }

    /// Deterministic grayscale ramp: `(y * width + x) mod 256`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyFrame` for a zero width or height.
    pub fn gradient(width: usize, height: usize) -> Result<Self> {
        Self::from_fn(width, height, PixelFormat::Gray, |x, y, _| {
            ((y * width + x) % 256) as u8
        })
    }

    /// Deterministic RGB pattern with distinct values per channel.
    ///
    /// Red follows the grayscale ramp, green steps diagonally and blue is the
    /// inverted ramp, so channel swaps show up as mismatches.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyFrame` for a zero width or height.
    pub fn gradient_rgb(width: usize, height: usize) -> Result<Self> {
        Self::from_fn(width, height, PixelFormat::Rgb, |x, y, c| {
            let ramp = (y * width + x) % 256;
            let value = match c {
                0 => ramp,
                1 => (x * 3 + y * 5) % 256,
                _ => 255 - ramp,
            };
            value as u8
        })
    }

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> usize {
        self.height
    }

    /// Sample layout
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Samples per pixel
    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Number of pixels (`width * height`)
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Raw row-major samples
    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Linear pixel index of `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfBounds` outside the frame.
    pub fn index(&self, x: usize, y: usize) -> Result<usize> {
        if x >= self.width || y >= self.height {
            return Err(ValidationError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(y * self.width + x)
    }

    /// Samples of the pixel at `(x, y)`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfBounds` outside the frame.
    pub fn pixel(&self, x: usize, y: usize) -> Result<&[u8]> {
        let channels = self.channels();
        let start = self.index(x, y)? * channels;
        Ok(&self.samples[start..start + channels])
    }

    /// First sample of the pixel at `(x, y)` (the luma for grayscale frames).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::OutOfBounds` outside the frame.
    pub fn pixel_at(&self, x: usize, y: usize) -> Result<u8> {
        Ok(self.pixel(x, y)?[0])
    }

    /// Whether `index` is the first pixel of the frame.
    pub fn is_first_pixel(index: usize) -> bool {
        index == 0
    }

    /// Whether `index` is the last pixel of its row.
    pub fn is_last_in_line(&self, index: usize) -> bool {
        (index + 1) % self.width == 0
    }

    /// Samples of row `y`.
    pub fn row(&self, y: usize) -> &[u8] {
        let stride = self.width * self.channels();
        &self.samples[y * stride..(y + 1) * stride]
    }

    /// Load an image file, keeping RGB colour (alpha is dropped, gray stays gray).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::File` if the file cannot be read or decoded.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let decoded = image::open(path.as_ref())?;
        let image = match decoded.color().channel_count() {
            1 | 2 => {
                let gray = decoded.to_luma8();
                let (w, h) = gray.dimensions();
                Self::new(w as usize, h as usize, PixelFormat::Gray, gray.into_raw())?
            }
            _ => {
                let rgb = decoded.to_rgb8();
                let (w, h) = rgb.dimensions();
                Self::new(w as usize, h as usize, PixelFormat::Rgb, rgb.into_raw())?
            }
        };
        log::debug!(
            "Loaded {} ({}x{} {:?})",
            path.as_ref().display(),
            image.width,
            image.height,
            image.format
        );
        Ok(image)
    }

    /// Load an image file and convert it to 8-bit grayscale.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::File` if the file cannot be read or decoded.
    pub fn load_grayscale(path: impl AsRef<Path>) -> Result<Self> {
        let gray = image::open(path.as_ref())?.to_luma8();
        let (w, h) = gray.dimensions();
        Self::new(w as usize, h as usize, PixelFormat::Gray, gray.into_raw())
    }

    /// Write the image as a lossless 8-bit PNG.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::File` if encoding or writing fails.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let color = match self.format {
            PixelFormat::Gray => image::ExtendedColorType::L8,
            PixelFormat::Rgb => image::ExtendedColorType::Rgb8,
        };
        image::save_buffer_with_format(
            path.as_ref(),
            &self.samples,
            self.width as u32,
            self.height as u32,
            color,
            image::ImageFormat::Png,
        )?;
        log::debug!("Saved {}x{} PNG to {}", self.width, self.height, path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gradient_values_wrap() {
        let img = Image::gradient(20, 20).unwrap();
        assert_eq!(img.pixel_at(0, 0).unwrap(), 0);
        assert_eq!(img.pixel_at(5, 2).unwrap(), 45);
        // 12 * 20 + 16 = 256 wraps to 0
        assert_eq!(img.pixel_at(16, 12).unwrap(), 0);
    }

    #[test]
    fn test_pixel_outside_frame_is_error() {
        let img = Image::gradient_rgb(4, 3).unwrap();
        assert!(img.pixel(3, 2).is_ok());
        assert!(matches!(
            img.pixel(4, 0),
            Err(ValidationError::OutOfBounds { x: 4, y: 0, width: 4, height: 3 })
        ));
        assert!(matches!(
            img.pixel_at(0, 3),
            Err(ValidationError::OutOfBounds { x: 0, y: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_sample_count() {
        let err = Image::new(4, 2, PixelFormat::Gray, vec![0; 7]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::SampleCount {
                expected: 8,
                actual: 7
            }
        ));
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let err = Image::from_values(2, 1, PixelFormat::Gray, &[12, 256]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::SampleOutOfRange {
                index: 1,
                value: 256
            }
        ));
        assert!(Image::from_values(1, 1, PixelFormat::Gray, &[-1]).is_err());
    }

    #[test]
    fn test_rejects_zero_area() {
        assert!(matches!(
            Image::gradient(0, 4),
            Err(ValidationError::EmptyFrame { width: 0, height: 4 })
        ));
    }

    #[test]
    fn test_geometry_predicates() {
        let img = Image::gradient(4, 3).unwrap();
        assert!(Image::is_first_pixel(0));
        assert!(!Image::is_first_pixel(1));
        assert!(img.is_last_in_line(3));
        assert!(img.is_last_in_line(11));
        assert!(!img.is_last_in_line(4));
        assert_eq!(img.index(3, 2).unwrap(), 11);
        assert!(img.index(4, 0).is_err());
    }

    #[test]
    fn test_rgb_layout_and_rows() {
        let img = Image::gradient_rgb(3, 2).unwrap();
        assert_eq!(img.samples().len(), 18);
        assert_eq!(img.pixel(1, 1).unwrap(), &[4, 8, 251]);
        assert_eq!(img.row(1).len(), 9);
        assert_eq!(&img.row(1)[3..6], img.pixel(1, 1).unwrap());
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        for img in [
            Image::gradient(9, 5).unwrap(),
            Image::gradient_rgb(7, 4).unwrap(),
        ] {
            let path = dir.path().join("frame.png");
            img.save_png(&path).unwrap();
            assert_eq!(Image::load(&path).unwrap(), img);
        }
    }

    #[test]
    fn test_load_grayscale_converts_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("white.png");
        Image::from_fn(2, 2, PixelFormat::Rgb, |_, _, _| 255)
            .unwrap()
            .save_png(&path)
            .unwrap();
        let gray = Image::load_grayscale(&path).unwrap();
        assert_eq!(gray.format(), PixelFormat::Gray);
        assert!(gray.samples().iter().all(|&s| s == 255));
    }
}
