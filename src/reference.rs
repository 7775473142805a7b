//! Golden models for the transforms a design under test may apply
//!
//! The scenario compares what comes out of the design against these, so the
//! arithmetic here must match the hardware bit for bit.
//!
//! - grayscale: `y = (r >> 2) + (g >> 1) + (b >> 2)`, replicated into R, G and B
//! - lowpass: floor of the mean of each fully-inside 3x3 window
//!
//! Word-level helpers work on packed beats (RGB24 lanes `B, G, R`, windows as
//! in [`crate::window`]) so stand-in designs can apply the same transform
//! to a stream.

use thiserror::Error;

use crate::config::ConfigError;
use crate::image_model::{Image, PixelFormat, ValidationError};
use crate::window::{window_output_size, windows_3x3, Window};

/// Errors raised while building a reference frame.
#[derive(Error, Debug)]
pub enum ReferenceError {
    /// Input has the wrong layout or size for the model.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Output frame could not be built.
    #[error(transparent)]
    Image(#[from] ValidationError),
}

/// Result type alias for reference models.
pub type Result<T> = std::result::Result<T, ReferenceError>;

/// Luma approximation used by the grayscale core.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    // Max is 63 + 127 + 63 = 253, no overflow.
    (r >> 2) + (g >> 1) + (b >> 2)
}

/// Grayscale conversion, luma replicated into all three channels.
///
/// # Errors
///
/// Returns `ConfigError::FormatMismatch` unless `image` is RGB.
pub fn rgb_to_gray_replicated(image: &Image) -> Result<Image> {
    if image.format() != PixelFormat::Rgb {
        return Err(ConfigError::FormatMismatch {
            image: image.format(),
            stream: PixelFormat::Rgb,
        }
        .into());
    }
    let samples = image
        .samples()
        .chunks_exact(3)
        .flat_map(|px| {
            let y = luma(px[0], px[1], px[2]);
            [y, y, y]
        })
        .collect();
    Ok(Image::new(image.width(), image.height(), PixelFormat::Rgb, samples)?)
}

/// 3x3 mean filter without border handling; output is `(w-2) x (h-2)`.
///
/// # Errors
///
/// Returns `ConfigError::FormatMismatch` for RGB input and
/// `ConfigError::WindowTooSmall` for frames under 3x3.
pub fn lowpass_3x3(image: &Image) -> Result<Image> {
    let (width, height) = window_output_size(image.width(), image.height())?;
    let samples = windows_3x3(image)?
        .into_iter()
        .map(|(window, _, _)| window.mean())
        .collect();
    Ok(Image::new(width, height, PixelFormat::Gray, samples)?)
}

/// Grayscale transform of one RGB24 word (`B` at `[7:0]`, `R` at `[23:16]`).
pub fn gray_word_from_rgb24(word: u128) -> u128 {
    let b = word as u8;
    let g = (word >> 8) as u8;
    let r = (word >> 16) as u8;
    let y = u128::from(luma(r, g, b));
    y | (y << 8) | (y << 16)
}

/// Lowpass transform of one packed window word, as an 8-bit pixel word.
pub fn mean_word_from_window(word: u128) -> u128 {
    u128::from(Window::unpack(word).mean())
}
