//! Synthetic frames with known content
//!
//! Patterns chosen to make typical stream bugs visible in a scoreboard
//! report: swapped channels (colour bars), row/stride errors (vertical
//! gradient, crosshatch) and off-by-one windows (checkerboard).
//!
//! # Example
//!
//! ```rust,ignore
//! use axis_video_tb::test_utils::{color_bars_frame, solid_frame, Rgb};
//!
//! let red = solid_frame(16, 4, Rgb::RED)?;
//! let bars = color_bars_frame(64, 8)?;
//! ```

use crate::image_model::{Image, PixelFormat, Result};
use crate::reference::luma;

/// RGB color for test patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    /// Red component (0-255)
    pub r: u8,
    /// Green component (0-255)
    pub g: u8,
    /// Blue component (0-255)
    pub b: u8,
}

impl Rgb {
    /// Pure red color
    pub const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };
    /// Pure green color
    pub const GREEN: Rgb = Rgb { r: 0, g: 255, b: 0 };
    /// Pure blue color
    pub const BLUE: Rgb = Rgb { r: 0, g: 0, b: 255 };
    /// Pure white color
    pub const WHITE: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
    /// Pure black color
    pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };
    /// Yellow color
    pub const YELLOW: Rgb = Rgb {
        r: 255,
        g: 255,
        b: 0,
    };
    /// Cyan color
    pub const CYAN: Rgb = Rgb {
        r: 0,
        g: 255,
        b: 255,
    };
    /// Magenta color
    pub const MAGENTA: Rgb = Rgb {
        r: 255,
        g: 0,
        b: 255,
    };

    /// Luma as produced by the grayscale core
    pub fn luma(&self) -> u8 {
        luma(self.r, self.g, self.b)
    }

    fn channel(&self, c: usize) -> u8 {
        match c {
            0 => self.r,
            1 => self.g,
            _ => self.b,
        }
    }
}

/// SMPTE bar order, left to right
pub const COLOR_BARS: [Rgb; 8] = [
    Rgb::WHITE,
    Rgb::YELLOW,
    Rgb::CYAN,
    Rgb::GREEN,
    Rgb::MAGENTA,
    Rgb::RED,
    Rgb::BLUE,
    Rgb::BLACK,
];

/// Single-colour RGB frame.
///
/// # Errors
///
/// Returns `ValidationError::EmptyFrame` for a zero width or height.
pub fn solid_frame(width: usize, height: usize, color: Rgb) -> Result<Image> {
    Image::from_fn(width, height, PixelFormat::Rgb, |_, _, c| color.channel(c))
}

/// Grayscale checkerboard of `block x block` squares, top-left white.
///
/// # Errors
///
/// Returns `ValidationError::EmptyFrame` for a zero width or height.
pub fn checkerboard_frame(width: usize, height: usize, block: usize) -> Result<Image> {
    let block = block.max(1);
    Image::from_fn(width, height, PixelFormat::Gray, |x, y, _| {
        if (x / block + y / block) % 2 == 0 {
            255
        } else {
            0
        }
    })
}

/// Eight vertical colour bars; the last bar absorbs any remainder.
///
/// # Errors
///
/// Returns `ValidationError::EmptyFrame` for a zero width or height.
pub fn color_bars_frame(width: usize, height: usize) -> Result<Image> {
    let bar_width = (width / COLOR_BARS.len()).max(1);
    Image::from_fn(width, height, PixelFormat::Rgb, |x, _, c| {
        let bar = (x / bar_width).min(COLOR_BARS.len() - 1);
        COLOR_BARS[bar].channel(c)
    })
}

/// Grayscale gradient from black at the top to white at the bottom.
///
/// # Errors
///
/// Returns `ValidationError::EmptyFrame` for a zero width or height.
pub fn vertical_gradient_frame(width: usize, height: usize) -> Result<Image> {
    let span = height.saturating_sub(1).max(1);
    Image::from_fn(width, height, PixelFormat::Gray, |_, y, _| (y * 255 / span) as u8)
}

/// White grid lines every `spacing` pixels on black.
///
/// # Errors
///
/// Returns `ValidationError::EmptyFrame` for a zero width or height.
pub fn crosshatch_frame(width: usize, height: usize, spacing: usize) -> Result<Image> {
    let spacing = spacing.max(1);
    Image::from_fn(width, height, PixelFormat::Gray, |x, y, _| {
        if x % spacing == 0 || y % spacing == 0 {
            255
        } else {
            0
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame() {
        let img = solid_frame(4, 2, Rgb::MAGENTA).unwrap();
        assert_eq!(img.pixel(3, 1).unwrap(), &[255, 0, 255]);
        assert!(img.samples().chunks(3).all(|px| px == [255, 0, 255]));
    }

    #[test]
    fn test_checkerboard_blocks() {
        let img = checkerboard_frame(8, 8, 2).unwrap();
        assert_eq!(img.pixel_at(0, 0).unwrap(), 255);
        assert_eq!(img.pixel_at(1, 1).unwrap(), 255);
        assert_eq!(img.pixel_at(2, 0).unwrap(), 0);
        assert_eq!(img.pixel_at(2, 2).unwrap(), 255);
    }

    #[test]
    fn test_color_bars_order() {
        let img = color_bars_frame(16, 2).unwrap();
        assert_eq!(img.pixel(0, 0).unwrap(), &[255, 255, 255]);
        assert_eq!(img.pixel(2, 0).unwrap(), &[255, 255, 0]);
        assert_eq!(img.pixel(15, 1).unwrap(), &[0, 0, 0]);
    }

    #[test]
    fn test_color_bars_narrow_frame() {
        // Fewer columns than bars: one column per bar, last bar clamps.
        let img = color_bars_frame(3, 1).unwrap();
        assert_eq!(img.pixel(2, 0).unwrap(), &[0, 255, 255]);
    }

    #[test]
    fn test_vertical_gradient_ends() {
        let img = vertical_gradient_frame(3, 6).unwrap();
        assert_eq!(img.row(0), &[0, 0, 0]);
        assert_eq!(img.row(5), &[255, 255, 255]);
        assert!(img.pixel_at(0, 2).unwrap() < img.pixel_at(0, 3).unwrap());
    }

    #[test]
    fn test_crosshatch_lines() {
        let img = crosshatch_frame(9, 9, 4).unwrap();
        assert_eq!(img.pixel_at(4, 1).unwrap(), 255);
        assert_eq!(img.pixel_at(1, 8).unwrap(), 255);
        assert_eq!(img.pixel_at(1, 1).unwrap(), 0);
    }

    #[test]
    fn test_luma_of_white() {
        assert_eq!(Rgb::WHITE.luma(), 253);
        assert_eq!(Rgb::BLACK.luma(), 0);
    }
}
