//! 3x3 pixel windows packed into 72-bit beats
//!
//! Windowed streams carry one neighbourhood per beat instead of one pixel.
//! Packing is row-major with little-endian byte lanes:
//!
//! ```text
//! lane 0 / tdata[7:0]   = window[0][0] (top-left)
//! lane 1 / tdata[15:8]  = window[0][1]
//! ...
//! lane 8 / tdata[71:64] = window[2][2] (bottom-right)
//! ```

use std::path::{Path, PathBuf};

use crate::beat::{Beat, StreamFormat};
use crate::config::ConfigError;
use crate::image_model::{Image, PixelFormat};

/// Window edge length
pub const WINDOW_SIZE: usize = 3;

/// Samples per window (one byte lane each)
pub const PIXELS_PER_WINDOW: usize = WINDOW_SIZE * WINDOW_SIZE;

/// Extensions accepted by [`resolve_image_in_folder`] (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["bmp", "jpeg", "jpg", "png", "tif", "tiff"];

/// Beat layout of a windowed stream: nine grayscale lanes, 72 data bits
pub const WINDOW_STREAM: StreamFormat = StreamFormat {
    pixel: PixelFormat::Gray,
    lanes: PIXELS_PER_WINDOW,
};

/// A 3x3 neighbourhood of 8-bit samples, row-major
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Window {
    cells: [[u8; WINDOW_SIZE]; WINDOW_SIZE],
}

impl Window {
    /// Wrap an already-typed grid
    pub fn new(cells: [[u8; WINDOW_SIZE]; WINDOW_SIZE]) -> Self {
        Self { cells }
    }

    /// Build a window from loosely-typed rows, checking shape and range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::WindowShape` unless there are exactly three rows
    /// of three values, and `ConfigError::WindowValue` for values outside
    /// `0..=255`.
    pub fn try_from_rows<R: AsRef<[i64]>>(rows: &[R]) -> Result<Self, ConfigError> {
        if rows.len() != WINDOW_SIZE {
            return Err(ConfigError::WindowShape {
                what: "rows",
                expected: WINDOW_SIZE,
                actual: rows.len(),
            });
        }
        let mut cells = [[0u8; WINDOW_SIZE]; WINDOW_SIZE];
        for (r, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != WINDOW_SIZE {
                return Err(ConfigError::WindowShape {
                    what: "columns",
                    expected: WINDOW_SIZE,
                    actual: row.len(),
                });
            }
            for (c, &value) in row.iter().enumerate() {
                cells[r][c] = u8::try_from(value).map_err(|_| ConfigError::WindowValue {
                    row: r,
                    col: c,
                    value,
                })?;
            }
        }
        Ok(Self { cells })
    }

    /// Sample at `(row, col)`
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[row][col]
    }

    /// Row-major view of the grid
    pub fn cells(&self) -> &[[u8; WINDOW_SIZE]; WINDOW_SIZE] {
        &self.cells
    }

    /// Pack into a 72-bit word, lane `i` (row-major) at bits `[8i+7:8i]`.
    pub fn pack(&self) -> u128 {
        self.cells
            .iter()
            .flatten()
            .enumerate()
            .fold(0u128, |word, (lane, &px)| word | (u128::from(px) << (lane * 8)))
    }

    /// Inverse of [`Window::pack`]; bits above 72 are ignored.
    pub fn unpack(word: u128) -> Self {
        let mut cells = [[0u8; WINDOW_SIZE]; WINDOW_SIZE];
        for (lane, cell) in cells.iter_mut().flatten().enumerate() {
            *cell = (word >> (lane * 8)) as u8;
        }
        Self { cells }
    }

    /// Integer mean of the nine samples (floor of `sum / 9`)
    pub fn mean(&self) -> u8 {
        let sum: u32 = self.cells.iter().flatten().map(|&px| u32::from(px)).sum();
        (sum / PIXELS_PER_WINDOW as u32) as u8
    }
}

/// Drop-border output geometry of a windowed pass over a `width x height` frame.
///
/// # Errors
///
/// Returns `ConfigError::WindowTooSmall` when either side is under 3 pixels.
pub fn window_output_size(width: usize, height: usize) -> Result<(usize, usize), ConfigError> {
    if width < WINDOW_SIZE || height < WINDOW_SIZE {
        return Err(ConfigError::WindowTooSmall { width, height });
    }
    Ok((width - (WINDOW_SIZE - 1), height - (WINDOW_SIZE - 1)))
}

/// Every fully-inside 3x3 window of a grayscale frame, in row-major order.
///
/// Each entry is `(window, sof, eol)`: SOF on the first window, EOL on the
/// last window of every output row.
///
/// # Errors
///
/// Returns `ConfigError::FormatMismatch` for non-grayscale frames and
/// `ConfigError::WindowTooSmall` for frames under 3x3.
pub fn windows_3x3(image: &Image) -> Result<Vec<(Window, bool, bool)>, ConfigError> {
    if image.format() != PixelFormat::Gray {
        return Err(ConfigError::FormatMismatch {
            image: image.format(),
            stream: PixelFormat::Gray,
        });
    }
    let (out_width, out_height) = window_output_size(image.width(), image.height())?;
    let mut windows = Vec::with_capacity(out_width * out_height);

    for y in 0..out_height {
        for x in 0..out_width {
            let mut cells = [[0u8; WINDOW_SIZE]; WINDOW_SIZE];
            for (r, row) in cells.iter_mut().enumerate() {
                row.copy_from_slice(&image.row(y + r)[x..x + WINDOW_SIZE]);
            }
            let sof = y == 0 && x == 0;
            let eol = x + 1 == out_width;
            windows.push((Window::new(cells), sof, eol));
        }
    }
    Ok(windows)
}

/// [`windows_3x3`] as ready-to-drive beats.
///
/// # Errors
///
/// Same as [`windows_3x3`].
pub fn window_beats(image: &Image) -> Result<Vec<Beat>, ConfigError> {
    Ok(windows_3x3(image)?
        .into_iter()
        .map(|(window, sof, eol)| Beat {
            data: window.pack(),
            sof,
            eol,
        })
        .collect())
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pick an input image from a folder.
///
/// With `file_name`, that file must exist in `folder`. Without it, the
/// lexicographically first file with a supported extension is used.
///
/// # Errors
///
/// Returns `ConfigError::ImageNotFound` for a missing folder or named file,
/// `ConfigError::NoSupportedImage` when nothing matches, and
/// `ConfigError::Io` if the folder cannot be listed.
pub fn resolve_image_in_folder(
    folder: impl AsRef<Path>,
    file_name: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let folder = folder.as_ref();
    if !folder.is_dir() {
        return Err(ConfigError::ImageNotFound {
            path: folder.to_path_buf(),
        });
    }

    if let Some(name) = file_name {
        let candidate = folder.join(name);
        if !candidate.is_file() {
            return Err(ConfigError::ImageNotFound { path: candidate });
        }
        return Ok(candidate);
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image(&path) {
            candidates.push(path);
        }
    }
    candidates.sort();

    match candidates.into_iter().next() {
        Some(path) => {
            log::info!("Using {} from {}", path.display(), folder.display());
            Ok(path)
        }
        None => Err(ConfigError::NoSupportedImage {
            folder: folder.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_lane_order() {
        let rows: [[i64; 3]; 3] = [[10, 20, 30], [40, 50, 60], [70, 80, 90]];
        let window = Window::try_from_rows(&rows).unwrap();
        let word = window.pack();
        assert_eq!(word & 0xFF, 10);
        assert_eq!((word >> 8) & 0xFF, 20);
        assert_eq!((word >> 64) & 0xFF, 90);
        assert!(word < (1u128 << 72));
        assert_eq!(Window::unpack(word), window);
    }

    #[test]
    fn test_shape_validation() {
        let two_rows: &[&[i64]] = &[&[1, 2, 3], &[4, 5, 6]];
        assert!(matches!(
            Window::try_from_rows(two_rows),
            Err(ConfigError::WindowShape { what: "rows", actual: 2, .. })
        ));
        let short_row: &[&[i64]] = &[&[1, 2, 3], &[4, 5], &[7, 8, 9]];
        assert!(matches!(
            Window::try_from_rows(short_row),
            Err(ConfigError::WindowShape { what: "columns", actual: 2, .. })
        ));
    }

    #[test]
    fn test_value_validation() {
        let rows: [[i64; 3]; 3] = [[0, 0, 0], [0, 300, 0], [0, 0, 0]];
        assert!(matches!(
            Window::try_from_rows(&rows),
            Err(ConfigError::WindowValue { row: 1, col: 1, value: 300 })
        ));
    }

    #[test]
    fn test_mean_floors() {
        let window = Window::new([[1, 1, 1], [1, 1, 1], [1, 1, 2]]);
        assert_eq!(window.mean(), 1);
        let window = Window::new([[255; 3]; 3]);
        assert_eq!(window.mean(), 255);
    }

    #[test]
    fn test_windows_drop_border_and_markers() {
        let img = Image::gradient(5, 4).unwrap();
        let windows = windows_3x3(&img).unwrap();
        // 3 x 2 output windows
        assert_eq!(windows.len(), 6);
        assert_eq!(windows[0].0.get(0, 0), 0);
        assert_eq!(windows[0].0.get(2, 2), 12);
        assert_eq!(windows[4].0.get(0, 0), 6);
        let markers: Vec<(bool, bool)> = windows.iter().map(|(_, s, e)| (*s, *e)).collect();
        assert_eq!(
            markers,
            vec![
                (true, false),
                (false, false),
                (false, true),
                (false, false),
                (false, false),
                (false, true)
            ]
        );
    }

    #[test]
    fn test_too_small_for_windows() {
        let img = Image::gradient(2, 5).unwrap();
        assert!(matches!(
            windows_3x3(&img),
            Err(ConfigError::WindowTooSmall { width: 2, height: 5 })
        ));
    }

    #[test]
    fn test_window_stream_width() {
        assert_eq!(WINDOW_STREAM.data_width(), 72);
    }

    #[test]
    fn test_resolve_image_in_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();

        let picked = resolve_image_in_folder(dir.path(), None).unwrap();
        assert_eq!(picked.file_name().unwrap(), "a.jpg");

        let named = resolve_image_in_folder(dir.path(), Some("b.PNG")).unwrap();
        assert_eq!(named.file_name().unwrap(), "b.PNG");

        assert!(matches!(
            resolve_image_in_folder(dir.path(), Some("missing.png")),
            Err(ConfigError::ImageNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_empty_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_image_in_folder(dir.path(), None),
            Err(ConfigError::NoSupportedImage { .. })
        ));
    }
}
