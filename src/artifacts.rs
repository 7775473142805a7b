//! Run artifacts: frame dumps and JSON reports
//!
//! Everything a run leaves behind goes into one directory:
//! - `{name}_expected.png` / `{name}_received.png`: lossless 8-bit frames
//! - `{name}_report.json`: pretty-printed run report
//!
//! # Usage
//!
//! ```rust,ignore
//! let writer = ArtifactWriter::new("target/axis-artifacts")?;
//! let pngs = writer.write_frames("passthrough", &expected, &received)?;
//! let report_path = writer.write_report("passthrough", &report)?;
//! ```

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::image_model::{Image, ValidationError};

/// Errors that can occur while writing or reading artifacts.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// PNG encoding failed.
    #[error("frame dump failed: {0}")]
    Frame(#[from] ValidationError),

    /// Artifact name would escape the directory.
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),
}

/// Result type alias for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Writes artifacts into a single directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Use `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Io` if the directory cannot be created.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str, suffix: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}_{}", name, suffix)))
    }

    /// Save one frame as `{name}_{label}.png`.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Frame` if encoding fails.
    pub fn write_frame(&self, name: &str, label: &str, frame: &Image) -> Result<PathBuf> {
        let path = self.path_for(name, &format!("{}.png", label))?;
        frame.save_png(&path)?;
        log::debug!("Saved {} frame to {}", label, path.display());
        Ok(path)
    }

    /// Save the expected and received frames of a run.
    ///
    /// # Errors
    ///
    /// Returns the first failed write.
    pub fn write_frames(
        &self,
        name: &str,
        expected: &Image,
        received: &Image,
    ) -> Result<Vec<PathBuf>> {
        let paths = vec![
            self.write_frame(name, "expected", expected)?,
            self.write_frame(name, "received", received)?,
        ];
        log::info!("Wrote frame artifacts to {}", self.dir.display());
        Ok(paths)
    }

    /// Save a report as pretty JSON in `{name}_report.json`.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Json` or `ArtifactError::Io`.
    pub fn write_report<T: Serialize>(&self, name: &str, report: &T) -> Result<PathBuf> {
        let path = self.path_for(name, "report.json")?;
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;
        log::debug!("Saved report to {}", path.display());
        Ok(path)
    }
}

/// Read back a JSON report.
///
/// # Errors
///
/// Returns `ArtifactError::Io` if the file cannot be read.
/// Returns `ArtifactError::Json` if the JSON is invalid.
pub fn read_report<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Summary {
        frames: u64,
        label: String,
    }

    #[test]
    fn test_creates_nested_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("a").join("b");
        let writer = ArtifactWriter::new(&dir).unwrap();
        assert!(writer.dir().is_dir());
    }

    #[test]
    fn test_write_frames_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(temp.path()).unwrap();
        let expected = Image::gradient(8, 6).unwrap();
        let received = Image::gradient_rgb(4, 2).unwrap();

        let paths = writer.write_frames("run1", &expected, &received).unwrap();
        assert_eq!(paths[0], temp.path().join("run1_expected.png"));
        assert_eq!(paths[1], temp.path().join("run1_received.png"));
        assert_eq!(Image::load(&paths[0]).unwrap(), expected);
        assert_eq!(Image::load(&paths[1]).unwrap(), received);
    }

    #[test]
    fn test_report_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(temp.path()).unwrap();
        let summary = Summary {
            frames: 3,
            label: "gray".to_string(),
        };
        let path = writer.write_report("run2", &summary).unwrap();
        assert!(path.ends_with("run2_report.json"));
        let back: Summary = read_report(&path).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_rejects_path_names() {
        let temp = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(temp.path()).unwrap();
        let img = Image::gradient(2, 2).unwrap();
        assert!(matches!(
            writer.write_frame("../escape", "expected", &img),
            Err(ArtifactError::InvalidName(_))
        ));
        assert!(matches!(
            writer.write_report("", &1u8),
            Err(ArtifactError::InvalidName(_))
        ));
    }

    #[test]
    fn test_read_missing_report() {
        let temp = tempfile::tempdir().unwrap();
        let result: Result<Summary> = read_report(&temp.path().join("missing.json"));
        assert!(matches!(result, Err(ArtifactError::Io(_))));
    }
}
