//! Scenario configuration and validation
//!
//! Every tunable of a frame scenario lives in [`ScenarioConfig`], which is
//! validated before any simulator or clock is built. Configuration can come
//! from code, a JSON file, or environment overrides:
//!
//! - `AXIS_TB_ARTIFACT_DIR` - directory for PNG dumps and run reports
//! - `AXIS_TB_SIDEBAND_CHECK` - decoder sideband policy (`strict`, `warn`, `off`)
//! - `AXIS_TB_PAUSE_PATTERN` - comma separated pause pattern, e.g. `1,1,0`
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::config::ScenarioConfig;
//!
//! let cfg = ScenarioConfig {
//!     with_backpressure: true,
//!     pause_pattern: vec![1, 1, 1, 0, 0, 0],
//!     check_handshake: true,
//!     min_ready_low_run: 3,
//!     ..ScenarioConfig::default()
//! }
//! .with_env_overrides()?;
//! cfg.validate()?;
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backpressure::PausePattern;
use crate::image_model::PixelFormat;
use crate::reset::ResetPolarity;

/// Environment variable overriding [`ScenarioConfig::artifact_dir`]
pub const ENV_ARTIFACT_DIR: &str = "AXIS_TB_ARTIFACT_DIR";
/// Environment variable overriding [`ScenarioConfig::sideband_check`]
pub const ENV_SIDEBAND_CHECK: &str = "AXIS_TB_SIDEBAND_CHECK";
/// Environment variable overriding [`ScenarioConfig::pause_pattern`]
pub const ENV_PAUSE_PATTERN: &str = "AXIS_TB_PAUSE_PATTERN";

/// Errors detected before any clock activity.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Pause pattern has no entries.
    #[error("pause pattern must contain at least one element")]
    EmptyPausePattern,

    /// Pause pattern entry other than 0 or 1.
    #[error("pause pattern entry {index} must be 0 or 1, got {value}")]
    InvalidPauseValue {
        /// Position in the pattern
        index: usize,
        /// Offending entry
        value: u8,
    },

    /// Window has the wrong number of rows or columns.
    #[error("window must have {expected} {what}, got {actual}")]
    WindowShape {
        /// `"rows"` or `"columns"`
        what: &'static str,
        /// Required count
        expected: usize,
        /// Count supplied
        actual: usize,
    },

    /// Window sample outside `0..=255`.
    #[error("window pixel at ({row}, {col}) must be 8-bit unsigned (0..255), got {value}")]
    WindowValue {
        /// Row in the window
        row: usize,
        /// Column in the window
        col: usize,
        /// Offending value
        value: i64,
    },

    /// Frame too small to yield any 3x3 window.
    #[error("input image is too small for 3x3 windows: got {width}x{height}, need at least 3x3")]
    WindowTooSmall {
        /// Frame width
        width: usize,
        /// Frame height
        height: usize,
    },

    /// Row byte count does not divide into whole beats.
    #[error(
        "line byte count must align to beat size: width={width}, line_bytes={line_bytes}, byte_lanes={lanes}"
    )]
    LineAlignment {
        /// Frame width in pixels
        width: usize,
        /// Bytes per row
        line_bytes: usize,
        /// Bytes per beat
        lanes: usize,
    },

    /// Lane count out of range.
    #[error("byte lane count must be in 1..={max}, got {lanes}")]
    InvalidLanes {
        /// Requested lanes
        lanes: usize,
        /// Upper bound
        max: usize,
    },

    /// Frame pixel layout differs from the stream format.
    #[error("frame is {image:?} but stream carries {stream:?}")]
    FormatMismatch {
        /// Layout of the frame
        image: PixelFormat,
        /// Layout of the stream
        stream: PixelFormat,
    },

    /// Named image or folder does not exist.
    #[error("image file or folder not found: {}", path.display())]
    ImageNotFound {
        /// Missing path
        path: PathBuf,
    },

    /// Folder holds no file with a supported extension.
    #[error("no supported image files in {}", folder.display())]
    NoSupportedImage {
        /// Folder searched
        folder: PathBuf,
    },

    /// A scenario knob has an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Reading a config file or folder failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`ScenarioConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// How the stream decoder treats SOF/EOL sideband mismatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SidebandCheck {
    /// Fail the capture on the first mismatch
    Strict,
    /// Log a warning and keep going
    #[default]
    Warn,
    /// Ignore sideband values beyond SOF resynchronisation
    Off,
}

impl SidebandCheck {
    /// Parse from environment variable string
    pub fn from_env_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "strict" | "error" => Self::Strict,
            "warn" | "warning" => Self::Warn,
            "off" | "none" | "disabled" => Self::Off,
            _ => {
                log::warn!("Unknown sideband check '{}', defaulting to 'warn'", s);
                Self::Warn
            }
        }
    }
}

/// All knobs for one frame scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Clock period in nanoseconds
    pub clock_period_ns: u64,
    /// Rising edges spent in reset before release
    pub reset_cycles: u64,
    /// Reset polarity shared by both stream interfaces
    pub reset_polarity: ResetPolarity,
    /// Throttle the sink `tready` with `pause_pattern`
    pub with_backpressure: bool,
    /// Per-cycle pause pattern for sink backpressure (`1` pauses, `0` accepts)
    pub pause_pattern: Vec<u8>,
    /// Run the output protocol checker
    pub check_handshake: bool,
    /// Minimum longest ready-low run required when backpressure is enabled
    pub min_ready_low_run: u64,
    /// Warm-up cycles before the frame to settle pause/ready phasing
    pub handshake_settle_cycles: u64,
    /// Absolute minimum receive timeout
    pub recv_timeout_floor_ns: u64,
    /// Extra receive budget per pixel
    pub recv_timeout_per_pixel_ns: u64,
    /// Budget for the protocol checker to finish after the frame
    pub handshake_timeout_ns: u64,
    /// Cycles the driver waits for `tready` on one beat (None = unbounded)
    pub ready_timeout_cycles: Option<u64>,
    /// Decoder sideband policy
    pub sideband_check: SidebandCheck,
    /// Where to write PNG dumps and the run report (None = no artifacts)
    pub artifact_dir: Option<PathBuf>,
    /// Simulated time limit in nanoseconds for the whole run
    pub time_limit_ns: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            clock_period_ns: 10,
            reset_cycles: 3,
            reset_polarity: ResetPolarity::ActiveHigh,
            with_backpressure: false,
            pause_pattern: vec![0, 1, 0, 0, 1],
            check_handshake: false,
            min_ready_low_run: 0,
            handshake_settle_cycles: 6,
            recv_timeout_floor_ns: 200_000,
            recv_timeout_per_pixel_ns: 40,
            handshake_timeout_ns: 20_000,
            ready_timeout_cycles: Some(10_000),
            sideband_check: SidebandCheck::Warn,
            artifact_dir: None,
            time_limit_ns: 100_000_000,
        }
    }
}

impl ScenarioConfig {
    /// Check every knob. Called before the simulator is built.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, e.g. `ConfigError::EmptyPausePattern`.
    pub fn validate(&self) -> Result<()> {
        PausePattern::new(self.pause_pattern.clone())?;

        if self.clock_period_ns < 2 {
            return Err(ConfigError::InvalidValue {
                field: "clock_period_ns",
                reason: format!("must be at least 2, got {}", self.clock_period_ns),
            });
        }
        if self.reset_cycles == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reset_cycles",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ready_timeout_cycles == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "ready_timeout_cycles",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        if self.handshake_timeout_ns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "handshake_timeout_ns",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.min_ready_low_run > 0 && !self.with_backpressure {
            return Err(ConfigError::InvalidValue {
                field: "min_ready_low_run",
                reason: "requires with_backpressure".to_string(),
            });
        }
        if self.min_ready_low_run > 0 && !self.check_handshake {
            return Err(ConfigError::InvalidValue {
                field: "min_ready_low_run",
                reason: "requires check_handshake".to_string(),
            });
        }
        Ok(())
    }

    /// Validated pause pattern.
    ///
    /// # Errors
    ///
    /// Same as [`PausePattern::new`].
    pub fn pause(&self) -> Result<PausePattern> {
        PausePattern::new(self.pause_pattern.clone())
    }

    /// Clock period
    pub fn clock_period(&self) -> Duration {
        Duration::from_nanos(self.clock_period_ns)
    }

    /// Receive timeout for a frame of `pixels` pixels: `max(floor, pixels * per_pixel)`
    pub fn recv_timeout(&self, pixels: usize) -> Duration {
        let scaled = (pixels as u64).saturating_mul(self.recv_timeout_per_pixel_ns);
        Duration::from_nanos(self.recv_timeout_floor_ns.max(scaled))
    }

    /// Protocol checker completion budget
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_nanos(self.handshake_timeout_ns)
    }

    /// Simulated time limit for the run
    pub fn time_limit(&self) -> Duration {
        Duration::from_nanos(self.time_limit_ns)
    }

    /// Load from a JSON file; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` or `ConfigError::Parse`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: Self = serde_json::from_str(&text)?;
        log::info!("Loaded scenario config from {}", path.as_ref().display());
        Ok(cfg)
    }

    /// Apply `AXIS_TB_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `AXIS_TB_PAUSE_PATTERN` is not a
    /// comma separated list of integers.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var(ENV_ARTIFACT_DIR) {
            if !dir.is_empty() {
                log::info!("Artifact directory from {}: {}", ENV_ARTIFACT_DIR, dir);
                self.artifact_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(level) = std::env::var(ENV_SIDEBAND_CHECK) {
            self.sideband_check = SidebandCheck::from_env_str(&level);
            log::info!("Sideband check: {:?}", self.sideband_check);
        }
        if let Ok(pattern) = std::env::var(ENV_PAUSE_PATTERN) {
            self.pause_pattern = parse_pattern(&pattern)?;
            log::info!("Pause pattern from {}: {:?}", ENV_PAUSE_PATTERN, self.pause_pattern);
        }
        Ok(self)
    }
}

/// Parse `"1, 1,0"` into `[1, 1, 0]`. An empty string yields an empty pattern.
pub fn parse_pattern(s: &str) -> Result<Vec<u8>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u8>().map_err(|e| ConfigError::InvalidValue {
                field: "pause_pattern",
                reason: format!("'{}': {}", part, e),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ScenarioConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pause_pattern, vec![0, 1, 0, 0, 1]);
        assert_eq!(cfg.sideband_check, SidebandCheck::Warn);
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let cfg = ScenarioConfig {
            pause_pattern: vec![],
            ..ScenarioConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyPausePattern)));
    }

    #[test]
    fn test_non_binary_pattern_rejected() {
        let cfg = ScenarioConfig {
            pause_pattern: vec![0, 2],
            ..ScenarioConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidPauseValue { index: 1, value: 2 })
        ));
    }

    #[test]
    fn test_min_run_requires_backpressure() {
        let cfg = ScenarioConfig {
            check_handshake: true,
            min_ready_low_run: 2,
            ..ScenarioConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidValue {
                field: "min_ready_low_run",
                ..
            })
        ));
    }

    #[test]
    fn test_recv_timeout_scales_with_size() {
        let cfg = ScenarioConfig::default();
        assert_eq!(cfg.recv_timeout(48), Duration::from_nanos(200_000));
        assert_eq!(cfg.recv_timeout(10_000), Duration::from_nanos(400_000));
    }

    #[test]
    fn test_sideband_check_from_env_str() {
        assert_eq!(SidebandCheck::from_env_str("STRICT"), SidebandCheck::Strict);
        assert_eq!(SidebandCheck::from_env_str("warn"), SidebandCheck::Warn);
        assert_eq!(SidebandCheck::from_env_str("off"), SidebandCheck::Off);
        assert_eq!(SidebandCheck::from_env_str("bogus"), SidebandCheck::Warn);
    }

    #[test]
    fn test_parse_pattern() {
        assert_eq!(parse_pattern("1, 1,0").unwrap(), vec![1, 1, 0]);
        assert!(parse_pattern("").unwrap().is_empty());
        assert!(parse_pattern("1,x").is_err());
    }

    #[test]
    fn test_json_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"{
                "with_backpressure": true,
                "pause_pattern": [1, 1, 1, 0, 0, 0],
                "sideband_check": "strict"
            }"#,
        )
        .unwrap();
        let cfg = ScenarioConfig::from_json_file(&path).unwrap();
        assert!(cfg.with_backpressure);
        assert_eq!(cfg.pause_pattern, vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(cfg.sideband_check, SidebandCheck::Strict);
        assert_eq!(cfg.clock_period_ns, 10);
    }

    #[test]
    fn test_json_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ScenarioConfig::from_json_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
