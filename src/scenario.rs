//! One-frame verification scenario
//!
//! [`StreamTestbench`] owns the clock, reset and both stream interfaces of a
//! design under test and runs the full flow for a frame:
//!
//! 1. start the clock, hold reset with the input idle (once)
//! 2. start the decoder, plus the protocol checker and backpressure if enabled
//! 3. settle a few cycles when checking the handshake
//! 4. drive the stimulus, receive one frame within `max(floor, pixels * per_pixel)`
//! 5. dump PNGs when an artifact directory is set, then compare on the scoreboard
//! 6. wait for the checker and assert the handshake statistics
//!
//! Background tasks are owned handles, so every exit path (including an
//! early `?`) cancels them and leaves the sink ready.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::scenario::{run_frame_test, InputPacking};
//! use axis_video_tb::test_utils::Passthrough;
//!
//! let frame = Image::gradient(8, 6)?;
//! let report = run_frame_test(
//!     "identity",
//!     ScenarioConfig::default(),
//!     InputPacking::Pixels(StreamFormat::GRAY8),
//!     StreamFormat::GRAY8,
//!     |h, ports| Passthrough::new().start(h, ports),
//!     frame.clone(),
//!     frame,
//! )?;
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifacts::{ArtifactError, ArtifactWriter};
use crate::backpressure::{BackpressureController, ReadySink};
use crate::beat::StreamFormat;
use crate::bus::AxisPorts;
use crate::config::{ConfigError, ScenarioConfig};
use crate::driver::{AxisDriver, DriverError};
use crate::image_model::{Image, ValidationError};
use crate::monitor::{AxisMonitor, FrameDecoder, MonitorError};
use crate::protocol_checker::{
    HandshakeChecker, HandshakeExpectations, HandshakeStats, ProtocolChecker, ProtocolError,
    ProtocolViolation,
};
use crate::reference::ReferenceError;
use crate::reset::{apply_reset, ResetPort};
use crate::scoreboard::{Scoreboard, ScoreboardError};
use crate::sim::{Clock, SimConfig, SimError, SimHandle, Signal, Simulator, TaskHandle};
use crate::window::WINDOW_STREAM;

/// Prefix of the stream the testbench drives into the design
pub const INPUT_PREFIX: &str = "s_axis_video";

/// Prefix of the stream the design drives back
pub const OUTPUT_PREFIX: &str = "m_axis_video";

/// Any failure of a scenario run.
#[derive(Error, Debug)]
pub enum TestbenchError {
    /// Kernel failure (time limit, deadlock, timeout, cancelled task).
    #[error(transparent)]
    Sim(#[from] SimError),

    /// Rejected configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stimulus could not be delivered.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// No valid output frame.
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Protocol checker failed or timed out.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Handshake statistics missed their expectations.
    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    /// Output differs from the expected frame.
    #[error(transparent)]
    Scoreboard(#[from] ScoreboardError),

    /// Artifacts could not be written.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Expected frame could not be computed.
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Invalid frame.
    #[error(transparent)]
    Image(#[from] ValidationError),
}

/// Result type alias for scenario operations.
pub type Result<T> = std::result::Result<T, TestbenchError>;

/// How the stimulus frame is put on the input stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPacking {
    /// Line packing of the frame's own pixels
    Pixels(StreamFormat),
    /// One drop-border 3x3 window per beat (grayscale frames)
    Windows,
}

impl InputPacking {
    /// Input `tdata` width in bits
    pub fn data_width(&self) -> u32 {
        match self {
            InputPacking::Pixels(format) => format.data_width(),
            InputPacking::Windows => WINDOW_STREAM.data_width(),
        }
    }
}

/// Signals a design under test is wired to
#[derive(Debug, Clone)]
pub struct DutPorts {
    /// Shared clock
    pub clk: Signal,
    /// Shared reset
    pub reset: ResetPort,
    /// Stream into the design (testbench drives valid/data/markers)
    pub input: AxisPorts,
    /// Stream out of the design (testbench drives ready)
    pub output: AxisPorts,
}

/// Summary of one frame run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Run name
    pub name: String,
    /// Input packing
    pub input: InputPacking,
    /// Output stream format
    pub output: StreamFormat,
    /// Output frame width
    pub width: usize,
    /// Output frame height
    pub height: usize,
    /// Beats the driver delivered
    pub beats_sent: usize,
    /// Beats the output frame occupies
    pub beats_expected: u64,
    /// Pause pattern applied to the sink, if any
    pub pause_pattern: Option<Vec<u8>>,
    /// Protocol checker statistics, if checking was enabled
    pub handshake: Option<HandshakeStats>,
    /// Simulated time the frame started
    pub started_ns: u64,
    /// Simulated time the checks finished
    pub finished_ns: u64,
    /// Files written for this run
    pub artifacts: Vec<PathBuf>,
}

/// Clock, reset and stream interfaces around one design.
pub struct StreamTestbench {
    handle: SimHandle,
    config: ScenarioConfig,
    input: InputPacking,
    output: StreamFormat,
    ports: DutPorts,
    clock: Option<TaskHandle<()>>,
}

impl StreamTestbench {
    /// Create the testbench signals.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found in `config`.
    pub fn new(
        handle: &SimHandle,
        config: ScenarioConfig,
        input: InputPacking,
        output: StreamFormat,
    ) -> Result<Self> {
        config.validate()?;
        let ports = DutPorts {
            clk: handle.signal("clk", 1),
            reset: ResetPort::new(handle.signal("rst", 1), config.reset_polarity),
            input: AxisPorts::new(handle, INPUT_PREFIX, input.data_width()),
            output: AxisPorts::new(handle, OUTPUT_PREFIX, output.data_width()),
        };
        Ok(Self {
            handle: handle.clone(),
            config,
            input,
            output,
            ports,
            clock: None,
        })
    }

    /// Ports to wire the design to
    pub fn dut_ports(&self) -> &DutPorts {
        &self.ports
    }

    /// Active configuration
    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Start the clock and reset the design with the input idle and the sink
    /// ready. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns `SimError` if the clock cannot be started.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.clock.is_some() {
            return Ok(());
        }
        let DutPorts {
            clk,
            reset,
            input,
            output,
        } = &self.ports;
        self.clock = Some(Clock::start(&self.handle, clk, self.config.clock_period())?);
        output.ready.set_bool(true);
        apply_reset(clk, reset, input, self.config.reset_cycles).await;
        log::info!(
            "Testbench initialised at {} ns ({} ns clock)",
            self.handle.now_ps() / 1000,
            self.config.clock_period_ns
        );
        Ok(())
    }

    /// Drive `stimulus`, receive one frame and check it against `expected`.
    ///
    /// # Errors
    ///
    /// Returns the first failure: driver handshake timeout, receive timeout,
    /// decoder sideband error (strict policy), scoreboard mismatch, protocol
    /// violation or unmet handshake expectation.
    pub async fn run_frame(
        &mut self,
        name: &str,
        stimulus: &Image,
        expected: &Image,
    ) -> Result<FrameReport> {
        self.initialize().await?;
        let cfg = self.config.clone();
        let DutPorts {
            clk,
            reset,
            input,
            output,
        } = self.ports.clone();
        let started_ns = self.handle.now_ps() / 1000;
        log::info!(
            "[{}] {}x{} -> {}x{} (backpressure={}, check_handshake={})",
            name,
            stimulus.width(),
            stimulus.height(),
            expected.width(),
            expected.height(),
            cfg.with_backpressure,
            cfg.check_handshake
        );

        let decoder = FrameDecoder::new(
            expected.width(),
            expected.height(),
            self.output,
            cfg.sideband_check,
        )?;
        let beats_expected = decoder.beats_per_frame() as u64;
        let mut monitor =
            AxisMonitor::start(&self.handle, &output, &clk, Some(reset.clone()), decoder)?;

        let checker = if cfg.check_handshake {
            let rules = HandshakeChecker::new(
                &output.prefix,
                self.output,
                expected.width(),
                expected.height(),
            )?;
            Some(ProtocolChecker::start(
                &self.handle,
                &output,
                &clk,
                Some(reset.clone()),
                rules,
            )?)
        } else {
            None
        };

        let pattern = cfg.pause()?;
        let backpressure = if cfg.with_backpressure {
            Some(BackpressureController::start(
                &self.handle,
                &clk,
                ReadySink::new(&output),
                pattern.clone(),
            )?)
        } else {
            output.ready.set_bool(true);
            None
        };

        if cfg.check_handshake {
            self.handle.clock_cycles(&clk, cfg.handshake_settle_cycles).await;
        }

        let driver = AxisDriver::new(input, clk, Some(reset))
            .with_ready_timeout(cfg.ready_timeout_cycles);
        let beats_sent = match self.input {
            InputPacking::Pixels(format) => driver.send_frame(stimulus, format).await?,
            InputPacking::Windows => driver.send_grayscale_image(stimulus).await?,
        };

        let received = monitor
            .get_frame(cfg.recv_timeout(expected.pixel_count()))
            .await?;

        let writer = cfg.artifact_dir.as_ref().map(ArtifactWriter::new).transpose()?;
        let mut artifacts = match &writer {
            Some(w) => w.write_frames(name, expected, &received)?,
            None => Vec::new(),
        };

        let label = match self.input {
            InputPacking::Pixels(_) => "pixel",
            InputPacking::Windows => "lowpass",
        };
        Scoreboard::new(label).compare(expected, &received)?;

        let handshake = match checker {
            Some(checker) => {
                let stats = checker.finish(cfg.handshake_timeout()).await?;
                stats.check(&HandshakeExpectations {
                    min_ready_low_run: cfg.min_ready_low_run,
                    require_stall: cfg.with_backpressure,
                    expected_beats: beats_expected,
                })?;
                log::info!("[{}] handshake: {:?}", name, stats);
                Some(stats)
            }
            None => None,
        };

        monitor.stop();
        if let Some(bp) = backpressure {
            bp.stop();
        }

        let mut report = FrameReport {
            name: name.to_string(),
            input: self.input,
            output: self.output,
            width: expected.width(),
            height: expected.height(),
            beats_sent,
            beats_expected,
            pause_pattern: cfg.with_backpressure.then(|| pattern.steps().to_vec()),
            handshake,
            started_ns,
            finished_ns: self.handle.now_ps() / 1000,
            artifacts: Vec::new(),
        };
        if let Some(w) = &writer {
            artifacts.push(w.dir().join(format!("{}_report.json", name)));
            report.artifacts = artifacts;
            w.write_report(name, &report)?;
        }

        log::info!("[{}] passed at {} ns", name, report.finished_ns);
        Ok(report)
    }
}

/// Validate `config`, build a simulator, start a design with `start_dut` and
/// run one frame through it.
///
/// Configuration errors are returned before any clock activity.
///
/// # Errors
///
/// Any [`TestbenchError`] from the run, or `SimError::TimeLimit` when the
/// configured simulated time limit is exceeded.
pub fn run_frame_test<D>(
    name: &str,
    config: ScenarioConfig,
    input: InputPacking,
    output: StreamFormat,
    start_dut: D,
    stimulus: Image,
    expected: Image,
) -> Result<FrameReport>
where
    D: FnOnce(&SimHandle, &DutPorts) -> std::result::Result<TaskHandle<()>, SimError> + 'static,
{
    config.validate()?;
    let mut sim = Simulator::new(SimConfig {
        time_limit: Some(config.time_limit()),
        ..SimConfig::default()
    });
    let handle = sim.handle();
    let mut tb = StreamTestbench::new(&handle, config, input, output)?;
    let name = name.to_string();

    sim.run(async move {
        let _dut = start_dut(&handle, tb.dut_ports())?;
        tb.run_frame(&name, &stimulus, &expected).await
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, Passthrough};

    fn gray_run(config: ScenarioConfig, frame: Image) -> Result<FrameReport> {
        run_frame_test(
            "unit",
            config,
            InputPacking::Pixels(StreamFormat::GRAY8),
            StreamFormat::GRAY8,
            |h, ports| Passthrough::new().start(h, ports),
            frame.clone(),
            frame,
        )
    }

    #[test]
    fn test_identity_round_trip() {
        init_test_logging();
        let report = gray_run(ScenarioConfig::default(), Image::gradient(4, 3).unwrap()).unwrap();
        assert_eq!(report.beats_sent, 12);
        assert_eq!(report.beats_expected, 12);
        assert_eq!(report.handshake, None);
        assert_eq!(report.pause_pattern, None);
        assert!(report.finished_ns > report.started_ns);
    }

    #[test]
    fn test_invalid_config_fails_before_simulation() {
        let config = ScenarioConfig {
            pause_pattern: vec![],
            ..ScenarioConfig::default()
        };
        let err = gray_run(config, Image::gradient(4, 3).unwrap()).unwrap_err();
        assert!(matches!(err, TestbenchError::Config(ConfigError::EmptyPausePattern)));
    }

    #[test]
    fn test_scoreboard_mismatch_is_reported() {
        let frame = Image::gradient(4, 2).unwrap();
        let err = run_frame_test(
            "off_by_one",
            ScenarioConfig::default(),
            InputPacking::Pixels(StreamFormat::GRAY8),
            StreamFormat::GRAY8,
            |h, ports| Passthrough::with_transform(|w| (w + 1) & 0xFF).start(h, ports),
            frame.clone(),
            frame,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "first pixel mismatch at index=0 (x=0, y=0): expected=0, received=1"
        );
    }

    #[test]
    fn test_missing_design_times_out() {
        let config = ScenarioConfig {
            ready_timeout_cycles: Some(20),
            ..ScenarioConfig::default()
        };
        let frame = Image::gradient(2, 2).unwrap();
        // No design: s_tready is never driven.
        let err = run_frame_test(
            "no_dut",
            config,
            InputPacking::Pixels(StreamFormat::GRAY8),
            StreamFormat::GRAY8,
            |h, _| h.spawn("idle", async {}),
            frame.clone(),
            frame,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TestbenchError::Driver(DriverError::HandshakeTimeout { beat: 0, cycles: 20, .. })
        ));
    }

    #[test]
    fn test_report_serializes() {
        let report = gray_run(ScenarioConfig::default(), Image::gradient(2, 2).unwrap()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "unit");
        assert_eq!(json["input"]["pixels"]["lanes"], 1);
        assert!(json["handshake"].is_null());
    }
}
