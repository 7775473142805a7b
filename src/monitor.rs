//! Stream decoder: rebuilds frames from accepted output beats
//!
//! [`FrameDecoder`] is the pure state machine: feed it accepted beats, get
//! frames back. [`AxisMonitor`] wraps it in a capture task that samples an
//! interface on every rising edge and queues completed frames.
//!
//! Framing rules:
//! - A beat counts only when `tvalid && tready` at a rising edge.
//! - SOF (`tuser`) starts a frame and restarts any partial one.
//! - A frame opened without SOF, or restarted by a stray SOF, is a sideband
//!   mismatch handled by the [`SidebandCheck`] policy like an EOL mismatch.
//! - A frame completes after `height * beats_per_line` beats.
//! - Active reset discards the partial frame.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::monitor::{AxisMonitor, FrameDecoder};
//!
//! let decoder = FrameDecoder::new(8, 6, StreamFormat::GRAY8, SidebandCheck::Warn)?;
//! let mut monitor = AxisMonitor::start(&handle, &out_ports, &clk, Some(reset), decoder)?;
//! let frame = monitor.get_frame(Duration::from_micros(200)).await?;
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::beat::{Beat, Marker, StreamFormat};
use crate::bus::AxisPorts;
use crate::config::{ConfigError, SidebandCheck};
use crate::image_model::{Image, ValidationError};
use crate::reset::ResetPort;
use crate::sim::{with_timeout, SimError, SimHandle, Signal, TaskHandle};

/// Errors raised while capturing frames.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Sideband marker disagrees with the beat position (strict policy only).
    #[error("{marker} mismatch on output beat {beat}: observed={observed}, expected={expected}")]
    Sideband {
        /// Which marker
        marker: Marker,
        /// Beat index within the frame
        beat: usize,
        /// Value seen on the bus
        observed: u8,
        /// Value implied by the beat position
        expected: u8,
    },

    /// No frame arrived in time.
    #[error("timed out waiting for output frame ({width}x{height}, {timeout:?})")]
    Timeout {
        /// Frame width
        width: usize,
        /// Frame height
        height: usize,
        /// Budget that expired
        timeout: Duration,
    },

    /// The capture task ended, so no more frames will arrive.
    #[error("monitor on {prefix} stopped")]
    Stopped {
        /// Interface prefix
        prefix: String,
    },

    /// Captured words did not form a valid frame.
    #[error(transparent)]
    Frame(#[from] ValidationError),
}

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Outcome of feeding one accepted beat to a [`FrameDecoder`]
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult {
    /// Frame in progress
    Accumulating,
    /// Frame complete
    Frame(Image),
}

/// Reassembles frames from a stream of accepted beats.
#[derive(Debug)]
pub struct FrameDecoder {
    width: usize,
    height: usize,
    format: StreamFormat,
    beats_per_line: usize,
    policy: SidebandCheck,
    /// Data words of the frame in progress
    words: Vec<u128>,
    frames_decoded: u64,
    sideband_warnings: u64,
}

impl FrameDecoder {
    /// Create a decoder for `width x height` frames.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LineAlignment` if a row does not fill whole beats,
    /// or `ConfigError::InvalidValue` for a zero-area frame.
    pub fn new(
        width: usize,
        height: usize,
        format: StreamFormat,
        policy: SidebandCheck,
    ) -> std::result::Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "frame size",
                reason: format!("must be non-zero, got {}x{}", width, height),
            });
        }
        let beats_per_line = format.beats_per_line(width)?;
        Ok(Self {
            width,
            height,
            format,
            beats_per_line,
            policy,
            words: Vec::with_capacity(beats_per_line * height),
            frames_decoded: 0,
            sideband_warnings: 0,
        })
    }

    /// Beats in one complete frame
    pub fn beats_per_frame(&self) -> usize {
        self.beats_per_line * self.height
    }

    /// Beats accumulated for the frame in progress
    pub fn buffer_len(&self) -> usize {
        self.words.len()
    }

    /// Whether a frame is in progress
    pub fn is_synced(&self) -> bool {
        !self.words.is_empty()
    }

    /// Frames completed so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// SOF and EOL mismatches logged under the warning policy
    pub fn sideband_warnings(&self) -> u64 {
        self.sideband_warnings
    }

    /// Discard any partial frame; the next accepted beat starts a new one.
    pub fn reset(&mut self) {
        if !self.words.is_empty() {
            log::debug!("Decoder reset, dropping {} partial beats", self.words.len());
        }
        self.words.clear();
    }

    fn sideband_mismatch(&mut self, marker: Marker, observed: bool, expected: bool) -> Result<()> {
        let beat = self.words.len();
        match self.policy {
            SidebandCheck::Strict => Err(MonitorError::Sideband {
                marker,
                beat,
                observed: u8::from(observed),
                expected: u8::from(expected),
            }),
            SidebandCheck::Warn => {
                self.sideband_warnings += 1;
                log::warn!(
                    "{} mismatch on output beat {}: observed={}, expected={}",
                    marker,
                    beat,
                    u8::from(observed),
                    u8::from(expected)
                );
                Ok(())
            }
            SidebandCheck::Off => Ok(()),
        }
    }

    /// Feed one accepted beat.
    ///
    /// A beat that opens a frame without SOF, or a SOF in the middle of a
    /// frame, is a SOF mismatch. Either way the beat starts a new frame
    /// unless the policy is strict.
    ///
    /// # Errors
    ///
    /// Under [`SidebandCheck::Strict`], returns `MonitorError::Sideband` on
    /// the first SOF or EOL that disagrees with the beat position.
    pub fn process_beat(&mut self, beat: &Beat) -> Result<DecodeResult> {
        if beat.sof && !self.words.is_empty() {
            self.sideband_mismatch(Marker::Sof, true, false)?;
            log::debug!(
                "SOF restarts frame after {} of {} beats",
                self.words.len(),
                self.beats_per_frame()
            );
            self.words.clear();
        } else if !beat.sof && self.words.is_empty() {
            self.sideband_mismatch(Marker::Sof, false, true)?;
        }

        let (_, expected_eol) =
            StreamFormat::expected_markers(self.words.len(), self.beats_per_line);
        if beat.eol != expected_eol {
            self.sideband_mismatch(Marker::Eol, beat.eol, expected_eol)?;
        }

        self.words.push(beat.data);

        if self.words.len() < self.beats_per_frame() {
            return Ok(DecodeResult::Accumulating);
        }

        let words = std::mem::take(&mut self.words);
        let frame = self.format.decode(self.width, self.height, &words)?;
        self.frames_decoded += 1;
        log::debug!(
            "Complete {}x{} frame ({} beats, frame #{})",
            self.width,
            self.height,
            words.len(),
            self.frames_decoded
        );
        Ok(DecodeResult::Frame(frame))
    }
}

/// Background capture of frames from one interface.
///
/// Completed frames queue up in FIFO order. Stopping or dropping the monitor
/// cancels the capture task.
pub struct AxisMonitor {
    prefix: String,
    width: usize,
    height: usize,
    handle: SimHandle,
    frames: mpsc::UnboundedReceiver<Result<Image>>,
    task: TaskHandle<()>,
}

impl AxisMonitor {
    /// Spawn the capture task.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor rejects the task.
    pub fn start(
        handle: &SimHandle,
        ports: &AxisPorts,
        clk: &Signal,
        reset: Option<ResetPort>,
        mut decoder: FrameDecoder,
    ) -> std::result::Result<Self, SimError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (width, height) = (decoder.width, decoder.height);
        let prefix = ports.prefix.clone();
        let (ports, clk) = (ports.clone(), clk.clone());

        let task = handle.spawn(format!("monitor:{}", prefix), async move {
            loop {
                clk.rising_edge().await;

                if reset.as_ref().is_some_and(ResetPort::is_active) {
                    decoder.reset();
                    continue;
                }

                let sample = ports.sample();
                if !sample.fire() {
                    continue;
                }
                let Some(beat) = sample.beat() else {
                    log::warn!(
                        "{}: accepted beat with unresolved payload ({:?}), skipping",
                        ports.prefix,
                        sample
                    );
                    continue;
                };

                match decoder.process_beat(&beat) {
                    Ok(DecodeResult::Frame(frame)) => {
                        if tx.send(Ok(frame)).is_err() {
                            return;
                        }
                    }
                    Ok(DecodeResult::Accumulating) => {}
                    Err(e) => {
                        log::error!("{}: {}", ports.prefix, e);
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
        })?;

        log::info!("Monitor started on {} ({}x{})", prefix, width, height);
        Ok(Self {
            prefix,
            width,
            height,
            handle: handle.clone(),
            frames: rx,
            task,
        })
    }

    /// Pop the next frame, waiting at most `timeout` of simulated time.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Timeout` if no frame arrives in time, the capture
    /// error if the task failed, or `MonitorError::Stopped` if it ended.
    pub async fn get_frame(&mut self, timeout: Duration) -> Result<Image> {
        let (width, height) = (self.width, self.height);
        match with_timeout(&self.handle, self.frames.recv(), timeout).await {
            Ok(Some(frame)) => frame,
            Ok(None) => Err(MonitorError::Stopped {
                prefix: self.prefix.clone(),
            }),
            Err(_) => Err(MonitorError::Timeout {
                width,
                height,
                timeout,
            }),
        }
    }

    /// Pop a frame if one is already queued.
    pub fn try_get_frame(&mut self) -> Option<Result<Image>> {
        self.frames.try_recv().ok()
    }

    /// Cancel the capture task.
    pub fn stop(self) {
        self.task.cancel();
        log::debug!("Monitor on {} stopped", self.prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AxisDriver;
    use crate::image_model::PixelFormat;
    use crate::reset::ResetPolarity;
    use crate::sim::{Clock, SimConfig, Simulator};

    fn gray_beats(img: &Image) -> Vec<Beat> {
        StreamFormat::GRAY8.encode(img).unwrap()
    }

    fn gray_decoder(width: usize, height: usize, policy: SidebandCheck) -> FrameDecoder {
        FrameDecoder::new(width, height, StreamFormat::GRAY8, policy).unwrap()
    }

    /// Feed every beat, returning the last completed frame.
    fn decode_all(decoder: &mut FrameDecoder, beats: &[Beat]) -> Result<Option<Image>> {
        let mut frame = None;
        for beat in beats {
            if let DecodeResult::Frame(f) = decoder.process_beat(beat)? {
                frame = Some(f);
            }
        }
        Ok(frame)
    }

    #[test]
    fn test_decoder_round_trip() {
        let img = Image::gradient(4, 3).unwrap();
        let mut decoder = gray_decoder(4, 3, SidebandCheck::Strict);
        let frame = decode_all(&mut decoder, &gray_beats(&img)).unwrap();
        assert_eq!(frame, Some(img));
        assert_eq!(decoder.frames_decoded(), 1);
        assert!(!decoder.is_synced());
    }

    #[test]
    fn test_missing_sof_warns_and_captures() {
        let img = Image::gradient(4, 2).unwrap();
        let mut beats = gray_beats(&img);
        beats[0].sof = false;

        let mut decoder = gray_decoder(4, 2, SidebandCheck::Warn);
        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
        assert_eq!(decoder.sideband_warnings(), 1);
    }

    #[test]
    fn test_missing_sof_ignored_when_off() {
        let img = Image::gradient(4, 2).unwrap();
        let mut beats = gray_beats(&img);
        beats[0].sof = false;

        let mut decoder = gray_decoder(4, 2, SidebandCheck::Off);
        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
        assert_eq!(decoder.sideband_warnings(), 0);
    }

    #[test]
    fn test_missing_sof_fails_when_strict() {
        let img = Image::gradient(4, 2).unwrap();
        let mut beats = gray_beats(&img);
        beats[0].sof = false;

        let mut decoder = gray_decoder(4, 2, SidebandCheck::Strict);
        let err = decoder.process_beat(&beats[0]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "SOF/TUSER mismatch on output beat 0: observed=0, expected=1"
        );
    }

    #[test]
    fn test_sof_restarts_partial_frame() {
        let img = Image::gradient(2, 2).unwrap();
        let mut decoder = gray_decoder(2, 2, SidebandCheck::Warn);
        let beats = gray_beats(&img);
        decoder.process_beat(&beats[0]).unwrap();
        decoder.process_beat(&beats[1]).unwrap();
        assert_eq!(decoder.buffer_len(), 2);

        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
        assert_eq!(decoder.sideband_warnings(), 1);
    }

    #[test]
    fn test_eol_mismatch_warns_by_default() {
        let img = Image::gradient(2, 2).unwrap();
        let mut beats = gray_beats(&img);
        beats[0].eol = true;
        let mut decoder = gray_decoder(2, 2, SidebandCheck::Warn);
        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
        assert_eq!(decoder.sideband_warnings(), 1);
    }

    #[test]
    fn test_eol_mismatch_fails_when_strict() {
        let img = Image::gradient(2, 2).unwrap();
        let mut beats = gray_beats(&img);
        beats[1].eol = false;
        let mut decoder = gray_decoder(2, 2, SidebandCheck::Strict);
        decoder.process_beat(&beats[0]).unwrap();
        let err = decoder.process_beat(&beats[1]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "EOL/TLAST mismatch on output beat 1: observed=0, expected=1"
        );
    }

    #[test]
    fn test_mid_frame_sof_fails_when_strict() {
        let img = Image::gradient(2, 2).unwrap();
        let beats = gray_beats(&img);
        let mut decoder = gray_decoder(2, 2, SidebandCheck::Strict);
        decoder.process_beat(&beats[0]).unwrap();
        assert!(matches!(
            decoder.process_beat(&beats[0]),
            Err(MonitorError::Sideband {
                marker: Marker::Sof,
                beat: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let img = Image::gradient(2, 2).unwrap();
        let beats = gray_beats(&img);
        let mut decoder = gray_decoder(2, 2, SidebandCheck::Strict);
        decoder.process_beat(&beats[0]).unwrap();
        decoder.reset();
        assert_eq!(decoder.buffer_len(), 0);
        assert!(!decoder.is_synced());

        // A fresh SOF is not a restart once the partial frame is gone.
        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
    }

    #[test]
    fn test_rgb_decoder() {
        let img = Image::gradient_rgb(3, 2).unwrap();
        let beats = StreamFormat::RGB24.encode(&img).unwrap();
        let mut decoder =
            FrameDecoder::new(3, 2, StreamFormat::RGB24, SidebandCheck::Strict).unwrap();
        assert_eq!(decode_all(&mut decoder, &beats).unwrap(), Some(img));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(FrameDecoder::new(0, 2, StreamFormat::GRAY8, SidebandCheck::Warn).is_err());
    }

    #[test]
    fn test_capture_task_aborts_on_reset_and_queues_in_order() {
        let mut sim = Simulator::new(SimConfig::default());
        let h = sim.handle();
        let clk = h.signal("clk", 1);
        let rst = ResetPort::new(h.signal("rst", 1), ResetPolarity::ActiveHigh);
        let ports = AxisPorts::new(&h, "m_axis_video", 8);

        let first = Image::gradient(4, 2).unwrap();
        let second =
            Image::from_values(4, 2, PixelFormat::Gray, &[90, 80, 70, 60, 50, 40, 30, 20])
                .unwrap();
        let aborted = Image::from_values(4, 2, PixelFormat::Gray, &[7; 8]).unwrap();

        let (queued, popped, leftover) = sim
            .run({
                let (first, second) = (first.clone(), second.clone());
                async move {
                    let _clock = Clock::start(&h, &clk, Duration::from_nanos(10)).unwrap();
                    rst.release();
                    ports.ready.set_bool(true);
                    let decoder = gray_decoder(4, 2, SidebandCheck::Strict);
                    let mut monitor =
                        AxisMonitor::start(&h, &ports, &clk, Some(rst.clone()), decoder).unwrap();
                    let driver = AxisDriver::new(ports.clone(), clk.clone(), None);

                    // Half a frame, then a reset pulse.
                    driver.send_beats(&gray_beats(&aborted)[..4]).await.unwrap();
                    rst.assert();
                    h.clock_cycles(&clk, 2).await;
                    rst.release();

                    driver.send_frame(&first, StreamFormat::GRAY8).await.unwrap();
                    driver.send_frame(&second, StreamFormat::GRAY8).await.unwrap();
                    h.clock_cycles(&clk, 1).await;

                    let queued = monitor.try_get_frame().map(|r| r.unwrap());
                    let popped = monitor.get_frame(Duration::from_micros(1)).await.unwrap();
                    let leftover = monitor.try_get_frame().is_some();
                    monitor.stop();
                    (queued, popped, leftover)
                }
            })
            .unwrap();

        assert_eq!(queued, Some(first));
        assert_eq!(popped, second);
        assert!(!leftover);
    }
}
