//! Stream encoder: drives frames and windows onto an AXI4-Stream input
//!
//! Each beat is presented with `tvalid` high and held, unchanged, until a
//! rising edge samples `tready` high. The next beat (or idle) is driven right
//! after that edge, so back-to-back transfers happen whenever the consumer is
//! ready. While reset is active the driver waits before presenting a beat.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::driver::AxisDriver;
//! use axis_video_tb::beat::StreamFormat;
//!
//! let driver = AxisDriver::new(input_ports, clk, Some(reset)).with_ready_timeout(Some(1000));
//! driver.send_frame(&Image::gradient(8, 6)?, StreamFormat::GRAY8).await?;
//! ```

use std::path::Path;

use thiserror::Error;

use crate::beat::{Beat, StreamFormat};
use crate::bus::AxisPorts;
use crate::config::ConfigError;
use crate::image_model::{Image, ValidationError};
use crate::reset::ResetPort;
use crate::sim::Signal;
use crate::window::{resolve_image_in_folder, windows_3x3, Window};

/// Errors raised while driving a stream.
#[derive(Error, Debug)]
pub enum DriverError {
    /// `tready` never came back within the configured budget.
    #[error("{prefix}: tready not seen within {cycles} cycles for beat {beat}")]
    HandshakeTimeout {
        /// Interface prefix
        prefix: String,
        /// Index of the beat being held
        beat: usize,
        /// Cycle budget that expired
        cycles: u64,
    },

    /// Frame could not be packed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Frame could not be loaded.
    #[error(transparent)]
    Image(#[from] ValidationError),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Producer-side driver for one AXI4-Stream interface
#[derive(Debug, Clone)]
pub struct AxisDriver {
    ports: AxisPorts,
    clk: Signal,
    reset: Option<ResetPort>,
    ready_timeout_cycles: Option<u64>,
}

impl AxisDriver {
    /// Bind a driver and put the interface into its idle state.
    pub fn new(ports: AxisPorts, clk: Signal, reset: Option<ResetPort>) -> Self {
        ports.drive_idle();
        Self {
            ports,
            clk,
            reset,
            ready_timeout_cycles: None,
        }
    }

    /// Fail a beat with `DriverError::HandshakeTimeout` after this many
    /// rising edges without `tready` (None waits forever).
    pub fn with_ready_timeout(mut self, cycles: Option<u64>) -> Self {
        self.ready_timeout_cycles = cycles;
        self
    }

    /// The driven interface
    pub fn ports(&self) -> &AxisPorts {
        &self.ports
    }

    async fn wait_out_reset(&self) {
        if let Some(reset) = &self.reset {
            reset.wait_released(&self.clk).await;
        }
    }

    /// Present one beat and hold it until accepted. Leaves `tvalid` high.
    async fn transfer(&self, beat: &Beat, index: usize) -> Result<()> {
        self.wait_out_reset().await;
        self.ports.drive(beat);

        let mut waited = 0u64;
        loop {
            self.clk.rising_edge().await;
            if self.ports.ready.is_high() {
                return Ok(());
            }
            waited += 1;
            if let Some(limit) = self.ready_timeout_cycles {
                if waited >= limit {
                    self.ports.drive_idle();
                    return Err(DriverError::HandshakeTimeout {
                        prefix: self.ports.prefix.clone(),
                        beat: index,
                        cycles: limit,
                    });
                }
            }
        }
    }

    /// Drive a sequence of beats back to back, then return to idle.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::HandshakeTimeout` if a beat is never accepted.
    pub async fn send_beats(&self, beats: &[Beat]) -> Result<()> {
        for (index, beat) in beats.iter().enumerate() {
            self.transfer(beat, index).await?;
            log::trace!("{}: beat {} accepted ({:#x})", self.ports.prefix, index, beat.data);
        }
        self.ports.drive_idle();
        Ok(())
    }

    /// Serialise `image` with `format` and drive it.
    ///
    /// Returns the number of beats transferred.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Config` if the frame does not fit the format and
    /// `DriverError::HandshakeTimeout` if a beat is never accepted.
    pub async fn send_frame(&self, image: &Image, format: StreamFormat) -> Result<usize> {
        let beats = format.encode(image)?;
        log::info!(
            "{}: sending {}x{} frame as {} beats",
            self.ports.prefix,
            image.width(),
            image.height(),
            beats.len()
        );
        self.send_beats(&beats).await?;
        Ok(beats.len())
    }

    /// Send one 3x3 window as a single beat.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::HandshakeTimeout` if the beat is never accepted.
    pub async fn send_window(&self, window: &Window, sof: bool, eol: bool) -> Result<()> {
        let beat = Beat {
            data: window.pack(),
            sof,
            eol,
        };
        self.send_beats(std::slice::from_ref(&beat)).await
    }

    /// Send a run of windows: SOF on the first beat and EOL on the last.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::HandshakeTimeout` if a beat is never accepted.
    pub async fn send_windows(&self, windows: &[Window]) -> Result<()> {
        let last = windows.len().saturating_sub(1);
        let beats: Vec<Beat> = windows
            .iter()
            .enumerate()
            .map(|(i, w)| Beat {
                data: w.pack(),
                sof: i == 0,
                eol: i == last,
            })
            .collect();
        self.send_beats(&beats).await
    }

    /// Stream every drop-border 3x3 window of a grayscale frame, with EOL at
    /// the end of each output row.
    ///
    /// Returns the number of windows sent.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Config` for frames under 3x3 or non-grayscale frames.
    pub async fn send_grayscale_image(&self, image: &Image) -> Result<usize> {
        let beats: Vec<Beat> = windows_3x3(image)?
            .into_iter()
            .map(|(w, sof, eol)| Beat {
                data: w.pack(),
                sof,
                eol,
            })
            .collect();
        log::info!(
            "{}: sending {}x{} frame as {} windows",
            self.ports.prefix,
            image.width(),
            image.height(),
            beats.len()
        );
        self.send_beats(&beats).await?;
        Ok(beats.len())
    }

    /// Load an image file as grayscale and stream its windows.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Image` if the file cannot be loaded.
    pub async fn send_image_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let image = Image::load_grayscale(path)?;
        self.send_grayscale_image(&image).await
    }

    /// Pick an image from `folder` (see [`resolve_image_in_folder`]) and
    /// stream its windows.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Config` if no image can be resolved.
    pub async fn send_image_from_folder(
        &self,
        folder: impl AsRef<Path>,
        file_name: Option<&str>,
    ) -> Result<usize> {
        let path = resolve_image_in_folder(folder, file_name)?;
        self.send_image_file(path).await
    }
}
