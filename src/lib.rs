//! `axis-video-tb` - AXI4-Stream video verification testbench
//!
//! Drivers stimulate an AXI4-Stream video interface, a monitor rebuilds
//! frames from the design's output stream, and a scoreboard compares them
//! with reference frames. Backpressure and an independent protocol checker
//! exercise and police the ready/valid handshake, including SOF (`tuser`)
//! and EOL (`tlast`) framing.
//!
//! Everything runs on the crate's own event-driven kernel ([`sim`]), so
//! designs are stand-in models ([`test_utils`]) or any code that reads and
//! writes the testbench signals.

pub mod artifacts;
pub mod backpressure;
pub mod beat;
pub mod bus;
pub mod config;
pub mod driver;
pub mod image_model;
pub mod monitor;
pub mod protocol_checker;
pub mod reference;
pub mod reset;
pub mod scenario;
pub mod scoreboard;
pub mod sim;
pub mod test_utils;
pub mod window;

use std::path::{Path, PathBuf};

use anyhow::Context;

pub use config::ScenarioConfig;
pub use image_model::{Image, PixelFormat};
pub use scenario::{run_frame_test, FrameReport, InputPacking, TestbenchError};

use beat::StreamFormat;
use reference::{gray_word_from_rgb24, lowpass_3x3, mean_word_from_window, rgb_to_gray_replicated};
use test_utils::{Passthrough, RegisterSlice};

/// Initialise `env_logger` with an `info` default (`RUST_LOG` overrides).
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

fn load_stimulus(path: &Path) -> anyhow::Result<Image> {
    let file = if path.is_dir() {
        window::resolve_image_in_folder(path, None)?
    } else {
        path.to_path_buf()
    };
    Image::load(&file).with_context(|| format!("loading stimulus {}", file.display()))
}

/// Command line entry point: `axis-video-tb [CONFIG_JSON] [IMAGE_OR_FOLDER]`.
///
/// Runs one frame and prints the [`FrameReport`] as JSON. RGB stimulus goes
/// through a register slice applying the grayscale transform; grayscale
/// stimulus is sent as 3x3 windows through a lowpass passthrough. Without an
/// image an 8x6 RGB gradient is used. Without a config file backpressure and
/// handshake checking are enabled.
///
/// # Errors
///
/// Returns configuration, load and scenario failures.
pub fn run() -> anyhow::Result<()> {
    init_logging();
    let mut args = std::env::args().skip(1);
    let config_path = args.next().filter(|a| !a.is_empty()).map(PathBuf::from);
    let image_path = args.next().map(PathBuf::from);

    let config = match &config_path {
        Some(path) => ScenarioConfig::from_json_file(path)?,
        None => ScenarioConfig {
            with_backpressure: true,
            check_handshake: true,
            ..ScenarioConfig::default()
        },
    }
    .with_env_overrides()?;

    let stimulus = match &image_path {
        Some(path) => load_stimulus(path)?,
        None => Image::gradient_rgb(8, 6)?,
    };

    let report = match stimulus.format() {
        PixelFormat::Rgb => {
            let expected = rgb_to_gray_replicated(&stimulus)?;
            run_frame_test(
                "grayscale",
                config,
                InputPacking::Pixels(StreamFormat::RGB24),
                StreamFormat::RGB24,
                |h, ports| RegisterSlice::with_transform(gray_word_from_rgb24).start(h, ports),
                stimulus,
                expected,
            )?
        }
        PixelFormat::Gray => {
            let expected = lowpass_3x3(&stimulus)?;
            run_frame_test(
                "lowpass",
                config,
                InputPacking::Windows,
                StreamFormat::GRAY8,
                |h, ports| Passthrough::with_transform(mean_word_from_window).start(h, ports),
                stimulus,
                expected,
            )?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
