//! `axis-video-tb` command line entry point
//!
//! Runs one frame scenario and prints the report as JSON.

fn main() -> anyhow::Result<()> {
    axis_video_tb::run()
}
