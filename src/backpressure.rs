//! Deterministic consumer-side backpressure
//!
//! A [`PausePattern`] is applied to the sink's `tready`, one entry per clock
//! cycle, changing on falling edges so the value is stable at the next rising
//! edge. `1` pauses (ready low), `0` accepts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use axis_video_tb::backpressure::{BackpressureController, PausePattern, ReadySink};
//!
//! let pattern = PausePattern::new(vec![1, 1, 1, 0, 0, 0])?;
//! let bp = BackpressureController::start(&handle, &clk, ReadySink::new(&ports), pattern)?;
//! // ... run traffic ...
//! bp.stop(); // tready back to 1
//! ```

use std::fmt;

use crate::bus::AxisPorts;
use crate::config::ConfigError;
use crate::sim::{SimError, SimHandle, Signal, TaskHandle};

/// Anything whose flow can be paused directly
pub trait PauseControl {
    /// `true` stalls the consumer, `false` lets it accept.
    fn set_pause(&self, paused: bool);
}

/// Pauses a stream by driving its `tready`
#[derive(Debug, Clone)]
pub struct ReadySink {
    ready: Signal,
}

impl ReadySink {
    /// Control the `tready` of `ports`
    pub fn new(ports: &AxisPorts) -> Self {
        Self {
            ready: ports.ready.clone(),
        }
    }
}

impl PauseControl for ReadySink {
    fn set_pause(&self, paused: bool) {
        self.ready.set_bool(!paused);
    }
}

/// Validated, non-empty cyclic sequence of 0/1 pause flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PausePattern {
    steps: Vec<u8>,
}

impl PausePattern {
    /// Validate a pattern.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyPausePattern` for an empty pattern and
    /// `ConfigError::InvalidPauseValue` for entries other than 0 or 1.
    pub fn new(steps: Vec<u8>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::EmptyPausePattern);
        }
        if let Some((index, &value)) = steps.iter().enumerate().find(|&(_, &v)| v > 1) {
            return Err(ConfigError::InvalidPauseValue { index, value });
        }
        Ok(Self { steps })
    }

    /// Raw entries
    pub fn steps(&self) -> &[u8] {
        &self.steps
    }

    /// Pause flag for cycle `n` (wrapping).
    pub fn paused_at(&self, n: usize) -> bool {
        self.steps[n % self.steps.len()] == 1
    }

    /// Longest run of consecutive pauses when the pattern repeats.
    ///
    /// Runs wrap around the end of the pattern; an all-pause pattern reports
    /// its own length.
    pub fn longest_pause_run(&self) -> usize {
        let len = self.steps.len();
        let mut best = 0;
        let mut run = 0;
        for i in 0..len * 2 {
            if self.paused_at(i) {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        best.min(len)
    }
}

impl fmt::Display for PausePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Drive `sink` from `pattern` forever: unpause, then apply the next entry on
/// every falling edge of `clk`.
pub async fn drive_sink_pause<S: PauseControl>(sink: &S, clk: &Signal, pattern: &PausePattern) {
    sink.set_pause(false);
    let mut cycle = 0usize;
    loop {
        clk.falling_edge().await;
        sink.set_pause(pattern.paused_at(cycle));
        cycle = cycle.wrapping_add(1);
    }
}

/// Owned background task applying a pause pattern.
///
/// Stopping or dropping the controller cancels the task and leaves the sink
/// unpaused.
pub struct BackpressureController<S: PauseControl + Clone + 'static> {
    sink: S,
    task: Option<TaskHandle<()>>,
}

impl<S: PauseControl + Clone + 'static> BackpressureController<S> {
    /// Spawn the pause task.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor rejects the task.
    pub fn start(
        handle: &SimHandle,
        clk: &Signal,
        sink: S,
        pattern: PausePattern,
    ) -> Result<Self, SimError> {
        log::info!(
            "Starting backpressure {} (longest pause run {})",
            pattern,
            pattern.longest_pause_run()
        );
        let task_sink = sink.clone();
        let clk = clk.clone();
        let task = handle.spawn("backpressure", async move {
            drive_sink_pause(&task_sink, &clk, &pattern).await;
        })?;
        Ok(Self {
            sink,
            task: Some(task),
        })
    }

    /// Whether the pause task is still active
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the task and release the sink.
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
            self.sink.set_pause(false);
            log::debug!("Backpressure stopped, sink unpaused");
        }
    }
}

impl<S: PauseControl + Clone + 'static> Drop for BackpressureController<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Clock, Logic, SimConfig, Simulator};
    use std::time::Duration;

    #[test]
    fn test_pattern_validation() {
        assert!(matches!(
            PausePattern::new(vec![]),
            Err(ConfigError::EmptyPausePattern)
        ));
        assert!(matches!(
            PausePattern::new(vec![0, 1, 3]),
            Err(ConfigError::InvalidPauseValue { index: 2, value: 3 })
        ));
        assert!(PausePattern::new(vec![0]).is_ok());
    }

    #[test]
    fn test_longest_pause_run_wraps() {
        assert_eq!(PausePattern::new(vec![1, 1, 1, 0, 0, 0]).unwrap().longest_pause_run(), 3);
        assert_eq!(PausePattern::new(vec![1, 0, 0, 1]).unwrap().longest_pause_run(), 2);
        assert_eq!(PausePattern::new(vec![0, 1, 0, 0, 1]).unwrap().longest_pause_run(), 1);
        assert_eq!(PausePattern::new(vec![1, 1]).unwrap().longest_pause_run(), 2);
        assert_eq!(PausePattern::new(vec![0, 0]).unwrap().longest_pause_run(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(PausePattern::new(vec![1, 0, 1]).unwrap().to_string(), "[1,0,1]");
    }

    #[test]
    fn test_ready_follows_pattern_and_is_released() {
        let mut sim = Simulator::new(SimConfig::default());
        let h = sim.handle();
        let clk = h.signal("clk", 1);
        let ports = AxisPorts::new(&h, "m_axis_video", 8);

        let (seen, after_stop) = sim
            .run({
                let ready = ports.ready.clone();
                let sink = ReadySink::new(&ports);
                async move {
                    let _clock = Clock::start(&h, &clk, Duration::from_nanos(10))?;
                    let pattern = PausePattern::new(vec![1, 1, 0])?;
                    let bp = BackpressureController::start(&h, &clk, sink, pattern)?;
                    let mut seen = Vec::new();
                    for _ in 0..6 {
                        clk.rising_edge().await;
                        seen.push(ready.get());
                    }
                    assert!(bp.is_running());
                    bp.stop();
                    clk.rising_edge().await;
                    Ok::<_, crate::TestbenchError>((seen, ready.get()))
                }
            })
            .unwrap()
            .unwrap();

        let high = Logic::Bits(1);
        let low = Logic::Bits(0);
        // The clock's initial X -> 0 already counts as a falling edge, so the
        // first rising edge sees pattern entry 0.
        assert_eq!(seen, vec![low, low, high, low, low, high]);
        assert_eq!(after_stop, high);
    }
}
