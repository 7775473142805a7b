//! Reset polarity and the startup reset sequence.

use serde::{Deserialize, Serialize};

use crate::bus::AxisPorts;
use crate::sim::Signal;

/// Level at which a reset input is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolarity {
    /// Reset while the signal is 1
    #[default]
    ActiveHigh,
    /// Reset while the signal is 0
    ActiveLow,
}

impl ResetPolarity {
    /// Logic level that means "in reset"
    pub fn active_level(self) -> bool {
        matches!(self, ResetPolarity::ActiveHigh)
    }
}

/// A reset signal together with its polarity
#[derive(Debug, Clone)]
pub struct ResetPort {
    /// Underlying signal
    pub signal: Signal,
    /// Active level
    pub polarity: ResetPolarity,
}

impl ResetPort {
    /// Bind a reset signal
    pub fn new(signal: Signal, polarity: ResetPolarity) -> Self {
        Self { signal, polarity }
    }

    /// True only when the signal is resolved to its active level.
    ///
    /// An uninitialised (`X`) reset does not count as active.
    pub fn is_active(&self) -> bool {
        self.signal
            .get()
            .bits()
            .map(|v| (v != 0) == self.polarity.active_level())
            .unwrap_or(false)
    }

    /// Schedule the active level
    pub fn assert(&self) {
        self.signal.set_bool(self.polarity.active_level());
    }

    /// Schedule the inactive level
    pub fn release(&self) {
        self.signal.set_bool(!self.polarity.active_level());
    }

    /// Wait on rising edges of `clk` until reset is no longer active.
    pub async fn wait_released(&self, clk: &Signal) {
        while self.is_active() {
            clk.rising_edge().await;
        }
    }
}

/// Hold the design in reset for `cycles` rising edges with the input stream idle.
///
/// Asserts reset and drives `inputs` idle, waits `cycles` rising edges of
/// `clk`, releases reset and waits one more edge so the first post-reset cycle
/// is clean.
pub async fn apply_reset(clk: &Signal, reset: &ResetPort, inputs: &AxisPorts, cycles: u64) {
    log::debug!(
        "Applying reset on {} for {} cycles ({:?})",
        reset.signal.name(),
        cycles,
        reset.polarity
    );
    reset.assert();
    inputs.drive_idle();

    for _ in 0..cycles {
        clk.rising_edge().await;
    }

    reset.release();
    clk.rising_edge().await;
    log::debug!("Reset released on {}", reset.signal.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Clock, Logic, SimConfig, SimError, Simulator};
    use std::time::Duration;

    #[test]
    fn test_polarity_levels() {
        assert!(ResetPolarity::ActiveHigh.active_level());
        assert!(!ResetPolarity::ActiveLow.active_level());
    }

    #[test]
    fn test_unknown_reset_is_not_active() {
        let sim = Simulator::new(SimConfig::default());
        let rst = ResetPort::new(sim.handle().signal("rst", 1), ResetPolarity::ActiveHigh);
        assert_eq!(rst.signal.get(), Logic::Unknown);
        assert!(!rst.is_active());
    }

    #[test]
    fn test_apply_reset_sequence() {
        let mut sim = Simulator::new(SimConfig::default());
        let h = sim.handle();
        let clk = h.signal("clk", 1);
        let rst = ResetPort::new(h.signal("rst_n", 1), ResetPolarity::ActiveLow);
        let inputs = AxisPorts::new(&h, "s_axis_video", 8);

        let (released_at, valid) = sim
            .run({
                let (clk, rst, inputs) = (clk.clone(), rst.clone(), inputs.clone());
                async move {
                    let _clock = Clock::start(&h, &clk, Duration::from_nanos(10))?;
                    apply_reset(&clk, &rst, &inputs, 3).await;
                    Ok::<_, SimError>((h.now_ps(), inputs.valid.get()))
                }
            })
            .unwrap()
            .unwrap();

        // Edges at 5, 15, 25 ns in reset, then one more at 35 ns.
        assert_eq!(released_at, 35_000);
        assert_eq!(valid, Logic::Bits(0));
        assert_eq!(rst.signal.get(), Logic::Bits(1));
        assert!(!rst.is_active());
    }
}
