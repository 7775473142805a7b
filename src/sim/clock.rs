//! Free-running clock generator.

use std::time::Duration;

use super::{duration_to_ps, SimError, SimHandle, Signal, TaskHandle};

/// Periodic clock driven as a background task
pub struct Clock;

impl Clock {
    /// Start toggling `clk` with the given period.
    ///
    /// The clock is driven low first; the first rising edge happens half a
    /// period later. For odd periods (in picoseconds) the high phase gets the
    /// extra picosecond.
    ///
    /// # Errors
    ///
    /// Returns `SimError::InvalidClockPeriod` for periods under 2 ps and
    /// `SimError::Spawn` if the executor rejects the task.
    pub fn start(
        handle: &SimHandle,
        clk: &Signal,
        period: Duration,
    ) -> Result<TaskHandle<()>, SimError> {
        let period_ps = duration_to_ps(period);
        if period_ps < 2 {
            return Err(SimError::InvalidClockPeriod { period });
        }
        let low_ps = period_ps / 2;
        let high_ps = period_ps - low_ps;

        log::debug!("Starting clock {} with period {} ps", clk.name(), period_ps);

        let sim = handle.clone();
        let clk = clk.clone();
        handle.spawn(format!("clock:{}", clk.name()), async move {
            loop {
                clk.set_bool(false);
                sim.timer_ps(low_ps).await;
                clk.set_bool(true);
                sim.timer_ps(high_ps).await;
            }
        })
    }
}
