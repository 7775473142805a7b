//! Independent handshake checker for an AXI4-Stream output
//!
//! Unlike the stream decoder, whose sideband checks can be relaxed to
//! warnings, the checker treats every rule as a hard failure:
//!
//! - every signal is resolved (no X/Z) on every sampled cycle
//! - an accepted beat carries SOF iff it is beat 0, EOL iff it ends a row
//! - while `tvalid && !tready`, data and markers do not change
//!
//! It also collects [`HandshakeStats`] so a scenario can assert that
//! backpressure actually happened. Counters restart while reset is active.
//!
//! Samples are taken at each rising edge before any write caused by that
//! edge commits, i.e. the values that settled during the preceding cycle
//! and that the transfer at this edge uses.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::beat::{Beat, Marker, StreamFormat};
use crate::bus::{AxisPorts, BusSample};
use crate::config::ConfigError;
use crate::reset::ResetPort;
use crate::sim::{with_timeout, Logic, SimError, SimHandle, Signal, TaskHandle};

/// Statistics collected by the checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HandshakeStats {
    /// True once a `VALID=1, READY=0` cycle was observed
    pub saw_stall: bool,
    /// Longest consecutive READY-low run
    pub max_ready_low_run: u64,
    /// Beats transferred with `VALID && READY`
    pub accepted_beats: u64,
}

/// Data and markers held during a stall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallPayload {
    /// `tdata`
    pub data: u128,
    /// `tlast`
    pub last: bool,
    /// `tuser`
    pub user: bool,
}

impl From<Beat> for StallPayload {
    fn from(beat: Beat) -> Self {
        Self {
            data: beat.data,
            last: beat.eol,
            user: beat.sof,
        }
    }
}

impl fmt::Display for StallPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(data={:#x}, tlast={}, tuser={})",
            self.data,
            u8::from(self.last),
            u8::from(self.user)
        )
    }
}

/// A broken handshake rule or unmet traffic expectation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    /// A signal held X or Z at a sample point.
    #[error("{signal} is not fully resolved at sample point (cycle {cycle}): {value}")]
    Unresolved {
        /// Full signal name
        signal: String,
        /// Sampled value
        value: Logic,
        /// Checker cycle count
        cycle: u64,
    },

    /// SOF or EOL disagrees with the accepted beat's position.
    #[error("{marker} mismatch on accepted output beat {beat}: observed={observed}, expected={expected}")]
    Sideband {
        /// Which marker
        marker: Marker,
        /// Accepted beat index within the frame
        beat: u64,
        /// Value on the bus
        observed: u8,
        /// Value implied by position
        expected: u8,
    },

    /// Payload changed between two consecutive stalled cycles.
    #[error("output payload changed while stalled (VALID=1, READY=0) at cycle {cycle}: prev={previous}, now={current}")]
    StallPayloadChanged {
        /// Checker cycle count
        cycle: u64,
        /// Payload on the previous stalled cycle
        previous: StallPayload,
        /// Payload now
        current: StallPayload,
    },

    /// Backpressure never produced a long enough READY-low window.
    #[error("backpressure READY-low run too short: observed={observed}, required>={required}")]
    ReadyLowRunTooShort {
        /// Longest run seen
        observed: u64,
        /// Minimum required
        required: u64,
    },

    /// No stall cycle happened although backpressure was applied.
    #[error("expected at least one VALID=1, READY=0 stall cycle")]
    NoStall,

    /// Accepted beat count differs from the frame size.
    #[error("output accepted-beat count mismatch: observed={observed}, expected={expected}")]
    AcceptedBeats {
        /// Beats seen
        observed: u64,
        /// Beats in the frame
        expected: u64,
    },
}

/// Errors from running the checker task.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A rule was broken.
    #[error(transparent)]
    Violation(#[from] ProtocolViolation),

    /// The frame did not complete within the checker budget.
    #[error("protocol checker did not finish within {timeout:?}: {accepted}/{expected} beats accepted")]
    Timeout {
        /// Budget
        timeout: Duration,
        /// Beats seen so far
        accepted: u64,
        /// Beats required
        expected: u64,
    },

    /// Kernel failure (task cancelled or not spawned).
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// Post-frame expectations evaluated against [`HandshakeStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandshakeExpectations {
    /// Required longest READY-low run (0 = no requirement)
    pub min_ready_low_run: u64,
    /// Require at least one stall cycle
    pub require_stall: bool,
    /// Exact number of accepted beats
    pub expected_beats: u64,
}

impl HandshakeStats {
    /// Check collected statistics against expectations.
    ///
    /// # Errors
    ///
    /// Returns the first unmet expectation.
    pub fn check(&self, expect: &HandshakeExpectations) -> Result<(), ProtocolViolation> {
        if expect.min_ready_low_run > 0 && self.max_ready_low_run < expect.min_ready_low_run {
            return Err(ProtocolViolation::ReadyLowRunTooShort {
                observed: self.max_ready_low_run,
                required: expect.min_ready_low_run,
            });
        }
        if expect.require_stall && !self.saw_stall {
            return Err(ProtocolViolation::NoStall);
        }
        if self.accepted_beats != expect.expected_beats {
            return Err(ProtocolViolation::AcceptedBeats {
                observed: self.accepted_beats,
                expected: expect.expected_beats,
            });
        }
        Ok(())
    }
}

/// Cycle-by-cycle rule engine, independent of the simulator.
#[derive(Debug, Clone)]
pub struct HandshakeChecker {
    prefix: String,
    beats_per_line: usize,
    expected_beats: u64,
    stats: HandshakeStats,
    ready_low_run: u64,
    prev_stall: Option<StallPayload>,
    cycle: u64,
}

impl HandshakeChecker {
    /// Rules for one `width x height` frame carried in `format`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::LineAlignment` if rows do not fill whole beats.
    pub fn new(
        prefix: &str,
        format: StreamFormat,
        width: usize,
        height: usize,
    ) -> Result<Self, ConfigError> {
        let beats_per_line = format.beats_per_line(width)?;
        Ok(Self {
            prefix: prefix.to_string(),
            beats_per_line,
            expected_beats: (beats_per_line * height) as u64,
            stats: HandshakeStats::default(),
            ready_low_run: 0,
            prev_stall: None,
            cycle: 0,
        })
    }

    /// Statistics so far
    pub fn stats(&self) -> HandshakeStats {
        self.stats
    }

    /// Beats in the monitored frame
    pub fn expected_beats(&self) -> u64 {
        self.expected_beats
    }

    /// Whether every beat of the frame has been accepted
    pub fn is_complete(&self) -> bool {
        self.stats.accepted_beats >= self.expected_beats
    }

    /// Evaluate one sampled cycle.
    ///
    /// # Errors
    ///
    /// Returns the first rule broken on this cycle.
    pub fn observe(&mut self, sample: &BusSample, in_reset: bool) -> Result<(), ProtocolViolation> {
        self.cycle += 1;

        if let Some((name, value)) = sample.first_unresolved() {
            return Err(ProtocolViolation::Unresolved {
                signal: format!("{}_{}", self.prefix, name),
                value,
                cycle: self.cycle,
            });
        }

        if in_reset {
            self.stats.accepted_beats = 0;
            self.ready_low_run = 0;
            self.prev_stall = None;
            return Ok(());
        }

        if sample.ready() {
            self.ready_low_run = 0;
        } else {
            self.ready_low_run += 1;
            self.stats.max_ready_low_run = self.stats.max_ready_low_run.max(self.ready_low_run);
        }

        // All values are resolved past the check above.
        let Some(beat) = sample.beat() else {
            return Ok(());
        };

        if sample.fire() {
            let index = self.stats.accepted_beats;
            let (sof, eol) = StreamFormat::expected_markers(index as usize, self.beats_per_line);
            if beat.sof != sof {
                return Err(self.sideband(Marker::Sof, beat.sof, sof));
            }
            if beat.eol != eol {
                return Err(self.sideband(Marker::Eol, beat.eol, eol));
            }
            self.stats.accepted_beats += 1;
        }

        if sample.stalled() {
            self.stats.saw_stall = true;
            let current = StallPayload::from(beat);
            if let Some(previous) = self.prev_stall {
                if previous != current {
                    return Err(ProtocolViolation::StallPayloadChanged {
                        cycle: self.cycle,
                        previous,
                        current,
                    });
                }
            }
            self.prev_stall = Some(current);
        } else {
            self.prev_stall = None;
        }

        Ok(())
    }

    fn sideband(&self, marker: Marker, observed: bool, expected: bool) -> ProtocolViolation {
        ProtocolViolation::Sideband {
            marker,
            beat: self.stats.accepted_beats,
            observed: u8::from(observed),
            expected: u8::from(expected),
        }
    }
}

/// Background checker task bound to an interface
pub struct ProtocolChecker {
    handle: SimHandle,
    expected_beats: u64,
    live: Rc<RefCell<HandshakeStats>>,
    task: TaskHandle<Result<HandshakeStats, ProtocolViolation>>,
}

impl ProtocolChecker {
    /// Spawn a checker that runs until the frame's beats are all accepted or
    /// a rule is broken.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor rejects the task.
    pub fn start(
        handle: &SimHandle,
        ports: &AxisPorts,
        clk: &Signal,
        reset: Option<ResetPort>,
        mut checker: HandshakeChecker,
    ) -> Result<Self, SimError> {
        let live = Rc::new(RefCell::new(HandshakeStats::default()));
        let expected_beats = checker.expected_beats();
        let (ports, clk, shared) = (ports.clone(), clk.clone(), Rc::clone(&live));

        let task = handle.spawn(format!("checker:{}", ports.prefix), async move {
            while !checker.is_complete() {
                clk.rising_edge().await;
                let in_reset = reset.as_ref().is_some_and(ResetPort::is_active);
                let result = checker.observe(&ports.sample(), in_reset);
                *shared.borrow_mut() = checker.stats();
                if let Err(violation) = result {
                    log::error!("Protocol violation on {}: {}", ports.prefix, violation);
                    return Err(violation);
                }
            }
            log::debug!("Checker on {} done: {:?}", ports.prefix, checker.stats());
            Ok(checker.stats())
        })?;

        Ok(Self {
            handle: handle.clone(),
            expected_beats,
            live,
            task,
        })
    }

    /// Statistics so far (also valid after cancellation)
    pub fn stats(&self) -> HandshakeStats {
        *self.live.borrow()
    }

    /// Cancel the checker without waiting for it.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Wait for the checker to finish, at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Violation` for a broken rule and
    /// `ProtocolError::Timeout` if the frame never completes.
    pub async fn finish(self, timeout: Duration) -> Result<HandshakeStats, ProtocolError> {
        let Self {
            handle,
            expected_beats,
            live,
            task,
        } = self;
        match with_timeout(&handle, task.join(), timeout).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(ProtocolError::Timeout {
                timeout,
                accepted: live.borrow().accepted_beats,
                expected: expected_beats,
            }),
        }
    }
}
