//! Stand-in designs for exercising the testbench without an HDL simulator
//!
//! Both models sit between the testbench's input stream (`s_axis_video`) and
//! output stream (`m_axis_video`) and may apply a per-word transform, e.g.
//! [`crate::reference::gray_word_from_rgb24`].
//!
//! - [`Passthrough`]: combinational wires, output follows input within the
//!   same time step; `s_tready` mirrors `m_tready`.
//! - [`RegisterSlice`]: two-entry registered buffer. Output and `s_tready` change
//!   only on rising edges; full throughput when the sink never stalls.

use std::collections::VecDeque;

use crate::beat::Beat;
use crate::scenario::DutPorts;
use crate::sim::{any_change, Logic, SimError, SimHandle, TaskHandle};

/// Per-word data transform
pub type WordFn = fn(u128) -> u128;

fn identity(word: u128) -> u128 {
    word
}

/// Combinational wire-through model
#[derive(Debug, Clone, Copy)]
pub struct Passthrough {
    transform: WordFn,
}

impl Default for Passthrough {
    fn default() -> Self {
        Self {
            transform: identity,
        }
    }
}

impl Passthrough {
    /// Identity model
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transform` to every data word on the way through.
    pub fn with_transform(transform: WordFn) -> Self {
        Self { transform }
    }

    /// Spawn the model on the testbench ports.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor rejects the task.
    pub fn start(self, handle: &SimHandle, ports: &DutPorts) -> Result<TaskHandle<()>, SimError> {
        let DutPorts {
            reset,
            input,
            output,
            ..
        } = ports.clone();
        let transform = self.transform;
        let watched = vec![
            input.valid.clone(),
            input.data.clone(),
            input.last.clone(),
            input.user.clone(),
            output.ready.clone(),
            reset.signal.clone(),
        ];

        handle.spawn("dut:passthrough", async move {
            loop {
                if reset.is_active() {
                    output.drive_idle();
                    input.ready.set_bool(false);
                } else {
                    output.valid.set_logic(input.valid.get());
                    output.data.set_logic(match input.data.get() {
                        Logic::Bits(word) => Logic::Bits(transform(word)),
                        other => other,
                    });
                    output.last.set_logic(input.last.get());
                    output.user.set_logic(input.user.get());
                    input.ready.set_logic(output.ready.get());
                }
                any_change(&watched).await;
            }
        })
    }
}

/// Registered two-entry buffer model
#[derive(Debug, Clone, Copy)]
pub struct RegisterSlice {
    transform: WordFn,
}

impl Default for RegisterSlice {
    fn default() -> Self {
        Self {
            transform: identity,
        }
    }
}

impl RegisterSlice {
    /// Entries held before `s_tready` drops
    pub const DEPTH: usize = 2;

    /// Identity model
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `transform` to every data word as it is registered.
    pub fn with_transform(transform: WordFn) -> Self {
        Self { transform }
    }

    /// Spawn the model on the testbench ports.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor rejects the task.
    pub fn start(self, handle: &SimHandle, ports: &DutPorts) -> Result<TaskHandle<()>, SimError> {
        let DutPorts {
            clk,
            reset,
            input,
            output,
        } = ports.clone();
        let transform = self.transform;

        handle.spawn("dut:register_slice", async move {
            let mut queue: VecDeque<Beat> = VecDeque::with_capacity(Self::DEPTH);
            output.drive_idle();
            input.ready.set_bool(false);

            loop {
                clk.rising_edge().await;

                if reset.is_active() {
                    queue.clear();
                    output.drive_idle();
                    input.ready.set_bool(false);
                    continue;
                }

                // Both handshakes use the values that were present at the edge.
                let out = output.sample();
                let inp = input.sample();
                if out.fire() {
                    queue.pop_front();
                }
                if inp.fire() {
                    match inp.beat() {
                        Some(beat) => queue.push_back(Beat {
                            data: transform(beat.data),
                            ..beat
                        }),
                        None => log::warn!("register slice: accepted unresolved beat {:?}", inp),
                    }
                }

                match queue.front() {
                    Some(beat) => output.drive(beat),
                    None => output.drive_idle(),
                }
                input.ready.set_bool(queue.len() < Self::DEPTH);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::AxisPorts;
    use crate::reset::{ResetPolarity, ResetPort};
    use crate::sim::{Clock, SimConfig, Simulator};
    use std::time::Duration;

    fn ports(h: &SimHandle) -> DutPorts {
        DutPorts {
            clk: h.signal("clk", 1),
            reset: ResetPort::new(h.signal("rst", 1), ResetPolarity::ActiveHigh),
            input: AxisPorts::new(h, "s_axis_video", 24),
            output: AxisPorts::new(h, "m_axis_video", 24),
        }
    }

    #[test]
    fn test_passthrough_follows_input_and_ready() {
        let mut sim = Simulator::new(SimConfig::default());
        let h = sim.handle();
        let p = ports(&h);

        let observed = sim
            .run({
                let p = p.clone();
                async move {
                    let _dut = Passthrough::with_transform(|w| w + 1).start(&h, &p)?;
                    p.reset.release();
                    p.output.ready.set_bool(false);
                    p.input.drive(&Beat {
                        data: 41,
                        sof: true,
                        eol: false,
                    });
                    h.timer(Duration::from_nanos(1)).await;
                    Ok::<_, SimError>((p.output.sample(), p.input.ready.get()))
                }
            })
            .unwrap()
            .unwrap();

        let (out, s_ready) = observed;
        assert!(out.stalled());
        assert_eq!(out.data, Logic::Bits(42));
        assert_eq!(out.user, Logic::Bits(1));
        assert_eq!(s_ready, Logic::Bits(0));
    }

    #[test]
    fn test_register_slice_holds_while_stalled() {
        let mut sim = Simulator::new(SimConfig::default());
        let h = sim.handle();
        let p = ports(&h);

        let (first, stalled, s_ready) = sim
            .run({
                let p = p.clone();
                async move {
                    let _clock = Clock::start(&h, &p.clk, Duration::from_nanos(10))?;
                    let _dut = RegisterSlice::new().start(&h, &p)?;
                    p.reset.release();
                    p.output.ready.set_bool(false);
                    p.input.drive(&Beat::plain(7));

                    // Edge 1 raises s_tready, edges 2 and 3 fill both entries.
                    for _ in 0..4 {
                        p.clk.rising_edge().await;
                    }
                    let first = p.output.sample();
                    p.clk.rising_edge().await;
                    let stalled = p.output.sample();
                    Ok::<_, SimError>((first, stalled, p.input.ready.get()))
                }
            })
            .unwrap()
            .unwrap();

        assert_eq!(first.data, Logic::Bits(7));
        assert!(first.stalled());
        assert_eq!(first, stalled);
        // Two entries buffered and the sink is stalled.
        assert_eq!(s_ready, Logic::Bits(0));
    }
}
