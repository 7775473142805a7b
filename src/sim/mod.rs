//! Event-driven simulation kernel
//!
//! Plays the role an HDL simulator plays for a cocotb-style testbench: it
//! owns simulated time, shared signals and a single-threaded cooperative
//! executor on which drivers, monitors and stand-in designs run as tasks.
//!
//! Each time step is evaluated as:
//!
//! ```text
//! run runnable tasks -> commit writes (fires edges) -> repeat until no writes
//!                    -> read-only phase (settled sampling) -> next timer
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use axis_video_tb::sim::{Clock, SimConfig, Simulator};
//!
//! let mut sim = Simulator::new(SimConfig::default());
//! let h = sim.handle();
//! let clk = h.signal("clk", 1);
//! let cycles = sim.run(async move {
//!     let _clock = Clock::start(&h, &clk, Duration::from_nanos(10))?;
//!     h.clock_cycles(&clk, 4).await;
//!     Ok::<_, axis_video_tb::sim::SimError>(h.now_ps())
//! })??;
//! ```

mod clock;
mod signal;
mod task;
mod trigger;

pub use clock::Clock;
pub use signal::{any_change, Logic, Signal, MAX_SIGNAL_WIDTH};
pub use task::TaskHandle;
pub use trigger::Trigger;

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{abortable, Either};
use futures::task::LocalSpawnExt;
use futures::FutureExt;
use thiserror::Error;

use trigger::{fire_all, TriggerSlot};

/// Default bound on delta cycles evaluated within one time step
const DEFAULT_MAX_DELTAS: usize = 10_000;

/// Errors raised by the simulation kernel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// A timeout-bounded wait expired.
    #[error("timed out after {timeout:?} of simulated time")]
    Timeout {
        /// Budget that expired
        timeout: Duration,
    },

    /// The global simulation time limit was reached.
    #[error("simulation time limit of {limit:?} exceeded")]
    TimeLimit {
        /// Configured limit
        limit: Duration,
    },

    /// Nothing is scheduled but the main task has not finished.
    #[error("simulation deadlocked at {at_ps} ps: no timers pending and main task unfinished")]
    Deadlock {
        /// Simulated time when the kernel ran out of events
        at_ps: u64,
    },

    /// Combinational activity did not settle.
    #[error("delta cycle limit ({limit}) exceeded at {at_ps} ps")]
    DeltaOverflow {
        /// Configured delta bound
        limit: usize,
        /// Simulated time of the runaway step
        at_ps: u64,
    },

    /// A signal was read as an integer while holding `X` or `Z`.
    #[error("signal {signal} is not fully resolved: {value}")]
    Unresolved {
        /// Signal name
        signal: String,
        /// Sampled value
        value: Logic,
    },

    /// A joined task was cancelled before completing.
    #[error("task {task} was cancelled")]
    Cancelled {
        /// Task name
        task: String,
    },

    /// The executor refused a new task.
    #[error("executor rejected task {task}")]
    Spawn {
        /// Task name
        task: String,
    },

    /// Clock period too short to toggle.
    #[error("clock period must be at least 2 ps, got {period:?}")]
    InvalidClockPeriod {
        /// Requested period
        period: Duration,
    },
}

/// Result type alias for kernel operations.
pub type Result<T> = std::result::Result<T, SimError>;

/// Kernel configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Abort the run once simulated time passes this point (None = unbounded).
    pub time_limit: Option<Duration>,
    /// Maximum delta cycles per time step before reporting a combinational loop.
    pub max_deltas: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            time_limit: Some(Duration::from_millis(100)),
            max_deltas: DEFAULT_MAX_DELTAS,
        }
    }
}

pub(crate) fn duration_to_ps(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().saturating_mul(1000)).unwrap_or(u64::MAX)
}

struct TimerEntry {
    deadline_ps: u64,
    seq: u64,
    slot: Weak<TriggerSlot>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ps == other.deadline_ps && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline_ps, self.seq).cmp(&(other.deadline_ps, other.seq))
    }
}

/// Shared kernel state reachable from every handle and signal
pub(crate) struct Kernel {
    now_ps: Cell<u64>,
    dirty: RefCell<Vec<Signal>>,
    timers: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    timer_seq: Cell<u64>,
    read_only: RefCell<Vec<Weak<TriggerSlot>>>,
    spawner: LocalSpawner,
}

impl Kernel {
    pub(crate) fn mark_dirty(&self, signal: Signal) {
        self.dirty.borrow_mut().push(signal);
    }

    /// Commit all scheduled writes. Returns false if there were none.
    fn commit_pending(&self) -> bool {
        let dirty = std::mem::take(&mut *self.dirty.borrow_mut());
        if dirty.is_empty() {
            return false;
        }
        for signal in &dirty {
            signal.commit();
        }
        true
    }

    fn has_pending(&self) -> bool {
        !self.dirty.borrow().is_empty()
    }

    fn next_deadline(&self) -> Option<u64> {
        let mut timers = self.timers.borrow_mut();
        // Drop timers whose trigger was discarded (e.g. the losing side of a timeout).
        while let Some(Reverse(entry)) = timers.peek() {
            if entry.slot.strong_count() > 0 {
                return Some(entry.deadline_ps);
            }
            timers.pop();
        }
        None
    }

    fn advance_to(&self, deadline_ps: u64) {
        self.now_ps.set(deadline_ps);
        let mut timers = self.timers.borrow_mut();
        while let Some(Reverse(entry)) = timers.peek() {
            if entry.deadline_ps > deadline_ps {
                break;
            }
            if let Some(Reverse(entry)) = timers.pop() {
                if let Some(slot) = entry.slot.upgrade() {
                    slot.fire();
                }
            }
        }
    }
}

/// Cloneable handle used by tasks to create signals, triggers and subtasks.
#[derive(Clone)]
pub struct SimHandle {
    kernel: Rc<Kernel>,
}

impl SimHandle {
    /// Create a new signal, initially `X`.
    pub fn signal(&self, name: impl Into<String>, width: u32) -> Signal {
        Signal::new(name.into(), width, Rc::downgrade(&self.kernel))
    }

    /// Current simulated time in picoseconds
    pub fn now_ps(&self) -> u64 {
        self.kernel.now_ps.get()
    }

    /// Current simulated time
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ps() / 1000)
    }

    /// Resolves once `duration` of simulated time has elapsed.
    pub fn timer(&self, duration: Duration) -> Trigger {
        self.timer_ps(duration_to_ps(duration))
    }

    /// Resolves after `delay_ps` picoseconds.
    pub fn timer_ps(&self, delay_ps: u64) -> Trigger {
        let (trigger, slot) = Trigger::new();
        let seq = self.kernel.timer_seq.get();
        self.kernel.timer_seq.set(seq + 1);
        self.kernel.timers.borrow_mut().push(Reverse(TimerEntry {
            deadline_ps: self.now_ps().saturating_add(delay_ps),
            seq,
            slot,
        }));
        trigger
    }

    /// Resolves in the read-only phase of the current time step, after all
    /// writes have settled.
    pub fn read_only(&self) -> Trigger {
        let (trigger, slot) = Trigger::new();
        self.kernel.read_only.borrow_mut().push(slot);
        trigger
    }

    /// Wait for `cycles` rising edges of `clk`.
    pub async fn clock_cycles(&self, clk: &Signal, cycles: u64) {
        for _ in 0..cycles {
            clk.rising_edge().await;
        }
    }

    /// Spawn a task on the simulation executor.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Spawn` if the executor has shut down.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<TaskHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let name = name.into();
        let done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&done);
        let (future, abort) = abortable(async move {
            let output = future.await;
            flag.set(true);
            output
        });
        let output = self
            .kernel
            .spawner
            .spawn_local_with_handle(future)
            .map_err(|_| SimError::Spawn { task: name.clone() })?;
        log::trace!("Spawned task {}", name);
        Ok(TaskHandle::new(name, abort, done, output))
    }
}

/// Bound a future by simulated time.
///
/// # Errors
///
/// Returns `SimError::Timeout` if `timeout` elapses before `future` completes;
/// the future is dropped in that case.
pub async fn with_timeout<F: Future>(
    handle: &SimHandle,
    future: F,
    timeout: Duration,
) -> Result<F::Output> {
    let timer = handle.timer(timeout);
    futures::pin_mut!(future);
    match futures::future::select(future, timer).await {
        Either::Left((output, _)) => Ok(output),
        Either::Right(((), _)) => Err(SimError::Timeout { timeout }),
    }
}

/// Owner of the executor and simulated timeline.
pub struct Simulator {
    pool: LocalPool,
    handle: SimHandle,
    config: SimConfig,
}

impl Simulator {
    /// Create an idle simulator at time zero.
    pub fn new(config: SimConfig) -> Self {
        let pool = LocalPool::new();
        let kernel = Rc::new(Kernel {
            now_ps: Cell::new(0),
            dirty: RefCell::new(Vec::new()),
            timers: RefCell::new(BinaryHeap::new()),
            timer_seq: Cell::new(0),
            read_only: RefCell::new(Vec::new()),
            spawner: pool.spawner(),
        });
        Self {
            pool,
            handle: SimHandle { kernel },
            config,
        }
    }

    /// Handle for creating signals and spawning tasks
    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    /// Current simulated time in picoseconds
    pub fn now_ps(&self) -> u64 {
        self.handle.now_ps()
    }

    /// Run the simulation until `main` completes and return its output.
    ///
    /// Background tasks still alive when `main` finishes are left suspended;
    /// they are dropped together with the simulator.
    ///
    /// # Errors
    ///
    /// Returns `SimError::TimeLimit` when the configured limit is exceeded,
    /// `SimError::Deadlock` when no event is left to advance time, and
    /// `SimError::DeltaOverflow` when a time step never settles.
    pub fn run<F>(&mut self, main: F) -> Result<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let mut output = self
            .handle
            .kernel
            .spawner
            .spawn_local_with_handle(main)
            .map_err(|_| SimError::Spawn {
                task: "main".to_string(),
            })?;

        loop {
            self.settle()?;

            if let Some(result) = (&mut output).now_or_never() {
                log::debug!("Main task finished at {} ps", self.now_ps());
                return Ok(result);
            }

            let kernel = &self.handle.kernel;
            let Some(deadline_ps) = kernel.next_deadline() else {
                return Err(SimError::Deadlock {
                    at_ps: self.now_ps(),
                });
            };
            if let Some(limit) = self.config.time_limit {
                if deadline_ps > duration_to_ps(limit) {
                    return Err(SimError::TimeLimit { limit });
                }
            }
            kernel.advance_to(deadline_ps);
        }
    }

    /// Evaluate the current time step until no writes remain.
    fn settle(&mut self) -> Result<()> {
        let mut deltas = 0usize;
        loop {
            self.pool.run_until_stalled();

            let kernel = &self.handle.kernel;
            if kernel.commit_pending() {
                deltas += 1;
                if deltas > self.config.max_deltas {
                    return Err(SimError::DeltaOverflow {
                        limit: self.config.max_deltas,
                        at_ps: kernel.now_ps.get(),
                    });
                }
                continue;
            }

            if kernel.read_only.borrow().is_empty() {
                return Ok(());
            }
            fire_all(&kernel.read_only);
            self.pool.run_until_stalled();

            // Tasks resumed by something a read-only task finished (e.g. a
            // joined checker) may have written; evaluate those as new deltas.
            if !self.handle.kernel.has_pending() {
                return Ok(());
            }
        }
    }
}
