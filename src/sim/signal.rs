//! Shared logic signals with non-blocking write semantics.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::trigger::{fire_all, Trigger, TriggerSlot};
use super::{Kernel, SimError};

/// Widest signal the kernel models (enough for a 3x3 window of 8-bit samples).
pub const MAX_SIGNAL_WIDTH: u32 = 128;

/// Four-state-lite logic value carried by a [`Signal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    /// Fully resolved bit vector
    Bits(u128),
    /// Uninitialised or conflicting value (`X`)
    Unknown,
    /// Undriven value (`Z`)
    HighZ,
}

impl Logic {
    /// Whether every bit carries a binary value.
    pub fn is_resolved(self) -> bool {
        matches!(self, Logic::Bits(_))
    }

    /// The bit vector, if resolved.
    pub fn bits(self) -> Option<u128> {
        match self {
            Logic::Bits(v) => Some(v),
            Logic::Unknown | Logic::HighZ => None,
        }
    }
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logic::Bits(v) => write!(f, "{:#x}", v),
            Logic::Unknown => f.write_str("X"),
            Logic::HighZ => f.write_str("Z"),
        }
    }
}

struct SignalInner {
    name: String,
    width: u32,
    value: Cell<Logic>,
    pending: Cell<Option<Logic>>,
    rising: RefCell<Vec<Weak<TriggerSlot>>>,
    falling: RefCell<Vec<Weak<TriggerSlot>>>,
    changed: RefCell<Vec<Weak<TriggerSlot>>>,
    kernel: Weak<Kernel>,
}

/// Named handle to one wire or bus in the simulated design.
///
/// Reads return the value committed at the end of the last delta cycle.
/// Writes are scheduled and become visible together once every task that
/// was runnable in the current delta has suspended, so tasks resumed on
/// the same clock edge all observe pre-edge values regardless of the
/// order in which they run.
#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalInner>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.inner.name)
            .field("width", &self.inner.width)
            .field("value", &self.inner.value.get())
            .finish()
    }
}

impl Signal {
    pub(crate) fn new(name: String, width: u32, kernel: Weak<Kernel>) -> Self {
        let clamped = width.clamp(1, MAX_SIGNAL_WIDTH);
        if clamped != width {
            log::warn!(
                "Signal {} requested width {} - clamped to {}",
                name,
                width,
                clamped
            );
        }
        Self {
            inner: Rc::new(SignalInner {
                name,
                width: clamped,
                value: Cell::new(Logic::Unknown),
                pending: Cell::new(None),
                rising: RefCell::new(Vec::new()),
                falling: RefCell::new(Vec::new()),
                changed: RefCell::new(Vec::new()),
                kernel,
            }),
        }
    }

    /// Hierarchical name of the signal
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bit width
    pub fn width(&self) -> u32 {
        self.inner.width
    }

    /// Committed value
    pub fn get(&self) -> Logic {
        self.inner.value.get()
    }

    /// Committed value as an integer.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Unresolved` if the signal currently holds `X` or `Z`.
    pub fn value(&self) -> Result<u128, SimError> {
        self.get().bits().ok_or_else(|| SimError::Unresolved {
            signal: self.inner.name.clone(),
            value: self.get(),
        })
    }

    /// True only for a resolved, non-zero value.
    pub fn is_high(&self) -> bool {
        matches!(self.get(), Logic::Bits(v) if v != 0)
    }

    /// Schedule a write of a resolved value, masked to the signal width.
    pub fn set(&self, value: u128) {
        self.set_logic(Logic::Bits(value));
    }

    /// Schedule a single-bit write.
    pub fn set_bool(&self, value: bool) {
        self.set(u128::from(value));
    }

    /// Schedule a write of any logic value.
    pub fn set_logic(&self, value: Logic) {
        let masked = match value {
            Logic::Bits(v) => Logic::Bits(v & self.mask()),
            other => other,
        };
        let first_write = self.inner.pending.replace(Some(masked)).is_none();
        if first_write {
            if let Some(kernel) = self.inner.kernel.upgrade() {
                kernel.mark_dirty(self.clone());
            }
        }
    }

    /// Resolves on the next 0 -> 1 transition.
    pub fn rising_edge(&self) -> Trigger {
        Self::register(&self.inner.rising)
    }

    /// Resolves on the next 1 -> 0 transition.
    pub fn falling_edge(&self) -> Trigger {
        Self::register(&self.inner.falling)
    }

    /// Resolves on the next committed change of value.
    pub fn value_change(&self) -> Trigger {
        Self::register(&self.inner.changed)
    }

    fn register(list: &RefCell<Vec<Weak<TriggerSlot>>>) -> Trigger {
        let (trigger, slot) = Trigger::new();
        list.borrow_mut().push(slot);
        trigger
    }

    fn mask(&self) -> u128 {
        if self.inner.width >= MAX_SIGNAL_WIDTH {
            u128::MAX
        } else {
            (1u128 << self.inner.width) - 1
        }
    }

    /// Apply the pending write; fire edge and change waiters.
    pub(crate) fn commit(&self) {
        let Some(next) = self.inner.pending.take() else {
            return;
        };
        let previous = self.inner.value.replace(next);
        if previous == next {
            return;
        }

        fire_all(&self.inner.changed);
        let one = Logic::Bits(1);
        let zero = Logic::Bits(0);
        if next == one && previous != one {
            fire_all(&self.inner.rising);
        } else if next == zero && previous != zero {
            fire_all(&self.inner.falling);
        }
    }
}

/// Resolves when any of the given signals changes value.
pub fn any_change(signals: &[Signal]) -> Trigger {
    let (trigger, slot) = Trigger::new();
    for signal in signals {
        signal.inner.changed.borrow_mut().push(slot.clone());
    }
    trigger
}
