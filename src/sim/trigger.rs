//! Wake-up primitives shared by edges, timers and the read-only phase.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// One-shot wake slot registered with a signal or the kernel.
#[derive(Debug, Default)]
pub(crate) struct TriggerSlot {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl TriggerSlot {
    pub(crate) fn fire(&self) {
        self.fired.set(true);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// Fire every live slot in a waiter list, leaving the list empty.
pub(crate) fn fire_all(list: &RefCell<Vec<Weak<TriggerSlot>>>) {
    let waiters = std::mem::take(&mut *list.borrow_mut());
    for slot in waiters.iter().filter_map(Weak::upgrade) {
        slot.fire();
    }
}

/// Future that resolves once the event it was registered for occurs.
///
/// Triggers register at construction time, so an edge that happens between
/// creating the trigger and first polling it is not lost.
#[derive(Debug)]
#[must_use = "triggers do nothing unless awaited"]
pub struct Trigger {
    slot: Rc<TriggerSlot>,
}

impl Trigger {
    pub(crate) fn new() -> (Self, Weak<TriggerSlot>) {
        let slot = Rc::new(TriggerSlot::default());
        let weak = Rc::downgrade(&slot);
        (Self { slot }, weak)
    }

    /// Whether the underlying event has already happened.
    pub fn has_fired(&self) -> bool {
        self.slot.fired.get()
    }
}

impl Future for Trigger {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.slot.fired.get() {
            return Poll::Ready(());
        }
        *self.slot.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}
