//! Owned handles to background simulation tasks.

use std::cell::Cell;
use std::rc::Rc;

use futures::future::{AbortHandle, Aborted, RemoteHandle};

use super::SimError;

/// Handle to a task running on the simulation executor.
///
/// Dropping the handle cancels the task. Call [`TaskHandle::detach`] to let
/// it run until the simulation ends instead.
#[must_use = "dropping a TaskHandle cancels the task"]
pub struct TaskHandle<T> {
    name: String,
    abort: AbortHandle,
    done: Rc<Cell<bool>>,
    output: Option<RemoteHandle<Result<T, Aborted>>>,
}

impl<T: 'static> TaskHandle<T> {
    pub(crate) fn new(
        name: String,
        abort: AbortHandle,
        done: Rc<Cell<bool>>,
        output: RemoteHandle<Result<T, Aborted>>,
    ) -> Self {
        Self {
            name,
            abort,
            done,
            output: Some(output),
        }
    }

    /// Task name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation.
    ///
    /// The task stops at its next suspension point without being polled again.
    pub fn cancel(&self) {
        if !self.abort.is_aborted() {
            log::debug!("Cancelling task {}", self.name);
            self.abort.abort();
        }
    }

    /// Whether the task has completed, been cancelled, or is gone.
    pub fn is_finished(&self) -> bool {
        self.abort.is_aborted() || self.output.is_none() || self.done.get()
    }

    /// Wait for the task to finish and return its output.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Cancelled` if the task was cancelled before it finished.
    pub async fn join(mut self) -> Result<T, SimError> {
        let name = std::mem::take(&mut self.name);
        match self.output.take() {
            Some(output) => output.await.map_err(|Aborted| SimError::Cancelled { task: name }),
            None => Err(SimError::Cancelled { task: name }),
        }
    }

    /// Let the task keep running after the handle is dropped.
    pub fn detach(mut self) {
        if let Some(output) = self.output.take() {
            output.forget();
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("cancelled", &self.abort.is_aborted())
            .finish()
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if self.output.is_some() {
            self.abort.abort();
        }
    }
}
