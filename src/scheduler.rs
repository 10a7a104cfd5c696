//! Single-slot cancellable delayed task.
//!
//! Each slot holds at most one scheduled task. Scheduling replaces whatever
//! was pending, which is exactly debounce. When the timer fires, the work is
//! spawned as its own task and receives a ticket; the owner must `claim` the
//! ticket before acting so that a task superseded between firing and running
//! turns into a no-op.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct DelayedTask {
    handle: Option<JoinHandle<()>>,
    ticket: u64,
}

impl DelayedTask {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay`, cancelling anything already scheduled.
    pub fn schedule<F, Fut>(&mut self, delay: Duration, task: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.ticket = self.ticket.wrapping_add(1);
        let ticket = self.ticket;

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach the work so that rescheduling this slot from inside it
            // cannot abort it.
            tokio::spawn(task(ticket));
        }));

        ticket
    }

    /// Returns `true` if something was pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                self.ticket = self.ticket.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    /// Marks the task identified by `ticket` as fired. Returns `false` if it
    /// was cancelled or replaced in the meantime.
    pub fn claim(&mut self, ticket: u64) -> bool {
        if self.handle.is_some() && self.ticket == ticket {
            self.handle = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
