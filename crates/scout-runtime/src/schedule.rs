//! Cancellable scheduled tasks: a handle with `.cancel()` returned by
//! `schedule_after`, replacing timer juggling through shared mutable cells.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Cancels the pending run. Has no effect once the task body started
    /// completing; in-flight I/O inside the body is not interrupted by the
    /// scheduler design, only the next scheduled run is.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs `task` once after `delay` on the current tokio runtime.
pub fn schedule_after<F>(delay: Duration, task: F) -> ScheduledTask
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    });
    ScheduledTask { handle }
}
