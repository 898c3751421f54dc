//! Background tasks owned by a cluster.

use std::future::Future;
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runs a cluster's background tasks and stops them all on shutdown.
///
/// Every task observes the scheduler's cancellation token; tasks that need
/// to be stopped individually take a [`child_token`](Self::child_token).
/// Dropping the scheduler shuts it down.
#[derive(Debug)]
pub struct BackgroundScheduler {
    handle: Handle,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundScheduler {
    /// Creates a scheduler spawning onto `handle`, with room for `capacity` tasks.
    pub fn new(handle: Handle, capacity: usize) -> Self {
        Self {
            handle,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Returns a token cancelled when the scheduler shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawns a task. Does nothing once the scheduler has shut down.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!(task = name, "scheduler shut down, not spawning");
            return;
        }

        let token = self.token.clone();
        let handle = self.handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {}
            }
            tracing::trace!(task = name, "background task finished");
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Returns the number of tasks still running.
    pub fn task_count(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Returns `true` once the scheduler has shut down.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels and aborts every task.
    pub fn shutdown(&self) {
        self.token.cancel();
        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
