//! Single-thread task queue for observer fan-out.
//!
//! KV-backed mutations commit first and then enqueue an immutable
//! notification record here; the consumer thread owns all callback
//! invocation, so observer reentrancy never interacts with the data locks.
//! FIFO drain order gives per-key program order for concurrent mutations.

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::thread::JoinHandle;
use tracing::debug;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Dedicated background executor draining tasks in FIFO order.
pub struct NotifyExecutor {
    tx: Option<Sender<Task>>,
    handle: Option<JoinHandle<()>>,
}

impl NotifyExecutor {
    pub fn new() -> Self {
        let (tx, rx): (Sender<Task>, Receiver<Task>) = unbounded();
        let handle = std::thread::Builder::new()
            .name("prefstore-notify".into())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
                debug!("notify executor drained and stopped");
            })
            .expect("failed to spawn notify thread");
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Enqueue a task; tasks run strictly in enqueue order.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // Send only fails after shutdown, when dropping the task is fine.
            let _ = tx.send(Box::new(task));
        }
    }

    /// Block until every task enqueued before this call has run.
    pub(crate) fn barrier(&self) {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        self.execute(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

impl Default for NotifyExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotifyExecutor {
    fn drop(&mut self) {
        // Disconnect the channel; the worker drains what is queued and exits.
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
