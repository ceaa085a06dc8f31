//! Serialized event queue for observer notifications

use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
    Run(Task),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Runs posted closures one at a time, in posting order, on a single
/// worker task.
///
/// Posting never blocks and may happen from any thread. A panicking closure
/// is logged and does not stop the worker. Must be created inside a Tokio
/// runtime.
pub struct EventDispatcher {
    job_tx: mpsc::UnboundedSender<Job>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(job_rx));

        Self {
            job_tx,
            worker: std::sync::Mutex::new(Some(worker)),
        }
    }

    async fn run(mut job_rx: mpsc::UnboundedReceiver<Job>) {
        debug!("Event dispatcher started");
        while let Some(job) = job_rx.recv().await {
            match job {
                Job::Run(task) => {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("Event handler panicked");
                    }
                }
                Job::Flush(done) => {
                    let _ = done.send(());
                }
                Job::Shutdown(done) => {
                    let _ = done.send(());
                    break;
                }
            }
        }
        debug!("Event dispatcher stopped");
    }

    /// Queue `task`. Returns false once the dispatcher has shut down.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.job_tx.send(Job::Run(Box::new(task))).is_ok()
    }

    /// Wait until every task posted before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.job_tx.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Run the tasks already queued, then stop the worker
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.job_tx.send(Job::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.job_tx.is_closed()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
