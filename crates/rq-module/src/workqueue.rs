//! Single-threaded work queue.
//!
//! One named worker thread runs queued work items in FIFO order. Work items
//! must not block for long: everything queued behind them waits.

use rq_common::error::{RqError, RqResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use rq_common::sync::lock_or_recover;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Barrier(Sender<()>),
}

/// Dedicated background worker executing work items sequentially.
#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    /// `None` once the queue is destroyed.
    sender: Mutex<Option<Sender<Message>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    executed: Arc<AtomicU64>,
}

impl WorkQueue {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`RqError::WorkerCreation`] if the thread cannot be spawned.
    pub fn single_threaded(name: &str) -> RqResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let executed = Arc::new(AtomicU64::new(0));
        let worker_executed = Arc::clone(&executed);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(receiver, worker_executed))
            .map_err(|e| RqError::WorkerCreation(format!("failed to spawn {name}: {e}")))?;

        info!(worker = name, "Work queue started");
        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            executed,
        })
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of work items the worker has run.
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Acquire)
    }

    /// Queue `work` behind everything already queued.
    ///
    /// Returns false if the queue has been destroyed.
    pub fn queue<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = lock_or_recover(&self.sender, &self.name);
        match sender.as_ref() {
            Some(tx) => tx.send(Message::Run(Box::new(work))).is_ok(),
            None => false,
        }
    }

    /// Wait until everything queued before this call has run.
    ///
    /// Returns false on timeout or if the queue is destroyed.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = mpsc::channel();
        {
            let sender = lock_or_recover(&self.sender, &self.name);
            let Some(tx) = sender.as_ref() else {
                return false;
            };
            if tx.send(Message::Barrier(done_tx)).is_err() {
                return false;
            }
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Drain pending work within `timeout`, then stop the worker.
    ///
    /// Idempotent. If draining times out the thread is detached rather than joined.
    pub fn destroy(&self, timeout: Duration) {
        let drained = self.flush(timeout);

        let sender = lock_or_recover(&self.sender, &self.name).take();
        if sender.is_none() {
            return;
        }
        // Closing the channel ends the worker loop.
        drop(sender);

        let handle = lock_or_recover(&self.handle, &self.name).take();
        match handle {
            Some(handle) if drained => {
                if let Err(e) = handle.join() {
                    warn!(worker = %self.name, "Work queue thread panicked: {:?}", e);
                }
            }
            Some(_) => warn!(worker = %self.name, "Work queue did not drain in time; detaching"),
            None => {}
        }
        info!(worker = %self.name, "Work queue destroyed");
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.destroy(Duration::from_secs(1));
    }
}

fn run_worker(receiver: Receiver<Message>, executed: Arc<AtomicU64>) {
    debug!("Work queue thread started");

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(job) => {
                job();
                executed.fetch_add(1, Ordering::AcqRel);
            }
            Message::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }

    debug!("Work queue thread stopped");
}
