//! Deferred change notification for `def_timer_ms`.
//!
//! Writers never announce timer changes themselves. An external trigger
//! calls [`DeferredNotifier::schedule`], which queues one work item on the
//! dedicated worker; the worker then announces the change so pollers wake
//! and re-read. Triggers arriving while an item is pending are coalesced.

use crate::attributes::DEF_TIMER_ATTR;
use crate::sysfs::{AttributeTree, NodePath};
use crate::workqueue::WorkQueue;
use rq_common::state::{NotifierMachine, NotifierState};
use rq_common::sync::lock_or_recover;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    lock_or_recover(mutex, "deferred notifier")
}

/// Work item announcing `def_timer_ms` changes.
#[derive(Debug)]
pub struct DeferredNotifier {
    machine: Arc<Mutex<NotifierMachine>>,
    tree: Arc<dyn AttributeTree>,
    /// Node to announce on; unset until registration succeeds.
    node: Arc<Mutex<Option<NodePath>>>,
    /// `None` when the worker could not be created: the notifier is inert.
    queue: Option<WorkQueue>,
}

impl DeferredNotifier {
    /// Create a notifier running on `queue`.
    #[must_use]
    pub fn new(tree: Arc<dyn AttributeTree>, queue: Option<WorkQueue>) -> Self {
        Self {
            machine: Arc::new(Mutex::new(NotifierMachine::new())),
            tree,
            node: Arc::new(Mutex::new(None)),
            queue,
        }
    }

    /// Whether a worker backs this notifier.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.queue.is_some()
    }

    /// Announce on `node` from now on.
    pub fn bind(&self, node: NodePath) {
        *lock(&self.node) = Some(node);
    }

    /// Stop announcing; pending items become no-ops.
    pub fn unbind(&self) {
        lock(&self.node).take();
    }

    /// Current state of the work item.
    #[must_use]
    pub fn state(&self) -> NotifierState {
        lock(&self.machine).state()
    }

    /// Times the item was queued.
    #[must_use]
    pub fn scheduled_count(&self) -> u64 {
        lock(&self.machine).scheduled_count()
    }

    /// Times the worker ran the announcement.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        lock(&self.machine).delivered_count()
    }

    /// Queue an announcement.
    ///
    /// Returns false if one is already pending or the notifier is inert.
    pub fn schedule(&self) -> bool {
        let Some(queue) = &self.queue else {
            debug!("deferred notifier inert, no worker");
            return false;
        };
        if !lock(&self.machine).try_schedule() {
            return false;
        }

        let machine = Arc::clone(&self.machine);
        let tree = Arc::clone(&self.tree);
        let node = Arc::clone(&self.node);
        if queue.queue(move || announce(&machine, tree.as_ref(), &node)) {
            true
        } else {
            lock(&self.machine).cancel();
            false
        }
    }

    /// Wait for pending announcements. Returns false on timeout or when inert.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.queue.as_ref().is_some_and(|q| q.flush(timeout))
    }

    /// Drain and stop the worker.
    pub fn shutdown(&self, timeout: Duration) {
        if let Some(queue) = &self.queue {
            queue.destroy(timeout);
        }
        lock(&self.machine).cancel();
    }
}

fn announce(machine: &Mutex<NotifierMachine>, tree: &dyn AttributeTree, node: &Mutex<Option<NodePath>>) {
    if let Err(e) = lock(machine).begin_run() {
        warn!("deferred notifier ran while idle: {e}");
    }

    match lock(node).as_ref() {
        Some(node) => tree.notify(node, DEF_TIMER_ATTR),
        None => debug!("deferred notifier has no node, nothing to announce"),
    }
}
