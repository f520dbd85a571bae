//! Platform services the module runs on.
//!
//! [`Platform`] bundles the collaborators the module does not implement
//! itself: the time source, the attribute tree, worker creation and the
//! multiprocessor capability check.
//!
//! - [`HostPlatform`] uses the host monotonic clock and processor count.
//! - [`SimulatedPlatform`] uses a manual clock and can inject failures.

#![allow(unsafe_code)] // sysconf

use crate::clock::{Clock, ManualClock, MonotonicClock};
use crate::sysfs::{AttributeTree, MemoryTree};
use crate::workqueue::WorkQueue;
use rq_common::error::{RqError, RqResult};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Services provided by the host to the module.
pub trait Platform: Send + Sync + Debug {
    /// Whether the platform supports more than one processor.
    fn is_smp(&self) -> bool;

    /// Time source for timestamps.
    fn clock(&self) -> Arc<dyn Clock>;

    /// Tree the module registers its attributes in.
    fn attribute_tree(&self) -> Arc<dyn AttributeTree>;

    /// Create a dedicated single-threaded worker.
    ///
    /// # Errors
    ///
    /// [`RqError::WorkerCreation`] if the worker cannot be started.
    fn create_worker(&self, name: &str) -> RqResult<WorkQueue> {
        WorkQueue::single_threaded(name)
    }
}

/// Number of processors configured on the host.
#[cfg(unix)]
#[must_use]
pub fn configured_cpus() -> u32 {
    // SAFETY: sysconf is safe to call
    let count = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    u32::try_from(count).unwrap_or(1).max(1)
}

/// Number of processors configured on the host.
#[cfg(not(unix))]
#[must_use]
pub fn configured_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

/// Host clock and processor topology with an in-memory attribute tree.
#[derive(Debug)]
pub struct HostPlatform {
    cpus: u32,
    clock: Arc<MonotonicClock>,
    tree: Arc<MemoryTree>,
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPlatform {
    /// Probe the host.
    #[must_use]
    pub fn new() -> Self {
        let cpus = configured_cpus();
        debug!(cpus, "Host platform probed");
        Self {
            cpus,
            clock: Arc::new(MonotonicClock),
            tree: Arc::new(MemoryTree::new(cpus)),
        }
    }

    /// The attribute tree, for user-space style access.
    #[must_use]
    pub fn tree(&self) -> &Arc<MemoryTree> {
        &self.tree
    }

    /// Configured processor count.
    #[must_use]
    pub fn cpus(&self) -> u32 {
        self.cpus
    }
}

impl Platform for HostPlatform {
    fn is_smp(&self) -> bool {
        self.cpus > 1
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn attribute_tree(&self) -> Arc<dyn AttributeTree> {
        self.tree.clone()
    }
}

/// Deterministic platform for tests.
#[derive(Debug)]
pub struct SimulatedPlatform {
    smp: bool,
    clock: Arc<ManualClock>,
    tree: Arc<MemoryTree>,
    fail_worker: AtomicBool,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::smp(4)
    }
}

impl SimulatedPlatform {
    /// Multiprocessor platform with `cpus` CPUs.
    #[must_use]
    pub fn smp(cpus: u32) -> Self {
        Self {
            smp: true,
            clock: Arc::new(ManualClock::new(0)),
            tree: Arc::new(MemoryTree::new(cpus.max(1))),
            fail_worker: AtomicBool::new(false),
        }
    }

    /// Single-processor platform.
    #[must_use]
    pub fn uniprocessor() -> Self {
        Self {
            smp: false,
            ..Self::smp(1)
        }
    }

    /// Make worker creation fail.
    pub fn fail_worker_creation(&self, fail: bool) {
        self.fail_worker.store(fail, Ordering::Release);
    }

    /// The manual clock.
    #[must_use]
    pub fn manual_clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// The attribute tree, for user-space style access and failure injection.
    #[must_use]
    pub fn tree(&self) -> &Arc<MemoryTree> {
        &self.tree
    }
}

impl Platform for SimulatedPlatform {
    fn is_smp(&self) -> bool {
        self.smp
    }

    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    fn attribute_tree(&self) -> Arc<dyn AttributeTree> {
        self.tree.clone()
    }

    fn create_worker(&self, name: &str) -> RqResult<WorkQueue> {
        if self.fail_worker.load(Ordering::Acquire) {
            return Err(RqError::WorkerCreation(format!(
                "simulated failure creating {name}"
            )));
        }
        WorkQueue::single_threaded(name)
    }
}
