//! Module lifecycle: load, initialization, tick trigger and teardown.
//!
//! Initialization runs in a fixed order and stops at the first fatal step:
//!
//! 1. Refuse to load on uniprocessor platforms (`PermissionDenied`).
//! 2. Create the notifier worker. Failure only disables deferred
//!    notification.
//! 3. Reset the timer state to its defaults.
//! 4. Create `cpuN/<node_name>` and register the attribute group. Failure
//!    releases the node and reports `OutOfMemory`.
//! 5. Announce the node and mark the module initialized.
//!
//! The initialized flag is raised at the end of step 5 even when step 4
//! failed; [`RqStats::attributes_registered`] reports whether the
//! attributes actually exist.

use crate::attributes::{CommandAttribute, DefTimerAttribute, DEF_TIMER_ATTR, MPCTL_ATTR};
use crate::clock::Clock;
use crate::notifier::DeferredNotifier;
use crate::platform::Platform;
use crate::sysfs::{AttributeGroup, AttributeTree, NodePath};
use crate::timer_state::TimerState;
use rq_common::config::RqStatsConfig;
use rq_common::error::{RqError, RqResult};
use rq_common::state::NotifierState;
use serde::Serialize;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Point-in-time view of the module, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Initialization ran to its end.
    pub initialized: bool,
    /// The attribute group exists.
    pub attributes_registered: bool,
    /// Path of the attribute directory, when registered.
    pub node: Option<String>,
    /// Rearm interval in ticks.
    pub interval_ticks: u64,
    /// Rearm interval in milliseconds.
    pub interval_ms: u64,
    /// Timestamp measurement starts from.
    pub start_time_ns: i64,
    /// Value a `def_timer_ms` read would report now.
    pub elapsed_ms: u32,
    /// Tick at which the trigger last fired.
    pub last_jiffy: u64,
    /// State of the notifier work item.
    pub notifier_state: NotifierState,
    /// A worker backs the notifier.
    pub notifier_active: bool,
    /// Times the notifier was queued.
    pub notifications_scheduled: u64,
    /// Times the notifier announced a change.
    pub notifications_delivered: u64,
    /// Stored command, when the command attribute is enabled.
    pub command: Option<String>,
}

/// The deferred-timer attribute module.
#[derive(Debug)]
pub struct RqStats {
    config: RqStatsConfig,
    platform: Arc<dyn Platform>,
    clock: Arc<dyn Clock>,
    tree: Arc<dyn AttributeTree>,
    state: Arc<TimerState>,
    notifier: Option<DeferredNotifier>,
    node: Option<NodePath>,
    initialized: bool,
    attributes_registered: bool,
}

assert_impl_all!(RqStats: Send, Sync);

impl RqStats {
    /// Load the module without initializing it.
    ///
    /// # Errors
    ///
    /// [`RqError::InvalidArgument`] if the configuration does not validate.
    pub fn new(config: RqStatsConfig, platform: Arc<dyn Platform>) -> RqResult<Self> {
        config
            .validate()
            .map_err(|e| RqError::InvalidArgument(e.to_string()))?;

        let clock = platform.clock();
        let tree = platform.attribute_tree();
        let command_capacity = config.command.enabled.then_some(config.command.capacity);
        let state = Arc::new(TimerState::new(
            clock.now_ns(),
            config.default_interval_ticks,
            command_capacity,
        ));

        Ok(Self {
            config,
            platform,
            clock,
            tree,
            state,
            notifier: None,
            node: None,
            initialized: false,
            attributes_registered: false,
        })
    }

    /// Load and initialize in one step.
    ///
    /// The module is returned even when initialization reported an error,
    /// mirroring a loader that keeps the module resident.
    pub fn load(config: RqStatsConfig, platform: Arc<dyn Platform>) -> RqResult<(Self, RqResult<()>)> {
        let mut module = Self::new(config, platform)?;
        let outcome = module.init();
        Ok((module, outcome))
    }

    /// Run the initialization sequence.
    ///
    /// # Errors
    ///
    /// - [`RqError::PermissionDenied`] on a uniprocessor platform.
    /// - [`RqError::OutOfMemory`] if the node or attribute group cannot be created.
    /// - [`RqError::NotFound`] if the configured CPU has no device node.
    /// - [`RqError::InvalidArgument`] if the module is already initialized.
    pub fn init(&mut self) -> RqResult<()> {
        if self.initialized || self.notifier.is_some() {
            return Err(RqError::InvalidArgument("rq-stats already initialized".into()));
        }

        if !self.platform.is_smp() {
            self.initialized = false;
            warn!("Not an SMP target, rq-stats unavailable");
            return Err(RqError::PermissionDenied("rq-stats requires SMP".into()));
        }

        let queue = match self.platform.create_worker(&self.config.worker_name) {
            Ok(queue) => Some(queue),
            Err(e) => {
                warn!(error = %e, "Notifier worker unavailable, deferred notification disabled");
                None
            }
        };
        self.notifier = Some(DeferredNotifier::new(Arc::clone(&self.tree), queue));

        let interval = self.config.default_interval_ticks;
        self.state.reset(self.clock.now_ns(), interval);
        let interval_ms = self.config.tick_rate_hz.ticks_to_msecs(interval);
        debug!(
            ticks = %interval,
            period = %humantime::format_duration(Duration::from_millis(interval_ms)),
            "Timer state reset"
        );

        let result = self.register_attributes();

        self.initialized = true;
        match &result {
            Ok(()) => info!(node = ?self.node, "rq-stats initialized"),
            Err(e) => warn!(error = %e, "rq-stats initialized without attributes"),
        }
        result
    }

    fn register_attributes(&mut self) -> RqResult<()> {
        let cpu = self.config.cpu;
        let parent = self
            .tree
            .cpu_device(cpu)
            .ok_or_else(|| RqError::NotFound(format!("cpu{cpu} device")))?;

        let node = self
            .tree
            .create_node(&parent, &self.config.node_name)
            .map_err(|e| into_out_of_memory(e, &self.config.node_name))?;

        let mut group = AttributeGroup::default();
        group.attrs.push(
            DefTimerAttribute::new(
                Arc::clone(&self.state),
                Arc::clone(&self.clock),
                self.config.tick_rate_hz,
            )
            .into_attribute(),
        );
        if self.config.command.enabled {
            group.attrs.push(
                CommandAttribute::new(Arc::clone(&self.state), Arc::clone(&self.tree), node.clone())
                    .into_attribute(),
            );
        }

        if let Err(e) = self.tree.create_group(&node, &group) {
            self.tree.release_node(&node);
            return Err(into_out_of_memory(e, node.as_str()));
        }

        self.tree.announce_add(&node);
        if let Some(notifier) = &self.notifier {
            notifier.bind(node.clone());
        }
        self.node = Some(node);
        self.attributes_registered = true;
        Ok(())
    }

    /// Tick hook for an external trigger.
    ///
    /// Queues a notification once a full rearm interval has passed since the
    /// last firing. Returns whether a notification was queued.
    pub fn on_tick(&self, jiffies: u64) -> bool {
        if !self.initialized || !self.state.try_expire(jiffies) {
            return false;
        }
        self.schedule_notification()
    }

    /// Queue a `def_timer_ms` change announcement on the worker.
    ///
    /// Returns false if one is pending, the worker is missing, or the module
    /// is not initialized.
    pub fn schedule_notification(&self) -> bool {
        self.notifier.as_ref().is_some_and(DeferredNotifier::schedule)
    }

    /// Wait for queued announcements to run.
    pub fn flush_notifications(&self, timeout: Duration) -> bool {
        self.notifier.as_ref().is_some_and(|n| n.flush(timeout))
    }

    /// Remove the attributes and stop the worker. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(node) = self.node.take() {
            if let Some(notifier) = &self.notifier {
                notifier.unbind();
            }
            self.tree.release_node(&node);
        }
        if let Some(notifier) = self.notifier.take() {
            notifier.shutdown(self.config.drain_timeout);
        }
        if self.initialized {
            info!("rq-stats unloaded");
        }
        self.initialized = false;
        self.attributes_registered = false;
    }

    /// Initialization ran to its end (even if registration failed).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The attribute group exists.
    #[must_use]
    pub fn attributes_registered(&self) -> bool {
        self.attributes_registered
    }

    /// Path of the attribute directory, when registered.
    #[must_use]
    pub fn node_path(&self) -> Option<&NodePath> {
        self.node.as_ref()
    }

    /// Full path of `def_timer_ms`, when registered.
    #[must_use]
    pub fn def_timer_path(&self) -> Option<String> {
        self.node.as_ref().map(|n| format!("{n}/{DEF_TIMER_ATTR}"))
    }

    /// Full path of `mpctl`, when registered and enabled.
    #[must_use]
    pub fn command_path(&self) -> Option<String> {
        self.node
            .as_ref()
            .filter(|_| self.config.command.enabled)
            .map(|n| format!("{n}/{MPCTL_ATTR}"))
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &RqStatsConfig {
        &self.config
    }

    /// Shared timer state.
    #[must_use]
    pub fn timer(&self) -> &Arc<TimerState> {
        &self.state
    }

    /// Current notifier state; IDLE before initialization.
    #[must_use]
    pub fn notifier_state(&self) -> NotifierState {
        self.notifier
            .as_ref()
            .map_or(NotifierState::Idle, DeferredNotifier::state)
    }

    /// Capture module state for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let values = self.state.values();
        let notifier = self.notifier.as_ref();

        StatsSnapshot {
            initialized: self.initialized,
            attributes_registered: self.attributes_registered,
            node: self.node.as_ref().map(ToString::to_string),
            interval_ticks: values.rearm_interval.get(),
            interval_ms: self.config.tick_rate_hz.ticks_to_msecs(values.rearm_interval),
            start_time_ns: values.start_time_ns,
            elapsed_ms: self.state.elapsed_ms(self.clock.now_ns()),
            last_jiffy: values.last_jiffy,
            notifier_state: self.notifier_state(),
            notifier_active: notifier.is_some_and(DeferredNotifier::is_active),
            notifications_scheduled: notifier.map_or(0, DeferredNotifier::scheduled_count),
            notifications_delivered: notifier.map_or(0, DeferredNotifier::delivered_count),
            command: values
                .command
                .map(|c| String::from_utf8_lossy(&c).into_owned()),
        }
    }
}

impl Drop for RqStats {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn into_out_of_memory(err: RqError, what: &str) -> RqError {
    match err {
        RqError::OutOfMemory(_) => err,
        other => RqError::OutOfMemory(format!("cannot create {what}: {other}")),
    }
}
