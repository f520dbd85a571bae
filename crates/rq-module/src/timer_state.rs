//! Deferred-timer state.
//!
//! Every field lives behind one mutex; handlers, the tick trigger and the
//! snapshot path all go through the accessors below. The guarded data is
//! plain values, so a poisoned lock is recovered rather than propagated.

use rq_common::sync::lock_or_recover;
use rq_common::time::{Ticks, NSEC_PER_MSEC};
use std::sync::{Mutex, MutexGuard};

/// Fixed-capacity command string with C string semantics.
///
/// Holds at most `capacity - 1` payload bytes; input is cut at its first
/// NUL byte and then at the capacity bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl CommandBuffer {
    /// Create a buffer holding `"0"`.
    ///
    /// `capacity` counts the terminator slot and must be at least 2.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 2);
        let mut bytes = Vec::with_capacity(capacity);
        bytes.push(b'0');
        Self { bytes, capacity }
    }

    /// Capacity including the terminator slot.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replace the contents; returns the number of bytes kept.
    pub fn set(&mut self, input: &[u8]) -> usize {
        let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
        let kept = end.min(self.capacity - 1);
        self.bytes.clear();
        self.bytes.extend_from_slice(&input[..kept]);
        kept
    }
}

#[derive(Debug)]
struct TimerFields {
    start_time_ns: i64,
    rearm_interval: Ticks,
    last_jiffy: u64,
    command: Option<CommandBuffer>,
}

/// Point-in-time copy of the timer fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerValues {
    /// Timestamp of the last rearm (or of initialization).
    pub start_time_ns: i64,
    /// Current rearm interval.
    pub rearm_interval: Ticks,
    /// Tick at which the trigger last fired.
    pub last_jiffy: u64,
    /// Command string, when the command attribute is enabled.
    pub command: Option<Vec<u8>>,
}

/// Shared deferred-timer state.
#[derive(Debug)]
pub struct TimerState {
    fields: Mutex<TimerFields>,
}

impl TimerState {
    /// Create state started at `now_ns` with the given default interval.
    ///
    /// `command_capacity` enables the command buffer.
    #[must_use]
    pub fn new(now_ns: i64, default_interval: Ticks, command_capacity: Option<usize>) -> Self {
        Self {
            fields: Mutex::new(TimerFields {
                start_time_ns: now_ns,
                rearm_interval: default_interval,
                last_jiffy: 0,
                command: command_capacity.map(CommandBuffer::new),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerFields> {
        lock_or_recover(&self.fields, "timer state")
    }

    /// Whole milliseconds elapsed between the start timestamp and `now_ns`.
    ///
    /// A clock reading before the start timestamp counts as zero elapsed;
    /// values past `u32::MAX` clamp.
    #[must_use]
    pub fn elapsed_ms(&self, now_ns: i64) -> u32 {
        let start = self.lock().start_time_ns;
        let diff_ns = now_ns.saturating_sub(start).max(0);
        u32::try_from(diff_ns / NSEC_PER_MSEC).unwrap_or(u32::MAX)
    }

    /// Return every field to its load-time value, started at `now_ns`.
    pub fn reset(&self, now_ns: i64, default_interval: Ticks) {
        let mut fields = self.lock();
        fields.start_time_ns = now_ns;
        fields.rearm_interval = default_interval;
        fields.last_jiffy = 0;
        if let Some(command) = fields.command.as_mut() {
            *command = CommandBuffer::new(command.capacity());
        }
    }

    /// Store a new interval and restart measurement at `now_ns`.
    pub fn rearm(&self, now_ns: i64, interval: Ticks) {
        let mut fields = self.lock();
        fields.rearm_interval = interval;
        fields.start_time_ns = now_ns;
    }

    /// Current rearm interval.
    #[must_use]
    pub fn rearm_interval(&self) -> Ticks {
        self.lock().rearm_interval
    }

    /// Timestamp measurement starts from.
    #[must_use]
    pub fn start_time_ns(&self) -> i64 {
        self.lock().start_time_ns
    }

    /// Tick at which the trigger last fired.
    #[must_use]
    pub fn last_jiffy(&self) -> u64 {
        self.lock().last_jiffy
    }

    /// Record `jiffies` as the last firing if a full interval has passed.
    ///
    /// Tick arithmetic wraps, so a counter rollover still fires on time.
    pub fn try_expire(&self, jiffies: u64) -> bool {
        let mut fields = self.lock();
        if jiffies.wrapping_sub(fields.last_jiffy) < fields.rearm_interval.get() {
            return false;
        }
        fields.last_jiffy = jiffies;
        true
    }

    /// Run `f` against the stored command, if the buffer exists.
    pub fn with_command<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.lock().command.as_ref().map(|c| f(c.as_bytes()))
    }

    /// Replace the stored command. Returns bytes kept, or `None` if disabled.
    pub fn set_command(&self, input: &[u8]) -> Option<usize> {
        self.lock().command.as_mut().map(|c| c.set(input))
    }

    /// Copy all fields under one lock acquisition.
    #[must_use]
    pub fn values(&self) -> TimerValues {
        let fields = self.lock();
        TimerValues {
            start_time_ns: fields.start_time_ns,
            rearm_interval: fields.rearm_interval,
            last_jiffy: fields.last_jiffy,
            command: fields.command.as_ref().map(|c| c.as_bytes().to_vec()),
        }
    }
}
