//! Attribute handlers for the `rq-stats` node.
//!
//! - `def_timer_ms`: read reports milliseconds since the last rearm, write
//!   stores a new interval and rearms.
//! - `mpctl`: free-form command string; writes announce the change inline.
//!
//! Output is bounded the way `snprintf` bounds it: a buffer of `n` bytes
//! holds at most `n - 1` visible bytes.

use crate::clock::Clock;
use crate::sysfs::{Attribute, AttributeHandler, AttributeTree, NodePath, S_IRUSR, S_IWUSR};
use crate::timer_state::TimerState;
use rq_common::config::PAGE_SIZE;
use rq_common::error::{RqError, RqResult};
use rq_common::time::TickRate;
use static_assertions::const_assert;
use std::sync::Arc;
use tracing::debug;

/// Name of the elapsed-time attribute.
pub const DEF_TIMER_ATTR: &str = "def_timer_ms";

/// Name of the command attribute.
pub const MPCTL_ATTR: &str = "mpctl";

/// Output bound of `def_timer_ms` reads, terminator slot included.
pub const MAX_LONG_SIZE: usize = 24;

/// Permission bits of both attributes (owner read/write).
pub const ATTR_MODE: u16 = S_IRUSR | S_IWUSR;

// "4294967295\n" must fit.
const_assert!(MAX_LONG_SIZE > 11);

/// Appends to a page, silently dropping output past `limit - 1` bytes.
pub struct BoundedWriter<'a> {
    page: &'a mut Vec<u8>,
    remaining: usize,
    written: usize,
}

impl<'a> BoundedWriter<'a> {
    /// Writer over `page` holding at most `limit - 1` bytes.
    #[must_use]
    pub fn new(page: &'a mut Vec<u8>, limit: usize) -> Self {
        Self {
            page,
            remaining: limit.saturating_sub(1),
            written: 0,
        }
    }

    /// Append raw bytes up to the bound.
    pub fn push(&mut self, bytes: &[u8]) {
        let take = bytes.len().min(self.remaining);
        self.page.extend_from_slice(&bytes[..take]);
        self.remaining -= take;
        self.written += take;
    }

    /// Bytes appended so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written
    }
}

/// Parse an unsigned 32-bit integer with kernel `kstrtouint(s, 0)` rules.
///
/// Input ends at the first NUL byte. One trailing newline and a leading `+`
/// are accepted. `0x`/`0X` selects hexadecimal, a leading `0` octal,
/// anything else decimal.
///
/// # Errors
///
/// [`RqError::InvalidArgument`] on empty input, stray characters, a minus
/// sign or a value above `u32::MAX`.
pub fn parse_uint(input: &[u8]) -> RqResult<u32> {
    let invalid = || {
        RqError::InvalidArgument(format!(
            "{:?} is not an unsigned integer",
            String::from_utf8_lossy(input)
        ))
    };

    let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
    let s = &input[..end];
    let s = s.strip_suffix(b"\n").unwrap_or(s);
    let s = s.strip_prefix(b"+").unwrap_or(s);

    let (radix, digits) = if let Some(hex) = s.strip_prefix(b"0x").or_else(|| s.strip_prefix(b"0X")) {
        (16, hex)
    } else if s.len() > 1 && s[0] == b'0' {
        (8, &s[1..])
    } else {
        (10, s)
    };
    if digits.is_empty() {
        return Err(invalid());
    }

    digits.iter().try_fold(0u32, |acc, &b| {
        let digit = char::from(b).to_digit(radix).ok_or_else(invalid)?;
        acc.checked_mul(radix)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(invalid)
    })
}

/// `def_timer_ms`: elapsed milliseconds since the last rearm.
#[derive(Debug)]
pub struct DefTimerAttribute {
    state: Arc<TimerState>,
    clock: Arc<dyn Clock>,
    tick_rate: TickRate,
}

impl DefTimerAttribute {
    /// Handler over `state`, reading time from `clock`.
    #[must_use]
    pub fn new(state: Arc<TimerState>, clock: Arc<dyn Clock>, tick_rate: TickRate) -> Self {
        Self {
            state,
            clock,
            tick_rate,
        }
    }

    /// Wrap as a registrable attribute.
    #[must_use]
    pub fn into_attribute(self) -> Attribute {
        Attribute {
            name: DEF_TIMER_ATTR,
            mode: ATTR_MODE,
            handler: Arc::new(self),
        }
    }
}

impl AttributeHandler for DefTimerAttribute {
    fn show(&self, page: &mut Vec<u8>) -> RqResult<usize> {
        let elapsed = self.state.elapsed_ms(self.clock.now_ns());
        let mut out = BoundedWriter::new(page, MAX_LONG_SIZE);
        out.push(format!("{elapsed}\n").as_bytes());
        Ok(out.written())
    }

    fn store(&self, input: &[u8]) -> RqResult<usize> {
        let ms = parse_uint(input)?;
        let interval = self.tick_rate.msecs_to_ticks(ms);
        let now_ns = self.clock.now_ns();
        self.state.rearm(now_ns, interval);
        debug!(ms, %interval, start_time_ns = now_ns, "def_timer_ms stored, timer rearmed");
        Ok(input.len())
    }
}

/// `mpctl`: stored command string.
#[derive(Debug)]
pub struct CommandAttribute {
    state: Arc<TimerState>,
    tree: Arc<dyn AttributeTree>,
    node: NodePath,
}

impl CommandAttribute {
    /// Handler over `state`, announcing changes on `node` through `tree`.
    #[must_use]
    pub fn new(state: Arc<TimerState>, tree: Arc<dyn AttributeTree>, node: NodePath) -> Self {
        Self { state, tree, node }
    }

    /// Wrap as a registrable attribute.
    #[must_use]
    pub fn into_attribute(self) -> Attribute {
        Attribute {
            name: MPCTL_ATTR,
            mode: ATTR_MODE,
            handler: Arc::new(self),
        }
    }
}

impl AttributeHandler for CommandAttribute {
    fn show(&self, page: &mut Vec<u8>) -> RqResult<usize> {
        let mut out = BoundedWriter::new(page, PAGE_SIZE);
        self.state
            .with_command(|cmd| {
                out.push(cmd);
                out.push(b"\n");
            })
            .ok_or_else(|| RqError::NotFound(format!("{}/{MPCTL_ATTR}", self.node)))?;
        Ok(out.written())
    }

    fn store(&self, input: &[u8]) -> RqResult<usize> {
        let kept = self
            .state
            .set_command(input)
            .ok_or_else(|| RqError::NotFound(format!("{}/{MPCTL_ATTR}", self.node)))?;
        debug!(kept, len = input.len(), "mpctl stored");
        self.tree.notify(&self.node, MPCTL_ATTR);
        Ok(input.len())
    }
}
