//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Logging setup honouring `RUST_LOG`
//! - Loading the module on a simulated platform
//! - Reading and writing attributes as a user-space client would

#![allow(dead_code)] // Not every helper is used by every test file

use anyhow::{bail, Context, Result};
use rq_common::config::RqStatsConfig;
use rq_module::module::RqStats;
use rq_module::platform::{Platform, SimulatedPlatform};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for waits on the worker thread.
pub const WAIT: Duration = Duration::from_secs(2);

/// Install a test subscriber once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rq_module=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A loaded module together with the platform it runs on.
pub struct Harness {
    pub sim: Arc<SimulatedPlatform>,
    pub module: RqStats,
}

impl Harness {
    /// Load with `config` on a fresh 4-CPU simulated platform and require
    /// initialization to succeed.
    pub fn start(config: RqStatsConfig) -> Result<Self> {
        Self::start_on(SimulatedPlatform::default(), config)
    }

    /// Load with `config` on `sim` and require initialization to succeed.
    pub fn start_on(sim: SimulatedPlatform, config: RqStatsConfig) -> Result<Self> {
        init_logging();
        let sim = Arc::new(sim);
        let platform: Arc<dyn Platform> = sim.clone();
        let mut module = RqStats::new(config, platform).context("load rq-stats")?;
        module.init().context("initialize rq-stats")?;
        Ok(Self { sim, module })
    }

    /// Path of `def_timer_ms`.
    pub fn def_timer(&self) -> Result<String> {
        self.module
            .def_timer_path()
            .context("def_timer_ms not registered")
    }

    /// Path of `mpctl`.
    pub fn mpctl(&self) -> Result<String> {
        self.module.command_path().context("mpctl not registered")
    }

    /// Read an attribute as text.
    pub fn read(&self, path: &str) -> Result<String> {
        Ok(self.sim.tree().read_to_string(path)?)
    }

    /// Read `def_timer_ms` and parse the reported milliseconds.
    pub fn elapsed_ms(&self) -> Result<u32> {
        let text = self.read(&self.def_timer()?)?;
        let Some(value) = text.strip_suffix('\n') else {
            bail!("def_timer_ms output {text:?} lacks a trailing newline");
        };
        value.parse().with_context(|| format!("parse {text:?}"))
    }

    /// Write bytes to an attribute.
    pub fn write(&self, path: &str, input: &[u8]) -> Result<usize> {
        Ok(self.sim.tree().write(path, input)?)
    }

    /// Advance the simulated clock.
    pub fn advance(&self, by: Duration) {
        self.sim.manual_clock().advance(by);
    }
}
