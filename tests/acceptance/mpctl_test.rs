//! `mpctl` command attribute acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Absent unless enabled in configuration
//! - Reads back the stored command plus a newline, initially `"0"`
//! - `capacity - 1` bytes round-trip exactly, longer input truncates
//! - Every write wakes pollers of `mpctl`

use super::common::{Harness, WAIT};
use anyhow::Result;
use rq_common::config::RqStatsConfig;
use rq_common::error::RqError;
use std::thread;

fn with_capacity(capacity: usize) -> RqStatsConfig {
    let mut config = RqStatsConfig::default().with_command_attribute();
    config.command.capacity = capacity;
    config
}

#[test]
fn test_absent_when_disabled() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default())?;
    assert!(h.module.command_path().is_none());

    let err = h
        .read("devices/system/cpu/cpu0/rq-stats/mpctl")
        .expect_err("mpctl must not exist");
    assert!(matches!(err.downcast_ref::<RqError>(), Some(RqError::NotFound(_))));
    Ok(())
}

#[test]
fn test_initial_value() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default().with_command_attribute())?;
    assert_eq!(h.read(&h.mpctl()?)?, "0\n");
    Ok(())
}

#[test]
fn test_capacity_round_trip_and_truncation() -> Result<()> {
    let h = Harness::start(with_capacity(16))?;
    let path = h.mpctl()?;

    let exact = "abcdefghijklmno";
    assert_eq!(h.write(&path, exact.as_bytes())?, 15);
    assert_eq!(h.read(&path)?, format!("{exact}\n"));

    let long = "abcdefghijklmnopqrstuvwxyz";
    assert_eq!(h.write(&path, long.as_bytes())?, long.len());
    assert_eq!(h.read(&path)?, format!("{exact}\n"));
    Ok(())
}

#[test]
fn test_embedded_nul_ends_command() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default().with_command_attribute())?;
    let path = h.mpctl()?;
    assert_eq!(h.write(&path, b"on\0off")?, 6);
    assert_eq!(h.read(&path)?, "on\n");
    Ok(())
}

#[test]
fn test_write_wakes_poller() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default().with_command_attribute())?;
    let path = h.mpctl()?;
    let seen = h.sim.tree().generation(&path)?;

    let tree = h.sim.tree().clone();
    let waiter_path = path.clone();
    let waiter = thread::spawn(move || tree.wait_for_change(&waiter_path, seen, WAIT));

    h.write(&path, b"boost")?;
    let woke = waiter.join().expect("waiter panicked")?;
    assert_eq!(woke, Some(seen + 1));
    assert_eq!(h.read(&path)?, "boost\n");
    Ok(())
}

#[test]
fn test_snapshot_reports_command() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default().with_command_attribute())?;
    h.write(&h.mpctl()?, b"perf")?;
    assert_eq!(h.module.snapshot().command.as_deref(), Some("perf"));
    Ok(())
}
