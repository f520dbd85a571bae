//! Initialization and teardown acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Uniprocessor platforms are refused with EPERM and nothing is created
//! - Successful init registers the node and emits one ADD event
//! - Registration failures report ENOMEM, release the node, and still mark
//!   the module initialized
//! - Shutdown removes the node, emits REMOVE, and is idempotent

use super::common::{init_logging, Harness};
use anyhow::Result;
use rq_common::config::RqStatsConfig;
use rq_common::error::RqError;
use rq_module::module::RqStats;
use rq_module::platform::{Platform, SimulatedPlatform};
use rq_module::sysfs::UeventAction;
use std::sync::Arc;
use std::time::Duration;

const NODE: &str = "devices/system/cpu/cpu0/rq-stats";
const DEF_TIMER: &str = "devices/system/cpu/cpu0/rq-stats/def_timer_ms";

fn load(
    sim: SimulatedPlatform,
    config: RqStatsConfig,
) -> Result<(Arc<SimulatedPlatform>, RqStats, Result<(), RqError>)> {
    init_logging();
    let sim = Arc::new(sim);
    let platform: Arc<dyn Platform> = sim.clone();
    let (module, outcome) = RqStats::load(config, platform)?;
    Ok((sim, module, outcome))
}

#[test]
fn test_uniprocessor_refused() -> Result<()> {
    let (sim, module, outcome) = load(SimulatedPlatform::uniprocessor(), RqStatsConfig::default())?;

    let err = outcome.expect_err("uniprocessor init must fail");
    assert!(matches!(err, RqError::PermissionDenied(_)));
    assert_eq!(err.errno(), RqError::PermissionDenied(String::new()).errno());
    assert!(!module.is_initialized());
    assert!(!module.attributes_registered());
    assert!(!sim.tree().node_exists(NODE));
    assert!(sim.tree().uevents().is_empty());

    assert!(matches!(sim.tree().read(DEF_TIMER), Err(RqError::NotFound(_))));
    assert!(matches!(sim.tree().write(DEF_TIMER, b"10"), Err(RqError::NotFound(_))));
    assert!(!module.schedule_notification());
    Ok(())
}

#[test]
fn test_success_registers_and_announces() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default().with_command_attribute())?;

    assert!(h.module.is_initialized());
    assert!(h.module.attributes_registered());
    assert_eq!(h.sim.tree().list(NODE)?, vec!["def_timer_ms", "mpctl"]);

    let events = h.sim.tree().uevents();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, UeventAction::Add);
    assert_eq!(events[0].path.as_str(), NODE);
    Ok(())
}

#[test]
fn test_group_failure_releases_node() -> Result<()> {
    let sim = SimulatedPlatform::default();
    sim.tree().fail_group_creation(true);
    let (sim, module, outcome) = load(sim, RqStatsConfig::default())?;

    let err = outcome.expect_err("group failure must surface");
    assert!(matches!(err, RqError::OutOfMemory(_)));
    assert!(module.is_initialized());
    assert!(!module.attributes_registered());
    assert!(module.node_path().is_none());
    assert!(!sim.tree().node_exists(NODE));
    assert!(sim.tree().uevents().is_empty());
    Ok(())
}

#[test]
fn test_node_failure_is_out_of_memory() -> Result<()> {
    let sim = SimulatedPlatform::default();
    sim.tree().fail_node_creation(true);
    let (_sim, module, outcome) = load(sim, RqStatsConfig::default())?;

    assert!(matches!(outcome, Err(RqError::OutOfMemory(_))));
    assert!(module.is_initialized());
    assert!(!module.attributes_registered());
    Ok(())
}

#[test]
fn test_worker_failure_is_not_fatal() -> Result<()> {
    let sim = SimulatedPlatform::default();
    sim.fail_worker_creation(true);
    let h = Harness::start_on(sim, RqStatsConfig::default())?;

    assert!(h.module.attributes_registered());
    assert!(!h.module.snapshot().notifier_active);
    assert!(!h.module.schedule_notification());
    assert_eq!(h.elapsed_ms()?, 0);
    Ok(())
}

#[test]
fn test_second_init_rejected() -> Result<()> {
    let mut h = Harness::start(RqStatsConfig::default())?;
    let err = h.module.init().expect_err("second init must fail");
    assert!(matches!(err, RqError::InvalidArgument(_)));
    assert!(h.module.attributes_registered());
    assert_eq!(h.sim.tree().uevents().len(), 1);
    Ok(())
}

#[test]
fn test_shutdown_removes_node() -> Result<()> {
    let mut h = Harness::start(RqStatsConfig::default())?;
    h.module.shutdown();

    assert!(!h.module.is_initialized());
    assert!(!h.sim.tree().node_exists(NODE));
    let actions: Vec<_> = h.sim.tree().uevents().iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![UeventAction::Add, UeventAction::Remove]);

    h.module.shutdown();
    assert_eq!(h.sim.tree().uevents().len(), 2);
    Ok(())
}

#[test]
fn test_reload_starts_from_defaults() -> Result<()> {
    let sim = Arc::new(SimulatedPlatform::default());
    let platform: Arc<dyn Platform> = sim.clone();
    let config = RqStatsConfig::default().with_command_attribute();

    {
        let mut first = RqStats::new(config.clone(), Arc::clone(&platform))?;
        first.init()?;
        sim.tree().write(DEF_TIMER, b"2000")?;
        sim.tree().write(&format!("{NODE}/mpctl"), b"boost")?;
    }
    assert!(!sim.tree().node_exists(NODE));

    sim.manual_clock().advance(Duration::from_millis(40));
    let mut second = RqStats::new(config, platform)?;
    second.init()?;

    let snap = second.snapshot();
    assert_eq!(snap.interval_ticks, 5);
    assert_eq!(snap.elapsed_ms, 0);
    assert_eq!(snap.command.as_deref(), Some("0"));
    Ok(())
}

#[test]
fn test_snapshot_serializes() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default())?;
    h.advance(Duration::from_millis(75));

    let json = serde_json::to_value(h.module.snapshot())?;
    assert_eq!(json["initialized"], true);
    assert_eq!(json["attributes_registered"], true);
    assert_eq!(json["node"], NODE);
    assert_eq!(json["interval_ticks"], 5);
    assert_eq!(json["interval_ms"], 50);
    assert_eq!(json["elapsed_ms"], 75);
    assert_eq!(json["notifier_state"], "IDLE");
    assert!(json["command"].is_null());
    Ok(())
}
