//! Deferred notifier acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Scheduling wakes a poller blocked on `def_timer_ms`
//! - A second schedule before the worker runs is coalesced
//! - Without a worker the notifier stays inert
//! - The tick trigger fires once per rearm interval

use super::common::{Harness, WAIT};
use anyhow::Result;
use rq_common::config::RqStatsConfig;
use rq_common::state::NotifierState;
use rq_module::notifier::DeferredNotifier;
use rq_module::platform::SimulatedPlatform;
use rq_module::sysfs::AttributeTree;
use rq_module::workqueue::WorkQueue;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_schedule_wakes_poller() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default())?;
    let path = h.def_timer()?;
    let seen = h.sim.tree().generation(&path)?;

    let tree = h.sim.tree().clone();
    let waiter_path = path.clone();
    let waiter = thread::spawn(move || tree.wait_for_change(&waiter_path, seen, WAIT));

    assert!(h.module.schedule_notification());
    let woke = waiter.join().expect("waiter panicked")?;
    assert_eq!(woke, Some(seen + 1));

    assert!(h.module.flush_notifications(WAIT));
    assert_eq!(h.module.notifier_state(), NotifierState::Idle);
    let snap = h.module.snapshot();
    assert_eq!(snap.notifications_scheduled, 1);
    assert_eq!(snap.notifications_delivered, 1);
    Ok(())
}

#[test]
fn test_poller_times_out_without_schedule() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default())?;
    let path = h.def_timer()?;
    let woke = h
        .sim
        .tree()
        .wait_for_change(&path, 0, Duration::from_millis(20))?;
    assert_eq!(woke, None);
    Ok(())
}

#[test]
fn test_double_schedule_coalesces() -> Result<()> {
    let sim = SimulatedPlatform::default();
    let h = Harness::start_on(sim, RqStatsConfig::default())?;
    let path = h.def_timer()?;
    let node = h.module.node_path().cloned().expect("node registered");

    // Park a dedicated worker so the first announcement stays pending
    let queue = WorkQueue::single_threaded("rq_stats_parked")?;
    let (release_tx, release_rx) = mpsc::channel::<()>();
    queue.queue(move || {
        let _ = release_rx.recv();
    });
    let tree: Arc<dyn AttributeTree> = h.sim.tree().clone();
    let notifier = DeferredNotifier::new(tree, Some(queue));
    notifier.bind(node);

    assert!(notifier.schedule());
    assert!(!notifier.schedule());
    assert_eq!(notifier.state(), NotifierState::Scheduled);

    release_tx.send(())?;
    assert!(notifier.flush(WAIT));
    assert_eq!(h.sim.tree().generation(&path)?, 1);
    assert_eq!(notifier.scheduled_count(), 1);
    assert_eq!(notifier.delivered_count(), 1);
    notifier.shutdown(WAIT);
    Ok(())
}

#[test]
fn test_inert_without_worker() -> Result<()> {
    let sim = SimulatedPlatform::default();
    sim.fail_worker_creation(true);
    let h = Harness::start_on(sim, RqStatsConfig::default())?;
    let path = h.def_timer()?;

    assert!(!h.module.schedule_notification());
    assert!(!h.module.on_tick(1_000));
    assert_eq!(h.module.notifier_state(), NotifierState::Idle);
    assert_eq!(h.sim.tree().generation(&path)?, 0);
    Ok(())
}

#[test]
fn test_tick_trigger_follows_interval() -> Result<()> {
    let h = Harness::start(RqStatsConfig::default())?;
    let path = h.def_timer()?;

    // 100 ms is 10 ticks at 100 Hz
    h.write(&path, b"100")?;

    let fired: Vec<u64> = (1..=30)
        .filter(|&j| {
            let queued = h.module.on_tick(j);
            if queued {
                h.module.flush_notifications(WAIT);
            }
            queued
        })
        .collect();

    assert_eq!(fired, vec![10, 20, 30]);
    assert_eq!(h.sim.tree().generation(&path)?, 3);
    assert_eq!(h.module.timer().last_jiffy(), 30);
    Ok(())
}

#[test]
fn test_shutdown_stops_notifications() -> Result<()> {
    let mut h = Harness::start(RqStatsConfig::default())?;
    h.module.shutdown();
    assert!(!h.module.schedule_notification());
    assert!(!h.module.on_tick(1_000));
    Ok(())
}
