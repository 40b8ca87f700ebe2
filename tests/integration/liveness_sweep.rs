//! Liveness sweep tests
//!
//! Sweeps are driven with explicit timestamps (`sweep_at`), five minutes apart like the
//! default schedule, so throttling can be checked without waiting.

use std::time::Duration;

use beacon::LivenessState;
use beacon::clients::ProbeError;
use beacon::notifications::EventKind;
use beacon::storage::{Account, Capability, MonitorStore};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tokio::sync::watch;

use crate::helpers::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

fn minutes(m: i64) -> DateTime<Utc> {
    t0() + TimeDelta::minutes(m)
}

#[tokio::test]
async fn test_online_to_offline_notifies_once() {
    let fx = liveness_fixture().await;
    let monitor = seed_liveness(fx.store.as_ref(), 1, "10.0.0.1", LivenessState::Online, t0()).await;
    fx.probe.set("10.0.0.1", ProbeScript::Unreachable);

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.examined, 1);
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.notified, 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::Offline]);
    assert_eq!(fx.notifier.sent()[0].0, EMAIL);

    let stored = fx
        .store
        .get_liveness_monitor(monitor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, LivenessState::Offline);
    assert_eq!(stored.last_probe_at, minutes(5));
    assert_eq!(stored.last_notified_at, Some(minutes(5)));

    // staying offline is quiet
    fx.manager.sweep_at(minutes(10)).await;
    fx.manager.sweep_at(minutes(15)).await;
    assert_eq!(fx.notifier.count(), 1);
}

#[tokio::test]
async fn test_offline_to_online_notifies() {
    let fx = liveness_fixture().await;
    let monitor =
        seed_liveness(fx.store.as_ref(), 1, "db.example.com", LivenessState::Offline, t0()).await;

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.transitions, 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::Online]);

    let stored = fx
        .store
        .get_liveness_monitor(monitor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, LivenessState::Online);
}

#[tokio::test]
async fn test_still_reachable_is_throttled_to_one_per_hour() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.2", LivenessState::Online, t0()).await;

    // eleven sweeps inside the hour after the last notification
    for m in (5..60).step_by(5) {
        fx.manager.sweep_at(minutes(m)).await;
    }
    assert_eq!(fx.notifier.count(), 0);
    assert_eq!(fx.probe.count("10.0.0.2"), 11);

    // a full hour later the reminder goes out, then the window restarts
    let summary = fx.manager.sweep_at(minutes(60)).await;
    assert_eq!(summary.notified, 1);
    assert_eq!(summary.transitions, 0);

    for m in (65..120).step_by(5) {
        fx.manager.sweep_at(minutes(m)).await;
    }
    assert_eq!(fx.notifier.kinds(), vec![EventKind::StillReachable]);
}

#[tokio::test]
async fn test_monitor_is_not_due_before_the_interval() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.3", LivenessState::Online, t0()).await;

    let summary = fx.manager.sweep_at(minutes(2)).await;

    assert_eq!(summary.examined, 0);
    assert!(fx.probe.calls().is_empty());
}

#[tokio::test]
async fn test_first_sweep_after_manual_probe_has_no_transition() {
    let fx = liveness_fixture().await;
    fx.probe.set("10.0.0.4", ProbeScript::Unreachable);

    let result = fx.manager.probe_now(1, "10.0.0.4").await.unwrap();
    assert_eq!(result.state(), LivenessState::Offline);

    let summary = fx
        .manager
        .sweep_at(Utc::now() + TimeDelta::minutes(5))
        .await;

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.transitions, 0);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::ManualProbe]);
}

#[tokio::test]
async fn test_failing_monitor_does_not_affect_others() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.5", LivenessState::Online, t0()).await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.6", LivenessState::Offline, t0()).await;
    // monitor owned by an account that no longer exists
    seed_liveness(fx.store.as_ref(), 99, "10.0.0.7", LivenessState::Online, t0()).await;

    fx.probe.set(
        "10.0.0.5",
        ProbeScript::Fail(ProbeError::Transport("socket closed".to_string())),
    );

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.examined, 3);
    assert_eq!(summary.checked, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.transitions, 2);

    // a broken probe counts as offline, the healthy address still recovers
    assert_eq!(fx.notifier.for_address("10.0.0.5"), vec![EventKind::Offline]);
    assert_eq!(fx.notifier.for_address("10.0.0.6"), vec![EventKind::Online]);
    assert!(fx.notifier.for_address("10.0.0.7").is_empty());
    assert_eq!(fx.probe.count("10.0.0.7"), 0);
}

#[tokio::test]
async fn test_panicking_monitor_does_not_stop_the_sweep() {
    let fx = liveness_fixture().await;
    let broken =
        seed_liveness(fx.store.as_ref(), 1, "10.0.0.20", LivenessState::Online, t0()).await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.21", LivenessState::Online, t0()).await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.22", LivenessState::Offline, t0()).await;

    fx.probe.set("10.0.0.20", ProbeScript::Panic);
    fx.probe.set("10.0.0.21", ProbeScript::Unreachable);

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.examined, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.transitions, 2);
    assert_eq!(fx.notifier.for_address("10.0.0.21"), vec![EventKind::Offline]);
    assert_eq!(fx.notifier.for_address("10.0.0.22"), vec![EventKind::Online]);
    assert!(fx.notifier.for_address("10.0.0.20").is_empty());

    // nothing was stored for the broken monitor and its lock was released
    let stored = fx
        .store
        .get_liveness_monitor(broken.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_probe_at, t0());

    fx.probe.set("10.0.0.20", ProbeScript::Unreachable);
    let summary = fx.manager.sweep_at(minutes(10)).await;
    assert_eq!(summary.failed, 0);
    assert_eq!(fx.notifier.for_address("10.0.0.20"), vec![EventKind::Offline]);
}

#[tokio::test]
async fn test_hanging_probe_times_out_as_offline() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.8", LivenessState::Online, t0()).await;
    fx.probe.set("10.0.0.8", ProbeScript::Hang);

    let summary = tokio::time::timeout(Duration::from_secs(5), fx.manager.sweep_at(minutes(5)))
        .await
        .expect("sweep must not hang");

    assert_eq!(summary.transitions, 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::Offline]);
}

#[tokio::test]
async fn test_failed_persist_leaves_state_and_sends_nothing() {
    let fx = liveness_fixture().await;
    let monitor = seed_liveness(fx.store.as_ref(), 1, "10.0.0.9", LivenessState::Online, t0()).await;
    fx.probe.set("10.0.0.9", ProbeScript::Unreachable);
    fx.store.fail_updates(true);

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.notified, 0);
    assert_eq!(fx.notifier.count(), 0);

    let stored = fx
        .store
        .get_liveness_monitor(monitor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, monitor);

    // the next sweep sees the same transition and reports it once
    fx.store.fail_updates(false);
    let summary = fx.manager.sweep_at(minutes(10)).await;

    assert_eq!(summary.transitions, 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::Offline]);
    assert_eq!(fx.probe.count("10.0.0.9"), 2);
}

#[tokio::test]
async fn test_failed_delivery_keeps_new_state() {
    let fx = liveness_fixture().await;
    let monitor =
        seed_liveness(fx.store.as_ref(), 1, "10.0.0.10", LivenessState::Online, t0()).await;
    fx.probe.set("10.0.0.10", ProbeScript::Unreachable);
    fx.notifier.fail(true);

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.transitions, 1);
    assert_eq!(summary.notified, 0);

    let stored = fx
        .store
        .get_liveness_monitor(monitor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, LivenessState::Offline);

    // the lost message is not resent
    fx.notifier.fail(false);
    fx.manager.sweep_at(minutes(10)).await;
    assert_eq!(fx.notifier.count(), 1);
}

#[tokio::test]
async fn test_inactive_account_is_skipped() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.11", LivenessState::Online, t0()).await;
    fx.store
        .upsert_account(Account {
            id: 1,
            email: EMAIL.to_string(),
            role: "client".to_string(),
            is_active: false,
        })
        .await
        .unwrap();

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.failed, 1);
    assert!(fx.probe.calls().is_empty());
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn test_sweep_is_not_gated_by_capability() {
    let fx = liveness_fixture().await;
    fx.store
        .set_capability(1, Capability::PingMonitoring, false)
        .await
        .unwrap();
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.12", LivenessState::Offline, t0()).await;

    let summary = fx.manager.sweep_at(minutes(5)).await;

    assert_eq!(summary.checked, 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::Online]);
}

#[tokio::test]
async fn test_shutdown_starts_no_new_probe() {
    let fx = liveness_fixture().await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.13", LivenessState::Online, t0()).await;
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.14", LivenessState::Online, t0()).await;

    let (_tx, shutdown) = watch::channel(true);
    let summary = fx.manager.sweep_until(minutes(5), shutdown).await;

    assert_eq!(summary.examined, 2);
    assert_eq!(summary.skipped, 2);
    assert!(fx.probe.calls().is_empty());
}

#[tokio::test]
async fn test_sweep_skips_address_held_by_manual_probe() {
    let fx = liveness_fixture().await;
    let past = Utc::now() - TimeDelta::minutes(10);
    seed_liveness(fx.store.as_ref(), 1, "10.0.0.15", LivenessState::Online, past).await;
    fx.probe.set_delay(Duration::from_millis(150));

    let manager = fx.manager.clone();
    let manual = tokio::spawn(async move { manager.probe_now(1, "10.0.0.15").await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let summary = fx.manager.sweep_at(Utc::now()).await;
    assert_eq!(summary.skipped, 1);

    manual.await.unwrap().unwrap();
    assert_eq!(fx.probe.count("10.0.0.15"), 1);
    assert_eq!(fx.notifier.kinds(), vec![EventKind::ManualProbe]);
}

#[tokio::test]
async fn test_concurrent_sweeps_probe_each_monitor_once() {
    let fx = liveness_fixture().await;
    for i in 0..5 {
        let address = format!("10.0.1.{i}");
        seed_liveness(fx.store.as_ref(), 1, &address, LivenessState::Offline, t0()).await;
    }
    fx.probe.set_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(
        fx.manager.sweep_at(minutes(5)),
        fx.manager.sweep_at(minutes(5))
    );

    assert_eq!(a.checked + b.checked, 5);
    assert_eq!(fx.probe.calls().len(), 5);
    assert_eq!(fx.notifier.count(), 5);
}
