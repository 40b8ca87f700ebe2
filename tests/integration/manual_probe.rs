//! Manual probe tests

use std::time::Duration;

use assert_matches::assert_matches;
use beacon::LivenessState;
use beacon::clients::ProbeError;
use beacon::monitors::MonitorError;
use beacon::notifications::{EventKind, Notification};
use beacon::storage::{Account, MonitorStore};
use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_first_probe_creates_monitor_and_acknowledges() {
    let fx = liveness_fixture().await;

    let before = Utc::now();
    let result = fx.manager.probe_now(1, "192.0.2.10").await.unwrap();

    assert!(result.reachable);
    assert_eq!(result.state(), LivenessState::Online);

    let monitor = fx
        .store
        .find_liveness_monitor(1, "192.0.2.10")
        .await
        .unwrap()
        .expect("monitor should be created");
    assert_eq!(monitor.state, LivenessState::Online);
    assert!(monitor.last_probe_at >= before);
    assert_eq!(monitor.last_notified_at, Some(monitor.last_probe_at));

    let sent = fx.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, EMAIL);
    assert_matches!(
        &sent[0].1,
        Notification::ManualProbe { address, state: LivenessState::Online, .. } if address == "192.0.2.10"
    );
}

#[tokio::test]
async fn test_probe_of_tracked_address_updates_monitor() {
    let fx = liveness_fixture().await;
    let past = Utc::now() - TimeDelta::hours(3);
    let seeded =
        seed_liveness(fx.store.as_ref(), 1, "192.0.2.11", LivenessState::Online, past).await;
    fx.probe.set("192.0.2.11", ProbeScript::Unreachable);

    let result = fx.manager.probe_now(1, "192.0.2.11").await.unwrap();
    assert_eq!(result.state(), LivenessState::Offline);

    let monitor = fx
        .store
        .get_liveness_monitor(seeded.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitor.state, LivenessState::Offline);
    assert!(monitor.last_probe_at > past);
    assert_eq!(monitor.created_at, seeded.created_at);

    // a transition seen by a manual probe is acknowledged, not announced twice
    assert_eq!(fx.notifier.kinds(), vec![EventKind::ManualProbe]);
}

#[tokio::test]
async fn test_failed_probe_is_reported_as_offline() {
    let fx = liveness_fixture().await;
    fx.probe.set(
        "unknown.invalid",
        ProbeScript::Fail(ProbeError::Transport("name resolution failed".to_string())),
    );

    let result = fx.manager.probe_now(1, "unknown.invalid").await.unwrap();

    assert!(!result.reachable);
    assert_matches!(result.error, Some(ProbeError::Transport(_)));
    assert!(result.diagnostic().contains("name resolution failed"));
    assert_eq!(fx.notifier.kinds(), vec![EventKind::ManualProbe]);
}

#[tokio::test]
async fn test_every_manual_probe_is_acknowledged() {
    let fx = liveness_fixture().await;

    for _ in 0..3 {
        fx.manager.probe_now(1, "192.0.2.12").await.unwrap();
    }

    assert_eq!(fx.notifier.count(), 3);
    assert_eq!(fx.probe.count("192.0.2.12"), 3);
}

#[tokio::test]
async fn test_probe_history_is_appended() {
    let fx = liveness_fixture().await;
    fx.manager.probe_now(1, "192.0.2.13").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    fx.probe.set("192.0.2.13", ProbeScript::Unreachable);
    fx.manager.probe_now(1, "192.0.2.13").await.unwrap();

    let history = fx.store.probe_history(1, "192.0.2.13", 10).await.unwrap();

    assert_eq!(history.len(), 2);
    // newest first
    assert!(!history[0].reachable);
    assert!(history[1].reachable);
}

#[tokio::test]
async fn test_acknowledged_even_when_persisting_fails() {
    let fx = liveness_fixture().await;
    let past = Utc::now() - TimeDelta::hours(1);
    seed_liveness(fx.store.as_ref(), 1, "192.0.2.14", LivenessState::Online, past).await;
    fx.store.fail_updates(true);

    let result = fx.manager.probe_now(1, "192.0.2.14").await;

    assert!(result.is_ok());
    assert_eq!(fx.notifier.kinds(), vec![EventKind::ManualProbe]);
}

#[tokio::test]
async fn test_requires_subscription() {
    let fx = liveness_fixture().await;
    seed_account(fx.store.as_ref(), 2, &[]).await;

    let err = fx.manager.probe_now(2, "192.0.2.15").await.unwrap_err();

    assert_matches!(err, MonitorError::NotSubscribed(2));
    assert!(fx.probe.calls().is_empty());
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn test_rejects_unknown_and_inactive_accounts() {
    let fx = liveness_fixture().await;

    let err = fx.manager.probe_now(42, "192.0.2.16").await.unwrap_err();
    assert_matches!(err, MonitorError::UnknownAccount(42));

    fx.store
        .upsert_account(Account {
            id: 1,
            email: EMAIL.to_string(),
            role: "client".to_string(),
            is_active: false,
        })
        .await
        .unwrap();
    let err = fx.manager.probe_now(1, "192.0.2.16").await.unwrap_err();
    assert_matches!(err, MonitorError::InactiveAccount(1));

    assert!(fx.probe.calls().is_empty());
    assert_eq!(fx.notifier.count(), 0);
}

#[tokio::test]
async fn test_rejects_invalid_addresses() {
    let fx = liveness_fixture().await;

    for address in ["", "-c 1000 example.com", "host;rm -rf /", "exa mple.com"] {
        let err = fx.manager.probe_now(1, address).await.unwrap_err();
        assert_matches!(err, MonitorError::InvalidAddress(_), "{address:?}");
    }

    assert!(fx.probe.calls().is_empty());
    assert_eq!(fx.notifier.count(), 0);
}
