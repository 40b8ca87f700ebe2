//! Persistence of monitor state across restarts (SQLite backend)

use std::sync::Arc;

use beacon::LivenessState;
use beacon::clients::ProbeClient;
use beacon::monitors::{LivenessMonitorManager, WeatherReportManager};
use beacon::notifications::EventKind;
use beacon::storage::{Capability, MonitorStore, sqlite::SqliteStore};
use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

fn liveness_manager(
    store: Arc<SqliteStore>,
    probe: Arc<dyn ProbeClient>,
    notifier: Arc<RecordingNotifier>,
) -> LivenessMonitorManager {
    LivenessMonitorManager::new(store, probe, notifier, liveness_settings())
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("beacon.db");

    // first run: a manual probe creates the monitor as offline
    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        seed_account(store.as_ref(), 1, &[Capability::PingMonitoring]).await;

        let probe = ScriptedProbe::new();
        probe.set("10.2.0.1", ProbeScript::Unreachable);
        let notifier = RecordingNotifier::new();
        let manager = liveness_manager(store.clone(), probe, notifier.clone());

        manager.probe_now(1, "10.2.0.1").await.unwrap();
        assert_eq!(notifier.kinds(), vec![EventKind::ManualProbe]);

        store.close().await.unwrap();
    }

    // second run: the stored baseline drives transition detection
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let monitor = store
        .find_liveness_monitor(1, "10.2.0.1")
        .await
        .unwrap()
        .expect("monitor should persist");
    assert_eq!(monitor.state, LivenessState::Offline);

    let notifier = RecordingNotifier::new();
    let manager = liveness_manager(store.clone(), ScriptedProbe::new(), notifier.clone());

    let summary = manager
        .sweep_at(monitor.last_probe_at + TimeDelta::minutes(5))
        .await;

    assert_eq!(summary.transitions, 1);
    assert_eq!(notifier.kinds(), vec![EventKind::Online]);

    let stored = store
        .get_liveness_monitor(monitor.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, LivenessState::Online);

    let history = store.probe_history(1, "10.2.0.1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].reachable);
}

#[tokio::test]
async fn test_weather_report_times_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("beacon.db");
    let now = Utc::now();

    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        seed_account(store.as_ref(), 1, &[Capability::WeatherTracking]).await;

        let notifier = RecordingNotifier::new();
        let manager = WeatherReportManager::new(
            store.clone(),
            ScriptedWeather::new(),
            notifier.clone(),
            weather_settings(),
        );
        manager.watch_location(1, "Helsinki").await.unwrap();

        let summary = manager.sweep_daily_at(now).await;
        assert_eq!(summary.notified, 1);

        store.close().await.unwrap();
    }

    // a restart shortly after must not send the morning report again
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let notifier = RecordingNotifier::new();
    let manager = WeatherReportManager::new(
        store.clone(),
        ScriptedWeather::new(),
        notifier.clone(),
        weather_settings(),
    );

    let summary = manager.sweep_daily_at(now + TimeDelta::minutes(10)).await;

    assert_eq!(summary.examined, 0);
    assert_eq!(notifier.count(), 0);

    let monitors = store.list_weather_monitors(1).await.unwrap();
    assert_eq!(monitors.len(), 1);
    assert!(monitors[0].last_notified_at.is_some());
}
