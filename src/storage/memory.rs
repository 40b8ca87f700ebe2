//! In-memory monitor store (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Dry runs of the scheduler (`"storage": { "backend": "none" }`)
//!
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{
    Account, AccountId, Capability, LivenessMonitor, MonitorId, NewLivenessMonitor, ProbeRecord,
    WeatherMonitor,
};

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    capabilities: HashSet<(AccountId, Capability)>,
    liveness: BTreeMap<MonitorId, LivenessMonitor>,
    weather: BTreeMap<MonitorId, WeatherMonitor>,
    history: Vec<ProbeRecord>,
    next_id: MonitorId,
}

impl Inner {
    fn next_id(&mut self) -> MonitorId {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory monitor store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn has_capability(&self, id: AccountId, capability: Capability) -> StorageResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .capabilities
            .contains(&(id, capability)))
    }

    async fn upsert_account(&self, account: Account) -> StorageResult<()> {
        self.inner.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn set_capability(
        &self,
        id: AccountId,
        capability: Capability,
        active: bool,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if active {
            inner.capabilities.insert((id, capability));
        } else {
            inner.capabilities.remove(&(id, capability));
        }
        Ok(())
    }

    async fn find_liveness_monitor(
        &self,
        account_id: AccountId,
        address: &str,
    ) -> StorageResult<Option<LivenessMonitor>> {
        Ok(self
            .inner
            .read()
            .await
            .liveness
            .values()
            .find(|m| m.account_id == account_id && m.address == address)
            .cloned())
    }

    async fn get_liveness_monitor(&self, id: MonitorId) -> StorageResult<Option<LivenessMonitor>> {
        Ok(self.inner.read().await.liveness.get(&id).cloned())
    }

    async fn create_liveness_monitor(
        &self,
        monitor: NewLivenessMonitor,
    ) -> StorageResult<LivenessMonitor> {
        let mut inner = self.inner.write().await;

        let exists = inner
            .liveness
            .values()
            .any(|m| m.account_id == monitor.account_id && m.address == monitor.address);
        if exists {
            return Err(StorageError::Conflict(format!(
                "liveness monitor ({}, {})",
                monitor.account_id, monitor.address
            )));
        }

        let id = inner.next_id();
        let created = LivenessMonitor {
            id,
            account_id: monitor.account_id,
            address: monitor.address,
            state: monitor.state,
            last_probe_at: monitor.probed_at,
            last_notified_at: monitor.notified_at,
            created_at: monitor.probed_at,
        };
        inner.liveness.insert(id, created.clone());
        debug!("created liveness monitor {id}");

        Ok(created)
    }

    async fn update_liveness_monitor(&self, monitor: &LivenessMonitor) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        match inner.liveness.get_mut(&monitor.id) {
            Some(stored) => {
                stored.state = monitor.state;
                stored.last_probe_at = monitor.last_probe_at;
                stored.last_notified_at = monitor.last_notified_at;
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "liveness monitor {}",
                monitor.id
            ))),
        }
    }

    async fn due_liveness_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<LivenessMonitor>> {
        Ok(self
            .inner
            .read()
            .await
            .liveness
            .values()
            .filter(|m| m.last_probe_at <= stale_before)
            .cloned()
            .collect())
    }

    async fn append_probe_history(&self, record: ProbeRecord) -> StorageResult<()> {
        self.inner.write().await.history.push(record);
        Ok(())
    }

    async fn probe_history(
        &self,
        account_id: AccountId,
        address: &str,
        limit: usize,
    ) -> StorageResult<Vec<ProbeRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<ProbeRecord> = inner
            .history
            .iter()
            .filter(|r| r.account_id == account_id && r.address == address)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.probed_at.cmp(&a.probed_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn create_weather_monitor(
        &self,
        account_id: AccountId,
        location: &str,
        created_at: DateTime<Utc>,
    ) -> StorageResult<WeatherMonitor> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id();
        let monitor = WeatherMonitor {
            id,
            account_id,
            location: location.to_string(),
            last_check_at: None,
            last_notified_at: None,
            last_report_at: None,
            created_at,
        };
        inner.weather.insert(id, monitor.clone());
        Ok(monitor)
    }

    async fn get_weather_monitor(&self, id: MonitorId) -> StorageResult<Option<WeatherMonitor>> {
        Ok(self.inner.read().await.weather.get(&id).cloned())
    }

    async fn list_weather_monitors(
        &self,
        account_id: AccountId,
    ) -> StorageResult<Vec<WeatherMonitor>> {
        Ok(self
            .inner
            .read()
            .await
            .weather
            .values()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn due_weather_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<WeatherMonitor>> {
        Ok(self
            .inner
            .read()
            .await
            .weather
            .values()
            .filter(|m| m.last_report_at.is_none_or(|at| at < stale_before))
            .cloned()
            .collect())
    }

    async fn update_weather_monitor(&self, monitor: &WeatherMonitor) -> StorageResult<()> {
        self.update_weather_monitors(std::slice::from_ref(monitor)).await
    }

    async fn update_weather_monitors(&self, monitors: &[WeatherMonitor]) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(missing) = monitors
            .iter()
            .find(|m| !inner.weather.contains_key(&m.id))
        {
            return Err(StorageError::NotFound(format!(
                "weather monitor {}",
                missing.id
            )));
        }

        for monitor in monitors {
            if let Some(stored) = inner.weather.get_mut(&monitor.id) {
                stored.last_check_at = monitor.last_check_at;
                stored.last_notified_at = monitor.last_notified_at;
                stored.last_report_at = monitor.last_report_at;
            }
        }
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
