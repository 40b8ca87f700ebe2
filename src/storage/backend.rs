//! Monitor store trait definition
//!
//! This module defines the `MonitorStore` trait that all storage
//! implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{
    Account, AccountId, Capability, LivenessMonitor, MonitorId, NewLivenessMonitor, ProbeRecord,
    WeatherMonitor,
};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,
}

/// Persistent store of monitor records and the accounts that own them
///
/// ## Write discipline
///
/// `update_*` methods write every mutable field of a record in a single statement.
/// A failed update therefore leaves the previous version of the row intact: state
/// and its timestamps are never persisted separately. Batch updates extend this to
/// every row of the batch.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared by the scheduler's
/// sweeps and by manual probes.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    // ========================================================================
    // Accounts
    // ========================================================================

    async fn get_account(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Does the account currently hold an active subscription to `capability`?
    async fn has_capability(&self, id: AccountId, capability: Capability) -> StorageResult<bool>;

    /// Insert or replace an account (seeding and tests; accounts are managed elsewhere)
    async fn upsert_account(&self, account: Account) -> StorageResult<()>;

    /// Grant or revoke a capability (seeding and tests)
    async fn set_capability(
        &self,
        id: AccountId,
        capability: Capability,
        active: bool,
    ) -> StorageResult<()>;

    // ========================================================================
    // Liveness monitors
    // ========================================================================

    async fn find_liveness_monitor(
        &self,
        account_id: AccountId,
        address: &str,
    ) -> StorageResult<Option<LivenessMonitor>>;

    async fn get_liveness_monitor(&self, id: MonitorId) -> StorageResult<Option<LivenessMonitor>>;

    /// Create a monitor; fails with `StorageError::Conflict` if the
    /// (account, address) pair is already tracked
    async fn create_liveness_monitor(
        &self,
        monitor: NewLivenessMonitor,
    ) -> StorageResult<LivenessMonitor>;

    /// Persist state, last probe and last notification of an existing monitor
    async fn update_liveness_monitor(&self, monitor: &LivenessMonitor) -> StorageResult<()>;

    /// Monitors whose last probe happened at or before `stale_before`
    async fn due_liveness_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<LivenessMonitor>>;

    async fn append_probe_history(&self, record: ProbeRecord) -> StorageResult<()>;

    /// Most recent probes first
    async fn probe_history(
        &self,
        account_id: AccountId,
        address: &str,
        limit: usize,
    ) -> StorageResult<Vec<ProbeRecord>>;

    // ========================================================================
    // Weather monitors
    // ========================================================================

    /// Create a monitor; duplicates of (account, location) are accepted
    async fn create_weather_monitor(
        &self,
        account_id: AccountId,
        location: &str,
        created_at: DateTime<Utc>,
    ) -> StorageResult<WeatherMonitor>;

    async fn get_weather_monitor(&self, id: MonitorId) -> StorageResult<Option<WeatherMonitor>>;

    async fn list_weather_monitors(&self, account_id: AccountId)
    -> StorageResult<Vec<WeatherMonitor>>;

    /// Monitors never reported by a daily sweep, or last reported before `stale_before`
    async fn due_weather_monitors(
        &self,
        stale_before: DateTime<Utc>,
    ) -> StorageResult<Vec<WeatherMonitor>>;

    /// Persist the timestamps of an existing monitor
    async fn update_weather_monitor(&self, monitor: &WeatherMonitor) -> StorageResult<()>;

    /// Persist the timestamps of several monitors, all or none
    async fn update_weather_monitors(&self, monitors: &[WeatherMonitor]) -> StorageResult<()>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
