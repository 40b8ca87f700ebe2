//! Weather reports
//!
//! Accounts with the weather tracking capability get one report per tracked location
//! every morning; any owner may also ask for a check at any time. Both paths attach the
//! same recommendations.
//!
//! Weather monitors are not unique per (account, location): the store accepts duplicates
//! and the daily sweep collapses them, so a location tracked twice is still reported once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::locks::ResourceLocks;
use super::recommendations::WeatherReport;
use super::{ResourceOutcome, SweepSummary, deliver, isolated};
use crate::WeatherSnapshot;
use crate::clients::weather::{WeatherClient, WeatherError};
use crate::config::WeatherSettings;
use crate::notifications::{Notification, Notifier};
use crate::storage::{
    Account, AccountId, Capability, MonitorId, MonitorStore, StorageError, WeatherMonitor,
};
use crate::util::to_delta;

#[derive(Debug)]
pub enum WeatherCheckError {
    UnknownAccount(AccountId),
    InactiveAccount(AccountId),
    /// No such monitor, or it belongs to another account
    UnknownMonitor(MonitorId),
    InvalidLocation(String),
    Lookup(WeatherError),
    Storage(StorageError),
}

impl fmt::Display for WeatherCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeatherCheckError::UnknownAccount(id) => write!(f, "account {} does not exist", id),
            WeatherCheckError::InactiveAccount(id) => write!(f, "account {} is not active", id),
            WeatherCheckError::UnknownMonitor(id) => write!(f, "weather monitor {} not found", id),
            WeatherCheckError::InvalidLocation(location) => {
                write!(f, "invalid location: '{}'", location)
            }
            WeatherCheckError::Lookup(err) => write!(f, "{}", err),
            WeatherCheckError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for WeatherCheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WeatherCheckError::Lookup(err) => Some(err),
            WeatherCheckError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for WeatherCheckError {
    fn from(err: StorageError) -> Self {
        WeatherCheckError::Storage(err)
    }
}

impl From<WeatherError> for WeatherCheckError {
    fn from(err: WeatherError) -> Self {
        WeatherCheckError::Lookup(err)
    }
}

pub struct WeatherReportManager {
    store: Arc<dyn MonitorStore>,
    weather: Arc<dyn WeatherClient>,
    notifier: Arc<dyn Notifier>,
    settings: WeatherSettings,
    locks: ResourceLocks<(AccountId, String)>,
}

impl WeatherReportManager {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        weather: Arc<dyn WeatherClient>,
        notifier: Arc<dyn Notifier>,
        settings: WeatherSettings,
    ) -> Self {
        Self {
            store,
            weather,
            notifier,
            settings,
            locks: ResourceLocks::new(),
        }
    }

    async fn active_account(&self, account_id: AccountId) -> Result<Account, WeatherCheckError> {
        match self.store.get_account(account_id).await? {
            Some(account) if account.is_active => Ok(account),
            Some(_) => Err(WeatherCheckError::InactiveAccount(account_id)),
            None => Err(WeatherCheckError::UnknownAccount(account_id)),
        }
    }

    /// Start tracking `location` for `account_id`
    #[instrument(skip(self))]
    pub async fn watch_location(
        &self,
        account_id: AccountId,
        location: &str,
    ) -> Result<WeatherMonitor, WeatherCheckError> {
        let location = location.trim();
        if location.is_empty() {
            return Err(WeatherCheckError::InvalidLocation(location.to_string()));
        }

        self.active_account(account_id).await?;

        let monitor = self
            .store
            .create_weather_monitor(account_id, location, Utc::now())
            .await?;
        info!("account {account_id} now tracks weather in {location}");

        Ok(monitor)
    }

    /// Look up the weather of one monitor now and notify its owner
    ///
    /// A failed lookup is returned to the caller and nothing is sent.
    #[instrument(skip(self))]
    pub async fn check_now(
        &self,
        account_id: AccountId,
        monitor_id: MonitorId,
    ) -> Result<WeatherReport, WeatherCheckError> {
        let account = self.active_account(account_id).await?;

        let monitor = match self.store.get_weather_monitor(monitor_id).await? {
            Some(monitor) if monitor.account_id == account_id => monitor,
            _ => return Err(WeatherCheckError::UnknownMonitor(monitor_id)),
        };

        let key = (account_id, monitor.location.clone());
        let _guard = self.locks.acquire(&key).await;

        let snapshot = self.lookup(&monitor.location).await?;
        let report = WeatherReport::new(snapshot);

        let now = Utc::now();
        let mut monitor = self
            .store
            .get_weather_monitor(monitor_id)
            .await?
            .ok_or(WeatherCheckError::UnknownMonitor(monitor_id))?;
        monitor.last_check_at = Some(now);
        self.store.update_weather_monitor(&monitor).await?;

        let notification = Notification::WeatherCheck {
            report: report.clone(),
        };
        if self.deliver(&account.email, &notification).await {
            monitor.last_notified_at = Some(now);
            if let Err(e) = self.store.update_weather_monitor(&monitor).await {
                warn!("failed to record notification time: {e}");
            }
        }

        Ok(report)
    }

    /// Send the daily report for every due monitor
    pub async fn sweep_daily(&self) -> SweepSummary {
        self.sweep_daily_at(Utc::now()).await
    }

    pub async fn sweep_daily_at(&self, now: DateTime<Utc>) -> SweepSummary {
        let (_shutdown_tx, shutdown) = watch::channel(false);
        self.sweep_daily_until(now, shutdown).await
    }

    /// Daily sweep at `now`, starting no new location once `shutdown` is set
    #[instrument(skip(self, now, shutdown), fields(now = %now))]
    pub async fn sweep_daily_until(
        &self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> SweepSummary {
        let mut summary = SweepSummary::default();
        let stale_before = now
            .checked_sub_signed(to_delta(self.settings.min_report_gap))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let due = match self.store.due_weather_monitors(stale_before).await {
            Ok(due) => due,
            Err(e) => {
                error!("failed to load due weather monitors: {e}");
                return summary;
            }
        };
        summary.examined = due.len();

        let mut groups: BTreeMap<(AccountId, String), Vec<MonitorId>> = BTreeMap::new();
        for monitor in due {
            groups
                .entry((monitor.account_id, monitor.location))
                .or_default()
                .push(monitor.id);
        }

        let shutdown = &shutdown;
        let outcomes: Vec<ResourceOutcome> = futures::stream::iter(groups)
            .map(|(key, ids)| {
                isolated(
                    "weather",
                    self.sweep_location(key, ids, now, stale_before, shutdown),
                )
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            summary.record(outcome);
        }

        info!("weather sweep finished: {summary}");
        summary
    }

    /// One daily report for all monitors of an (account, location) pair
    #[instrument(skip_all, fields(account_id = key.0, location = %key.1))]
    async fn sweep_location(
        &self,
        key: (AccountId, String),
        ids: Vec<MonitorId>,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> ResourceOutcome {
        if *shutdown.borrow() {
            return ResourceOutcome::Skipped;
        }

        let Some(_guard) = self.locks.try_acquire(&key) else {
            debug!("location is being checked elsewhere, skipping");
            return ResourceOutcome::Skipped;
        };
        let (account_id, location) = &key;

        match self
            .store
            .has_capability(*account_id, Capability::WeatherTracking)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("account {account_id} has no active weather subscription");
                return ResourceOutcome::Skipped;
            }
            Err(e) => {
                error!("failed to check weather subscription: {e}");
                return ResourceOutcome::Failed { checked: false };
            }
        }

        let account = match self.store.get_account(*account_id).await {
            Ok(Some(account)) if account.is_active => account,
            Ok(_) => {
                warn!("account {account_id} is missing or inactive, skipping location");
                return ResourceOutcome::Failed { checked: false };
            }
            Err(e) => {
                error!("failed to load account {account_id}: {e}");
                return ResourceOutcome::Failed { checked: false };
            }
        };

        let mut monitors = match self.reload_due(&ids, stale_before).await {
            Ok(monitors) if monitors.is_empty() => {
                debug!("location was reported in the meantime, skipping");
                return ResourceOutcome::Skipped;
            }
            Ok(monitors) => monitors,
            Err(e) => {
                error!("failed to reload weather monitors: {e}");
                return ResourceOutcome::Failed { checked: false };
            }
        };
        if monitors.len() > 1 {
            debug!("{} monitors track this location, reporting once", monitors.len());
        }

        let lookup = self.lookup(location).await;

        for monitor in &mut monitors {
            monitor.last_check_at = Some(now);
            monitor.last_report_at = Some(now);
        }
        if let Err(e) = self.store.update_weather_monitors(&monitors).await {
            error!("failed to persist weather check: {e}");
            return ResourceOutcome::Failed { checked: true };
        }

        let snapshot = match lookup {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("weather lookup failed, no report today: {e}");
                return ResourceOutcome::Failed { checked: true };
            }
        };

        let notification = Notification::DailyWeather {
            report: WeatherReport::new(snapshot),
        };
        let notified = self.deliver(&account.email, &notification).await;

        if notified {
            for monitor in &mut monitors {
                monitor.last_notified_at = Some(now);
            }
            if let Err(e) = self.store.update_weather_monitors(&monitors).await {
                warn!("failed to record notification time: {e}");
            }
        }

        ResourceOutcome::Processed {
            transition: false,
            notified,
        }
    }

    async fn reload_due(
        &self,
        ids: &[MonitorId],
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<WeatherMonitor>, StorageError> {
        let mut monitors = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(monitor) = self.store.get_weather_monitor(*id).await? {
                if monitor.last_report_at.is_none_or(|at| at < stale_before) {
                    monitors.push(monitor);
                }
            }
        }
        Ok(monitors)
    }

    #[instrument(skip(self))]
    async fn lookup(&self, location: &str) -> Result<WeatherSnapshot, WeatherError> {
        let timeout = self.settings.lookup_timeout;
        match tokio::time::timeout(timeout, self.weather.lookup(location, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(WeatherError::Timeout),
        }
    }

    async fn deliver(&self, recipient: &str, notification: &Notification) -> bool {
        deliver(
            self.notifier.as_ref(),
            self.settings.notify_timeout,
            recipient,
            notification,
        )
        .await
    }
}
