//! Liveness monitoring
//!
//! Every monitored (account, address) pair carries its last observed state. A sweep probes
//! each due address, compares the result with the stored state and decides whether the
//! owner hears about it:
//!
//! | stored  | observed | notification                                   |
//! |---------|----------|------------------------------------------------|
//! | online  | offline  | `WentOffline`, always                          |
//! | offline | online   | `BackOnline`, always                           |
//! | online  | online   | `StillReachable`, at most once per throttle window |
//! | offline | offline  | none                                           |
//!
//! Manual probes bypass this table: they are always acknowledged with exactly one
//! `ManualProbe` notification.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use super::locks::ResourceLocks;
use super::{ResourceOutcome, SweepSummary, deliver, isolated};
use crate::clients::probe::{ProbeClient, ProbeError, validate_address};
use crate::config::LivenessSettings;
use crate::notifications::{Notification, Notifier};
use crate::storage::{
    Account, AccountId, Capability, LivenessMonitor, MonitorStore, NewLivenessMonitor, ProbeRecord,
    StorageError,
};
use crate::util::to_delta;
use crate::{LivenessState, ProbeResult};

/// Decision of one sweep step for one monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvaluation {
    WentOffline,
    BackOnline,
    StillOnline { notify: bool },
    StillOffline,
}

impl LivenessEvaluation {
    pub fn evaluate(
        stored: LivenessState,
        observed: LivenessState,
        last_notified: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        throttle_window: TimeDelta,
    ) -> LivenessEvaluation {
        match (stored, observed) {
            (LivenessState::Online, LivenessState::Offline) => LivenessEvaluation::WentOffline,
            (LivenessState::Offline, LivenessState::Online) => LivenessEvaluation::BackOnline,
            (LivenessState::Offline, LivenessState::Offline) => LivenessEvaluation::StillOffline,
            (LivenessState::Online, LivenessState::Online) => {
                // a notification stamped in the future (clock skew) counts as recent
                let notify = match last_notified {
                    None => true,
                    Some(at) => now.signed_duration_since(at) >= throttle_window,
                };
                LivenessEvaluation::StillOnline { notify }
            }
        }
    }

    pub fn is_transition(&self) -> bool {
        matches!(
            self,
            LivenessEvaluation::WentOffline | LivenessEvaluation::BackOnline
        )
    }

    pub fn notifies(&self) -> bool {
        match self {
            LivenessEvaluation::WentOffline | LivenessEvaluation::BackOnline => true,
            LivenessEvaluation::StillOnline { notify } => *notify,
            LivenessEvaluation::StillOffline => false,
        }
    }

    fn notification(&self, result: &ProbeResult) -> Option<Notification> {
        let address = result.address.clone();
        let diagnostic = result.diagnostic();

        match self {
            LivenessEvaluation::WentOffline => Some(Notification::WentOffline {
                address,
                diagnostic,
            }),
            LivenessEvaluation::BackOnline => Some(Notification::BackOnline {
                address,
                diagnostic,
            }),
            LivenessEvaluation::StillOnline { notify: true } => {
                Some(Notification::StillReachable {
                    address,
                    diagnostic,
                    probed_at: result.probed_at,
                })
            }
            LivenessEvaluation::StillOnline { notify: false } | LivenessEvaluation::StillOffline => {
                None
            }
        }
    }
}

/// Errors of a manual probe request
///
/// The outcome of the probe itself is never an error: an unreachable address or a
/// failed probe is reported through [`ProbeResult`].
#[derive(Debug)]
pub enum MonitorError {
    UnknownAccount(AccountId),
    InactiveAccount(AccountId),
    /// The account holds no active ping monitoring subscription
    NotSubscribed(AccountId),
    InvalidAddress(String),
    Storage(StorageError),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::UnknownAccount(id) => write!(f, "account {} does not exist", id),
            MonitorError::InactiveAccount(id) => write!(f, "account {} is not active", id),
            MonitorError::NotSubscribed(id) => {
                write!(f, "account {} has no ping monitoring subscription", id)
            }
            MonitorError::InvalidAddress(address) => write!(f, "invalid address: {}", address),
            MonitorError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for MonitorError {
    fn from(err: StorageError) -> Self {
        MonitorError::Storage(err)
    }
}

/// Sweep slack: records probed by the previous firing must not miss the next one
/// because of timer jitter.
fn sweep_slack(interval: std::time::Duration) -> std::time::Duration {
    (interval / 10).min(std::time::Duration::from_secs(30))
}

pub struct LivenessMonitorManager {
    store: Arc<dyn MonitorStore>,
    prober: Arc<dyn ProbeClient>,
    notifier: Arc<dyn Notifier>,
    settings: LivenessSettings,
    locks: ResourceLocks<(AccountId, String)>,
}

impl LivenessMonitorManager {
    pub fn new(
        store: Arc<dyn MonitorStore>,
        prober: Arc<dyn ProbeClient>,
        notifier: Arc<dyn Notifier>,
        settings: LivenessSettings,
    ) -> Self {
        Self {
            store,
            prober,
            notifier,
            settings,
            locks: ResourceLocks::new(),
        }
    }

    /// Probe every due monitor once
    pub async fn sweep(&self) -> SweepSummary {
        self.sweep_at(Utc::now()).await
    }

    /// Probe every monitor due at `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepSummary {
        let (_shutdown_tx, shutdown) = watch::channel(false);
        self.sweep_until(now, shutdown).await
    }

    /// Probe every monitor due at `now`, starting no new monitor once `shutdown` is set
    #[instrument(skip(self, now, shutdown), fields(now = %now))]
    pub async fn sweep_until(
        &self,
        now: DateTime<Utc>,
        shutdown: watch::Receiver<bool>,
    ) -> SweepSummary {
        let mut summary = SweepSummary::default();

        let interval = self.settings.sweep_interval;
        let stale_before = now
            .checked_sub_signed(to_delta(interval.saturating_sub(sweep_slack(interval))))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let due = match self.store.due_liveness_monitors(stale_before).await {
            Ok(due) => due,
            Err(e) => {
                error!("failed to load due liveness monitors: {e}");
                return summary;
            }
        };
        summary.examined = due.len();

        let shutdown = &shutdown;
        let outcomes: Vec<ResourceOutcome> = futures::stream::iter(due)
            .map(|monitor| {
                isolated(
                    "liveness",
                    self.sweep_one(monitor, now, stale_before, shutdown),
                )
            })
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            summary.record(outcome);
        }

        info!("liveness sweep finished: {summary}");
        summary
    }

    #[instrument(skip_all, fields(id = monitor.id, address = %monitor.address))]
    async fn sweep_one(
        &self,
        monitor: LivenessMonitor,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> ResourceOutcome {
        if *shutdown.borrow() {
            trace!("shutdown requested, leaving monitor for the next run");
            return ResourceOutcome::Skipped;
        }

        let key = (monitor.account_id, monitor.address.clone());
        let Some(_guard) = self.locks.try_acquire(&key) else {
            debug!("monitor is being processed elsewhere, skipping");
            return ResourceOutcome::Skipped;
        };

        // the record may have changed between selection and locking
        let monitor = match self.store.get_liveness_monitor(monitor.id).await {
            Ok(Some(monitor)) if monitor.last_probe_at <= stale_before => monitor,
            Ok(Some(_)) => {
                debug!("monitor was probed in the meantime, skipping");
                return ResourceOutcome::Skipped;
            }
            Ok(None) => {
                debug!("monitor was deleted, skipping");
                return ResourceOutcome::Skipped;
            }
            Err(e) => {
                error!("failed to reload monitor: {e}");
                return ResourceOutcome::Failed { checked: false };
            }
        };

        let account = match self.recipient(monitor.account_id).await {
            Some(account) => account,
            None => return ResourceOutcome::Failed { checked: false },
        };

        let result = self.probe(&monitor.address, now).await;
        let observed = result.state();

        let evaluation = LivenessEvaluation::evaluate(
            monitor.state,
            observed,
            monitor.last_notified_at,
            now,
            to_delta(self.settings.throttle_window),
        );
        let notification = evaluation.notification(&result);

        trace!(
            "{} -> {} ({evaluation:?}, last notified {:?})",
            monitor.state, observed, monitor.last_notified_at
        );

        let mut updated = monitor;
        updated.state = observed;
        updated.last_probe_at = now;
        if notification.is_some() {
            updated.last_notified_at = Some(now);
        }

        if let Err(e) = self.store.update_liveness_monitor(&updated).await {
            error!("failed to persist probe outcome, state left unchanged: {e}");
            return ResourceOutcome::Failed { checked: true };
        }

        if evaluation.is_transition() {
            info!("{} is now {}", updated.address, observed);
        }

        let notified = match notification {
            Some(notification) => self.deliver(&account.email, &notification).await,
            None => false,
        };

        ResourceOutcome::Processed {
            transition: evaluation.is_transition(),
            notified,
        }
    }

    /// Probe `address` for `account_id` right away
    ///
    /// Requires an active account holding the ping monitoring capability.
    /// Records the probe in the history, creates the monitor if the pair is not tracked
    /// yet (with the observed state as its baseline) or updates it otherwise, and always
    /// acknowledges the probe with exactly one notification.
    #[instrument(skip(self))]
    pub async fn probe_now(
        &self,
        account_id: AccountId,
        address: &str,
    ) -> Result<ProbeResult, MonitorError> {
        validate_address(address).map_err(|_| MonitorError::InvalidAddress(address.to_string()))?;

        let account = match self.store.get_account(account_id).await? {
            Some(account) if account.is_active => account,
            Some(_) => return Err(MonitorError::InactiveAccount(account_id)),
            None => return Err(MonitorError::UnknownAccount(account_id)),
        };
        if !self
            .store
            .has_capability(account_id, Capability::PingMonitoring)
            .await?
        {
            return Err(MonitorError::NotSubscribed(account_id));
        }

        let key = (account_id, address.to_string());
        let _guard = self.locks.acquire(&key).await;

        let now = Utc::now();
        let result = self.probe(address, now).await;
        let state = result.state();

        let record = ProbeRecord {
            account_id,
            address: address.to_string(),
            reachable: result.reachable,
            raw_output: result.raw_output.clone(),
            error: result.error.as_ref().map(ToString::to_string),
            probed_at: now,
        };
        if let Err(e) = self.store.append_probe_history(record).await {
            warn!("failed to record probe history: {e}");
        }

        if let Err(e) = self.record_manual_probe(account_id, address, state, now).await {
            error!("failed to persist manual probe: {e}");
        }

        let notification = Notification::ManualProbe {
            address: address.to_string(),
            state,
            diagnostic: result.diagnostic(),
        };
        self.deliver(&account.email, &notification).await;

        Ok(result)
    }

    async fn record_manual_probe(
        &self,
        account_id: AccountId,
        address: &str,
        state: LivenessState,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        match self.store.find_liveness_monitor(account_id, address).await? {
            Some(mut monitor) => {
                monitor.state = state;
                monitor.last_probe_at = now;
                monitor.last_notified_at = Some(now);
                self.store.update_liveness_monitor(&monitor).await
            }
            None => {
                let created = self
                    .store
                    .create_liveness_monitor(NewLivenessMonitor {
                        account_id,
                        address: address.to_string(),
                        state,
                        probed_at: now,
                        notified_at: Some(now),
                    })
                    .await?;
                info!("now monitoring {address} for account {account_id} ({state})");
                debug!("created liveness monitor {}", created.id);
                Ok(())
            }
        }
    }

    /// Run the probe with the configured timeout; failures become an offline result
    #[instrument(skip(self, now))]
    async fn probe(&self, address: &str, now: DateTime<Utc>) -> ProbeResult {
        let timeout = self.settings.probe_timeout;

        let outcome = match tokio::time::timeout(timeout, self.prober.probe(address, timeout)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout),
        };

        match outcome {
            Ok(reply) => {
                if reply.reachable {
                    trace!("{address} answered");
                } else {
                    debug!("{address} is unreachable");
                }
                ProbeResult {
                    address: address.to_string(),
                    reachable: reply.reachable,
                    raw_output: reply.raw_output,
                    error: None,
                    probed_at: now,
                }
            }
            Err(e) => {
                warn!("probe of {address} failed: {e}");
                ProbeResult {
                    address: address.to_string(),
                    reachable: false,
                    raw_output: String::new(),
                    error: Some(e),
                    probed_at: now,
                }
            }
        }
    }

    /// Owner of a monitor, if it can be notified
    async fn recipient(&self, account_id: AccountId) -> Option<Account> {
        match self.store.get_account(account_id).await {
            Ok(Some(account)) if account.is_active => Some(account),
            Ok(Some(_)) => {
                warn!("account {account_id} is inactive, skipping monitor");
                None
            }
            Ok(None) => {
                warn!("account {account_id} does not exist, skipping monitor");
                None
            }
            Err(e) => {
                error!("failed to load account {account_id}: {e}");
                None
            }
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
