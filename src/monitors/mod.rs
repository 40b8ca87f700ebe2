//! Decision logic of the monitoring engine
//!
//! - [`liveness`]: ping state machine, transition detection and throttled notifications
//! - [`weather`]: daily reports and on-demand checks
//! - [`recommendations`]: what to wear, derived from a weather snapshot
//! - [`locks`]: per-resource exclusive sections shared by sweeps and manual requests

pub mod liveness;
pub mod locks;
pub mod recommendations;
pub mod weather;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error};

use crate::notifications::{Notification, Notifier};
use crate::util::panic_message;

pub use liveness::{LivenessEvaluation, LivenessMonitorManager, MonitorError};
pub use recommendations::{Recommendation, WeatherReport, recommend};
pub use weather::{WeatherCheckError, WeatherReportManager};

/// Counters of one sweep, logged when the sweep ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    /// Records selected as due
    pub examined: usize,

    /// External calls (probes or lookups) that were made
    pub checked: usize,

    /// State changes (liveness only)
    pub transitions: usize,

    /// Notifications delivered
    pub notified: usize,

    /// Resources whose processing failed (lookup error, store error, missing account)
    pub failed: usize,

    /// Resources left alone (busy elsewhere, shutdown requested, no capability)
    pub skipped: usize,
}

impl SweepSummary {
    pub(crate) fn record(&mut self, outcome: ResourceOutcome) {
        match outcome {
            ResourceOutcome::Processed {
                transition,
                notified,
            } => {
                self.checked += 1;
                self.transitions += usize::from(transition);
                self.notified += usize::from(notified);
            }
            ResourceOutcome::Failed { checked } => {
                self.checked += usize::from(checked);
                self.failed += 1;
            }
            ResourceOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined={} checked={} transitions={} notified={} failed={} skipped={}",
            self.examined, self.checked, self.transitions, self.notified, self.failed, self.skipped
        )
    }
}

/// What happened to a single resource during a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceOutcome {
    Processed { transition: bool, notified: bool },
    Failed { checked: bool },
    Skipped,
}

/// Process one resource of a sweep; a panic counts as a failure of that resource only
pub(crate) async fn isolated<F>(kind: &str, work: F) -> ResourceOutcome
where
    F: Future<Output = ResourceOutcome>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            error!("{kind} resource panicked: {}", panic_message(panic.as_ref()));
            ResourceOutcome::Failed { checked: true }
        }
    }
}

/// Deliver within `timeout`; failures are logged and swallowed
pub(crate) async fn deliver(
    notifier: &dyn Notifier,
    timeout: Duration,
    recipient: &str,
    notification: &Notification,
) -> bool {
    let kind = notification.kind().as_str();

    match tokio::time::timeout(timeout, notifier.notify(recipient, notification)).await {
        Ok(Ok(())) => {
            debug!("sent {kind} notification to {recipient}");
            true
        }
        Ok(Err(e)) => {
            error!("failed to send {kind} notification to {recipient}: {e}");
            false
        }
        Err(_) => {
            error!("{kind} notification to {recipient} timed out");
            false
        }
    }
}
