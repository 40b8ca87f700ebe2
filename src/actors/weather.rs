//! WeatherSweepActor - fires the daily weather sweep at a local wall-clock time

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Days, Local, LocalResult, NaiveTime, TimeDelta, TimeZone, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use super::contained;
use super::messages::SweepCommand;
use crate::monitors::{SweepSummary, WeatherReportManager};

/// First occurrence of `at` (local to `now`'s time zone) strictly after `now`
///
/// A time skipped by a DST change fires one hour later the same day; a time occurring
/// twice fires on its first occurrence.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();

    for offset in 0..=2 {
        let Some(day) = today.checked_add_days(Days::new(offset)) else {
            break;
        };
        let local = day.and_time(at);

        let candidate = match tz.from_local_datetime(&local) {
            LocalResult::Single(time) => Some(time),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            LocalResult::None => tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest(),
        };

        if let Some(candidate) = candidate.filter(|candidate| candidate > now) {
            return candidate;
        }
    }

    now.clone() + TimeDelta::days(1)
}

pub struct WeatherSweepActor {
    manager: Arc<WeatherReportManager>,

    /// Local wall-clock time of the daily report
    report_time: NaiveTime,

    command_rx: mpsc::Receiver<SweepCommand>,

    shutdown: watch::Receiver<bool>,
}

impl WeatherSweepActor {
    pub fn new(
        manager: Arc<WeatherReportManager>,
        report_time: NaiveTime,
        command_rx: mpsc::Receiver<SweepCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            report_time,
            command_rx,
            shutdown,
        }
    }

    #[instrument(skip(self), name = "weather_actor")]
    pub async fn run(mut self) {
        debug!("starting weather sweep actor");

        loop {
            let now = Local::now();
            let next = next_daily_run(&now, self.report_time);
            let wait = (next.clone() - now).to_std().unwrap_or_default();
            info!("next daily weather report at {next}");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let _ = self.sweep().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SweepCommand::SweepNow { respond_to } => {
                            debug!("received SweepNow command");
                            let result = self.sweep().await;
                            let _ = respond_to.send(result);
                        }

                        SweepCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        debug!("shutdown signalled");
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("weather sweep actor stopped");
    }

    async fn sweep(&self) -> Result<SweepSummary> {
        if *self.shutdown.borrow() {
            anyhow::bail!("scheduler is shutting down");
        }

        let shutdown = self.shutdown.clone();
        contained(
            "weather",
            self.manager.sweep_daily_until(Utc::now(), shutdown),
        )
        .await
    }
}
