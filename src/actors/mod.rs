//! Scheduler built from sweep actors
//!
//! Each trigger runs as an independent async task controlled through an mpsc command
//! channel, so a slow or failing sweep of one kind never delays the other.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │    Scheduler    │  start() / stop()
//!                  └────────┬────────┘
//!               spawns      │       shutdown signal (watch)
//!          ┌────────────────┴────────────────┐
//!          │                                 │
//!  ┌───────▼────────────┐          ┌─────────▼──────────┐
//!  │ LivenessSweepActor │          │ WeatherSweepActor  │
//!  │ every interval     │          │ daily at HH:MM     │
//!  └───────┬────────────┘          └─────────┬──────────┘
//!          │ sweep_until()                   │ sweep_daily_until()
//!  ┌───────▼────────────┐          ┌─────────▼──────────┐
//!  │ LivenessMonitor-   │          │ WeatherReport-     │
//!  │ Manager            │          │ Manager            │
//!  └────────────────────┘          └────────────────────┘
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: `SweepNow` / `Shutdown` over an mpsc channel per actor
//! 2. **Request/Response**: `SweepNow` answers with the sweep summary over a oneshot
//! 3. **Shutdown signal**: a watch channel shared with the running sweeps, so no new
//!    resource is started once shutdown has been requested

pub mod liveness;
pub mod messages;
pub mod weather;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerSettings;
use crate::monitors::{LivenessMonitorManager, SweepSummary, WeatherReportManager};
use crate::util::panic_message;

use self::liveness::LivenessSweepActor;
use self::messages::SweepCommand;
use self::weather::WeatherSweepActor;

/// Run one sweep, turning a panic into an error
///
/// Resources are already isolated inside a sweep; this catches what escapes them
/// (selection, summary) and leaves the actor running.
pub(crate) async fn contained<F>(kind: &str, sweep: F) -> Result<SweepSummary>
where
    F: Future<Output = SweepSummary>,
{
    match AssertUnwindSafe(sweep).catch_unwind().await {
        Ok(summary) => Ok(summary),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{kind} sweep panicked: {message}");
            bail!("{kind} sweep panicked: {message}")
        }
    }
}

/// Handle for controlling a sweep actor
///
/// It can be cloned and shared across tasks.
#[derive(Clone)]
pub struct SweepHandle {
    sender: mpsc::Sender<SweepCommand>,

    /// Sweep kind, for logging
    pub kind: &'static str,
}

impl SweepHandle {
    pub(crate) fn new(sender: mpsc::Sender<SweepCommand>, kind: &'static str) -> Self {
        Self { sender, kind }
    }

    /// Run a sweep now and wait for its summary
    pub async fn sweep_now(&self) -> Result<SweepSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SweepCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep summary")?
    }

    /// Ask the actor to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SweepCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

/// Process-wide owner of the two periodic triggers
pub struct Scheduler {
    liveness: SweepHandle,
    weather: SweepHandle,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl Scheduler {
    /// Spawn both sweep actors on the current tokio runtime
    ///
    /// Fails if there is no runtime or the settings cannot drive a timer; this is the
    /// only error that aborts start-up.
    pub fn start(
        liveness: Arc<LivenessMonitorManager>,
        weather: Arc<WeatherReportManager>,
        settings: &SchedulerSettings,
    ) -> Result<Scheduler> {
        tokio::runtime::Handle::try_current()
            .context("the scheduler must be started inside a tokio runtime")?;

        if settings.liveness_interval.is_zero() {
            bail!("liveness sweep interval must be greater than zero");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (liveness_tx, liveness_rx) = mpsc::channel(8);
        let liveness_actor = LivenessSweepActor::new(
            liveness,
            settings.liveness_interval,
            liveness_rx,
            shutdown_rx.clone(),
        );

        let (weather_tx, weather_rx) = mpsc::channel(8);
        let weather_actor = WeatherSweepActor::new(
            weather,
            settings.daily_report_time,
            weather_rx,
            shutdown_rx,
        );

        let tasks = vec![
            tokio::spawn(liveness_actor.run()),
            tokio::spawn(weather_actor.run()),
        ];

        info!(
            "scheduler started: liveness every {:?}, weather daily at {}",
            settings.liveness_interval, settings.daily_report_time
        );

        Ok(Scheduler {
            liveness: SweepHandle::new(liveness_tx, "liveness"),
            weather: SweepHandle::new(weather_tx, "weather"),
            shutdown_tx,
            tasks,
            shutdown_grace: settings.shutdown_grace,
        })
    }

    pub fn liveness(&self) -> &SweepHandle {
        &self.liveness
    }

    pub fn weather(&self) -> &SweepHandle {
        &self.weather
    }

    /// Stop both triggers
    ///
    /// Running sweeps finish the resources they already started; actors still busy after
    /// the grace period are aborted.
    pub async fn stop(self) {
        info!("stopping scheduler");
        self.shutdown_tx.send_replace(true);
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;

        for handle in [&self.liveness, &self.weather] {
            match tokio::time::timeout_at(deadline, handle.shutdown()).await {
                Ok(Ok(())) => {}
                // actor already gone
                Ok(Err(e)) => warn!("{} actor: {e:#}", handle.kind),
                Err(_) => warn!("{} actor is not accepting commands", handle.kind),
            }
        }

        for mut task in self.tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("sweep actor failed: {e}"),
                Err(_) => {
                    warn!("sweep actor did not stop within the grace period, aborting");
                    task.abort();
                }
            }
        }

        info!("scheduler stopped");
    }
}
