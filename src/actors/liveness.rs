//! LivenessSweepActor - fires the liveness sweep at a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → LivenessMonitorManager::sweep_until → summary logged
//!     ↑
//!     └─── Commands (SweepNow, Shutdown)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, warn};

use super::contained;
use super::messages::SweepCommand;
use crate::monitors::{LivenessMonitorManager, SweepSummary};

pub struct LivenessSweepActor {
    manager: Arc<LivenessMonitorManager>,

    /// Time between two sweeps
    interval: Duration,

    command_rx: mpsc::Receiver<SweepCommand>,

    shutdown: watch::Receiver<bool>,
}

impl LivenessSweepActor {
    pub fn new(
        manager: Arc<LivenessMonitorManager>,
        interval: Duration,
        command_rx: mpsc::Receiver<SweepCommand>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            interval,
            command_rx,
            shutdown,
        }
    }

    /// Run until a Shutdown command, the shutdown signal, or the command channel closes
    #[instrument(skip(self), name = "liveness_actor")]
    pub async fn run(mut self) {
        debug!("starting liveness sweep actor");

        let mut ticker = interval(self.interval);
        // a sweep longer than the interval delays the next one instead of bursting
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
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

        debug!("liveness sweep actor stopped");
    }

    async fn sweep(&self) -> Result<SweepSummary> {
        if *self.shutdown.borrow() {
            anyhow::bail!("scheduler is shutting down");
        }

        let shutdown = self.shutdown.clone();
        contained("liveness", self.manager.sweep_until(Utc::now(), shutdown)).await
    }
}
