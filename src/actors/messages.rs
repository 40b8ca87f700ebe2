//! Command messages of the sweep actors

use tokio::sync::oneshot;

use crate::monitors::SweepSummary;

/// Commands that can be sent to a sweep actor
#[derive(Debug)]
pub enum SweepCommand {
    /// Run a sweep immediately, outside the regular cadence
    ///
    /// Used by the CLI and by tests.
    SweepNow {
        /// Channel to send the summary back; an error means the sweep panicked
        respond_to: oneshot::Sender<anyhow::Result<SweepSummary>>,
    },

    /// Stop after the sweep in progress (if any) has finished
    Shutdown,
}
