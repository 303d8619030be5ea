//! Message types for actor communication

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::snapshot::ReadingsSnapshot;

/// Commands that can be sent to the PollerActor
#[derive(Debug)]
pub enum PollerCommand {
    /// Run a cycle now (bypassing the interval timer)
    ///
    /// Answered once the cycle's readings are on the bus. The next scheduled
    /// cycle is pushed out to one interval after this one.
    PollNow {
        respond_to: oneshot::Sender<Arc<ReadingsSnapshot>>,
    },

    /// Gracefully shut down the poller
    ///
    /// An in-flight cycle completes first.
    Shutdown,
}
