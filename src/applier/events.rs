//! Progress events emitted while a plan executes.
//!
//! The applier posts to an unbounded channel; the CLI shell subscribes
//! and renders. No state is shared back.

use std::time::Duration;

/// One progress event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyEvent {
    /// An action began executing
    ActionStarted {
        /// The action's one-line summary
        summary: String,
    },
    /// An action completed successfully
    ActionFinished {
        /// The action's one-line summary
        summary: String,
        /// Wall-clock duration
        duration: Duration,
    },
    /// An action failed; the plan aborts after compensations
    ActionFailed {
        /// The action's one-line summary
        summary: String,
        /// Rendered error
        error: String,
    },
    /// The whole plan finished
    PlanFinished {
        /// Actions that changed something
        completed: usize,
        /// Total wall-clock duration
        duration: Duration,
    },
}

/// Sender half handed to the applier
pub type EventSender = tokio::sync::mpsc::UnboundedSender<ApplyEvent>;

/// Receiver half kept by the shell
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<ApplyEvent>;

/// Create a progress channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}
