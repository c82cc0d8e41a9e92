use std::time::Duration;
use tracing::{debug, warn};

use super::connector::{StreamConnector, WeakStreamConnector};
use super::control::ControlMessage;
use crate::core::scheduler::{Routine, Step};

/// Sends `{"action":"no-op"}` whenever the session has been idle for longer
/// than `interval`. Ends when the session ends or is dropped.
pub struct KeepAlive {
    connector: WeakStreamConnector,
    interval: Duration,
}

impl KeepAlive {
    pub fn new(connector: &StreamConnector, interval: Duration) -> Self {
        Self {
            connector: connector.downgrade(),
            interval,
        }
    }
}

impl Routine for KeepAlive {
    fn step(&mut self) -> Step {
        let Some(connector) = self.connector.upgrade() else {
            return Step::Done;
        };
        if connector.state().is_terminal() {
            return Step::Done;
        }
        if connector.idle_for() <= self.interval {
            return Step::Continue;
        }

        let message = match ControlMessage::NoOp.to_message() {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Failed to encode keep-alive");
                return Step::Done;
            }
        };

        match connector.send(message, false) {
            Ok(()) => {
                debug!(session_id = %connector.session_id(), "Sent keep-alive");
                Step::Continue
            }
            Err(_) => Step::Done,
        }
    }
}
