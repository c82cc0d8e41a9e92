use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a stream session.
///
/// ```text
/// Idle ──send──▶ Connecting ──open──▶ Connected ──peer close──▶ Closed
///   │                │                    │
///   │ close()        │ error / close()    │ error / close()
///   ▼                ▼                    ▼
/// Closed    Disconnected | Closed   Disconnected | Closed
/// ```
///
/// `Closed` and `Disconnected` are terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created; nothing has been sent without `queue_only`
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    /// Dropped by an error or an unclean end of stream
    Disconnected = 3,
    /// Closed locally or by a peer close frame
    Closed = 4,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Closed)
    }

    /// Still able to carry traffic (possibly after connecting).
    pub fn is_alive(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, Closed)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connecting, Closed)
                | (Connected, Disconnected)
                | (Connected, Closed)
        )
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Idle,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            _ => ConnectionState::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "IDLE",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Atomic cell that only admits legal transitions.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move to `next`. Returns the previous state, or the current state if
    /// the move is illegal from it.
    pub(crate) fn transition(&self, next: ConnectionState) -> Result<ConnectionState, ConnectionState> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange(
                current as u8,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = ConnectionState::from_u8(actual),
            }
        }
    }
}
