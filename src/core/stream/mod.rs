//! WebSocket duplex streaming.
//!
//! A [`StreamConnector`] owns one session: an outbound queue written by a
//! background worker task and an inbound queue drained on the caller's
//! scheduler tick. [`KeepAlive`] keeps idle sessions open and
//! [`ControlMessage`] covers the JSON control frames.

mod connector;
mod control;
mod endpoint;
mod keepalive;
mod message;
mod state;
mod worker;

#[cfg(test)]
mod tests;

pub use connector::{
    CloseCallback, DEFAULT_CONNECT_TIMEOUT, MessageCallback, StreamConnector, WeakStreamConnector,
};
pub use control::{ControlMessage, StartMessage, l16_content_type};
pub use endpoint::{build_stream_url, fixup_url};
pub use keepalive::KeepAlive;
pub use message::Message;
pub use state::ConnectionState;
