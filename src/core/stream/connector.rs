//! Duplex WebSocket stream connector.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │     send()      │────▶│   send queue     │────▶│  Worker Task    │
//! └─────────────────┘     │ (Mutex+Notify)   │     │ (owns socket)   │
//!                         └──────────────────┘     └────────┬────────┘
//!                                                           │
//!                         ┌──────────────────┐              │
//!                         │  receive queue   │◀─────────────┘
//!                         │ (Mutex+flag)     │
//!                         └────────┬─────────┘
//!                                  │
//!                         ┌────────▼─────────┐
//!                         │   Dispatcher     │────▶ on_message / on_close
//!                         │ (scheduler tick) │
//!                         └──────────────────┘
//! ```
//!
//! The worker starts on the first send that is not `queue_only`. Callbacks
//! only ever run inside [`Scheduler::tick`].

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::keepalive::KeepAlive;
use super::message::Message;
use super::state::{AtomicState, ConnectionState};
use super::worker;
use crate::core::error::{ConnectorError, ConnectorResult};
use crate::core::scheduler::{Routine, RoutineId, Scheduler, Step, extract_panic_message};

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Invoked on the caller's tick for every inbound message, in order.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Invoked once on the caller's tick after the session reaches a terminal state.
pub type CloseCallback = Arc<dyn Fn(&StreamConnector) + Send + Sync>;

pub(crate) struct Shared {
    pub(crate) session_id: String,
    pub(crate) url: String,
    pub(crate) authorization: Option<String>,
    pub(crate) headers: Mutex<Vec<(String, String)>>,
    pub(crate) connect_timeout: Duration,
    pub(crate) state: AtomicState,

    pub(crate) send_queue: Mutex<VecDeque<Message>>,
    pub(crate) send_ready: Notify,
    pub(crate) receive_queue: Mutex<VecDeque<Message>>,
    pub(crate) receive_ready: AtomicBool,
    pub(crate) cancel: CancellationToken,

    last_send: Mutex<Instant>,
    worker_started: AtomicBool,
    dispatcher_started: AtomicBool,
    close_notified: AtomicBool,
    on_message: Mutex<Option<MessageCallback>>,
    on_close: Mutex<Option<CloseCallback>>,
    runtime: Handle,
    scheduler: Arc<Scheduler>,
}

impl Shared {
    pub(crate) fn push_received(&self, message: Message) {
        self.receive_queue.lock().push_back(message);
        self.receive_ready.store(true, Ordering::Release);
    }

    /// Record a terminal state reached by the worker. A prior `close()` wins.
    pub(crate) fn finish(&self, state: ConnectionState) {
        match self.state.transition(state) {
            Ok(previous) => info!(
                session_id = %self.session_id,
                from = %previous,
                to = %state,
                "Stream session ended"
            ),
            Err(current) => debug!(
                session_id = %self.session_id,
                state = %current,
                "Stream session already ended"
            ),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(auth) = self.authorization.as_mut() {
            auth.zeroize();
        }
    }
}

/// One full-duplex streaming session.
///
/// Cloning yields another handle to the same session. The session is not
/// reusable: once `Closed` or `Disconnected`, create a new connector.
#[derive(Clone)]
pub struct StreamConnector {
    shared: Arc<Shared>,
}

/// Non-owning handle, used by routines that must not keep a session alive.
#[derive(Clone)]
pub struct WeakStreamConnector {
    shared: Weak<Shared>,
}

impl WeakStreamConnector {
    pub fn upgrade(&self) -> Option<StreamConnector> {
        self.shared.upgrade().map(|shared| StreamConnector { shared })
    }
}

impl StreamConnector {
    /// Create an idle session for `url` (`ws://` or `wss://`).
    ///
    /// `authorization` is sent as the `Authorization` header on the
    /// handshake. Callbacks are dispatched from `scheduler`; the worker runs
    /// on `runtime`.
    pub fn new(
        url: impl Into<String>,
        authorization: Option<String>,
        runtime: Handle,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self::with_connect_timeout(url, authorization, runtime, scheduler, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        url: impl Into<String>,
        authorization: Option<String>,
        runtime: Handle,
        scheduler: Arc<Scheduler>,
        connect_timeout: Duration,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let url = url.into();

        debug!(session_id = %session_id, url = %url, "Created stream connector");

        Self {
            shared: Arc::new(Shared {
                session_id,
                url,
                authorization,
                headers: Mutex::new(Vec::new()),
                connect_timeout,
                state: AtomicState::new(),
                send_queue: Mutex::new(VecDeque::new()),
                send_ready: Notify::new(),
                receive_queue: Mutex::new(VecDeque::new()),
                receive_ready: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                last_send: Mutex::new(Instant::now()),
                worker_started: AtomicBool::new(false),
                dispatcher_started: AtomicBool::new(false),
                close_notified: AtomicBool::new(false),
                on_message: Mutex::new(None),
                on_close: Mutex::new(None),
                runtime,
                scheduler,
            }),
        }
    }

    /// Add a handshake header. Has no effect once the worker has started.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.shared.headers.lock().push((name.into(), value.into()));
    }

    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *self.shared.on_message.lock() = Some(Arc::new(callback));
    }

    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&StreamConnector) + Send + Sync + 'static,
    {
        *self.shared.on_close.lock() = Some(Arc::new(callback));
    }

    /// Queue `message` for sending.
    ///
    /// With `queue_only` the message waits for the next signalling send.
    /// Otherwise the worker is woken, and started if this is the first such
    /// send. Never blocks on the network.
    pub fn send(&self, message: Message, queue_only: bool) -> ConnectorResult<()> {
        let state = self.state();
        if state.is_terminal() {
            debug!(
                session_id = %self.shared.session_id,
                state = %state,
                "Dropping send on ended stream session"
            );
            return Err(ConnectorError::NotConnected);
        }

        self.shared.send_queue.lock().push_back(message);
        *self.shared.last_send.lock() = Instant::now();

        if !queue_only {
            self.shared.send_ready.notify_one();
            self.start_worker();
        }

        self.ensure_dispatcher();
        Ok(())
    }

    /// Close the session. Non-blocking; `on_close` follows on a later tick.
    pub fn close(&self) {
        match self.shared.state.transition(ConnectionState::Closed) {
            Ok(previous) => info!(
                session_id = %self.shared.session_id,
                from = %previous,
                "Closing stream session"
            ),
            Err(current) => debug!(
                session_id = %self.shared.session_id,
                state = %current,
                "Stream session already ended"
            ),
        }
        self.shared.cancel.cancel();
        self.ensure_dispatcher();
    }

    /// Run a keep-alive routine on this session's scheduler.
    pub fn start_keep_alive(&self, interval: Duration) -> RoutineId {
        self.shared.scheduler.run(KeepAlive::new(self, interval))
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Time since the last accepted `send`.
    pub fn idle_for(&self) -> Duration {
        self.shared.last_send.lock().elapsed()
    }

    /// Messages waiting to be written.
    pub fn queued_outbound(&self) -> usize {
        self.shared.send_queue.lock().len()
    }

    pub fn downgrade(&self) -> WeakStreamConnector {
        WeakStreamConnector {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn ptr_eq(&self, other: &StreamConnector) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn start_worker(&self) {
        if self.shared.worker_started.swap(true, Ordering::AcqRel) {
            return;
        }
        if self
            .shared
            .state
            .transition(ConnectionState::Connecting)
            .is_err()
        {
            // Closed before the first real send
            return;
        }

        debug!(session_id = %self.shared.session_id, "Starting stream worker");
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(worker::run(shared));
    }

    fn ensure_dispatcher(&self) {
        if self.shared.dispatcher_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.scheduler.run(Dispatcher {
            connector: self.clone(),
        });
    }

    fn dispatch_received(&self) -> usize {
        let batch: Vec<Message> = self.shared.receive_queue.lock().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let callback = self.shared.on_message.lock().clone();
        match callback {
            Some(callback) => {
                for message in batch {
                    if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                        error!(
                            session_id = %self.shared.session_id,
                            panic = %extract_panic_message(&panic_info),
                            "Message callback panicked"
                        );
                    }
                }
            }
            None => debug!(
                session_id = %self.shared.session_id,
                dropped = count,
                "No message callback registered, discarding messages"
            ),
        }
        count
    }

    fn notify_closed(&self) {
        if self.shared.close_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        let callback = self.shared.on_close.lock().clone();
        if let Some(callback) = callback {
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| callback(self))) {
                error!(
                    session_id = %self.shared.session_id,
                    panic = %extract_panic_message(&panic_info),
                    "Close callback panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for StreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnector")
            .field("session_id", &self.shared.session_id)
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Drains the receive queue on the caller's tick and reports the close.
///
/// Holds a strong handle so `on_close` still fires after the owner closes
/// and drops its own handle.
struct Dispatcher {
    connector: StreamConnector,
}

impl Routine for Dispatcher {
    fn step(&mut self) -> Step {
        let connector = &self.connector;

        // Read before draining so nothing pushed before a terminal state is missed
        let state = connector.state();

        if connector.shared.receive_ready.swap(false, Ordering::AcqRel) {
            connector.dispatch_received();
        }

        if state == ConnectionState::Idle && Arc::strong_count(&connector.shared) == 1 {
            debug!(
                session_id = %connector.shared.session_id,
                "Idle stream session abandoned, stopping dispatcher"
            );
            return Step::Done;
        }

        if state.is_alive() {
            return Step::Continue;
        }

        connector.dispatch_received();
        debug!(
            session_id = %connector.shared.session_id,
            state = %state,
            "Stream dispatcher finished"
        );
        connector.notify_closed();
        Step::Done
    }
}
