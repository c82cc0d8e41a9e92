//! Speech-to-Text client.
//!
//! # Listening lifecycle
//!
//! ```text
//! start_listening ──▶ send Start ──▶ {"state":"listening"} ──▶ active
//!                                                                │
//!       voiced chunk ──▶ active? ──yes──▶ binary frame           │
//!                           │                                    │
//!                           no ──▶ queue (flushed on listening)  │
//!                                                                ▼
//!       silent chunk after audio ──▶ send Stop ──▶ inactive until next
//!                                                  {"state":"listening"}
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::messages::{ModelList, ResultList, SessionEvent, SpeechModel};
use super::{MAX_QUEUED_RECORDINGS, MAX_RECOGNIZE_CLIP_SIZE, SERVICE_ID, SpeechToTextOptions};
use crate::core::error::{ConnectorError, ConnectorResult};
use crate::core::registry::ConnectorRegistry;
use crate::core::rest::{Request, Response};
use crate::core::scheduler::RoutineId;
use crate::core::stream::{ConnectionState, ControlMessage, Message, StartMessage, StreamConnector};

/// Receives every result list of a listening session.
pub type ResultCallback = Arc<dyn Fn(ResultList) + Send + Sync>;

/// Receives listening errors, including the server's own error messages.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A slice of recorded L16 audio with its peak level in `0.0..=1.0`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub level: f32,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>, level: f32) -> Self {
        Self {
            data: data.into(),
            level,
        }
    }
}

struct Session {
    connector: StreamConnector,
    keep_alive: RoutineId,
    on_results: ResultCallback,
}

#[derive(Default)]
struct ListenState {
    session: Option<Session>,
    /// Set by `{"state":"listening"}`, cleared by Stop
    active: bool,
    audio_sent: bool,
    queued: VecDeque<Bytes>,
}

impl ListenState {
    fn current(&self, session_id: &str) -> Option<&Session> {
        self.session
            .as_ref()
            .filter(|session| session.connector.session_id() == session_id)
    }

    fn reset(&mut self) -> Option<Session> {
        self.active = false;
        self.audio_sent = false;
        self.queued.clear();
        self.session.take()
    }
}

struct Listener {
    registry: Arc<ConnectorRegistry>,
    options: SpeechToTextOptions,
    state: Mutex<ListenState>,
    on_error: Mutex<Option<ErrorCallback>>,
}

/// Speech-to-Text service client.
///
/// Callbacks run inside the registry scheduler's `tick`.
pub struct SpeechToText {
    listener: Arc<Listener>,
}

impl SpeechToText {
    pub fn new(registry: Arc<ConnectorRegistry>) -> Self {
        Self::with_options(registry, SpeechToTextOptions::default())
    }

    pub fn with_options(registry: Arc<ConnectorRegistry>, options: SpeechToTextOptions) -> Self {
        Self {
            listener: Arc::new(Listener {
                registry,
                options,
                state: Mutex::new(ListenState::default()),
                on_error: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &SpeechToTextOptions {
        &self.listener.options
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.listener.on_error.lock() = Some(Arc::new(callback));
    }

    // =========================================================================
    // Listening
    // =========================================================================

    /// Open a listening session and send the Start message.
    ///
    /// Returns false when already listening or when no session could be
    /// created for the service.
    pub fn start_listening<F>(&self, callback: F) -> bool
    where
        F: Fn(ResultList) + Send + Sync + 'static,
    {
        Listener::start(&self.listener, Arc::new(callback))
    }

    /// Feed one recorded chunk into the listening session.
    pub fn on_listen(&self, chunk: AudioChunk) {
        self.listener.record(chunk);
    }

    /// Close the listening session. Returns false when not listening.
    pub fn stop_listening(&self) -> bool {
        self.listener.stop()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.state.lock().session.is_some()
    }

    /// Whether the server is currently accepting audio.
    pub fn is_active(&self) -> bool {
        self.listener.state.lock().active
    }

    /// Chunks waiting for the server to start listening.
    pub fn queued_chunks(&self) -> usize {
        self.listener.state.lock().queued.len()
    }

    // =========================================================================
    // REST
    // =========================================================================

    /// Recognize a complete WAV clip.
    ///
    /// Returns `Ok(false)` without sending when the clip is larger than
    /// [`MAX_RECOGNIZE_CLIP_SIZE`] or the service has no credentials.
    pub fn recognize<F>(&self, wav: impl Into<Bytes>, callback: F) -> ConnectorResult<bool>
    where
        F: FnOnce(ConnectorResult<ResultList>) + Send + 'static,
    {
        let wav = wav.into();
        if wav.len() > MAX_RECOGNIZE_CLIP_SIZE {
            error!(
                size = wav.len(),
                max = MAX_RECOGNIZE_CLIP_SIZE,
                "AudioClip is too large for Recognize()"
            );
            return Ok(false);
        }

        let Some(connector) = self.listener.registry.get_connector(SERVICE_ID, "/v1/recognize")
        else {
            return Ok(false);
        };

        let options = &self.listener.options;
        let request = Request::post("")
            .with_header("Content-Type", "audio/wav")
            .with_parameter("model", &options.model)
            .with_parameter("continuous", false)
            .with_parameter("max_alternatives", options.max_alternatives)
            .with_parameter("timestamps", options.timestamps)
            .with_parameter("word_confidence", options.word_confidence)
            .with_body(wav)
            .on_response(move |_, response| callback(parse_response(response)));

        connector.send(request)
    }

    /// List the recognition models available to this account.
    pub fn get_models<F>(&self, callback: F) -> bool
    where
        F: FnOnce(ConnectorResult<Vec<SpeechModel>>) + Send + 'static,
    {
        let Some(connector) = self.listener.registry.get_connector(SERVICE_ID, "/v1/models") else {
            return false;
        };

        let request = Request::get("").on_response(move |_, response| {
            callback(parse_response::<ModelList>(response).map(|list| list.models))
        });

        match connector.send(request) {
            Ok(sent) => sent,
            Err(e) => {
                error!(error = %e, "Failed to send GetModels request");
                false
            }
        }
    }
}

impl std::fmt::Debug for SpeechToText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechToText")
            .field("options", &self.listener.options)
            .field("listening", &self.is_listening())
            .finish()
    }
}

fn parse_response<T: DeserializeOwned>(response: Response) -> ConnectorResult<T> {
    if !response.success {
        let message = response
            .error
            .unwrap_or_else(|| "Request failed".to_string());
        return Err(match response.status {
            None if message.starts_with("Request timed out") => ConnectorError::Timeout(message),
            _ => ConnectorError::Transport(message),
        });
    }
    response.json()
}

impl Listener {
    fn start(self: &Arc<Self>, on_results: ResultCallback) -> bool {
        let mut state = self.state.lock();
        if state.session.is_some() {
            warn!("Already listening");
            return false;
        }

        let Some(connector) = self.registry.create_stream_connector(
            SERVICE_ID,
            "/v1/recognize",
            &[("model", self.options.model.as_str())],
        ) else {
            return false;
        };

        let session_id = connector.session_id().to_string();
        let weak: Weak<Listener> = Arc::downgrade(self);
        {
            let weak = weak.clone();
            connector.on_message(move |message| {
                if let Some(listener) = weak.upgrade() {
                    listener.handle_message(&session_id, message);
                }
            });
        }
        connector.on_close(move |connector| {
            if let Some(listener) = weak.upgrade() {
                listener.handle_close(connector);
            }
        });

        let start = match ControlMessage::Start(self.start_message()).to_message() {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to encode start message");
                return false;
            }
        };
        if let Err(e) = connector.send(start, false) {
            error!(error = %e, "Failed to send start message");
            connector.close();
            return false;
        }

        let interval = self
            .options
            .keep_alive_interval
            .unwrap_or_else(|| self.registry.settings_for(SERVICE_ID).keep_alive_interval);
        let keep_alive = connector.start_keep_alive(interval);

        info!(
            session_id = %connector.session_id(),
            model = %self.options.model,
            "Started listening"
        );

        state.reset();
        state.session = Some(Session {
            connector,
            keep_alive,
            on_results,
        });
        true
    }

    fn start_message(&self) -> StartMessage {
        let mut start = StartMessage::l16(self.options.recording_hz);
        start.max_alternatives = self.options.max_alternatives;
        start.timestamps = self.options.timestamps;
        start.word_confidence = self.options.word_confidence;
        start
    }

    fn stop(&self) -> bool {
        let session = self.state.lock().reset();
        let Some(session) = session else {
            error!("Not currently listening");
            return false;
        };

        self.registry.scheduler().stop(session.keep_alive);
        session.connector.close();
        info!(session_id = %session.connector.session_id(), "Stopped listening");
        true
    }

    fn record(&self, chunk: AudioChunk) {
        let mut state = self.state.lock();
        let Some(connector) = state.session.as_ref().map(|s| s.connector.clone()) else {
            return;
        };

        let voiced = !self.options.detect_silence || chunk.level >= self.options.silence_threshold;

        if voiced {
            if state.active {
                match connector.send(Message::Binary(chunk.data), false) {
                    Ok(()) => state.audio_sent = true,
                    Err(e) => warn!(error = %e, "Failed to send audio"),
                }
                return;
            }

            // Not listening yet, hold the audio until the server is ready
            state.queued.push_back(chunk.data);
            if state.queued.len() > MAX_QUEUED_RECORDINGS {
                drop(state);
                error!(max = MAX_QUEUED_RECORDINGS, "Recording queue is full");
                self.stop();
                self.report_error("Recording queue is full.");
            }
        } else if state.audio_sent {
            Self::send_stop(&mut state, &connector);
        }
    }

    /// End the current utterance. Audio queues until the next `listening`.
    fn send_stop(state: &mut ListenState, connector: &StreamConnector) {
        if state.active {
            match ControlMessage::Stop.to_message() {
                Ok(stop) => {
                    if let Err(e) = connector.send(stop, false) {
                        warn!(error = %e, "Failed to send stop message");
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode stop message"),
            }
            state.active = false;
        }
        state.audio_sent = false;
    }

    fn handle_message(&self, session_id: &str, message: Message) {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => {
                warn!(bytes = data.len(), "Unexpected binary message");
                return;
            }
        };

        match SessionEvent::parse(&text) {
            Ok(SessionEvent::Results(results)) => {
                let callback = self
                    .state
                    .lock()
                    .current(session_id)
                    .map(|session| session.on_results.clone());
                if let Some(callback) = callback {
                    callback(results);
                }
            }
            Ok(SessionEvent::State(state)) => {
                debug!(session_id = session_id, state = %state, "Server state");
                if state == "listening" {
                    self.activate(session_id);
                }
            }
            Ok(SessionEvent::Error(message)) => {
                error!(session_id = session_id, error = %message, "Error from server");
                self.report_error(&message);
            }
            Ok(SessionEvent::Unknown(value)) => {
                warn!(session_id = session_id, message = %value, "Unknown message");
            }
            Err(e) => {
                error!(session_id = session_id, error = %e, "Failed to parse server message");
            }
        }
    }

    /// Mark the session ready and flush the queued audio in order.
    fn activate(&self, session_id: &str) {
        let mut state = self.state.lock();
        let Some(connector) = state.current(session_id).map(|s| s.connector.clone()) else {
            return;
        };

        if state.active {
            warn!(session_id = session_id, "Listening state received while already active");
        }
        state.active = true;

        let queued: Vec<Bytes> = state.queued.drain(..).collect();
        if !queued.is_empty() {
            debug!(session_id = session_id, chunks = queued.len(), "Flushing queued audio");
        }
        for data in queued {
            if let Err(e) = connector.send(Message::Binary(data), false) {
                warn!(session_id = session_id, error = %e, "Failed to send queued audio");
                break;
            }
            state.audio_sent = true;
        }
    }

    fn handle_close(&self, connector: &StreamConnector) {
        if self.state.lock().current(connector.session_id()).is_none() {
            return;
        }

        let final_state = connector.state();
        self.stop();

        if final_state == ConnectionState::Disconnected {
            error!(session_id = %connector.session_id(), "Disconnected from server");
            self.report_error("Disconnected from server.");
        }
    }

    fn report_error(&self, message: &str) {
        let callback = self.on_error.lock().clone();
        if let Some(callback) = callback {
            callback(message);
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(session) = self.state.get_mut().reset() {
            self.registry.scheduler().stop(session.keep_alive);
            session.connector.close();
        }
    }
}
