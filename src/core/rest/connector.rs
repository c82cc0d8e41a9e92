//! Pooled REST connector.
//!
//! ```text
//! send() ──▶ slot free? ──yes──▶ spawn request task ──▶ completions (mpsc)
//!               │                      ▲                      │
//!               no                     │ slot handed over     ▼
//!               ▼                      │              process_responses()
//!         pending (FIFO) ──────────────┘              on the caller's tick
//! ```
//!
//! At most `max_connections` requests are in flight per connector. When a
//! request finishes, its slot goes straight to the oldest pending request.

use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::request::{Form, Request};
use super::response::Response;
use crate::config::ConnectorSettings;
use crate::core::credentials::ServiceCredentials;
use crate::core::error::{ConnectorError, ConnectorResult};
use crate::core::scheduler::{Step, extract_panic_message};

/// Longest slice of an error body copied into `Response::error`.
const MAX_ERROR_BODY_CHARS: usize = 512;

struct PendingRequest {
    request_id: u64,
    request: Request,
}

struct Completion {
    request_id: u64,
    request: Request,
    response: Response,
}

#[derive(Default)]
struct SlotState {
    in_flight: usize,
    pending: VecDeque<PendingRequest>,
}

struct Inner {
    service_id: String,
    base_url: String,
    authorization: Option<String>,
    settings: ConnectorSettings,
    client: reqwest::Client,
    runtime: Handle,
    slots: Mutex<SlotState>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
    request_counter: AtomicU64,
    shut_down: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(auth) = self.authorization.as_mut() {
            auth.zeroize();
        }
    }
}

/// Releases a request slot when the request task ends, however it ends.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let next = {
            let mut slots = self.inner.slots.lock();
            let next = slots.pending.pop_front();
            if next.is_none() {
                slots.in_flight = slots.in_flight.saturating_sub(1);
            }
            next
        };

        if let Some(next) = next {
            debug!(
                service_id = %self.inner.service_id,
                request_id = next.request_id,
                "Starting queued request"
            );
            Inner::spawn(&self.inner, next.request_id, next.request);
        }
    }
}

/// HTTP connector for one `(service, path)` endpoint.
///
/// Cloning is cheap; clones share the same pool and pending queue.
#[derive(Clone)]
pub struct RestConnector {
    inner: Arc<Inner>,
}

impl RestConnector {
    /// Create a connector rooted at `credentials.url + path`.
    ///
    /// Request tasks are spawned on `runtime`. Responses are delivered by
    /// [`process_responses`](Self::process_responses).
    pub fn new(
        service_id: &str,
        credentials: &ServiceCredentials,
        path: &str,
        settings: ConnectorSettings,
        runtime: Handle,
    ) -> ConnectorResult<Self> {
        if settings.max_connections == 0 {
            return Err(ConnectorError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(settings.max_connections)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| {
                ConnectorError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let base_url = format!("{}{}", credentials.url.trim_end_matches('/'), path);

        debug!(
            service_id = service_id,
            base_url = %base_url,
            max_connections = settings.max_connections,
            "Created REST connector"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                service_id: service_id.to_string(),
                base_url,
                authorization: credentials.authorization_header(),
                settings,
                client,
                runtime,
                slots: Mutex::new(SlotState::default()),
                completions_tx,
                completions_rx: Mutex::new(completions_rx),
                request_counter: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Submit a request without waiting for it.
    ///
    /// Returns `Ok(false)` when the payload exceeds `max_request_bytes` or
    /// the connector has been shut down; nothing is sent and the callback
    /// never runs. Otherwise the callback runs exactly once, from
    /// [`process_responses`](Self::process_responses).
    pub fn send(&self, request: Request) -> ConnectorResult<bool> {
        request.validate()?;

        if self.is_shut_down() {
            warn!(
                service_id = %self.inner.service_id,
                function = %request.function,
                "Connector is shut down, not sending"
            );
            return Ok(false);
        }

        if let Some(limit) = self.inner.settings.max_request_bytes {
            let size = request.payload_len();
            if size > limit {
                warn!(
                    service_id = %self.inner.service_id,
                    function = %request.function,
                    size = size,
                    limit = limit,
                    "Request payload exceeds size limit, not sending"
                );
                return Ok(false);
            }
        }

        let request_id = self.inner.request_counter.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut slots = self.inner.slots.lock();
            // Shutdown drains `pending` under this lock
            if self.is_shut_down() {
                return Ok(false);
            }
            if slots.in_flight >= self.inner.settings.max_connections {
                debug!(
                    service_id = %self.inner.service_id,
                    request_id = request_id,
                    pending = slots.pending.len() + 1,
                    "All request slots busy, queueing"
                );
                slots.pending.push_back(PendingRequest {
                    request_id,
                    request,
                });
                return Ok(true);
            }
            slots.in_flight += 1;
        }

        Inner::spawn(&self.inner, request_id, request);
        Ok(true)
    }

    /// Stop accepting requests.
    ///
    /// Queued requests complete with a failed response on the next
    /// `process_responses`; requests already in flight finish normally.
    pub fn shutdown(&self) {
        let cancelled: Vec<PendingRequest> = {
            let mut slots = self.inner.slots.lock();
            if self.inner.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            slots.pending.drain(..).collect()
        };
        info!(
            service_id = %self.inner.service_id,
            cancelled = cancelled.len(),
            "Shutting down REST connector"
        );

        for pending in cancelled {
            let _ = self.inner.completions_tx.send(Completion {
                request_id: pending.request_id,
                request: pending.request,
                response: Response::failure(None, "Connector shut down", Duration::ZERO),
            });
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Deliver every completed response to its callback on this thread.
    ///
    /// Returns the number of responses delivered.
    pub fn process_responses(&self) -> usize {
        self.inner.process_responses()
    }

    /// A scheduler routine that calls `process_responses` every tick.
    ///
    /// It ends once every handle to this connector is gone.
    pub fn response_pump(&self) -> impl FnMut() -> Step + Send + 'static {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        move || match inner.upgrade() {
            Some(inner) => {
                inner.process_responses();
                Step::Continue
            }
            None => Step::Done,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.inner.service_id
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.inner.settings
    }

    /// Requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.inner.slots.lock().in_flight
    }

    /// Requests waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.slots.lock().pending.len()
    }

    /// Whether both handles share one pool.
    pub fn ptr_eq(&self, other: &RestConnector) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for RestConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConnector")
            .field("service_id", &self.inner.service_id)
            .field("base_url", &self.inner.base_url)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl Inner {
    /// Run `request` on the runtime. The caller must already own a slot.
    fn spawn(self: &Arc<Self>, request_id: u64, request: Request) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let _slot = SlotGuard {
                inner: Arc::clone(&inner),
            };
            let started = Instant::now();
            let timeout = request.timeout.unwrap_or(inner.settings.timeout);
            let prepared = inner.prepare(request_id, &request, timeout);

            let response = match prepared {
                Err(e) => Response::failure(None, e, started.elapsed()),
                Ok(builder) => {
                    match AssertUnwindSafe(inner.execute(request_id, builder, timeout))
                        .catch_unwind()
                        .await
                    {
                        Ok(response) => response,
                        Err(_) => {
                            error!(
                                service_id = %inner.service_id,
                                request_id = request_id,
                                "Request task panicked"
                            );
                            Response::failure(None, "Request task panicked", started.elapsed())
                        }
                    }
                }
            };

            // Receiver lives as long as `inner`, which this task holds
            let _ = inner.completions_tx.send(Completion {
                request_id,
                request,
                response,
            });
        });
    }

    fn prepare(
        &self,
        request_id: u64,
        request: &Request,
        timeout: Duration,
    ) -> Result<RequestBuilder, String> {
        let url = format!("{}{}", self.base_url, request.function);

        debug!(
            service_id = %self.service_id,
            request_id = request_id,
            method = %request.method,
            url = %url,
            "Sending REST request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(timeout);

        if !request.parameters.is_empty() {
            builder = builder.query(&request.parameters);
        }
        if let Some(auth) = &self.authorization {
            builder = builder.header(AUTHORIZATION, auth.as_str());
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(forms) = &request.forms {
            builder = encode_forms(builder, forms)?;
        } else if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        Ok(builder)
    }

    async fn execute(
        &self,
        request_id: u64,
        builder: RequestBuilder,
        timeout: Duration,
    ) -> Response {
        let started = Instant::now();

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    service_id = %self.service_id,
                    request_id = request_id,
                    error = %e,
                    "REST request failed"
                );
                return Response::failure(None, transport_error(&e, timeout), started.elapsed());
            }
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        let data = match response.bytes().await {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    service_id = %self.service_id,
                    request_id = request_id,
                    error = %e,
                    "Failed to read response body"
                );
                return Response::failure(
                    Some(status.as_u16()),
                    transport_error(&e, timeout),
                    started.elapsed(),
                );
            }
        };

        let elapsed = started.elapsed();

        if status.is_success() {
            debug!(
                service_id = %self.service_id,
                request_id = request_id,
                status = status.as_u16(),
                bytes = data.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "REST request completed"
            );
            Response {
                success: true,
                status: Some(status.as_u16()),
                data,
                headers,
                elapsed,
                error: None,
            }
        } else {
            let error = describe_status(status.as_u16(), &String::from_utf8_lossy(&data));
            warn!(
                service_id = %self.service_id,
                request_id = request_id,
                status = status.as_u16(),
                error = %error,
                "REST request returned error status"
            );
            Response {
                success: false,
                status: Some(status.as_u16()),
                data,
                headers,
                elapsed,
                error: Some(error),
            }
        }
    }

    fn process_responses(&self) -> usize {
        let completions: Vec<Completion> = {
            let mut rx = self.completions_rx.lock();
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        let delivered = completions.len();
        for Completion {
            request_id,
            mut request,
            response,
        } in completions
        {
            match request.on_response.take() {
                Some(callback) => {
                    if let Err(panic_info) =
                        std::panic::catch_unwind(AssertUnwindSafe(|| callback(&request, response)))
                    {
                        error!(
                            service_id = %self.service_id,
                            request_id = request_id,
                            panic = %extract_panic_message(&panic_info),
                            "Response callback panicked"
                        );
                    }
                }
                None => debug!(
                    service_id = %self.service_id,
                    request_id = request_id,
                    "No response callback registered, discarding response"
                ),
            }
        }
        delivered
    }
}

fn encode_forms(
    builder: RequestBuilder,
    forms: &BTreeMap<String, Form>,
) -> Result<RequestBuilder, String> {
    if !forms.values().any(Form::is_file) {
        let fields: BTreeMap<&str, &str> = forms
            .iter()
            .filter_map(|(name, field)| match field {
                Form::Text(value) => Some((name.as_str(), value.as_str())),
                Form::File { .. } => None,
            })
            .collect();
        return Ok(builder.form(&fields));
    }

    let mut multipart = reqwest::multipart::Form::new();
    for (name, field) in forms {
        multipart = match field {
            Form::Text(value) => multipart.text(name.clone(), value.clone()),
            Form::File {
                data,
                file_name,
                mime_type,
            } => {
                let part = reqwest::multipart::Part::bytes(data.to_vec())
                    .file_name(file_name.clone())
                    .mime_str(mime_type)
                    .map_err(|e| format!("Invalid MIME type {mime_type}: {e}"))?;
                multipart.part(name.clone(), part)
            }
        };
    }
    Ok(builder.multipart(multipart))
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("Request timed out after {}ms", timeout.as_millis())
    } else if err.is_connect() {
        format!("Connection failed: {err}")
    } else {
        format!("Request failed: {err}")
    }
}

fn describe_status(status: u16, body: &str) -> String {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    match status {
        400 => format!("Bad request: {body}"),
        401 => format!("Authentication failed - check service credentials: {body}"),
        403 => format!("Access forbidden - check service permissions: {body}"),
        404 => format!("Resource not found: {body}"),
        413 => format!("Payload too large: {body}"),
        429 => format!("Rate limit exceeded: {body}"),
        500..=599 => format!("Server error ({status}): {body}"),
        _ => format!("HTTP error ({status}): {body}"),
    }
}
