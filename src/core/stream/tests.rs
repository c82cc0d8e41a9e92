//! Stream connector tests.
//!
//! Each test runs a local tungstenite server and drives the scheduler from
//! the test body, which stands in for the caller's frame loop.

use super::*;
use crate::core::credentials::Credentials;
use crate::core::error::ConnectorError;
use crate::core::scheduler::Scheduler;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

// =============================================================================
// Test Server
// =============================================================================

#[derive(Clone, Copy)]
enum ServerMode {
    /// Echo text and binary frames back
    Echo,
    /// Send a close frame right after the handshake
    CloseImmediately,
    /// Drop the TCP stream right after the handshake
    DropImmediately,
}

struct TestServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    async fn start(mode: ServerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let auth_headers = Arc::new(Mutex::new(Vec::new()));

        let conn_counter = connections.clone();
        let headers = auth_headers.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                conn_counter.fetch_add(1, Ordering::SeqCst);
                let headers = headers.clone();
                tokio::spawn(async move {
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        if let Some(auth) = req.headers().get("authorization") {
                            headers
                                .lock()
                                .push(auth.to_str().unwrap_or_default().to_string());
                        }
                        Ok(resp)
                    };
                    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
                        return;
                    };

                    match mode {
                        ServerMode::Echo => {
                            while let Some(Ok(msg)) = ws.next().await {
                                match msg {
                                    WsMessage::Text(_) | WsMessage::Binary(_) => {
                                        if ws.send(msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    WsMessage::Close(_) => break,
                                    _ => {}
                                }
                            }
                        }
                        ServerMode::CloseImmediately => {
                            let _ = ws.close(None).await;
                            while let Some(Ok(_)) = ws.next().await {}
                        }
                        ServerMode::DropImmediately => drop(ws),
                    }
                });
            }
        });

        Self {
            addr,
            connections,
            auth_headers,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/v1/recognize", self.addr)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn connector(url: String, scheduler: &Arc<Scheduler>) -> StreamConnector {
    StreamConnector::new(
        url,
        Some(Credentials::basic("user", "pass").authorization_header()),
        Handle::current(),
        scheduler.clone(),
    )
}

/// Tick until `done` holds or five seconds pass.
async fn tick_until(scheduler: &Scheduler, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        scheduler.tick();
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn record_messages(connector: &StreamConnector) -> Arc<Mutex<Vec<Message>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    connector.on_message(move |msg| sink.lock().push(msg));
    received
}

fn count_closes(connector: &StreamConnector) -> Arc<Mutex<Vec<ConnectionState>>> {
    let closes = Arc::new(Mutex::new(Vec::new()));
    let sink = closes.clone();
    connector.on_close(move |c| sink.lock().push(c.state()));
    closes
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_queue_only_send_does_not_connect() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);

    connector.send(Message::text("first"), true).unwrap();
    connector.send(Message::binary(vec![1u8, 2]), true).unwrap();

    for _ in 0..10 {
        scheduler.tick();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(connector.state(), ConnectionState::Idle);
    assert_eq!(connector.queued_outbound(), 2);
    assert_eq!(server.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_connects_and_preserves_order() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let received = record_messages(&connector);

    connector.send(Message::text("one"), true).unwrap();
    connector.send(Message::text("two"), false).unwrap();
    connector.send(Message::binary(vec![3u8]), false).unwrap();
    connector.send(Message::text("four"), false).unwrap();

    assert!(tick_until(&scheduler, || received.lock().len() == 4).await);

    assert_eq!(
        *received.lock(),
        vec![
            Message::text("one"),
            Message::text("two"),
            Message::binary(vec![3u8]),
            Message::text("four"),
        ]
    );
    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert_eq!(
        server.auth_headers.lock().as_slice(),
        ["Basic dXNlcjpwYXNz".to_string()]
    );
}

#[tokio::test]
async fn test_close_reports_on_close_once() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let received = record_messages(&connector);
    let closes = count_closes(&connector);

    connector.send(Message::text("hello"), false).unwrap();
    assert!(tick_until(&scheduler, || received.lock().len() == 1).await);

    connector.close();
    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);

    for _ in 0..5 {
        scheduler.tick();
    }
    assert_eq!(*closes.lock(), vec![ConnectionState::Closed]);
    assert!(matches!(
        connector.send(Message::text("late"), false),
        Err(ConnectorError::NotConnected)
    ));
    assert!(scheduler.is_empty());
}

#[tokio::test]
async fn test_close_while_idle() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let closes = count_closes(&connector);

    connector.close();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);

    assert_eq!(*closes.lock(), vec![ConnectionState::Closed]);
    assert_eq!(server.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_close_fires_after_handle_dropped() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let closes = count_closes(&connector);

    connector.send(Message::text("hi"), false).unwrap();
    connector.close();
    drop(connector);

    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);
    assert_eq!(closes.lock().len(), 1);
}

#[tokio::test]
async fn test_connect_failure_disconnects() {
    // Bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(format!("ws://{addr}/"), &scheduler);
    let closes = count_closes(&connector);

    connector.send(Message::text("x"), false).unwrap();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);

    assert_eq!(*closes.lock(), vec![ConnectionState::Disconnected]);
}

#[tokio::test]
async fn test_peer_close_frame_is_closed() {
    let server = TestServer::start(ServerMode::CloseImmediately).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let closes = count_closes(&connector);

    connector.send(Message::text("x"), false).unwrap();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);

    assert_eq!(*closes.lock(), vec![ConnectionState::Closed]);
}

#[tokio::test]
async fn test_peer_drop_is_disconnected() {
    let server = TestServer::start(ServerMode::DropImmediately).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let closes = count_closes(&connector);

    connector.send(Message::text("x"), false).unwrap();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);

    assert_eq!(*closes.lock(), vec![ConnectionState::Disconnected]);
}

#[tokio::test]
async fn test_extra_handshake_header() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(None::<String>));

    let seen_by_server = seen.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen_by_server.lock() = req
                .headers()
                .get("x-watson-learning-opt-out")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        };
        let mut ws = accept_hdr_async(stream, callback).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let scheduler = Arc::new(Scheduler::new());
    let connector = StreamConnector::new(
        format!("ws://{addr}/"),
        None,
        Handle::current(),
        scheduler.clone(),
    );
    connector.set_header("X-Watson-Learning-Opt-Out", "1");
    connector.send(Message::text("x"), false).unwrap();

    assert!(tick_until(&scheduler, || connector.is_connected()).await);
    assert!(tick_until(&scheduler, || seen.lock().is_some()).await);
    assert_eq!(seen.lock().as_deref(), Some("1"));
    connector.close();
}

// =============================================================================
// Keep-alive Tests
// =============================================================================

#[tokio::test]
async fn test_keep_alive_sends_noop_when_idle() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let received = record_messages(&connector);

    connector.send(Message::text("start"), false).unwrap();
    let keep_alive = connector.start_keep_alive(Duration::from_millis(50));

    let noop = r#"{"action":"no-op"}"#;
    assert!(
        tick_until(&scheduler, || {
            received
                .lock()
                .iter()
                .any(|m| m.as_text() == Some(noop))
        })
        .await
    );

    connector.close();
    assert!(tick_until(&scheduler, || !scheduler.is_running(keep_alive)).await);
}

#[tokio::test]
async fn test_keep_alive_quiet_while_busy() {
    let scheduler = Arc::new(Scheduler::new());
    let connector = StreamConnector::new("ws://127.0.0.1:1/", None, Handle::current(), scheduler.clone());

    connector.send(Message::text("queued"), true).unwrap();
    connector.start_keep_alive(Duration::from_secs(60));

    for _ in 0..5 {
        scheduler.tick();
    }

    // Only the original queued message; no keep-alive was due
    assert_eq!(connector.queued_outbound(), 1);
    assert_eq!(connector.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn test_send_never_waits_on_stalled_handshake() {
    // Accepts TCP connections but never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let held = Arc::new(Mutex::new(Vec::new()));
    let holder = held.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            holder.lock().push(stream);
        }
    });

    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(format!("ws://{addr}/v1/recognize"), &scheduler);
    let closes = count_closes(&connector);

    let started = Instant::now();
    for i in 0..10 {
        connector.send(Message::text(format!("chunk {i}")), false).unwrap();
    }
    assert!(started.elapsed() < Duration::from_millis(20));

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.tick();
    assert_eq!(connector.state(), ConnectionState::Connecting);
    assert!(!held.lock().is_empty());

    connector.close();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);
    for _ in 0..5 {
        scheduler.tick();
    }
    assert_eq!(*closes.lock(), vec![ConnectionState::Closed]);
}

#[tokio::test]
async fn test_panicking_message_callback_keeps_dispatching() {
    let server = TestServer::start(ServerMode::Echo).await;
    let scheduler = Arc::new(Scheduler::new());
    let connector = connector(server.url(), &scheduler);
    let closes = count_closes(&connector);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    connector.on_message(move |msg| {
        if msg.as_text() == Some("boom") {
            panic!("message handler failed");
        }
        sink.lock().push(msg);
    });

    connector.send(Message::text("boom"), false).unwrap();
    connector.send(Message::text("after"), false).unwrap();
    assert!(tick_until(&scheduler, || received.lock().len() == 1).await);
    assert_eq!(*received.lock(), vec![Message::text("after")]);

    connector.close();
    assert!(tick_until(&scheduler, || !closes.lock().is_empty()).await);
    assert_eq!(*closes.lock(), vec![ConnectionState::Closed]);
}
