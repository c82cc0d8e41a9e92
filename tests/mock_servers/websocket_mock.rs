//! WebSocket echo mock.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Default)]
pub struct WebSocketMockState {
    pub connection_count: AtomicU64,
    /// Text frames received, across all connections
    pub texts: Mutex<Vec<String>>,
    pub binary_frames: AtomicU64,
}

impl WebSocketMockState {
    pub fn connections(&self) -> u64 {
        self.connection_count.load(Ordering::SeqCst)
    }
}

async fn handle_echo(stream: TcpStream, state: Arc<WebSocketMockState>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    state.connection_count.fetch_add(1, Ordering::SeqCst);

    while let Some(Ok(msg)) = ws.next().await {
        match &msg {
            Message::Text(text) => state.texts.lock().push(text.as_str().to_string()),
            Message::Binary(_) => {
                state.binary_frames.fetch_add(1, Ordering::SeqCst);
            }
            Message::Close(_) => break,
            _ => continue,
        }
        if ws.send(msg).await.is_err() {
            break;
        }
    }
}

/// Serve an echo WebSocket on an ephemeral port.
pub async fn start_websocket_mock(state: Arc<WebSocketMockState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_echo(stream, state.clone()));
        }
    });

    addr
}
