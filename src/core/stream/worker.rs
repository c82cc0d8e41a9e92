//! Background task that owns the WebSocket.

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as HandshakeRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::connector::Shared;
use super::message::Message;
use super::state::ConnectionState;
use crate::core::error::{ConnectorError, ConnectorResult};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

fn build_request(shared: &Shared) -> ConnectorResult<HandshakeRequest> {
    let mut request = shared
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnectorError::ConnectionFailed(format!("Invalid stream URL: {e}")))?;

    let headers = request.headers_mut();
    if let Some(auth) = &shared.authorization {
        let value = HeaderValue::from_str(auth).map_err(|_| {
            ConnectorError::Configuration("Authorization header is not valid ASCII".to_string())
        })?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in shared.headers.lock().iter() {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ConnectorError::Configuration(format!("Invalid header name: {name}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ConnectorError::Configuration(format!("Invalid value for header {name}"))
        })?;
        headers.insert(name, value);
    }

    Ok(request)
}

/// Write every queued message in order.
async fn flush_send_queue(
    shared: &Shared,
    sink: &mut WsSink,
) -> Result<usize, tokio_tungstenite::tungstenite::Error> {
    let mut sent = 0;
    loop {
        let next = shared.send_queue.lock().pop_front();
        let Some(message) = next else {
            return Ok(sent);
        };
        sink.send(message.into_ws()).await?;
        sent += 1;
    }
}

/// Connect, then pump both queues until the session ends.
pub(crate) async fn run(shared: Arc<Shared>) {
    let session_id = shared.session_id.clone();

    let request = match build_request(&shared) {
        Ok(request) => request,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to build stream handshake");
            shared.finish(ConnectionState::Disconnected);
            return;
        }
    };

    let connect_result = tokio::select! {
        biased;

        _ = shared.cancel.cancelled() => {
            debug!(session_id = %session_id, "Stream closed before connecting");
            return;
        }

        result = timeout(shared.connect_timeout, connect_async(request)) => result,
    };

    let ws_stream = match connect_result {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            error!(session_id = %session_id, url = %shared.url, error = %e, "Failed to connect stream");
            shared.finish(ConnectionState::Disconnected);
            return;
        }
        Err(_) => {
            error!(
                session_id = %session_id,
                url = %shared.url,
                timeout_ms = shared.connect_timeout.as_millis() as u64,
                "Stream connection timed out"
            );
            shared.finish(ConnectionState::Disconnected);
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    if shared.state.transition(ConnectionState::Connected).is_err() {
        // close() won the race with the handshake
        debug!(session_id = %session_id, "Stream closed while connecting");
        let _ = ws_sink.close().await;
        return;
    }

    info!(session_id = %session_id, url = %shared.url, "Stream connected");

    let final_state = loop {
        tokio::select! {
            biased;

            _ = shared.cancel.cancelled() => {
                break ConnectionState::Closed;
            }

            _ = shared.send_ready.notified() => {
                match flush_send_queue(&shared, &mut ws_sink).await {
                    Ok(sent) => debug!(session_id = %session_id, sent = sent, "Flushed send queue"),
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to send on stream");
                        break ConnectionState::Disconnected;
                    }
                }
            }

            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        shared.push_received(Message::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        shared.push_received(Message::Binary(data));
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(session_id = %session_id, frame = ?frame, "Stream closed by peer");
                        break ConnectionState::Closed;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "Stream receive error");
                        break ConnectionState::Disconnected;
                    }
                    None => {
                        warn!(session_id = %session_id, "Stream ended without close frame");
                        break ConnectionState::Disconnected;
                    }
                }
            }
        }
    };

    shared.finish(final_state);

    if let Err(e) = ws_sink.close().await {
        debug!(session_id = %session_id, error = %e, "Error closing stream socket");
    }
    debug!(session_id = %session_id, "Stream worker exited");
}
