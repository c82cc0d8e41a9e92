//! HTTP mock with a fixed response latency.

use super::MockStats;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct HttpMockState {
    pub latency: Duration,
    pub stats: MockStats,
    /// `id` query parameter of each request, in arrival order
    pub arrivals: Mutex<Vec<String>>,
}

impl HttpMockState {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            stats: MockStats::default(),
            arrivals: Mutex::new(Vec::new()),
        }
    }
}

async fn slow_handler(
    State(state): State<Arc<HttpMockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.stats.enter();
    let id = params.get("id").cloned().unwrap_or_default();
    state.arrivals.lock().push(id.clone());

    tokio::time::sleep(state.latency).await;

    state.stats.leave();
    Json(json!({ "id": id }))
}

/// Serve `GET /v1/slow` on an ephemeral port.
pub async fn start_http_mock(state: Arc<HttpMockState>) -> SocketAddr {
    let app = Router::new()
        .route("/v1/slow", get(slow_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}
