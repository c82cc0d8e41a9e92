//! Mock service servers for connector integration tests.
//!
//! - HTTP (axum): slow endpoint that records concurrency and arrival order
//! - WebSocket (tungstenite): echo endpoint that records every frame

// Not every test binary uses every helper
#![allow(dead_code)]

pub mod http_mock;
pub mod websocket_mock;

use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters shared by the mock handlers.
#[derive(Default, Debug)]
pub struct MockStats {
    pub total_requests: AtomicU64,
    pub in_flight: AtomicU64,
    pub max_in_flight: AtomicU64,
}

impl MockStats {
    /// Record a request entering the handler.
    pub fn enter(&self) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total_requests.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}
