use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use crate::core::error::ConnectorResult;

/// Outcome of a REST request, handed once to the request callback.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// True for a 2xx status
    pub success: bool,
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
    pub data: Bytes,
    pub headers: HashMap<String, String>,
    /// Wall-clock time from dispatch to completion
    pub elapsed: Duration,
    /// Set only when `success` is false
    pub error: Option<String>,
}

impl Response {
    pub(crate) fn failure(status: Option<u16>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            status,
            error: Some(error.into()),
            elapsed,
            ..Default::default()
        }
    }

    /// Body as UTF-8, lossily.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ConnectorResult<T> {
        Ok(serde_json::from_slice(&self.data)?)
    }
}
