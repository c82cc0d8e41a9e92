//! Error types shared by the REST and streaming connectors.

use thiserror::Error;

/// Errors surfaced synchronously by connector operations.
///
/// Transport and protocol failures of an accepted REST request never show up
/// here. They are delivered as a failed [`Response`](crate::core::rest::Response)
/// through the request callback instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// The request was malformed (e.g. both a raw body and form fields set)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The streaming connector is already closed or disconnected
    #[error("Not connected")]
    NotConnected,

    /// Opening the connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Network-level failure while talking to the service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization(err.to_string())
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::InvalidRequest("body and forms are exclusive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid request: body and forms are exclusive"
        );
        assert_eq!(ConnectorError::NotConnected.to_string(), "Not connected");
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ConnectorError = parse_err.into();
        assert!(matches!(err, ConnectorError::Serialization(_)));
    }
}
