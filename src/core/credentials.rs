//! Service credentials and the provider seam used to resolve them.
//!
//! Connectors never read configuration directly. They ask a
//! [`CredentialProvider`] for the base URL and auth material of a service ID
//! when the connector is created, and keep that snapshot for their lifetime.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::collections::HashMap;
use std::fmt;

/// Authentication material for a single service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// HTTP basic auth
    Basic { user: String, password: String },
    /// Bearer token sent as `Authorization: Bearer <token>`
    Bearer(String),
}

impl Credentials {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer(token.into())
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        match self {
            Credentials::Basic { user, password } => {
                let encoded = STANDARD.encode(format!("{user}:{password}"));
                format!("Basic {encoded}")
            }
            Credentials::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

// Keep secrets out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Credentials::Bearer(_) => f.debug_tuple("Bearer").field(&"***").finish(),
        }
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        match self {
            Credentials::Basic { password, .. } => password.zeroize(),
            Credentials::Bearer(token) => token.zeroize(),
        }
    }
}

/// Base URL plus optional auth for one service ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub url: String,
    pub auth: Option<Credentials>,
}

impl ServiceCredentials {
    pub fn new(url: impl Into<String>, auth: Option<Credentials>) -> Self {
        Self {
            url: url.into(),
            auth,
        }
    }

    /// `Authorization` header value, if any auth is configured.
    pub fn authorization_header(&self) -> Option<String> {
        self.auth.as_ref().map(Credentials::authorization_header)
    }
}

/// Resolves a service ID to its endpoint and credentials.
///
/// Returns `None` when the service is not configured. Implementations must be
/// cheap to call; connectors call this once per creation.
pub trait CredentialProvider: Send + Sync {
    fn find_credentials(&self, service_id: &str) -> Option<ServiceCredentials>;
}

impl CredentialProvider for HashMap<String, ServiceCredentials> {
    fn find_credentials(&self, service_id: &str) -> Option<ServiceCredentials> {
        self.get(service_id).cloned()
    }
}
