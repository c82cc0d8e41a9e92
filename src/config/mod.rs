//! Configuration module for the Watson connection layer
//!
//! This module loads connector settings and service credentials from YAML
//! files and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//! The `.env` file itself is loaded by the binary at startup.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use watson_connector::config::ConnectorConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ConnectorConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ConnectorConfig::from_file(Path::new("watson.yaml"))?;
//! println!("Configured services: {:?}", config.service_ids());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

pub use env::service_env_prefix;
pub use yaml::{ConnectorYaml, ServiceYaml, YamlConfig};

use crate::core::credentials::{CredentialProvider, Credentials, ServiceCredentials};

/// Default number of concurrent requests per REST connector
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default idle time before a stream session sends a keep-alive
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidEnv { name: String, message: String },

    #[error("Invalid configuration for service {service_id}: {message}")]
    InvalidService { service_id: String, message: String },

    #[error("Invalid connector settings: {0}")]
    InvalidSettings(String),
}

/// Tunables applied to every connector created for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorSettings {
    /// Maximum concurrent in-flight REST requests per connector
    pub max_connections: usize,
    /// Request timeout unless the request overrides it
    pub timeout: Duration,
    /// Largest accepted request payload; `None` means unlimited
    pub max_request_bytes: Option<usize>,
    /// Idle time before a stream keep-alive is sent
    pub keep_alive_interval: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timeout: DEFAULT_TIMEOUT,
            max_request_bytes: None,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

/// Endpoint and credentials for one service ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub service_id: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,

    // Per-service overrides of the shared connector settings
    pub max_connections: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_request_bytes: Option<usize>,
}

impl ServiceConfig {
    /// Bearer token wins over basic auth when both are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(token) = &self.token {
            return Some(Credentials::bearer(token.clone()));
        }
        self.username.as_ref().map(|user| {
            Credentials::basic(user.clone(), self.password.clone().unwrap_or_default())
        })
    }
}

/// Implement Drop to zeroize secret fields when ServiceConfig is dropped.
impl Drop for ServiceConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut password) = self.password {
            password.zeroize();
        }
        if let Some(ref mut token) = self.token {
            token.zeroize();
        }
    }
}

/// Loaded connector configuration
///
/// Holds the shared [`ConnectorSettings`] and every configured service. It
/// is the default [`CredentialProvider`] handed to the connector registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    pub settings: ConnectorSettings,
    pub services: Vec<ServiceConfig>,
}

impl ConnectorConfig {
    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = env::load()?;
        Self::from_raw(raw)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let base = env::load()?;
        let overrides = YamlConfig::from_file(path)?;
        Self::from_raw(merge::merge_raw(base, Some(overrides)))
    }

    /// Build a validated configuration from the raw merged shape
    pub fn from_raw(raw: YamlConfig) -> Result<Self, ConfigError> {
        let connector = raw.connector.unwrap_or_default();
        let services = raw.services.unwrap_or_default();

        validation::validate_connector(&connector)?;
        validation::validate_services(&services)?;

        let defaults = ConnectorSettings::default();
        let settings = ConnectorSettings {
            max_connections: connector
                .max_connections
                .unwrap_or(defaults.max_connections),
            timeout: connector
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_request_bytes: connector.max_request_bytes,
            keep_alive_interval: connector
                .keep_alive_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.keep_alive_interval),
        };

        let services = services
            .into_iter()
            .map(|service| ServiceConfig {
                service_id: service.service_id,
                // Presence checked by validation
                url: service.url.unwrap_or_default(),
                username: service.username,
                password: service.password,
                token: service.token,
                max_connections: service.max_connections,
                timeout_seconds: service.timeout_seconds,
                max_request_bytes: service.max_request_bytes,
            })
            .collect();

        Ok(Self { settings, services })
    }

    pub fn service(&self, service_id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    pub fn service_ids(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.service_id.as_str()).collect()
    }

    /// Shared settings with the service's overrides applied
    pub fn settings_for(&self, service_id: &str) -> ConnectorSettings {
        let mut settings = self.settings.clone();
        if let Some(service) = self.service(service_id) {
            if let Some(max) = service.max_connections {
                settings.max_connections = max;
            }
            if let Some(secs) = service.timeout_seconds {
                settings.timeout = Duration::from_secs(secs);
            }
            if service.max_request_bytes.is_some() {
                settings.max_request_bytes = service.max_request_bytes;
            }
        }
        settings
    }
}

impl CredentialProvider for ConnectorConfig {
    fn find_credentials(&self, service_id: &str) -> Option<ServiceCredentials> {
        self.service(service_id)
            .map(|service| ServiceCredentials::new(service.url.clone(), service.credentials()))
    }
}
