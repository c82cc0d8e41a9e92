use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. The same shape is
/// produced from environment variables so both sources merge field by field.
///
/// # Example YAML structure
/// ```yaml
/// connector:
///   max_connections: 5
///   timeout_seconds: 120
///   max_request_bytes: 4194304
///   keep_alive_seconds: 20
///
/// services:
///   - service_id: "SpeechToTextV1"
///     url: "https://stream.watsonplatform.net/speech-to-text/api"
///     username: "user"
///     password: "pass"
///   - service_id: "XRAY"
///     url: "https://xray.example.com/api"
///     token: "bearer-token"
///     max_connections: 2
/// ```
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct YamlConfig {
    pub connector: Option<ConnectorYaml>,
    pub services: Option<Vec<ServiceYaml>>,
}

/// Shared connector settings from YAML
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectorYaml {
    pub max_connections: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_request_bytes: Option<usize>,
    pub keep_alive_seconds: Option<u64>,
}

/// One service entry from YAML
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceYaml {
    pub service_id: String,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub max_connections: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub max_request_bytes: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
