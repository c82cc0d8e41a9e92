//! Environment variable loading.
//!
//! Produces the same raw shape as the YAML loader so the two can be merged.

use std::env;
use std::str::FromStr;

use super::ConfigError;
use super::yaml::{ConnectorYaml, ServiceYaml, YamlConfig};

pub const ENV_PREFIX: &str = "WATSON_";

/// Comma-separated list of service IDs to read per-service variables for
pub const ENV_SERVICES: &str = "WATSON_SERVICES";

/// Variable prefix for a service ID: `SpeechToTextV1` -> `WATSON_SPEECHTOTEXTV1_`
pub fn service_env_prefix(service_id: &str) -> String {
    let normalized: String = service_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{normalized}_")
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name: name.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Read connector settings and service entries from the environment.
pub fn load() -> Result<YamlConfig, ConfigError> {
    let connector = ConnectorYaml {
        max_connections: parse_env("WATSON_MAX_CONNECTIONS")?,
        timeout_seconds: parse_env("WATSON_TIMEOUT_SECONDS")?,
        max_request_bytes: parse_env("WATSON_MAX_REQUEST_BYTES")?,
        keep_alive_seconds: parse_env("WATSON_KEEP_ALIVE_SECONDS")?,
    };

    let services = get_env(ENV_SERVICES).map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(load_service)
            .collect::<Vec<_>>()
    });

    Ok(YamlConfig {
        connector: (connector != ConnectorYaml::default()).then_some(connector),
        services,
    })
}

fn load_service(service_id: &str) -> ServiceYaml {
    let prefix = service_env_prefix(service_id);
    ServiceYaml {
        service_id: service_id.to_string(),
        url: get_env(&format!("{prefix}URL")),
        username: get_env(&format!("{prefix}USERNAME")),
        password: get_env(&format!("{prefix}PASSWORD")),
        token: get_env(&format!("{prefix}TOKEN")),
        ..Default::default()
    }
}
