use std::collections::HashSet;
use url::Url;

use super::ConfigError;
use super::yaml::{ConnectorYaml, ServiceYaml};

pub fn validate_connector(connector: &ConnectorYaml) -> Result<(), ConfigError> {
    if connector.max_connections == Some(0) {
        return Err(ConfigError::InvalidSettings(
            "max_connections must be at least 1".to_string(),
        ));
    }
    if connector.timeout_seconds == Some(0) {
        return Err(ConfigError::InvalidSettings(
            "timeout_seconds must be at least 1".to_string(),
        ));
    }
    if connector.keep_alive_seconds == Some(0) {
        return Err(ConfigError::InvalidSettings(
            "keep_alive_seconds must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_services(services: &[ServiceYaml]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for service in services {
        let invalid = |message: &str| ConfigError::InvalidService {
            service_id: service.service_id.clone(),
            message: message.to_string(),
        };

        if service.service_id.trim().is_empty() {
            return Err(invalid("service_id cannot be empty"));
        }
        if !seen.insert(service.service_id.as_str()) {
            return Err(invalid("duplicate service_id"));
        }

        let url = service
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| invalid("url is required"))?;
        let parsed = Url::parse(url).map_err(|e| invalid(&format!("invalid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("url must use http or https"));
        }

        if service.password.is_some() && service.username.is_none() {
            return Err(invalid("password requires a username"));
        }
        if service.max_connections == Some(0) {
            return Err(invalid("max_connections must be at least 1"));
        }
        if service.timeout_seconds == Some(0) {
            return Err(invalid("timeout_seconds must be at least 1"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_service() -> ServiceYaml {
        ServiceYaml {
            service_id: "SpeechToTextV1".to_string(),
            url: Some("https://stt.example.com/api".to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_service() {
        assert!(validate_services(&[valid_service()]).is_ok());
    }

    #[test]
    fn test_missing_url() {
        let service = ServiceYaml {
            url: None,
            ..valid_service()
        };
        let err = validate_services(&[service]).unwrap_err();
        assert!(err.to_string().contains("url is required"));
    }

    #[test]
    fn test_non_http_url() {
        let service = ServiceYaml {
            url: Some("ftp://files.example.com".to_string()),
            ..valid_service()
        };
        assert!(validate_services(&[service]).is_err());
    }

    #[test]
    fn test_password_without_username() {
        let service = ServiceYaml {
            username: None,
            ..valid_service()
        };
        let err = validate_services(&[service]).unwrap_err();
        assert!(err.to_string().contains("password requires a username"));
    }

    #[test]
    fn test_duplicate_service_id() {
        let err = validate_services(&[valid_service(), valid_service()]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_zero_max_connections() {
        let connector = ConnectorYaml {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(validate_connector(&connector).is_err());

        let service = ServiceYaml {
            max_connections: Some(0),
            ..valid_service()
        };
        assert!(validate_services(&[service]).is_err());
    }
}
