use super::yaml::{ConnectorYaml, ServiceYaml, YamlConfig};

/// Apply `overrides` on top of `base`, field by field.
///
/// Services are matched by `service_id`; unmatched override entries are
/// appended in their original order.
pub fn merge_raw(base: YamlConfig, overrides: Option<YamlConfig>) -> YamlConfig {
    let Some(overrides) = overrides else {
        return base;
    };

    let connector = match (base.connector, overrides.connector) {
        (Some(base), Some(over)) => Some(merge_connector(base, over)),
        (base, over) => over.or(base),
    };

    let services = match (base.services, overrides.services) {
        (Some(mut base), Some(over)) => {
            for entry in over {
                match base.iter_mut().find(|s| s.service_id == entry.service_id) {
                    Some(existing) => merge_service(existing, entry),
                    None => base.push(entry),
                }
            }
            Some(base)
        }
        (base, over) => over.or(base),
    };

    YamlConfig {
        connector,
        services,
    }
}

fn merge_connector(base: ConnectorYaml, over: ConnectorYaml) -> ConnectorYaml {
    ConnectorYaml {
        max_connections: over.max_connections.or(base.max_connections),
        timeout_seconds: over.timeout_seconds.or(base.timeout_seconds),
        max_request_bytes: over.max_request_bytes.or(base.max_request_bytes),
        keep_alive_seconds: over.keep_alive_seconds.or(base.keep_alive_seconds),
    }
}

fn merge_service(base: &mut ServiceYaml, over: ServiceYaml) {
    if over.url.is_some() {
        base.url = over.url;
    }
    if over.username.is_some() {
        base.username = over.username;
    }
    if over.password.is_some() {
        base.password = over.password;
    }
    if over.token.is_some() {
        base.token = over.token;
    }
    if over.max_connections.is_some() {
        base.max_connections = over.max_connections;
    }
    if over.timeout_seconds.is_some() {
        base.timeout_seconds = over.timeout_seconds;
    }
    if over.max_request_bytes.is_some() {
        base.max_request_bytes = over.max_request_bytes;
    }
}
