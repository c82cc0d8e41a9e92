//! Connector registry.
//!
//! One registry is built at startup and shared by every service wrapper. It
//! resolves credentials through a [`CredentialProvider`], caches REST
//! connectors per `(service_id, path)` and creates fresh stream sessions on
//! demand. Every connector it hands out dispatches callbacks through the
//! registry's [`Scheduler`].

use dashmap::DashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::config::{ConnectorConfig, ConnectorSettings};
use crate::core::credentials::{CredentialProvider, ServiceCredentials};
use crate::core::rest::RestConnector;
use crate::core::scheduler::Scheduler;
use crate::core::stream::{StreamConnector, build_stream_url};

pub struct ConnectorRegistry {
    provider: Arc<dyn CredentialProvider>,
    default_settings: ConnectorSettings,
    service_settings: DashMap<String, ConnectorSettings>,
    runtime: Handle,
    scheduler: Arc<Scheduler>,
    rest_connectors: DashMap<(String, String), RestConnector>,
}

impl ConnectorRegistry {
    pub fn new(
        provider: Arc<dyn CredentialProvider>,
        default_settings: ConnectorSettings,
        runtime: Handle,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            provider,
            default_settings,
            service_settings: DashMap::new(),
            runtime,
            scheduler,
            rest_connectors: DashMap::new(),
        }
    }

    /// Registry backed by a loaded configuration, including its per-service
    /// setting overrides.
    pub fn from_config(config: ConnectorConfig, runtime: Handle, scheduler: Arc<Scheduler>) -> Self {
        let service_settings = config
            .service_ids()
            .into_iter()
            .map(|id| (id.to_string(), config.settings_for(id)))
            .collect::<Vec<_>>();
        let default_settings = config.settings.clone();

        let registry = Self::new(Arc::new(config), default_settings, runtime, scheduler);
        for (service_id, settings) in service_settings {
            registry.service_settings.insert(service_id, settings);
        }
        registry
    }

    /// Override the settings used for connectors created for `service_id`.
    pub fn set_service_settings(&self, service_id: &str, settings: ConnectorSettings) {
        self.service_settings
            .insert(service_id.to_string(), settings);
    }

    pub fn settings_for(&self, service_id: &str) -> ConnectorSettings {
        self.service_settings
            .get(service_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default_settings.clone())
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// REST connector for `service_id` rooted at `path`.
    ///
    /// Returns `None` (and logs) when the service has no credentials.
    /// Repeated calls with the same pair share one connection pool.
    pub fn get_connector(&self, service_id: &str, path: &str) -> Option<RestConnector> {
        let key = (service_id.to_string(), path.to_string());
        if let Some(existing) = self.rest_connectors.get(&key) {
            return Some(existing.value().clone());
        }

        let credentials = self.resolve(service_id)?;
        let connector = match RestConnector::new(
            service_id,
            &credentials,
            path,
            self.settings_for(service_id),
            self.runtime.clone(),
        ) {
            Ok(connector) => connector,
            Err(e) => {
                error!(service_id = service_id, error = %e, "Failed to create REST connector");
                return None;
            }
        };

        let connector = self
            .rest_connectors
            .entry(key)
            .or_insert_with(|| {
                self.scheduler.run(connector.response_pump());
                connector
            })
            .value()
            .clone();

        Some(connector)
    }

    /// New stream session for `service_id` at `path` with `query` appended.
    ///
    /// The service URL's `http(s)` scheme is rewritten to `ws(s)`. Sessions
    /// are never cached.
    pub fn create_stream_connector(
        &self,
        service_id: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Option<StreamConnector> {
        let credentials = self.resolve(service_id)?;

        let url = match build_stream_url(&credentials.url, path, query) {
            Ok(url) => url,
            Err(e) => {
                error!(service_id = service_id, error = %e, "Failed to build stream URL");
                return None;
            }
        };

        debug!(service_id = service_id, url = %url, "Creating stream connector");
        Some(StreamConnector::new(
            url,
            credentials.authorization_header(),
            self.runtime.clone(),
            self.scheduler.clone(),
        ))
    }

    /// Shut down every cached REST connector. Later sends return `Ok(false)`.
    pub fn shutdown(&self) {
        for entry in self.rest_connectors.iter() {
            entry.value().shutdown();
        }
    }

    /// Number of cached REST connectors.
    pub fn cached_connectors(&self) -> usize {
        self.rest_connectors.len()
    }

    fn resolve(&self, service_id: &str) -> Option<ServiceCredentials> {
        let credentials = self.provider.find_credentials(service_id);
        if credentials.is_none() {
            error!(
                service_id = service_id,
                "Unable to find credentials for service"
            );
        }
        credentials
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("default_settings", &self.default_settings)
            .field("cached_connectors", &self.rest_connectors.len())
            .finish()
    }
}
