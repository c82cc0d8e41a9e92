use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use watson_connector::{ConnectorConfig, ConnectorRegistry, Request, Scheduler};

/// How often the scheduler is ticked while waiting for responses
const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Watson connector - send requests through the pooled service connectors
#[derive(Parser, Debug)]
#[command(name = "watson-connector")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one request to a configured service and print the response
    Request {
        /// Service ID to resolve credentials for
        service_id: String,

        /// Path appended to the service URL
        path: String,

        /// HTTP method
        #[arg(short = 'X', long = "method", default_value = "GET")]
        method: String,

        /// Query parameter as key=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Extra header as name=value (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,

        /// File whose contents are sent as the request body
        #[arg(long = "body-file", value_name = "FILE")]
        body_file: Option<PathBuf>,
    },

    /// List the configured service IDs
    Services,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Services => {
            for service_id in config.service_ids() {
                println!("{service_id}");
            }
            Ok(())
        }
        Commands::Request {
            service_id,
            path,
            method,
            params,
            headers,
            body_file,
        } => {
            let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
                .map_err(|_| anyhow!("Invalid HTTP method '{method}'"))?;

            let mut request = Request::new(method, "");
            for (name, value) in params {
                request = request.with_parameter(name, value);
            }
            for (name, value) in headers {
                request = request.with_header(name, value);
            }
            if let Some(body_path) = body_file {
                let body = std::fs::read(&body_path)
                    .with_context(|| format!("Failed to read {}", body_path.display()))?;
                request = request.with_body(body);
            }

            send_request(config, &service_id, &path, request).await
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConnectorConfig> {
    match path {
        Some(config_path) => {
            info!("Loading configuration from {}", config_path.display());
            ConnectorConfig::from_file(config_path)
                .with_context(|| format!("Failed to load {}", config_path.display()))
        }
        None => {
            ConnectorConfig::from_env().context("Failed to load configuration from environment")
        }
    }
}

async fn send_request(
    config: ConnectorConfig,
    service_id: &str,
    path: &str,
    request: Request,
) -> anyhow::Result<()> {
    let scheduler = Arc::new(Scheduler::new());
    let registry = ConnectorRegistry::from_config(config, Handle::current(), scheduler.clone());

    let connector = registry
        .get_connector(service_id, path)
        .ok_or_else(|| anyhow!("No credentials configured for service {service_id}"))?;

    let (tx, rx) = oneshot::channel();
    let request = request.on_response(move |_, response| {
        let _ = tx.send(response);
    });

    if !connector.send(request)? {
        anyhow::bail!("Request rejected: payload exceeds the configured maximum");
    }

    let shutdown = CancellationToken::new();
    let driver = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.drive(TICK_PERIOD, shutdown).await })
    };

    let response = rx.await;
    shutdown.cancel();
    driver.await?;
    let response = response.map_err(|_| anyhow!("Response callback was dropped"))?;

    match response.status {
        Some(status) => println!("HTTP {status} ({} ms)", response.elapsed.as_millis()),
        None => println!("No response ({} ms)", response.elapsed.as_millis()),
    }
    if !response.data.is_empty() {
        println!("{}", response.text());
    }

    if response.success {
        Ok(())
    } else {
        Err(anyhow!(
            response
                .error
                .unwrap_or_else(|| "Request failed".to_string())
        ))
    }
}
