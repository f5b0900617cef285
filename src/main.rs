//! Country-tagging reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ listener ─▶ request id ─▶ trace ─▶ timeout ─▶ geoip ─▶ handler
//!                                                                     │         │
//!                                                          MMDB lookup│         │ forward
//!                                                                     ▼         ▼
//!                                                             GeoIpDatabase   upstream
//!                                                                             (or echo)
//! ```
//!
//! The geoip layer appends `X-Country` (configurable) when the client address
//! resolves to a country and otherwise lets the request through untouched.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use geoip_country_proxy::config::{read_config, validate_config, ConfigError, ProxyConfig};
use geoip_country_proxy::http::HttpServer;
use geoip_country_proxy::lifecycle::{signals, Shutdown};
use geoip_country_proxy::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "geoip-country-proxy")]
#[command(about = "Reverse proxy that tags requests with the client's country", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override `geoip.filename`.
    #[arg(short, long)]
    database: Option<PathBuf>,
}

impl Cli {
    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(database) = &self.database {
            config.geoip.filename = database.clone();
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load()?;

    logging::init_logging(&config.observability);

    tracing::info!("geoip-country-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        database = %config.geoip.filename.display(),
        from_header = %config.geoip.from_header,
        country_header = %config.geoip.country_header,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    // Open the database before binding so a bad file never accepts traffic.
    let server = match HttpServer::new(config.clone()) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize GeoIP enrichment");
            return Err(e.into());
        }
    };

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
