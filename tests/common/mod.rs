//! Shared utilities for integration tests.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use geoip_country_proxy::config::ProxyConfig;
use geoip_country_proxy::geoip::{CountryLookup, LookupError};
use geoip_country_proxy::http::HttpServer;
use geoip_country_proxy::lifecycle::Shutdown;

/// Country table standing in for a GeoLite2-Country file.
pub struct FixtureCountries(HashMap<IpAddr, &'static str>);

impl FixtureCountries {
    pub fn shared() -> Arc<dyn CountryLookup> {
        Self::from_table(&[
            ("4.0.0.0", "US"),
            ("109.194.11.1", "RU"),
            ("1.6.0.0", "IN"),
            ("2.0.0.0", "FR"),
        ])
    }

    pub fn from_table(table: &[(&str, &'static str)]) -> Arc<dyn CountryLookup> {
        Arc::new(Self(
            table
                .iter()
                .map(|(ip, code)| (ip.parse().unwrap(), *code))
                .collect(),
        ))
    }
}

impl CountryLookup for FixtureCountries {
    fn country_code(&self, ip: IpAddr) -> Result<String, LookupError> {
        self.0
            .get(&ip)
            .map(|code| code.to_string())
            .ok_or(LookupError::AddressNotFound(ip))
    }
}

/// Start an upstream that answers with the comma-joined `x-country` values it received.
pub async fn start_country_echo_upstream() -> SocketAddr {
    async fn reply(headers: HeaderMap) -> String {
        headers
            .get_all("x-country")
            .iter()
            .map(|v| v.to_str().unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",")
    }

    let app = Router::new()
        .route("/", any(reply))
        .route("/{*path}", any(reply));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A running proxy instance.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

/// Start the proxy on an ephemeral port with the fixture country table.
pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    start_proxy_with_countries(config, FixtureCountries::shared()).await
}

/// Start the proxy on an ephemeral port with a caller-supplied lookup backend.
pub async fn start_proxy_with_countries(mut config: ProxyConfig, countries: Arc<dyn CountryLookup>) -> TestProxy {
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;

    let server = HttpServer::with_database(config, countries).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let handle = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    TestProxy { addr, shutdown, handle }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
