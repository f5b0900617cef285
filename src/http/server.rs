//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (request ID, tracing, timeout, GeoIP enrichment)
//! - Bind server to listener
//! - Forward enriched requests to the upstream, or echo them back
//! - Observability (metrics, correlation IDs)

use axum::{
    body::Body,
    extract::State,
    http::{
        header,
        uri::{Authority, InvalidUri, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::geoip::{CountryLookup, GeoIp2Layer, GeoIpError};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::shutdown;
use crate::observability::metrics;

/// Errors that stop the server from being built.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    GeoIp(#[from] GeoIpError),

    #[error("invalid upstream address {address:?}: {source}")]
    Upstream {
        address: String,
        #[source]
        source: InvalidUri,
    },
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Option<Authority>,
}

/// HTTP server hosting the GeoIP enrichment layer.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server, opening the GeoIP database named in the config.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let geoip = GeoIp2Layer::new(&config.geoip)?;
        Self::with_layer(config, geoip)
    }

    /// Create a server around an already opened lookup backend.
    pub fn with_database(config: ProxyConfig, db: Arc<dyn CountryLookup>) -> Result<Self, StartupError> {
        let geoip = GeoIp2Layer::with_database(db, &config.geoip.from_header, &config.geoip.country_header)?;
        Self::with_layer(config, geoip)
    }

    fn with_layer(config: ProxyConfig, geoip: GeoIp2Layer) -> Result<Self, StartupError> {
        let upstream = config
            .upstream
            .address
            .as_deref()
            .map(|address| {
                address.parse::<Authority>().map_err(|source| StartupError::Upstream {
                    address: address.to_string(),
                    source,
                })
            })
            .transpose()?;

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        tracing::info!(
            upstream = upstream.as_ref().map(Authority::as_str).unwrap_or("echo"),
            country_header = %geoip.country_header(),
            "HTTP server configured"
        );

        let state = AppState { client, upstream };
        let router = Self::build_router(&config, geoip, state);
        Ok(Self { router })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, geoip: GeoIp2Layer, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(geoip)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id(req),
                )
            }))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// The fully layered router, for driving the server without a socket.
    pub fn into_router(self) -> Router {
        self.router
    }
}

/// Main handler: forwards to the upstream, or echoes when none is set.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();

    let (response, upstream) = match &state.upstream {
        Some(upstream) => (forward(&state.client, upstream, request).await, upstream.as_str()),
        None => (echo(&request), "echo"),
    };

    metrics::record_request(&method, response.status().as_u16(), upstream, start_time);
    response
}

async fn forward(client: &Client<HttpConnector, Body>, upstream: &Authority, request: Request<Body>) -> Response {
    let request_id = request_id(&request).to_string();
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };
    // The upstream connection is always HTTP/1.1.
    parts.version = Version::HTTP_11;
    parts.headers.remove(header::CONNECTION);

    tracing::debug!(
        request_id = %request_id,
        upstream = %upstream,
        uri = %parts.uri,
        "Forwarding request"
    );

    match client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let response: Response<hyper::body::Incoming> = response;
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, upstream = %upstream, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Echo reply listing what the handler received.
#[derive(Debug, Serialize)]
struct EchoResponse {
    method: String,
    path: String,
    headers: BTreeMap<String, Vec<String>>,
}

fn echo(request: &Request<Body>) -> Response {
    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in request.headers() {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    Json(EchoResponse {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        headers,
    })
    .into_response()
}
