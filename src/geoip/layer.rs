//! Tower middleware that tags requests with the client's country.
//!
//! # Responsibilities
//! - Pick the client address (configured header, or the transport peer)
//! - Look the address up in the shared GeoIP database
//! - Append the country code header before calling the inner service
//!
//! # Design Decisions
//! - Best effort: a malformed address or a miss never fails the request
//! - A configured source header takes strict precedence, even when absent
//! - Enrichment runs synchronously in `call`; the inner future is returned as-is

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::ConnectInfo;
use axum::http::{HeaderName, HeaderValue, Request};
use tower::{Layer, Service};

use super::database::{CountryLookup, GeoIpDatabase};
use super::error::GeoIpError;
use crate::config::GeoIpConfig;

/// Transport-level peer address of a request, in string form.
///
/// Hosting servers that do not run behind axum's `ConnectInfo` can insert this
/// extension instead. It takes priority over `ConnectInfo<SocketAddr>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

impl From<SocketAddr> for RemoteAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

/// Layer producing [`GeoIp2`] services that share one database handle.
#[derive(Clone)]
pub struct GeoIp2Layer {
    db: Arc<dyn CountryLookup>,
    from_header: Option<HeaderName>,
    country_header: HeaderName,
}

impl GeoIp2Layer {
    /// Validate the header names, then open the database named in `config`.
    pub fn new(config: &GeoIpConfig) -> Result<Self, GeoIpError> {
        let (from_header, country_header) = header_names(&config.from_header, &config.country_header)?;

        let db = GeoIpDatabase::open(&config.filename).map_err(|source| GeoIpError::DatabaseOpen {
            path: config.filename.clone(),
            source,
        })?;

        Ok(Self {
            db: Arc::new(db),
            from_header,
            country_header,
        })
    }

    /// Build the layer around an already opened lookup backend.
    ///
    /// An empty `from_header` means the peer address is used.
    pub fn with_database(
        db: Arc<dyn CountryLookup>,
        from_header: &str,
        country_header: &str,
    ) -> Result<Self, GeoIpError> {
        let (from_header, country_header) = header_names(from_header, country_header)?;
        Ok(Self {
            db,
            from_header,
            country_header,
        })
    }

    /// Name of the header the country code is appended under.
    pub fn country_header(&self) -> &HeaderName {
        &self.country_header
    }
}

impl<S> Layer<S> for GeoIp2Layer {
    type Service = GeoIp2<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GeoIp2 {
            inner,
            db: self.db.clone(),
            from_header: self.from_header.clone(),
            country_header: self.country_header.clone(),
        }
    }
}

impl std::fmt::Debug for GeoIp2Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoIp2Layer")
            .field("from_header", &self.from_header)
            .field("country_header", &self.country_header)
            .finish_non_exhaustive()
    }
}

/// Middleware service appending the client's country code to each request.
#[derive(Clone)]
pub struct GeoIp2<S> {
    inner: S,
    db: Arc<dyn CountryLookup>,
    from_header: Option<HeaderName>,
    country_header: HeaderName,
}

impl<S> GeoIp2<S> {
    /// Open the database from `config` and wrap `next`.
    pub fn new(config: &GeoIpConfig, next: S) -> Result<Self, GeoIpError> {
        Ok(GeoIp2Layer::new(config)?.layer(next))
    }

    /// Address the lookup should use, if one can be parsed.
    fn client_ip<B>(&self, req: &Request<B>) -> Option<IpAddr> {
        if let Some(name) = &self.from_header {
            let value = req
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            return parse_ip(value);
        }

        if let Some(RemoteAddr(addr)) = req.extensions().get::<RemoteAddr>() {
            return parse_ip(addr);
        }

        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }

    fn enrich<B>(&self, req: &mut Request<B>) {
        let Some(ip) = self.client_ip(req) else {
            return;
        };

        let Ok(code) = self.db.country_code(ip) else {
            return;
        };

        if code.is_empty() {
            return;
        }

        if let Ok(value) = HeaderValue::from_str(&code) {
            req.headers_mut().append(self.country_header.clone(), value);
        }
    }
}

impl<S, B> Service<Request<B>> for GeoIp2<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        self.enrich(&mut req);
        self.inner.call(req)
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for GeoIp2<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoIp2")
            .field("inner", &self.inner)
            .field("from_header", &self.from_header)
            .field("country_header", &self.country_header)
            .finish_non_exhaustive()
    }
}

fn header_names(from_header: &str, country_header: &str) -> Result<(Option<HeaderName>, HeaderName), GeoIpError> {
    if country_header.is_empty() {
        return Err(GeoIpError::Configuration("country_header must be not empty".to_string()));
    }

    let country_header = HeaderName::from_bytes(country_header.as_bytes())
        .map_err(|_| GeoIpError::Configuration(format!("country_header {country_header:?} is not a valid header name")))?;

    let from_header = if from_header.is_empty() {
        None
    } else {
        Some(
            HeaderName::from_bytes(from_header.as_bytes())
                .map_err(|_| GeoIpError::Configuration(format!("from_header {from_header:?} is not a valid header name")))?,
        )
    };

    Ok((from_header, country_header))
}

/// Accepts a bare IP literal or a socket address (`ip:port`, `[v6]:port`).
fn parse_ip(addr: &str) -> Option<IpAddr> {
    let addr = addr.trim();
    addr.parse::<IpAddr>()
        .ok()
        .or_else(|| addr.parse::<SocketAddr>().ok().map(|a| a.ip()))
}
