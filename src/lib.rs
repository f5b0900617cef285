//! Country-tagging reverse proxy.
//!
//! The [`geoip`] module provides a Tower layer that looks up the client IP in
//! a MaxMind database and appends the ISO country code as a request header.
//! The rest of the crate hosts that layer in a small Axum proxy.

pub mod config;
pub mod geoip;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use geoip::{GeoIp2, GeoIp2Layer};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
