//! GeoIP request enrichment subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → layer.rs (pick source address: configured header or peer address)
//!     → parse to IpAddr (bare IP or ip:port)
//!     → database.rs (country lookup against the MMDB reader)
//!     → append country header on success
//!     → inner service (always, exactly once)
//! ```
//!
//! # Design Decisions
//! - Fail open: parse errors and lookup misses leave the request untouched
//! - Reader opened once at construction, shared read-only via Arc
//! - Country header is appended, never overwritten

pub mod database;
pub mod error;
pub mod layer;

pub use database::{CountryLookup, GeoIpDatabase, LookupError};
pub use error::GeoIpError;
pub use layer::{GeoIp2, GeoIp2Layer, RemoteAddr};

use crate::config::GeoIpConfig;

/// Default name of the header carrying the country code.
pub const DEFAULT_COUNTRY_HEADER: &str = "X-Country";

/// Default enrichment configuration: `X-Country` destination, peer address as
/// source, no database path.
pub fn create_default_config() -> GeoIpConfig {
    GeoIpConfig::default()
}
