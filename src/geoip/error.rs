//! Construction-time errors for the GeoIP layer.

use std::path::PathBuf;

/// Errors that prevent the enrichment layer from being installed.
///
/// Request-time failures never surface here; see [`LookupError`](super::LookupError).
#[derive(Debug, thiserror::Error)]
pub enum GeoIpError {
    /// Header names missing or not valid HTTP header names.
    #[error("invalid geoip configuration: {0}")]
    Configuration(String),

    /// The database file is missing, unreadable, or not a valid MMDB file.
    #[error("error opening database file {}: {source}", .path.display())]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: maxminddb::MaxMindDBError,
    },
}
