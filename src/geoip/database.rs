//! Country lookups against a MaxMind DB (GeoIP2 / GeoLite2) file.
//!
//! # Responsibilities
//! - Open the database file once, at startup
//! - Resolve an IP address to its ISO 3166-1 alpha-2 country code
//!
//! # Design Decisions
//! - The binary format is handled entirely by the `maxminddb` reader
//! - The reader is immutable after open, so lookups need no locking

use std::net::IpAddr;
use std::path::Path;

use maxminddb::{geoip2, MaxMindDBError, Reader};

/// Request-time lookup failure. Callers treat every variant as "no match".
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("address not found: {0}")]
    AddressNotFound(IpAddr),
    #[error("no country recorded for {0}")]
    NoCountry(IpAddr),
    #[error("lookup failed for {ip}: {reason}")]
    Database { ip: IpAddr, reason: String },
}

/// Resolves IP addresses to country codes.
///
/// Implementations are shared across all in-flight requests and must be safe
/// for concurrent reads.
pub trait CountryLookup: Send + Sync {
    /// Returns the ISO country code recorded for `ip`.
    fn country_code(&self, ip: IpAddr) -> Result<String, LookupError>;
}

/// An opened MMDB file.
pub struct GeoIpDatabase {
    reader: Reader<Vec<u8>>,
}

impl GeoIpDatabase {
    /// Read and parse the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MaxMindDBError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path)?;

        tracing::info!(
            path = %path.display(),
            database_type = %reader.metadata.database_type,
            build_epoch = reader.metadata.build_epoch,
            ip_version = reader.metadata.ip_version,
            "GeoIP database loaded"
        );

        Ok(Self { reader })
    }
}

impl CountryLookup for GeoIpDatabase {
    fn country_code(&self, ip: IpAddr) -> Result<String, LookupError> {
        let record: geoip2::Country<'_> = match self.reader.lookup(ip) {
            Ok(record) => record,
            Err(MaxMindDBError::AddressNotFoundError(_)) => return Err(LookupError::AddressNotFound(ip)),
            Err(err) => {
                return Err(LookupError::Database {
                    ip,
                    reason: err.to_string(),
                })
            }
        };

        record
            .country
            .and_then(|country| country.iso_code)
            .map(str::to_owned)
            .ok_or(LookupError::NoCountry(ip))
    }
}

impl std::fmt::Debug for GeoIpDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoIpDatabase")
            .field("database_type", &self.reader.metadata.database_type)
            .field("build_epoch", &self.reader.metadata.build_epoch)
            .finish()
    }
}

/// A tiny hand-encoded IPv4 MMDB file for tests.
///
/// Search tree (two nodes, 24-bit records), keyed on the first two address bits:
/// - `0 0 …` (e.g. 1.6.0.0, 2.0.0.0, 4.0.0.0): `{country: {iso_code: "US"}}`
/// - `0 1 …` (e.g. 109.194.11.1, 127.0.0.1): `{continent: {code: "EU"}}`, no country
/// - `1 …` (e.g. 192.168.1.1): not in the database
#[cfg(test)]
pub(crate) mod fixture {
    use std::io::Write;

    const NODE_COUNT: u32 = 2;
    const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

    fn control(out: &mut Vec<u8>, kind: u8, size: usize) {
        assert!(size < 29);
        if kind <= 7 {
            out.push((kind << 5) | size as u8);
        } else {
            out.push(size as u8);
            out.push(kind - 7);
        }
    }

    fn string(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        control(&mut out, 2, s.len());
        out.extend_from_slice(s.as_bytes());
        out
    }

    /// Unsigned integer of MMDB type `kind` (5 = u16, 6 = u32, 9 = u64).
    fn uint(kind: u8, value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        let mut out = Vec::new();
        control(&mut out, kind, bytes.len() - skip);
        out.extend_from_slice(&bytes[skip..]);
        out
    }

    fn map(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        control(&mut out, 7, entries.len());
        for (key, value) in entries {
            out.extend(string(key));
            out.extend_from_slice(value);
        }
        out
    }

    fn array(items: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        control(&mut out, 11, items.len());
        for item in items {
            out.extend_from_slice(item);
        }
        out
    }

    fn record24(out: &mut Vec<u8>, value: u32) {
        out.extend_from_slice(&value.to_be_bytes()[1..]);
    }

    pub(crate) fn bytes() -> Vec<u8> {
        let with_country = map(&[("country", map(&[("iso_code", string("US"))]))]);
        let without_country = map(&[("continent", map(&[("code", string("EU"))]))]);

        // Data pointers are offsets into the data section plus node_count + 16.
        let data_base = NODE_COUNT + 16;
        let not_found = NODE_COUNT;

        let mut out = Vec::new();
        record24(&mut out, 1);
        record24(&mut out, not_found);
        record24(&mut out, data_base);
        record24(&mut out, data_base + with_country.len() as u32);
        out.extend_from_slice(&[0u8; 16]);
        out.extend(with_country);
        out.extend(without_country);

        out.extend_from_slice(METADATA_MARKER);
        out.extend(map(&[
            ("binary_format_major_version", uint(5, 2)),
            ("binary_format_minor_version", uint(5, 0)),
            ("build_epoch", uint(9, 1_700_000_000)),
            ("database_type", string("Fixture-Country")),
            ("description", map(&[("en", string("test fixture"))])),
            ("ip_version", uint(5, 4)),
            ("languages", array(&[string("en")])),
            ("node_count", uint(6, NODE_COUNT as u64)),
            ("record_size", uint(5, 24)),
        ]));
        out
    }

    /// Write the fixture to a temp file that lives as long as the handle.
    pub(crate) fn file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes()).unwrap();
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_open_missing_file() {
        let result = GeoIpDatabase::open("/nonexistent/GeoLite2-Country.mmdb");
        assert!(matches!(result, Err(MaxMindDBError::IoError(_))));
    }

    #[test]
    fn test_open_corrupt_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a maxmind database").unwrap();

        assert!(GeoIpDatabase::open(file.path()).is_err());
    }

    #[test]
    fn test_open_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(GeoIpDatabase::open(file.path()).is_err());
    }

    #[test]
    fn test_lookup_hit() {
        let file = fixture::file();
        let db = GeoIpDatabase::open(file.path()).unwrap();

        for ip in ["4.0.0.0", "2.0.0.0", "1.6.0.0"] {
            assert_eq!(db.country_code(ip.parse().unwrap()).unwrap(), "US", "{ip}");
        }
    }

    #[test]
    fn test_lookup_address_not_found() {
        let file = fixture::file();
        let db = GeoIpDatabase::open(file.path()).unwrap();

        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(matches!(db.country_code(ip), Err(LookupError::AddressNotFound(miss)) if miss == ip));
    }

    #[test]
    fn test_lookup_record_without_country() {
        let file = fixture::file();
        let db = GeoIpDatabase::open(file.path()).unwrap();

        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(matches!(db.country_code(ip), Err(LookupError::NoCountry(miss)) if miss == ip));
    }

    #[test]
    fn test_lookup_ipv6_in_ipv4_database() {
        let file = fixture::file();
        let db = GeoIpDatabase::open(file.path()).unwrap();

        assert!(db.country_code("2001:4860::1".parse().unwrap()).is_err());
    }
}
