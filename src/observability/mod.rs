//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server and startup code produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (request counters and latency histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through logs via the trace span
//! - The GeoIP layer itself emits nothing per request; misses are not faults
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
