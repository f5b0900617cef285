//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ConnectInfo peer address)
//!     → request.rs (assign request ID)
//!     → geoip layer (append country header)
//!     → server.rs handler (forward to upstream, or echo)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{request_id, MakeRequestUuid, X_REQUEST_ID};
pub use server::{HttpServer, StartupError};
