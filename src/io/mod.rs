//! IO modules - external system interfaces
//!
//! - `capture` - capture device backends (video4linux, simulated)
//! - `verification` - HTTP client for the access-decision service
//! - `scan_source` - decoded payload lines from TCP or stdin
//! - `status` - status, control and Prometheus HTTP endpoint

pub mod capture;
pub mod scan_source;
pub mod status;
pub mod verification;

// Re-export commonly used types
pub use scan_source::{run_stdin_source, start_scan_listener, ScanListenerConfig};
pub use status::start_status_server;
pub use verification::{AccessVerifier, HttpVerifier, HttpVerifierSettings, VerificationClient};
