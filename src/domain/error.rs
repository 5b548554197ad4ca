//! Error taxonomy shared by the scan pipeline
//!
//! Every failure the terminal can surface maps to one [`ErrorKind`]. Device
//! and permission failures additionally carry operator-facing guidance in a
//! [`ClassifiedError`].

use serde::Serialize;
use std::io;

/// Closed failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    UnsupportedConstraints,
    BrowserUnsupported,
    MalformedPayload,
    NetworkError,
    ApplicationDenied,
    Unknown,
}

impl ErrorKind {
    /// Stable code used in outcomes, logs and the status endpoint
    pub const fn code(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND",
            ErrorKind::DeviceBusy => "DEVICE_BUSY",
            ErrorKind::UnsupportedConstraints => "UNSUPPORTED_CONSTRAINTS",
            ErrorKind::BrowserUnsupported => "BROWSER_UNSUPPORTED",
            ErrorKind::MalformedPayload => "MALFORMED_PAYLOAD",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ApplicationDenied => "APPLICATION_DENIED",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// A failure mapped onto the taxonomy, with recovery guidance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{kind}: {user_message}")]
pub struct ClassifiedError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub user_message: String,
    pub recovery_steps: Vec<String>,
    pub severity: Severity,
    pub recoverable: bool,
    /// Original low-level text, for logs only
    #[serde(skip)]
    pub detail: String,
}

/// Low-level failure reported by a capture backend
///
/// `name` is a structured identifier when the platform provides one
/// (`NotAllowedError`, `EBUSY`, ...); `message` is free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub name: Option<String>,
    pub message: String,
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DeviceError {}

impl DeviceError {
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: Some(name.into()), message: message.into() }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self { name: None, message: message.into() }
    }
}

impl From<io::Error> for DeviceError {
    fn from(e: io::Error) -> Self {
        let name = match e.raw_os_error() {
            Some(1) => Some("EPERM"),
            Some(2) => Some("ENOENT"),
            Some(6) => Some("ENXIO"),
            Some(13) => Some("EACCES"),
            Some(16) => Some("EBUSY"),
            Some(19) => Some("ENODEV"),
            Some(22) => Some("EINVAL"),
            _ => match e.kind() {
                io::ErrorKind::PermissionDenied => Some("EACCES"),
                io::ErrorKind::NotFound => Some("ENOENT"),
                io::ErrorKind::Unsupported => Some("NotSupportedError"),
                _ => None,
            },
        };
        Self { name: name.map(str::to_string), message: e.to_string() }
    }
}

/// Raw payload could not be turned into an identity request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed payload: {excerpt:?}")]
    Malformed { excerpt: String },
}

/// Verification call failed before an application answer was obtained
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification timed out after {0} ms")]
    Timeout(u64),
    #[error("verification unreachable: {0}")]
    Network(String),
    #[error("invalid verification response (status {status}): {reason}")]
    InvalidResponse { status: u16, reason: String },
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::Timeout(_) | VerifyError::Network(_) => ErrorKind::NetworkError,
            VerifyError::InvalidResponse { .. } => ErrorKind::Unknown,
        }
    }
}
