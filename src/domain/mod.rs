//! Domain models - core types and error taxonomy
//!
//! - `types` - identity requests, verification responses, scan outcomes,
//!   camera state
//! - `error` - classified device errors and pipeline failures

pub mod error;
pub mod types;

// Re-export commonly used types at module level
pub use error::{ClassifiedError, DeviceError, ErrorKind, NormalizeError, Severity, VerifyError};
pub use types::{
    codes, CameraSnapshot, CameraState, DeclaredRole, NormalizedIdentityRequest, ScanAction, ScanOutcome, Subject,
    SubjectType, VerificationResponse,
};
