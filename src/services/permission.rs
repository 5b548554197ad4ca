//! Camera authorization before acquisition
//!
//! A `Denied` status fails fast. Any other status (or no status capability)
//! triggers a short probe capture that is released immediately; its failure
//! is reported as `PermissionDenied` or `DeviceNotFound`, never as the raw
//! platform error.
//!
//! The caller's intent token is re-checked after the status query and after
//! the probe start; a cancelled check never starts (or keeps) a probe.

use crate::domain::error::{ClassifiedError, ErrorKind};
use crate::domain::types::PermissionStatus;
use crate::io::capture::CaptureBackend;
use crate::services::error_classifier;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of a permission check that was not refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionCheck {
    Granted,
    /// The intent token was cancelled while suspended
    Cancelled,
}

pub struct PermissionGate {
    backend: Arc<dyn CaptureBackend>,
}

impl PermissionGate {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self { backend }
    }

    /// Confirm (or elicit) camera permission
    pub async fn ensure_permission(&self, token: &CancellationToken) -> Result<PermissionCheck, ClassifiedError> {
        let status = self.backend.query_permission().await;
        if token.is_cancelled() {
            debug!("permission_check_cancelled");
            return Ok(PermissionCheck::Cancelled);
        }
        debug!(status = ?status, "permission_status_queried");

        if status == Some(PermissionStatus::Denied) {
            info!("permission_denied_by_status");
            return Err(error_classifier::describe(
                ErrorKind::PermissionDenied,
                "permission status is denied".to_string(),
            ));
        }

        match self.backend.start(None).await {
            Ok(mut probe) => {
                if let Err(e) = probe.stop() {
                    warn!(error = %e, "permission_probe_release_failed");
                }
                if token.is_cancelled() {
                    debug!("permission_check_cancelled");
                    return Ok(PermissionCheck::Cancelled);
                }
                debug!("permission_probe_ok");
                Ok(PermissionCheck::Granted)
            }
            Err(_) if token.is_cancelled() => Ok(PermissionCheck::Cancelled),
            Err(raw) => {
                let kind = match error_classifier::kind_for(&raw) {
                    ErrorKind::DeviceNotFound => ErrorKind::DeviceNotFound,
                    _ => ErrorKind::PermissionDenied,
                };
                info!(kind = %kind, error = %raw, "permission_probe_failed");
                Err(error_classifier::describe(kind, raw.to_string()))
            }
        }
    }
}
