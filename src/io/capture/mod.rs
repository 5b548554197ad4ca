//! Capture device abstraction
//!
//! The camera state machine only talks to a [`CaptureBackend`]. Two
//! implementations exist:
//! - `linux` - video4linux nodes under /dev, labels from sysfs
//! - `simulated` - scripted devices for tests and demos

pub mod linux;
pub mod simulated;

use crate::domain::error::DeviceError;
use crate::domain::types::{DeviceInfo, PermissionStatus};
use async_trait::async_trait;

pub use linux::LinuxVideoBackend;
pub use simulated::{SimulatedBackend, SimulatedDevice};

/// Platform capture API
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Whether the platform offers device capture at all
    fn is_supported(&self) -> bool;

    /// Query permission status. `None` when the platform has no query capability.
    async fn query_permission(&self) -> Option<PermissionStatus>;

    /// List capture devices in platform order
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Start capture on `device_id`, or on any device when `None`
    async fn start(&self, device_id: Option<&str>) -> Result<Box<dyn CaptureStream>, DeviceError>;
}

/// An exclusively owned, running capture stream
///
/// Dropping the stream releases the device; `stop` does so explicitly and
/// reports failures.
pub trait CaptureStream: Send + Sync {
    fn device_id(&self) -> &str;

    fn stop(&mut self) -> Result<(), DeviceError>;
}

impl std::fmt::Debug for dyn CaptureStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureStream").field("device_id", &self.device_id()).finish()
    }
}
