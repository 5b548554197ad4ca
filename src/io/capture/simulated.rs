//! Scripted capture backend
//!
//! Behaves like a platform capture API with a fixed device list. Individual
//! devices can be configured to fail on start, the permission query can be
//! held open until released, and every open handle is counted so callers can
//! verify that streams are released.

use super::{CaptureBackend, CaptureStream};
use crate::domain::error::DeviceError;
use crate::domain::types::{DeviceInfo, PermissionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A device known to the simulated backend
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub info: DeviceInfo,
    /// Error returned when capture is started on this device
    pub start_error: Option<DeviceError>,
}

impl SimulatedDevice {
    pub fn new(id: &str, label: &str) -> Self {
        Self { info: DeviceInfo::new(id, label), start_error: None }
    }

    pub fn failing(id: &str, label: &str, error: DeviceError) -> Self {
        Self { info: DeviceInfo::new(id, label), start_error: Some(error) }
    }
}

pub struct SimulatedBackend {
    supported: bool,
    permission: Option<PermissionStatus>,
    devices: Vec<SimulatedDevice>,
    latency: Duration,
    permission_hold: Option<Arc<Notify>>,
    probe_error: Option<DeviceError>,
    open_streams: Arc<AtomicUsize>,
    start_log: Mutex<Vec<String>>,
}

impl SimulatedBackend {
    pub fn new(devices: Vec<SimulatedDevice>) -> Self {
        Self {
            supported: true,
            permission: Some(PermissionStatus::Granted),
            devices,
            latency: Duration::ZERO,
            permission_hold: None,
            probe_error: None,
            open_streams: Arc::new(AtomicUsize::new(0)),
            start_log: Mutex::new(Vec::new()),
        }
    }

    /// Backend whose platform lacks capture entirely
    pub fn unsupported() -> Self {
        Self { supported: false, ..Self::new(Vec::new()) }
    }

    /// Set the permission query result (`None` = query capability missing)
    pub fn with_permission(mut self, permission: Option<PermissionStatus>) -> Self {
        self.permission = permission;
        self
    }

    /// Delay applied to every asynchronous operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Hold the permission query until `hold` is notified
    pub fn with_permission_hold(mut self, hold: Arc<Notify>) -> Self {
        self.permission_hold = Some(hold);
        self
    }

    /// Make the unconstrained probe capture fail with `error`
    pub fn with_probe_error(mut self, error: DeviceError) -> Self {
        self.probe_error = Some(error);
        self
    }

    /// Number of streams started and not yet released
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Device ids passed to `start`, in call order (`*` for "any device")
    pub fn start_log(&self) -> Vec<String> {
        self.start_log.lock().clone()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl CaptureBackend for SimulatedBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn query_permission(&self) -> Option<PermissionStatus> {
        if let Some(hold) = &self.permission_hold {
            hold.notified().await;
        }
        self.simulate_latency().await;
        self.permission
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        self.simulate_latency().await;
        Ok(self.devices.iter().map(|d| d.info.clone()).collect())
    }

    async fn start(&self, device_id: Option<&str>) -> Result<Box<dyn CaptureStream>, DeviceError> {
        self.start_log.lock().push(device_id.unwrap_or("*").to_string());
        self.simulate_latency().await;

        if self.permission == Some(PermissionStatus::Denied) {
            return Err(DeviceError::named("NotAllowedError", "Permission denied"));
        }

        // An unconstrained start picks the default device and ignores
        // per-device failures, like a platform capture prompt would
        let device = match device_id {
            Some(id) => self.devices.iter().find(|d| d.info.id == id),
            None => {
                if let Some(err) = &self.probe_error {
                    return Err(err.clone());
                }
                self.devices.first()
            }
        };
        let Some(device) = device else {
            return Err(DeviceError::named("NotFoundError", "Requested device not found"));
        };
        if let (Some(_), Some(err)) = (device_id, &device.start_error) {
            return Err(err.clone());
        }

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedStream {
            device_id: device.info.id.clone(),
            open: Some(self.open_streams.clone()),
        }))
    }
}

struct SimulatedStream {
    device_id: String,
    open: Option<Arc<AtomicUsize>>,
}

impl SimulatedStream {
    fn release(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl CaptureStream for SimulatedStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.release();
        Ok(())
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.release();
    }
}
