//! Camera acquisition state machine
//!
//! States: Idle -> Checking -> Ready, or Checking -> Error; Ready/Error -> Idle
//! on deactivation.
//!
//! Activation suspends on the permission prompt, on enumeration and on every
//! device start. Each activation captures a cancellation token; `deactivate`
//! cancels it. After every suspension the token is re-checked and, if it was
//! cancelled, any handle obtained in the meantime is released and the state is
//! left untouched (deactivate already reset it to Idle).

use crate::domain::error::{ClassifiedError, ErrorKind};
use crate::domain::types::{CameraSnapshot, CameraState, DeviceInfo};
use crate::io::capture::{CaptureBackend, CaptureStream};
use crate::services::error_classifier;
use crate::services::permission::{PermissionCheck, PermissionGate};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Label fragments that suggest a rear / environment-facing sensor
pub const DEFAULT_REAR_HINTS: [&str; 4] = ["back", "rear", "environment", "trasera"];

/// Why an acquisition attempt stopped
enum AcquireError {
    /// Intent flipped while suspended
    Cancelled,
    Failed(ClassifiedError),
}

impl From<ClassifiedError> for AcquireError {
    fn from(e: ClassifiedError) -> Self {
        AcquireError::Failed(e)
    }
}

struct Session {
    state: CameraState,
    intent: Option<CancellationToken>,
    stream: Option<Box<dyn CaptureStream>>,
    device: Option<DeviceInfo>,
    error: Option<ClassifiedError>,
}

impl Session {
    fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            state: self.state,
            device_id: self.device.as_ref().map(|d| d.id.clone()),
            device_label: self.device.as_ref().map(|d| d.label.clone()),
            error: self.error.clone(),
        }
    }

    /// Stop and drop the active stream, swallowing errors
    fn release_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            release(stream.as_mut());
        }
    }
}

fn release(stream: &mut dyn CaptureStream) {
    if let Err(e) = stream.stop() {
        warn!(device_id = %stream.device_id(), error = %e, "camera_release_failed");
    }
}

/// Owns the capture device and its session state
pub struct CameraAcquisition {
    backend: Arc<dyn CaptureBackend>,
    gate: PermissionGate,
    rear_hints: Vec<String>,
    session: Mutex<Session>,
    snapshot_tx: watch::Sender<CameraSnapshot>,
}

impl CameraAcquisition {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        let (snapshot_tx, _) = watch::channel(CameraSnapshot::default());
        Self {
            gate: PermissionGate::new(backend.clone()),
            backend,
            rear_hints: DEFAULT_REAR_HINTS.iter().map(|s| s.to_string()).collect(),
            session: Mutex::new(Session {
                state: CameraState::Idle,
                intent: None,
                stream: None,
                device: None,
                error: None,
            }),
            snapshot_tx,
        }
    }

    /// Replace the rear-facing label hints (matched case-insensitively)
    pub fn with_rear_hints(mut self, hints: &[String]) -> Self {
        self.rear_hints = hints.iter().map(|h| h.to_lowercase()).collect();
        self
    }

    pub fn state(&self) -> CameraState {
        self.session.lock().state
    }

    pub fn snapshot(&self) -> CameraSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Subscribe to snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<CameraSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self, session: &Session) {
        self.snapshot_tx.send_replace(session.snapshot());
    }

    /// Acquire a capture device
    ///
    /// No-op unless the state is Idle or Error. Returns `Ok(())` when the
    /// camera became Ready or when the attempt was abandoned by `deactivate`.
    pub async fn activate(&self) -> Result<(), ClassifiedError> {
        let token = {
            let mut session = self.session.lock();
            if !matches!(session.state, CameraState::Idle | CameraState::Error) {
                debug!(state = session.state.as_str(), "camera_activate_ignored");
                return Ok(());
            }
            let token = CancellationToken::new();
            session.intent = Some(token.clone());
            session.state = CameraState::Checking;
            session.error = None;
            session.device = None;
            self.publish(&session);
            token
        };

        info!("camera_activation_started");
        let result = self.acquire(&token).await;

        let mut session = self.session.lock();
        if token.is_cancelled() {
            if let Ok((mut stream, device)) = result {
                debug!(device_id = %device.id, "camera_release_after_cancel");
                release(stream.as_mut());
            }
            info!("camera_activation_abandoned");
            return Ok(());
        }

        session.intent = None;
        match result {
            Ok((stream, device)) => {
                // Exclusive ownership: never hold two handles at once
                session.release_stream();
                info!(device_id = %device.id, label = %device.label, "camera_ready");
                session.stream = Some(stream);
                session.device = Some(device);
                session.state = CameraState::Ready;
                self.publish(&session);
                Ok(())
            }
            Err(AcquireError::Failed(e)) => {
                warn!(kind = %e.kind, detail = %e.detail, "camera_activation_failed");
                session.state = CameraState::Error;
                session.error = Some(e.clone());
                self.publish(&session);
                Err(e)
            }
            Err(AcquireError::Cancelled) => {
                // Token not cancelled yet acquire reported cancellation; treat as idle
                session.state = CameraState::Idle;
                self.publish(&session);
                Ok(())
            }
        }
    }

    /// Release the device and return to Idle
    ///
    /// Synchronous; also cancels an activation that is still suspended.
    pub fn deactivate(&self) {
        let mut session = self.session.lock();
        if let Some(intent) = session.intent.take() {
            intent.cancel();
        }
        session.release_stream();
        session.state = CameraState::Idle;
        session.device = None;
        session.error = None;
        self.publish(&session);
        info!("camera_deactivated");
    }

    async fn acquire(
        &self,
        token: &CancellationToken,
    ) -> Result<(Box<dyn CaptureStream>, DeviceInfo), AcquireError> {
        if !self.backend.is_supported() {
            return Err(error_classifier::describe(
                ErrorKind::BrowserUnsupported,
                "capture capability missing".to_string(),
            )
            .into());
        }

        let permission = self.gate.ensure_permission(token).await;
        if token.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        if permission? == PermissionCheck::Cancelled {
            return Err(AcquireError::Cancelled);
        }

        let devices = self.backend.enumerate().await;
        if token.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        let devices = devices.map_err(|e| error_classifier::classify(&e))?;
        if devices.is_empty() {
            return Err(error_classifier::describe(
                ErrorKind::DeviceNotFound,
                "no capture devices enumerated".to_string(),
            )
            .into());
        }

        let ordered = self.order_devices(devices);
        let mut last_error = None;

        for device in ordered {
            if token.is_cancelled() {
                return Err(AcquireError::Cancelled);
            }
            debug!(device_id = %device.id, label = %device.label, "camera_start_attempt");
            match self.backend.start(Some(&device.id)).await {
                Ok(mut stream) => {
                    if token.is_cancelled() {
                        release(stream.as_mut());
                        return Err(AcquireError::Cancelled);
                    }
                    return Ok((stream, device));
                }
                Err(raw) => {
                    let classified = error_classifier::classify(&raw);
                    warn!(
                        device_id = %device.id,
                        kind = %classified.kind,
                        error = %raw,
                        "camera_start_failed"
                    );
                    last_error = Some(classified);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| {
                error_classifier::describe(ErrorKind::Unknown, "no device started".to_string())
            })
            .into())
    }

    /// Preferred rear-facing device first, the rest in enumeration order
    fn order_devices(&self, mut devices: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
        let preferred = devices.iter().position(|d| {
            let label = d.label.to_lowercase();
            self.rear_hints.iter().any(|hint| label.contains(hint.as_str()))
        });
        if let Some(idx) = preferred {
            let device = devices.remove(idx);
            devices.insert(0, device);
        }
        devices
    }
}

impl Drop for CameraAcquisition {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if let Some(intent) = session.intent.take() {
            intent.cancel();
        }
        session.release_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::DeviceError;
    use crate::domain::types::PermissionStatus;
    use crate::io::capture::{SimulatedBackend, SimulatedDevice};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn camera(backend: SimulatedBackend) -> (Arc<CameraAcquisition>, Arc<SimulatedBackend>) {
        let backend = Arc::new(backend);
        (Arc::new(CameraAcquisition::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn test_activate_prefers_rear_camera() {
        let (camera, backend) = camera(SimulatedBackend::new(vec![
            SimulatedDevice::new("cam0", "Integrated Front Camera"),
            SimulatedDevice::new("cam1", "USB Back Camera"),
        ]));

        camera.activate().await.unwrap();

        let snap = camera.snapshot();
        assert_eq!(snap.state, CameraState::Ready);
        assert_eq!(snap.device_id.as_deref(), Some("cam1"));
        // Probe + real start, probe released
        assert_eq!(backend.start_log(), vec!["*".to_string(), "cam1".to_string()]);
        assert_eq!(backend.open_streams(), 1);
    }

    #[tokio::test]
    async fn test_activate_first_device_without_hint() {
        let (camera, _) = camera(SimulatedBackend::new(vec![
            SimulatedDevice::new("cam0", "Webcam A"),
            SimulatedDevice::new("cam1", "Webcam B"),
        ]));

        camera.activate().await.unwrap();
        assert_eq!(camera.snapshot().device_id.as_deref(), Some("cam0"));
    }

    #[tokio::test]
    async fn test_fallback_to_next_device() {
        let (camera, backend) = camera(SimulatedBackend::new(vec![
            SimulatedDevice::new("cam0", "Webcam A"),
            SimulatedDevice::failing(
                "cam1",
                "Rear Camera",
                DeviceError::named("NotReadableError", "in use"),
            ),
            SimulatedDevice::new("cam2", "Webcam C"),
        ]));

        camera.activate().await.unwrap();

        assert_eq!(camera.snapshot().device_id.as_deref(), Some("cam0"));
        assert_eq!(
            backend.start_log(),
            vec!["*".to_string(), "cam1".to_string(), "cam0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_all_devices_fail_reports_last_error() {
        let (camera, backend) = camera(SimulatedBackend::new(vec![
            SimulatedDevice::failing(
                "cam0",
                "Front",
                DeviceError::named("OverconstrainedError", "resolution"),
            ),
            SimulatedDevice::failing("cam1", "Side", DeviceError::named("EBUSY", "busy")),
        ]));

        let err = camera.activate().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::DeviceBusy);
        assert_eq!(camera.state(), CameraState::Error);
        assert_eq!(camera.snapshot().error.map(|e| e.kind), Some(ErrorKind::DeviceBusy));
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let (camera, _) = camera(SimulatedBackend::unsupported());

        let err = camera.activate().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::BrowserUnsupported);
        assert!(!err.recoverable);
        assert_eq!(camera.state(), CameraState::Error);
    }

    #[tokio::test]
    async fn test_no_devices() {
        let (camera, _) = camera(SimulatedBackend::new(Vec::new()));

        let err = camera.activate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeviceNotFound);
    }

    #[tokio::test]
    async fn test_activate_noop_when_ready() {
        let (camera, backend) =
            camera(SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")]));

        camera.activate().await.unwrap();
        camera.activate().await.unwrap();

        assert_eq!(backend.start_log().len(), 2); // probe + one start only
        assert_eq!(backend.open_streams(), 1);
    }

    #[tokio::test]
    async fn test_retry_from_error_state() {
        let (camera, _) = camera(
            SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")])
                .with_permission(Some(PermissionStatus::Denied)),
        );
        assert!(camera.activate().await.is_err());
        assert_eq!(camera.state(), CameraState::Error);

        // Error allows another attempt (still denied, but it runs)
        let err = camera.activate().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_deactivate_releases_device() {
        let (camera, backend) =
            camera(SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")]));

        camera.activate().await.unwrap();
        assert_eq!(backend.open_streams(), 1);

        camera.deactivate();

        assert_eq!(camera.state(), CameraState::Idle);
        assert_eq!(camera.snapshot().device_id, None);
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_deactivate_during_pending_permission() {
        let hold = Arc::new(Notify::new());
        let (camera, backend) = camera(
            SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")])
                .with_permission_hold(hold.clone()),
        );

        let pending = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.activate().await })
        };

        // Let activation reach the permission query
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(camera.state(), CameraState::Checking);

        camera.deactivate();
        hold.notify_one();

        pending.await.unwrap().unwrap();

        assert_eq!(camera.state(), CameraState::Idle);
        assert_eq!(backend.open_streams(), 0);
        // No capture was started once the intent was gone
        assert!(backend.start_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_during_device_start_releases_handle() {
        let (camera, backend) = camera(
            SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")])
                .with_latency(Duration::from_millis(30)),
        );

        let pending = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.activate().await })
        };

        // permission query (30ms) + probe start (30ms) + enumerate (30ms), then start
        tokio::time::sleep(Duration::from_millis(100)).await;
        camera.deactivate();

        pending.await.unwrap().unwrap();

        assert_eq!(camera.state(), CameraState::Idle);
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_subscription() {
        let (camera, _) = camera(SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Cam")]));
        let mut rx = camera.subscribe();

        camera.activate().await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().state, CameraState::Ready);
    }

    #[test]
    fn test_custom_rear_hints() {
        let backend = Arc::new(SimulatedBackend::new(Vec::new()));
        let camera = CameraAcquisition::new(backend).with_rear_hints(&["Trasera".to_string()]);
        let ordered = camera.order_devices(vec![
            DeviceInfo::new("a", "Frontal"),
            DeviceInfo::new("b", "Cámara trasera"),
        ]);
        assert_eq!(ordered[0].id, "b");
        assert_eq!(ordered[1].id, "a");
    }
}
