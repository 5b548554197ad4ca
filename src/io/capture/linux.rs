//! video4linux capture backend
//!
//! Devices are discovered from /sys/class/video4linux/videoN; the human
//! readable label comes from the `name` attribute. Starting capture opens the
//! /dev/videoN node read-write and holds it for the stream's lifetime.
//!
//! Linux has no permission prompt, so `query_permission` reports the
//! capability as unavailable and the permission gate falls back to a probe
//! open, which surfaces EACCES when the terminal user lacks video access.

use super::{CaptureBackend, CaptureStream};
use crate::domain::error::DeviceError;
use crate::domain::types::{DeviceInfo, PermissionStatus};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct LinuxVideoBackend {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl LinuxVideoBackend {
    pub fn new(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self { sys_root: sys_root.into(), dev_root: dev_root.into() }
    }

    /// Numeric suffix of a `videoN` entry, used for ordering
    fn node_index(name: &str) -> Option<u32> {
        name.strip_prefix("video")?.parse().ok()
    }

    fn node_path(&self, device_id: &str) -> PathBuf {
        self.dev_root.join(device_id)
    }

    async fn read_label(path: &Path, fallback: &str) -> String {
        match tokio::fs::read_to_string(path.join("name")).await {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => fallback.to_string(),
        }
    }
}

impl Default for LinuxVideoBackend {
    fn default() -> Self {
        Self::new("/sys/class/video4linux", "/dev")
    }
}

#[async_trait]
impl CaptureBackend for LinuxVideoBackend {
    fn is_supported(&self) -> bool {
        self.sys_root.is_dir()
    }

    async fn query_permission(&self) -> Option<PermissionStatus> {
        None
    }

    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let mut entries = tokio::fs::read_dir(&self.sys_root).await?;
        let mut found: Vec<(u32, DeviceInfo)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(index) = Self::node_index(&name) else {
                continue;
            };
            let label = Self::read_label(&entry.path(), &name).await;
            found.push((index, DeviceInfo::new(name, label)));
        }

        found.sort_by_key(|(index, _)| *index);
        let devices: Vec<DeviceInfo> = found.into_iter().map(|(_, d)| d).collect();
        debug!(count = devices.len(), "v4l2_devices_enumerated");
        Ok(devices)
    }

    async fn start(&self, device_id: Option<&str>) -> Result<Box<dyn CaptureStream>, DeviceError> {
        let device_id = match device_id {
            Some(id) => id.to_string(),
            None => self
                .enumerate()
                .await?
                .into_iter()
                .next()
                .map(|d| d.id)
                .ok_or_else(|| DeviceError::named("NotFoundError", "no video devices present"))?,
        };

        let path = self.node_path(&device_id);
        let file = tokio::fs::OpenOptions::new().read(true).write(true).open(&path).await?;
        debug!(device_id = %device_id, path = %path.display(), "v4l2_device_opened");

        Ok(Box::new(LinuxVideoStream { device_id, file: Some(file.into_std().await) }))
    }
}

struct LinuxVideoStream {
    device_id: String,
    file: Option<std::fs::File>,
}

impl CaptureStream for LinuxVideoStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(file) = self.file.take() {
            // Closing the node releases the device for other readers
            drop(file);
            debug!(device_id = %self.device_id, "v4l2_device_closed");
        }
        Ok(())
    }
}

impl Drop for LinuxVideoStream {
    fn drop(&mut self) {
        if self.file.is_some() {
            warn!(device_id = %self.device_id, "v4l2_stream_dropped_without_stop");
        }
    }
}
