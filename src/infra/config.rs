//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and field is optional; missing values take the defaults
//! below. `TERMINAL_OPERATOR_ID` overrides `[terminal] operator_id`.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const OPERATOR_ID_ENV: &str = "TERMINAL_OPERATOR_ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// V4L2 nodes under /dev
    Linux,
    /// Scripted device list, no hardware
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub id: String,
    pub operator_id: Option<String>,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { id: "terminal-01".to_string(), operator_id: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Base URL of the access-decision service; may embed `user:pass@`
    pub base_url: String,
    pub path: String,
    pub timeout_ms: u64,
    pub bearer_token: Option<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            path: "/api/access/verify".to_string(),
            timeout_ms: 5000,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub backend: CaptureMode,
    pub activate_on_start: bool,
    /// Label fragments that mark a rear-facing device
    pub rear_hints: Vec<String>,
    pub sys_root: String,
    pub dev_root: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CaptureMode::Linux,
            activate_on_start: true,
            rear_hints: ["back", "rear", "environment", "trasera"].map(String::from).to_vec(),
            sys_root: "/sys/class/video4linux".to_string(),
            dev_root: "/dev".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub cooldown_ms: u64,
    pub clear_after_success_ms: u64,
    pub clear_after_failure_ms: u64,
    /// TCP line listener for an external frame decoder
    pub listener_enabled: bool,
    pub listener_port: u16,
    /// Read scan lines from stdin
    pub stdin_enabled: bool,
    /// Orchestrator command queue capacity
    pub queue_capacity: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 1000,
            clear_after_success_ms: 1500,
            clear_after_failure_ms: 2000,
            listener_enabled: true,
            listener_port: 25900,
            stdin_enabled: false,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 100, ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub dismiss_ms: u64,
    /// Ring the terminal bell on each outcome
    pub bell: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { dismiss_ms: 3000, bell: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Status and Prometheus HTTP port (0 to disable)
    pub status_port: u16,
    /// Samples kept for rolling latency statistics
    pub performance_window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 10, status_port: 8080, performance_window: 100 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub terminal: TerminalConfig,
    pub verification: VerificationConfig,
    pub camera: CameraConfig,
    pub scan: ScanConfig,
    pub cache: CacheConfig,
    pub feedback: FeedbackConfig,
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    terminal_id: String,
    operator_id: Option<String>,
    verify_base_url: String,
    verify_path: String,
    verify_timeout_ms: u64,
    verify_bearer_token: Option<String>,
    capture_mode: CaptureMode,
    activate_on_start: bool,
    rear_hints: Vec<String>,
    video_sys_root: String,
    video_dev_root: String,
    cooldown_ms: u64,
    clear_after_success_ms: u64,
    clear_after_failure_ms: u64,
    scan_listener_enabled: bool,
    scan_listener_port: u16,
    stdin_enabled: bool,
    queue_capacity: usize,
    cache_capacity: usize,
    cache_ttl_secs: u64,
    feedback_dismiss_ms: u64,
    feedback_bell: bool,
    metrics_interval_secs: u64,
    status_port: u16,
    performance_window: usize,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            terminal_id: toml_config.terminal.id,
            operator_id: toml_config.terminal.operator_id.filter(|s| !s.is_empty()),
            verify_base_url: toml_config.verification.base_url,
            verify_path: toml_config.verification.path,
            verify_timeout_ms: toml_config.verification.timeout_ms,
            verify_bearer_token: toml_config.verification.bearer_token.filter(|s| !s.is_empty()),
            capture_mode: toml_config.camera.backend,
            activate_on_start: toml_config.camera.activate_on_start,
            rear_hints: toml_config.camera.rear_hints,
            video_sys_root: toml_config.camera.sys_root,
            video_dev_root: toml_config.camera.dev_root,
            cooldown_ms: toml_config.scan.cooldown_ms,
            clear_after_success_ms: toml_config.scan.clear_after_success_ms,
            clear_after_failure_ms: toml_config.scan.clear_after_failure_ms,
            scan_listener_enabled: toml_config.scan.listener_enabled,
            scan_listener_port: toml_config.scan.listener_port,
            stdin_enabled: toml_config.scan.stdin_enabled,
            queue_capacity: toml_config.scan.queue_capacity.max(1),
            cache_capacity: toml_config.cache.capacity,
            cache_ttl_secs: toml_config.cache.ttl_secs,
            feedback_dismiss_ms: toml_config.feedback.dismiss_ms,
            feedback_bell: toml_config.feedback.bell,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            status_port: toml_config.metrics.status_port,
            performance_window: toml_config.metrics.performance_window,
            config_file,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from `path`, falling back to defaults, then apply
    /// environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        };
        config.with_operator_override(env::var(OPERATOR_ID_ENV).ok())
    }

    /// Replace the operator id when `operator_id` is a non-empty value
    pub fn with_operator_override(mut self, operator_id: Option<String>) -> Self {
        if let Some(id) = operator_id.filter(|s| !s.trim().is_empty()) {
            self.operator_id = Some(id.trim().to_string());
        }
        self
    }

    // Getters for all config fields
    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    pub fn operator_id(&self) -> Option<&str> {
        self.operator_id.as_deref()
    }

    pub fn verify_base_url(&self) -> &str {
        &self.verify_base_url
    }

    pub fn verify_path(&self) -> &str {
        &self.verify_path
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn verify_bearer_token(&self) -> Option<&str> {
        self.verify_bearer_token.as_deref()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.capture_mode
    }

    pub fn activate_on_start(&self) -> bool {
        self.activate_on_start
    }

    pub fn rear_hints(&self) -> &[String] {
        &self.rear_hints
    }

    pub fn video_sys_root(&self) -> &str {
        &self.video_sys_root
    }

    pub fn video_dev_root(&self) -> &str {
        &self.video_dev_root
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn clear_after_success(&self) -> Duration {
        Duration::from_millis(self.clear_after_success_ms)
    }

    pub fn clear_after_failure(&self) -> Duration {
        Duration::from_millis(self.clear_after_failure_ms)
    }

    pub fn scan_listener_enabled(&self) -> bool {
        self.scan_listener_enabled
    }

    pub fn scan_listener_port(&self) -> u16 {
        self.scan_listener_port
    }

    pub fn stdin_enabled(&self) -> bool {
        self.stdin_enabled
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn feedback_dismiss(&self) -> Duration {
        Duration::from_millis(self.feedback_dismiss_ms)
    }

    pub fn feedback_bell(&self) -> bool {
        self.feedback_bell
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn status_port(&self) -> u16 {
        self.status_port
    }

    pub fn performance_window(&self) -> usize {
        self.performance_window
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point the verifier elsewhere
    pub fn with_verify_base_url(mut self, url: impl Into<String>) -> Self {
        self.verify_base_url = url.into();
        self
    }

    /// Builder method for tests to select the capture backend
    pub fn with_capture_mode(mut self, mode: CaptureMode) -> Self {
        self.capture_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.terminal_id(), "terminal-01");
        assert_eq!(config.operator_id(), None);
        assert_eq!(config.verify_timeout(), Duration::from_millis(5000));
        assert_eq!(config.cooldown(), Duration::from_millis(1000));
        assert_eq!(config.clear_after_success(), Duration::from_millis(1500));
        assert_eq!(config.clear_after_failure(), Duration::from_millis(2000));
        assert_eq!(config.cache_capacity(), 100);
        assert_eq!(config.feedback_dismiss(), Duration::from_millis(3000));
        assert_eq!(config.performance_window(), 100);
        assert_eq!(config.capture_mode(), CaptureMode::Linux);
        assert_eq!(config.rear_hints().len(), 4);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[scan]
cooldown_ms = 250

[camera]
backend = "simulated"
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.cooldown(), Duration::from_millis(250));
        assert_eq!(config.clear_after_success(), Duration::from_millis(1500));
        assert_eq!(config.capture_mode(), CaptureMode::Simulated);
        assert!(config.activate_on_start());
    }

    #[test]
    fn test_empty_strings_are_unset() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[terminal]
operator_id = ""

[verification]
bearer_token = ""
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.operator_id(), None);
        assert_eq!(config.verify_bearer_token(), None);
    }

    #[test]
    fn test_operator_override() {
        let config = Config::default().with_operator_override(Some(" op-9 ".to_string()));
        assert_eq!(config.operator_id(), Some("op-9"));

        let config = config.with_operator_override(Some("  ".to_string()));
        assert_eq!(config.operator_id(), Some("op-9"));

        let config = config.with_operator_override(None);
        assert_eq!(config.operator_id(), Some("op-9"));
    }

    #[test]
    fn test_zero_interval_clamped() {
        let toml_config: TomlConfig = toml::from_str("[metrics]\ninterval_secs = 0\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.metrics_interval_secs(), 1);
    }
}
