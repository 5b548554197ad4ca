//! Access terminal - scan-to-decision pipeline for an on-site access point
//!
//! Module structure:
//! - `domain/` - Core types (requests, outcomes, camera state, error taxonomy)
//! - `io/` - External interfaces (capture devices, verification, scan sources, status HTTP)
//! - `services/` - Pipeline stages (normalizer, throttle, cache, feedback, orchestrator)
//! - `infra/` - Infrastructure (Config, Metrics)

use access_terminal::infra::{CaptureMode, Config, Metrics};
use access_terminal::io::capture::{CaptureBackend, LinuxVideoBackend, SimulatedBackend, SimulatedDevice};
use access_terminal::io::{
    run_stdin_source, start_scan_listener, start_status_server, HttpVerifier, HttpVerifierSettings,
    ScanListenerConfig, VerificationClient,
};
use access_terminal::services::{
    CameraAcquisition, DuplicateThrottle, FeedbackEmitter, FeedbackSink, IdentityCache, OrchestratorHandle,
    PerformanceMonitor, ScanOrchestrator, TerminalSink, ThrottleWindows,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Access terminal - scan, verify, and record entry/exit decisions
#[derive(Parser, Debug)]
#[command(name = "access-terminal", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "CONFIG_FILE", default_value = "config/dev.toml")]
    config: String,
}

fn capture_backend(config: &Config) -> Arc<dyn CaptureBackend> {
    match config.capture_mode() {
        CaptureMode::Linux => Arc::new(LinuxVideoBackend::new(config.video_sys_root(), config.video_dev_root())),
        CaptureMode::Simulated => {
            Arc::new(SimulatedBackend::new(vec![SimulatedDevice::new("sim0", "Simulated Rear Camera")]))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug for per-scan detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "access-terminal starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    let capture_mode_str = match config.capture_mode() {
        CaptureMode::Linux => "linux",
        CaptureMode::Simulated => "simulated",
    };
    info!(
        config_file = %config.config_file(),
        terminal_id = %config.terminal_id(),
        operator_id = config.operator_id().unwrap_or("-"),
        verify_url = %format!("{}{}", config.verify_base_url(), config.verify_path()),
        verify_timeout_ms = config.verify_timeout().as_millis() as u64,
        capture_mode = %capture_mode_str,
        activate_on_start = config.activate_on_start(),
        cooldown_ms = config.cooldown().as_millis() as u64,
        cache_capacity = config.cache_capacity(),
        cache_ttl_s = config.cache_ttl().as_secs(),
        scan_listener_port = config.scan_listener_port(),
        status_port = config.status_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Camera
    let camera = Arc::new(CameraAcquisition::new(capture_backend(&config)).with_rear_hints(config.rear_hints()));
    let mut camera_rx = camera.subscribe();
    let camera_metrics = metrics.clone();
    tokio::spawn(async move {
        while camera_rx.changed().await.is_ok() {
            let state = camera_rx.borrow_and_update().state;
            camera_metrics.set_camera_state(state);
        }
    });

    // Verification collaborator
    let verifier = HttpVerifier::new(HttpVerifierSettings {
        base_url: config.verify_base_url().to_string(),
        path: config.verify_path().to_string(),
        timeout: config.verify_timeout(),
        bearer_token: config.verify_bearer_token().map(str::to_string),
        terminal_id: config.terminal_id().to_string(),
    })?;
    info!(url = %verifier.url(), "verifier_configured");

    let sinks: Vec<Arc<dyn FeedbackSink>> = vec![Arc::new(TerminalSink::new(config.feedback_bell()))];
    let orchestrator = ScanOrchestrator::new(
        camera,
        DuplicateThrottle::new(ThrottleWindows {
            cooldown: config.cooldown(),
            clear_after_success: config.clear_after_success(),
            clear_after_failure: config.clear_after_failure(),
        }),
        IdentityCache::new(config.cache_capacity(), config.cache_ttl()),
        VerificationClient::new(Arc::new(verifier)),
        FeedbackEmitter::new(sinks, config.feedback_dismiss()),
        PerformanceMonitor::new(config.performance_window(), config.operator_id().map(str::to_string)),
        metrics.clone(),
        Duration::from_secs(config.metrics_interval_secs()),
    );

    // Command channel (bounded; scan sources drop on full)
    let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity());
    let handle = OrchestratorHandle::new(cmd_tx);

    // Start TCP scan listener
    let listener_config = ScanListenerConfig {
        port: config.scan_listener_port(),
        enabled: config.scan_listener_enabled(),
    };
    let listener_handle = handle.clone();
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_scan_listener(listener_config, listener_handle, listener_metrics, listener_shutdown).await
        {
            tracing::error!(error = %e, "scan listener error");
        }
    });

    if config.stdin_enabled() {
        let stdin_handle = handle.clone();
        let stdin_metrics = metrics.clone();
        let stdin_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_stdin_source(stdin_handle, stdin_metrics, stdin_shutdown).await;
        });
    }

    // Start status / Prometheus HTTP server (if port > 0)
    let status_port = config.status_port();
    if status_port > 0 {
        let status_metrics = metrics.clone();
        let status_handle = handle.clone();
        let terminal_id = config.terminal_id().to_string();
        let status_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                start_status_server(status_port, status_metrics, terminal_id, status_handle, status_shutdown).await
            {
                tracing::error!(error = %e, "status server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    if config.activate_on_start() {
        let activate_handle = handle.clone();
        tokio::spawn(async move {
            if let Ok(camera) = activate_handle.activate().await {
                info!(state = camera.state.as_str(), device = camera.device_id.as_deref().unwrap_or("-"), "startup_camera_activation");
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run orchestrator - consumes commands until shutdown
    info!("orchestrator_starting");
    orchestrator.run(cmd_rx, shutdown_rx).await;
    drop(handle);

    info!("access-terminal shutdown complete");
    Ok(())
}
