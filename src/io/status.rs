//! Status, control and Prometheus HTTP endpoint
//!
//! Routes:
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text format
//! - `GET /status` - JSON terminal snapshot
//! - `POST /camera/activate`, `POST /camera/deactivate`
//! - `POST /scan` - raw payload body, answers with the scan disposition
//! - `POST /feedback/close`

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::orchestrator::{HandleError, OrchestratorHandle};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

const MAX_SCAN_BODY_BYTES: usize = 8 * 1024;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with terminal label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, terminal: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{terminal=\"{terminal}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    terminal: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{terminal=\"{terminal}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{terminal=\"{terminal}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{terminal=\"{terminal}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{terminal=\"{terminal}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, terminal: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_scan_metrics(&mut output, terminal, &summary);
    write_verification_metrics(&mut output, terminal, &summary);
    write_camera_metrics(&mut output, terminal, &summary);

    output
}

fn write_scan_metrics(output: &mut String, terminal: &str, summary: &MetricsSummary) {
    let counters = [
        ("terminal_scans_total", "Raw scan payloads received", summary.scans_received),
        ("terminal_scans_throttled_busy_total", "Scans ignored while a verification was in flight", summary.scans_throttled_busy),
        ("terminal_scans_throttled_duplicate_total", "Scans ignored as repeats inside the cooldown", summary.scans_throttled_duplicate),
        ("terminal_scans_malformed_total", "Scans rejected by payload normalization", summary.scans_malformed),
        ("terminal_scans_dropped_total", "Scan lines dropped because the queue was full", summary.scans_dropped),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, terminal, val);
    }
    let _ = writeln!(output, "# HELP terminal_scans_per_min Scans received per minute");
    let _ = writeln!(output, "# TYPE terminal_scans_per_min gauge");
    let _ = writeln!(output, "terminal_scans_per_min{{terminal=\"{terminal}\"}} {:.2}", summary.scans_per_min);
}

fn write_verification_metrics(output: &mut String, terminal: &str, summary: &MetricsSummary) {
    let counters = [
        ("terminal_verifications_total", "Verification calls completed", summary.verifications_total),
        ("terminal_verifications_granted_total", "Verifications that granted access", summary.verifications_granted),
        ("terminal_verifications_denied_total", "Verifications denied by the collaborator", summary.verifications_denied),
        ("terminal_verifications_failed_total", "Verifications without a usable answer", summary.verifications_failed),
        ("terminal_cache_hits_total", "Identity cache hits", summary.cache_hits),
        ("terminal_cache_misses_total", "Identity cache misses", summary.cache_misses),
        ("terminal_degraded_outcomes_total", "Failed verifications shown with cached identity", summary.degraded_outcomes),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, terminal, val);
    }

    write_histogram(
        output,
        "terminal_verification_latency_ms",
        "Scan cycle latency in milliseconds",
        terminal,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.lat_sum_ms,
    );
    write_metric(
        output,
        "terminal_verification_latency_p99_ms",
        "99th percentile scan cycle latency",
        MetricType::Gauge,
        terminal,
        summary.lat_p99_ms,
    );
    write_metric(
        output,
        "terminal_verification_latency_max_ms",
        "Maximum scan cycle latency",
        MetricType::Gauge,
        terminal,
        summary.lat_max_ms,
    );
}

fn write_camera_metrics(output: &mut String, terminal: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "terminal_camera_state",
        "Camera state (0=idle, 1=checking, 2=ready, 3=error)",
        MetricType::Gauge,
        terminal,
        summary.camera_state,
    );
    write_metric(
        output,
        "terminal_camera_activations_total",
        "Successful camera activations",
        MetricType::Counter,
        terminal,
        summary.camera_activations,
    );
    write_metric(
        output,
        "terminal_camera_failures_total",
        "Failed camera activations",
        MetricType::Counter,
        terminal,
        summary.camera_failures,
    );
}

struct StatusState {
    metrics: Arc<Metrics>,
    terminal_id: String,
    handle: OrchestratorHandle,
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "status_json_encode_failed");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode failed")
        }
    }
}

fn unavailable(e: HandleError) -> Response<Full<Bytes>> {
    warn!(error = %e, "status_orchestrator_unavailable");
    json_response(StatusCode::SERVICE_UNAVAILABLE, &serde_json::json!({ "ok": false, "error": e.to_string() }))
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<StatusState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = match (&method, path.as_str()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.metrics, &state.terminal_id);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail")
        }
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/status") => match state.handle.snapshot().await {
            Ok(snapshot) => json_response(StatusCode::OK, &snapshot),
            Err(e) => unavailable(e),
        },
        (&Method::POST, "/camera/activate") => match state.handle.activate().await {
            Ok(camera) => {
                info!(state = camera.state.as_str(), "manual_camera_activate");
                json_response(StatusCode::OK, &camera)
            }
            Err(e) => unavailable(e),
        },
        (&Method::POST, "/camera/deactivate") => match state.handle.deactivate().await {
            Ok(()) => {
                info!("manual_camera_deactivate");
                json_response(StatusCode::OK, &serde_json::json!({ "ok": true }))
            }
            Err(e) => unavailable(e),
        },
        (&Method::POST, "/feedback/close") => match state.handle.close_feedback().await {
            Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "ok": true })),
            Err(e) => unavailable(e),
        },
        (&Method::POST, "/scan") => {
            let body = match Limited::new(req.into_body(), MAX_SCAN_BODY_BYTES).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => return Ok(text_response(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")),
            };
            let raw = String::from_utf8_lossy(&body).trim().to_string();
            if raw.is_empty() {
                text_response(StatusCode::BAD_REQUEST, "empty payload")
            } else {
                match state.handle.scan(raw).await {
                    Ok(disposition) => json_response(StatusCode::OK, &disposition),
                    Err(e) => unavailable(e),
                }
            }
        }
        // CORS preflight for control routes
        (&Method::OPTIONS, _) => Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Start the status HTTP server
pub async fn start_status_server(
    port: u16,
    metrics: Arc<Metrics>,
    terminal_id: String,
    handle: OrchestratorHandle,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, terminal = %terminal_id, "status_server_started");

    serve_status(listener, metrics, terminal_id, handle, shutdown).await;
    Ok(())
}

/// Serve on a bound listener until shutdown
pub async fn serve_status(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    terminal_id: String,
    handle: OrchestratorHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let state = Arc::new(StatusState { metrics, terminal_id, handle });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "status_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "status_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("status_server_shutdown");
                    return;
                }
            }
        }
    }
}
