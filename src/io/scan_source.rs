//! Decoded-frame line sources
//!
//! An external frame decoder writes one decoded payload per line, either over
//! TCP or on stdin. Lines are forwarded with `try_send`; when the orchestrator
//! queue is full the line is dropped and counted.

use crate::infra::metrics::Metrics;
use crate::services::orchestrator::{HandleError, OrchestratorHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Longest accepted line; decoders never emit more than a few hundred bytes
const MAX_LINE_BYTES: usize = 4096;

#[derive(Debug, Clone)]
pub struct ScanListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for ScanListenerConfig {
    fn default() -> Self {
        Self { port: 25900, enabled: true }
    }
}

/// Start the TCP scan listener
pub async fn start_scan_listener(
    config: ScanListenerConfig,
    handle: OrchestratorHandle,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("scan_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "scan_listener_started");

    serve_scan_lines(listener, handle, metrics, shutdown).await;
    Ok(())
}

/// Accept connections on a bound listener until shutdown
pub async fn serve_scan_lines(
    listener: TcpListener,
    handle: OrchestratorHandle,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scan_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let handle = handle.clone();
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, handle, metrics).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "scan_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    handle: OrchestratorHandle,
    metrics: Arc<Metrics>,
) {
    let peer = addr.to_string();
    debug!(peer = %peer, "scan_connection_accepted");
    forward_lines(BufReader::new(socket), &peer, &handle, &metrics).await;
    debug!(peer = %peer, "scan_connection_closed");
}

/// Read scan lines from stdin until EOF or shutdown
pub async fn run_stdin_source(handle: OrchestratorHandle, metrics: Arc<Metrics>, mut shutdown: watch::Receiver<bool>) {
    info!("stdin_scan_source_started");
    let reader = BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = forward_lines(reader, "stdin", &handle, &metrics) => {
            info!("stdin_scan_source_eof");
        }
        _ = shutdown.changed() => {
            info!("stdin_scan_source_shutdown");
        }
    }
}

/// Forward every non-empty line; returns when the reader ends or the
/// orchestrator is gone
pub async fn forward_lines<R>(reader: R, source: &str, handle: &OrchestratorHandle, metrics: &Metrics)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(source = %source, error = %e, "scan_line_read_failed");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.len() > MAX_LINE_BYTES {
            warn!(source = %source, len = line.len(), "scan_line_too_long");
            continue;
        }

        debug!(source = %source, len = line.len(), "scan_line_received");
        match handle.try_submit(line) {
            Ok(()) => {}
            Err(HandleError::Full) => {
                metrics.record_scan_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(source = %source, "scan_line_dropped: queue full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(HandleError::Closed) => {
                warn!(source = %source, "scan_queue_closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::orchestrator::Command;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    fn scan_payload(cmd: Command) -> String {
        match cmd {
            Command::Scan { raw, .. } => raw,
            _ => panic!("expected scan command"),
        }
    }

    #[tokio::test]
    async fn test_forward_trims_and_skips_blank() {
        let (tx, mut rx) = mpsc::channel(8);
        let handle = OrchestratorHandle::new(tx);
        let metrics = Metrics::new();

        let input: &[u8] = b"  JUAN PEREZ 1029384756  \r\n\n{\"id\":\"55\"}\n";
        forward_lines(input, "test", &handle, &metrics).await;

        assert_eq!(scan_payload(rx.recv().await.unwrap()), "JUAN PEREZ 1029384756");
        assert_eq!(scan_payload(rx.recv().await.unwrap()), "{\"id\":\"55\"}");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = OrchestratorHandle::new(tx);
        let metrics = Metrics::new();

        let input: &[u8] = b"111111\n222222\n333333\n";
        forward_lines(input, "test", &handle, &metrics).await;

        assert_eq!(metrics.scans_dropped(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_stops_reading() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let handle = OrchestratorHandle::new(tx);
        let metrics = Metrics::new();

        let input: &[u8] = b"111111\n222222\n";
        forward_lines(input, "test", &handle, &metrics).await;
        assert_eq!(metrics.scans_dropped(), 0);
    }

    #[tokio::test]
    async fn test_oversized_line_skipped() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = OrchestratorHandle::new(tx);
        let metrics = Metrics::new();

        let mut input = "9".repeat(MAX_LINE_BYTES + 1).into_bytes();
        input.extend_from_slice(b"\n123456\n");
        forward_lines(input.as_slice(), "test", &handle, &metrics).await;

        assert_eq!(scan_payload(rx.recv().await.unwrap()), "123456");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_tcp_listener_forwards_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_scan_lines(
            listener,
            OrchestratorHandle::new(tx),
            Arc::new(Metrics::new()),
            shutdown_rx,
        ));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ANA RUIZ 52345678 INSTRUCTOR\n").await.unwrap();

        assert_eq!(scan_payload(rx.recv().await.unwrap()), "ANA RUIZ 52345678 INSTRUCTOR");

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
