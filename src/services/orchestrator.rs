//! Scan-to-decision control loop
//!
//! One task owns the throttle session, the identity cache, the feedback
//! emitter, the performance monitor and the outcome history. Everything else
//! talks to it through [`OrchestratorHandle`].
//!
//! Per scan: throttle gate -> normalize -> cache lookup -> verification ->
//! cache update, feedback and statistics. At most one verification is in
//! flight; the loop keeps receiving commands while it runs, so scans arriving
//! in the meantime see the session busy and are dropped.

use crate::domain::types::{codes, CameraSnapshot, NormalizedIdentityRequest, PerformanceSample, ScanOutcome, Subject};
use crate::infra::metrics::Metrics;
use crate::io::verification::VerificationClient;
use crate::services::cache::{CacheStats, CachedIdentity, IdentityCache};
use crate::services::camera::CameraAcquisition;
use crate::services::feedback::{FeedbackCue, FeedbackEmitter};
use crate::services::normalizer::PayloadNormalizer;
use crate::services::performance::{PerformanceMonitor, PerformanceReport};
use crate::services::throttle::{Admission, DuplicateThrottle, ScanSession};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const RECENT_OUTCOMES: usize = 10;

/// What happened to one submitted payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScanDisposition {
    /// Silently ignored by the throttle
    Throttled { reason: &'static str },
    /// Rejected before any network call
    Malformed { outcome: ScanOutcome },
    Completed { outcome: ScanOutcome },
}

impl ScanDisposition {
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        match self {
            ScanDisposition::Throttled { .. } => None,
            ScanDisposition::Malformed { outcome } | ScanDisposition::Completed { outcome } => Some(outcome),
        }
    }
}

/// Everything an observer may read about the terminal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSnapshot {
    pub camera: CameraSnapshot,
    pub busy: bool,
    pub last_outcome: Option<ScanOutcome>,
    pub recent_outcomes: Vec<ScanOutcome>,
    pub performance: PerformanceReport,
    pub cache: CacheStats,
    pub feedback: Option<FeedbackCue>,
}

pub enum Command {
    Scan { raw: String, reply: Option<oneshot::Sender<ScanDisposition>> },
    Activate { reply: Option<oneshot::Sender<CameraSnapshot>> },
    Deactivate,
    CloseFeedback,
    Snapshot { reply: oneshot::Sender<TerminalSnapshot> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("orchestrator stopped")]
    Closed,
    #[error("orchestrator queue full")]
    Full,
}

/// Cloneable front door to the orchestrator task
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
}

impl OrchestratorHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    /// Submit a payload and wait for its disposition
    pub async fn scan(&self, raw: impl Into<String>) -> Result<ScanDisposition, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Scan { raw: raw.into(), reply: Some(reply) }).await?;
        rx.await.map_err(|_| HandleError::Closed)
    }

    /// Fire-and-forget submit; never waits for queue space
    pub fn try_submit(&self, raw: impl Into<String>) -> Result<(), HandleError> {
        self.tx.try_send(Command::Scan { raw: raw.into(), reply: None }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandleError::Full,
            mpsc::error::TrySendError::Closed(_) => HandleError::Closed,
        })
    }

    /// Request activation and wait until it settles
    pub async fn activate(&self) -> Result<CameraSnapshot, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Activate { reply: Some(reply) }).await?;
        rx.await.map_err(|_| HandleError::Closed)
    }

    pub async fn deactivate(&self) -> Result<(), HandleError> {
        self.send(Command::Deactivate).await
    }

    pub async fn close_feedback(&self) -> Result<(), HandleError> {
        self.send(Command::CloseFeedback).await
    }

    pub async fn snapshot(&self) -> Result<TerminalSnapshot, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| HandleError::Closed)
    }

    async fn send(&self, cmd: Command) -> Result<(), HandleError> {
        self.tx.send(cmd).await.map_err(|_| HandleError::Closed)
    }
}

/// An accepted scan waiting for its verification answer
pub struct PendingVerification {
    pub request: NormalizedIdentityRequest,
    cached: Option<CachedIdentity>,
    started: Instant,
}

type VerifyFuture = Pin<Box<dyn Future<Output = ScanOutcome> + Send>>;

struct InFlight {
    pending: PendingVerification,
    future: VerifyFuture,
    reply: Option<oneshot::Sender<ScanDisposition>>,
}

pub struct ScanOrchestrator {
    camera: Arc<CameraAcquisition>,
    normalizer: PayloadNormalizer,
    throttle: DuplicateThrottle,
    session: ScanSession,
    cache: IdentityCache,
    verifier: VerificationClient,
    feedback: FeedbackEmitter,
    performance: PerformanceMonitor,
    recent: VecDeque<ScanOutcome>,
    metrics: Arc<Metrics>,
    report_interval: Duration,
}

impl ScanOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: Arc<CameraAcquisition>,
        throttle: DuplicateThrottle,
        cache: IdentityCache,
        verifier: VerificationClient,
        feedback: FeedbackEmitter,
        performance: PerformanceMonitor,
        metrics: Arc<Metrics>,
        report_interval: Duration,
    ) -> Self {
        Self {
            camera,
            normalizer: PayloadNormalizer::new(),
            throttle,
            session: ScanSession::default(),
            cache,
            verifier,
            feedback,
            performance,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
            metrics,
            report_interval,
        }
    }

    pub fn camera(&self) -> &Arc<CameraAcquisition> {
        &self.camera
    }

    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    pub fn last_outcome(&self) -> Option<&ScanOutcome> {
        self.recent.back()
    }

    pub fn recent_outcomes(&self) -> impl Iterator<Item = &ScanOutcome> {
        self.recent.iter()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        self.performance.report(Instant::now())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn close_feedback(&mut self) {
        self.feedback.close();
    }

    pub fn snapshot(&self) -> TerminalSnapshot {
        TerminalSnapshot {
            camera: self.camera.snapshot(),
            busy: self.session.is_busy(),
            last_outcome: self.recent.back().cloned(),
            recent_outcomes: self.recent.iter().cloned().collect(),
            performance: self.performance_report(),
            cache: self.cache.stats(),
            feedback: self.feedback.current(),
        }
    }

    /// Gate, normalize and look up a payload. `Err` carries a disposition that
    /// needs no network call.
    pub fn begin_scan(&mut self, raw: &str) -> Result<PendingVerification, ScanDisposition> {
        self.metrics.record_scan_received();
        let started = Instant::now();

        let (session, admission) = self.throttle.admit(std::mem::take(&mut self.session), raw, started);
        self.session = session;

        match admission {
            Admission::Accepted => {}
            Admission::Busy => {
                self.metrics.record_throttled_busy();
                debug!("scan_throttled_busy");
                return Err(ScanDisposition::Throttled { reason: admission.as_str() });
            }
            Admission::Duplicate => {
                self.metrics.record_throttled_duplicate();
                debug!("scan_throttled_duplicate");
                return Err(ScanDisposition::Throttled { reason: admission.as_str() });
            }
        }

        let request = match self.normalizer.normalize(raw) {
            Ok(request) => request,
            Err(e) => {
                self.metrics.record_malformed();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                let outcome = ScanOutcome::failure(codes::MALFORMED_PAYLOAD, e.to_string(), elapsed_ms);
                info!(scan_id = %outcome.scan_id, error = %e, "scan_malformed");

                self.session = self.throttle.complete(std::mem::take(&mut self.session), false, Instant::now());
                self.feedback.emit(&outcome);
                return Err(ScanDisposition::Malformed { outcome });
            }
        };

        let cached = self.cache.get(&request.document_id, started);
        self.metrics.record_cache_lookup(cached.is_some());

        info!(
            document_id = %request.document_id,
            subject_type = %request.subject_type,
            cache_hit = cached.is_some(),
            "scan_accepted"
        );

        Ok(PendingVerification { request, cached, started })
    }

    /// Build the verification future for an accepted scan
    fn verification(&self, request: NormalizedIdentityRequest) -> VerifyFuture {
        let client = self.verifier.clone();
        Box::pin(async move { client.verify(&request).await })
    }

    /// Apply a verification answer: cache, throttle, feedback, statistics
    pub fn complete_scan(&mut self, pending: PendingVerification, mut outcome: ScanOutcome) -> ScanOutcome {
        let now = Instant::now();
        outcome.processing_time_ms = now.saturating_duration_since(pending.started).as_millis() as u64;

        let answered = outcome.is_answered();

        if outcome.success {
            let resolved = outcome.subject.clone().unwrap_or_else(|| Subject {
                document_id: Some(pending.request.document_id.clone()),
                ..Default::default()
            });
            self.cache.set(&pending.request.document_id, resolved, now);
        } else if !answered {
            // Degraded mode: show who it probably was, never grant
            if let Some(cached) = pending.cached {
                outcome.subject = Some(cached.resolved);
                outcome.cached = true;
                self.metrics.record_degraded_outcome();
                warn!(document_id = %pending.request.document_id, "scan_degraded_cached_display");
            }
        }

        self.metrics.record_verification(outcome.processing_time_ms, answered, outcome.success);
        self.session = self.throttle.complete(std::mem::take(&mut self.session), outcome.success, now);
        self.feedback.emit(&outcome);
        self.performance.record(PerformanceSample {
            duration_ms: outcome.processing_time_ms,
            success: outcome.success,
        });

        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome.clone());

        info!(
            scan_id = %outcome.scan_id,
            success = outcome.success,
            action = %outcome.action,
            error_code = outcome.error_code.as_deref().unwrap_or(""),
            error_kind = outcome.error_kind().map(|k| k.code()).unwrap_or(""),
            cached = outcome.cached,
            processing_ms = outcome.processing_time_ms,
            "scan_completed"
        );
        outcome
    }

    /// Run one scan end to end
    pub async fn submit_scan(&mut self, raw: &str) -> ScanDisposition {
        let pending = match self.begin_scan(raw) {
            Ok(pending) => pending,
            Err(disposition) => return disposition,
        };
        let outcome = self.verification(pending.request.clone()).await;
        ScanDisposition::Completed { outcome: self.complete_scan(pending, outcome) }
    }

    /// Command loop; returns when the channel closes or shutdown is signalled
    pub async fn run(mut self, mut rx: mpsc::Receiver<Command>, mut shutdown: watch::Receiver<bool>) {
        let mut in_flight: Option<InFlight> = None;
        let mut report_timer = tokio::time::interval(self.report_interval.max(Duration::from_secs(1)));
        report_timer.tick().await;

        info!(report_interval_s = self.report_interval.as_secs(), "orchestrator_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("orchestrator_shutdown");
                    break;
                }
                outcome = wait_verification(&mut in_flight) => {
                    if let Some(flight) = in_flight.take() {
                        let outcome = self.complete_scan(flight.pending, outcome);
                        if let Some(reply) = flight.reply {
                            let _ = reply.send(ScanDisposition::Completed { outcome });
                        }
                    }
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else {
                        info!("orchestrator_channel_closed");
                        break;
                    };
                    self.handle_command(cmd, &mut in_flight);
                }
                _ = report_timer.tick() => {
                    self.performance_report().log();
                }
            }
        }

        self.feedback.close();
        self.camera.deactivate();
    }

    fn handle_command(&mut self, cmd: Command, in_flight: &mut Option<InFlight>) {
        match cmd {
            Command::Scan { raw, reply } => match self.begin_scan(&raw) {
                Ok(pending) => {
                    let future = self.verification(pending.request.clone());
                    *in_flight = Some(InFlight { pending, future, reply });
                }
                Err(disposition) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(disposition);
                    }
                }
            },
            Command::Activate { reply } => {
                // Activation may sit on a permission prompt; keep the loop free
                let camera = self.camera.clone();
                let metrics = self.metrics.clone();
                tokio::spawn(async move {
                    let result = camera.activate().await;
                    metrics.record_camera_activation(result.is_ok());
                    if let Some(reply) = reply {
                        let _ = reply.send(camera.snapshot());
                    }
                });
            }
            Command::Deactivate => self.camera.deactivate(),
            Command::CloseFeedback => self.feedback.close(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }
}

async fn wait_verification(in_flight: &mut Option<InFlight>) -> ScanOutcome {
    match in_flight.as_mut() {
        Some(flight) => (&mut flight.future).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::VerifyError;
    use crate::domain::types::{CameraState, ScanAction, VerificationResponse};
    use crate::io::capture::{SimulatedBackend, SimulatedDevice};
    use crate::io::verification::AccessVerifier;
    use crate::services::feedback::{FeedbackChannel, DEFAULT_DISMISS_AFTER};
    use crate::services::performance::DEFAULT_WINDOW;
    use crate::services::throttle::ThrottleWindows;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted verifier: answers per call from a queue, records requests
    struct ScriptedVerifier {
        answers: Mutex<VecDeque<Result<VerificationResponse, VerifyError>>>,
        calls: Mutex<Vec<NormalizedIdentityRequest>>,
        delay: Duration,
    }

    impl ScriptedVerifier {
        fn new(answers: Vec<Result<VerificationResponse, VerifyError>>) -> Arc<Self> {
            Self::delayed(answers, Duration::ZERO)
        }

        fn delayed(answers: Vec<Result<VerificationResponse, VerifyError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl AccessVerifier for ScriptedVerifier {
        async fn verify(&self, request: &NormalizedIdentityRequest) -> Result<VerificationResponse, VerifyError> {
            self.calls.lock().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.answers.lock().pop_front();
            next.unwrap_or_else(|| Err(VerifyError::Network("no scripted answer".into())))
        }
    }

    fn granted(name: &str) -> Result<VerificationResponse, VerifyError> {
        Ok(VerificationResponse {
            success: true,
            subject: Some(Subject { name: Some(name.to_string()), ..Default::default() }),
            action: ScanAction::Entry,
            message: "Entrada registrada".to_string(),
            error_code: None,
        })
    }

    fn denied(code: &str) -> Result<VerificationResponse, VerifyError> {
        Ok(VerificationResponse {
            success: false,
            subject: None,
            action: ScanAction::Entry,
            message: "Denegado".to_string(),
            error_code: Some(code.to_string()),
        })
    }

    fn orchestrator(verifier: Arc<ScriptedVerifier>) -> ScanOrchestrator {
        let backend = Arc::new(SimulatedBackend::new(vec![SimulatedDevice::new("cam0", "Back Camera")]));
        ScanOrchestrator::new(
            Arc::new(CameraAcquisition::new(backend)),
            DuplicateThrottle::new(ThrottleWindows::default()),
            IdentityCache::new(4, Duration::from_secs(300)),
            VerificationClient::new(verifier),
            FeedbackEmitter::new(Vec::new(), DEFAULT_DISMISS_AFTER),
            PerformanceMonitor::new(DEFAULT_WINDOW, Some("op-1".to_string())),
            Arc::new(Metrics::new()),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_granted_scan_updates_everything() {
        let verifier = ScriptedVerifier::new(vec![granted("Juan")]);
        let mut orch = orchestrator(verifier.clone());

        let disposition = orch.submit_scan("JUAN PEREZ 1029384756 APRENDIZ").await;

        let outcome = disposition.outcome().unwrap();
        assert!(outcome.success);
        assert!(!outcome.cached);
        assert_eq!(verifier.call_count(), 1);
        assert_eq!(verifier.calls.lock()[0].document_id, "1029384756");
        assert!(!orch.is_busy());
        assert_eq!(orch.cache_stats().size, 1);
        assert_eq!(orch.performance_report().total_scans, 1);
        assert_eq!(orch.last_outcome().map(|o| o.scan_id), Some(outcome.scan_id));
        assert_eq!(orch.feedback.current().map(|c| c.channel), Some(FeedbackChannel::SuccessEntry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_payload_within_cooldown_skips_call() {
        let verifier = ScriptedVerifier::new(vec![granted("Juan"), granted("Juan")]);
        let mut orch = orchestrator(verifier.clone());

        orch.submit_scan("1029384756").await;
        tokio::time::advance(Duration::from_millis(500)).await;
        let second = orch.submit_scan("1029384756").await;

        assert_eq!(second, ScanDisposition::Throttled { reason: "duplicate" });
        assert_eq!(verifier.call_count(), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        let third = orch.submit_scan("1029384756").await;
        assert!(matches!(third, ScanDisposition::Completed { .. }));
        assert_eq!(verifier.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_makes_no_call() {
        let verifier = ScriptedVerifier::new(vec![]);
        let mut orch = orchestrator(verifier.clone());

        let disposition = orch.submit_scan("??").await;

        let ScanDisposition::Malformed { outcome } = disposition else {
            panic!("expected malformed disposition");
        };
        assert!(outcome.has_code(codes::MALFORMED_PAYLOAD));
        assert_eq!(verifier.call_count(), 0);
        assert!(!orch.is_busy());
        assert_eq!(orch.performance_report().total_scans, 0);
        assert_eq!(orch.feedback.current().map(|c| c.channel), Some(FeedbackChannel::Warning));
    }

    #[tokio::test]
    async fn test_timeout_produces_network_error_outcome() {
        let verifier = ScriptedVerifier::new(vec![Err(VerifyError::Timeout(5000))]);
        let mut orch = orchestrator(verifier);

        let disposition = orch.submit_scan("1029384756").await;

        let outcome = disposition.outcome().unwrap();
        assert!(!outcome.success);
        assert!(outcome.has_code(codes::NETWORK_ERROR));
        assert_eq!(orch.feedback.current().map(|c| c.channel), Some(FeedbackChannel::Error));

        let samples: Vec<_> = orch.performance.samples().copied().collect();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_mode_never_grants() {
        let verifier = ScriptedVerifier::new(vec![granted("Juan"), Err(VerifyError::Network("refused".into()))]);
        let mut orch = orchestrator(verifier);

        orch.submit_scan("1029384756").await;
        tokio::time::advance(Duration::from_secs(3)).await;
        let disposition = orch.submit_scan("1029384756").await;

        let outcome = disposition.outcome().unwrap();
        assert!(!outcome.success);
        assert!(outcome.cached);
        assert_eq!(outcome.subject.as_ref().and_then(|s| s.name.as_deref()), Some("Juan"));
        assert!(outcome.has_code(codes::NETWORK_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_denial_does_not_use_cache() {
        let verifier = ScriptedVerifier::new(vec![granted("Juan"), denied(codes::QR_EXPIRED)]);
        let mut orch = orchestrator(verifier);

        orch.submit_scan("1029384756").await;
        tokio::time::advance(Duration::from_secs(3)).await;
        let disposition = orch.submit_scan("1029384756").await;

        let outcome = disposition.outcome().unwrap();
        assert!(!outcome.cached);
        assert_eq!(outcome.subject, None);
        assert_eq!(orch.feedback.current().map(|c| c.channel), Some(FeedbackChannel::Warning));
    }

    #[tokio::test]
    async fn test_denial_without_code_counts_as_answered() {
        let answer = Ok(VerificationResponse {
            success: false,
            subject: None,
            action: ScanAction::Entry,
            message: "Acceso denegado".to_string(),
            error_code: None,
        });
        let mut orch = orchestrator(ScriptedVerifier::new(vec![answer]));

        let disposition = orch.submit_scan("1029384756").await;

        let outcome = disposition.outcome().unwrap();
        assert!(outcome.has_code(codes::APPLICATION_DENIED));
        assert!(!outcome.cached);
        let summary = orch.metrics.report();
        assert_eq!(summary.verifications_denied, 1);
        assert_eq!(summary.verifications_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_history_bounded() {
        let answers = (0..12).map(|_| denied(codes::PERSON_NOT_FOUND)).collect();
        let mut orch = orchestrator(ScriptedVerifier::new(answers));

        for i in 0..12 {
            orch.submit_scan(&format!("{}", 100000 + i)).await;
        }

        assert_eq!(orch.recent_outcomes().count(), RECENT_OUTCOMES);
        assert_eq!(orch.performance_report().total_scans, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_drops_scans_while_busy() {
        let verifier = ScriptedVerifier::delayed(vec![granted("Juan"), granted("Ana")], Duration::from_millis(200));
        let orch = orchestrator(verifier.clone());
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = OrchestratorHandle::new(tx);
        tokio::spawn(orch.run(rx, shutdown_rx));

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.scan("1029384756").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = handle.scan("52345678").await.unwrap();
        assert_eq!(second, ScanDisposition::Throttled { reason: "busy" });

        let first = first.await.unwrap().unwrap();
        assert!(first.outcome().unwrap().success);
        assert_eq!(verifier.call_count(), 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.recent_outcomes.len(), 1);
        assert_eq!(snapshot.performance.operator_id.as_deref(), Some("op-1"));
    }

    #[tokio::test]
    async fn test_loop_camera_commands() {
        let orch = orchestrator(ScriptedVerifier::new(vec![]));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = OrchestratorHandle::new(tx);
        let task = tokio::spawn(orch.run(rx, shutdown_rx));

        let camera = handle.activate().await.unwrap();
        assert_eq!(camera.state, CameraState::Ready);
        assert_eq!(camera.device_id.as_deref(), Some("cam0"));

        handle.deactivate().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.camera.state, CameraState::Idle);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap_err(), HandleError::Closed);
    }
}
