//! Operator feedback for completed scans
//!
//! Each outcome maps to one of four channels with its own tone and vibration
//! pattern. Sinks are best-effort: a failing sink is logged and skipped.

use crate::domain::types::{codes, ScanAction, ScanOutcome};
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::{smallvec, SmallVec};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Denial codes presented as warnings rather than errors
pub const SOFT_WARNING_CODES: [&str; 4] = [
    codes::PERSON_NOT_FOUND,
    codes::QR_EXPIRED,
    codes::QR_REQUIRES_REGENERATION,
    codes::MALFORMED_PAYLOAD,
];

pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackChannel {
    SuccessEntry,
    SuccessExit,
    Warning,
    Error,
}

impl FeedbackChannel {
    pub fn select(outcome: &ScanOutcome) -> Self {
        if outcome.success {
            return match outcome.action {
                ScanAction::Entry => FeedbackChannel::SuccessEntry,
                ScanAction::Exit => FeedbackChannel::SuccessExit,
            };
        }
        match outcome.error_code.as_deref() {
            Some(code) if SOFT_WARNING_CODES.contains(&code) => FeedbackChannel::Warning,
            _ => FeedbackChannel::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackChannel::SuccessEntry => "success_entry",
            FeedbackChannel::SuccessExit => "success_exit",
            FeedbackChannel::Warning => "warning",
            FeedbackChannel::Error => "error",
        }
    }

    pub fn tone(&self) -> Tone {
        match self {
            FeedbackChannel::SuccessEntry => Tone { frequency_hz: 880, duration_ms: 150, repeats: 1 },
            FeedbackChannel::SuccessExit => Tone { frequency_hz: 660, duration_ms: 150, repeats: 2 },
            FeedbackChannel::Warning => Tone { frequency_hz: 440, duration_ms: 250, repeats: 2 },
            FeedbackChannel::Error => Tone { frequency_hz: 220, duration_ms: 500, repeats: 1 },
        }
    }

    /// Vibration pattern in milliseconds, alternating on/off
    pub fn vibration(&self) -> SmallVec<[u32; 6]> {
        match self {
            FeedbackChannel::SuccessEntry => smallvec![100],
            FeedbackChannel::SuccessExit => smallvec![100, 50, 100],
            FeedbackChannel::Warning => smallvec![200, 100, 200],
            FeedbackChannel::Error => smallvec![400, 100, 400, 100, 400],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration_ms: u32,
    pub repeats: u8,
}

/// One presentation handed to the sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackCue {
    pub channel: FeedbackChannel,
    pub tone: Tone,
    pub vibration: SmallVec<[u32; 6]>,
    pub message: String,
    pub subject_name: Option<String>,
}

impl FeedbackCue {
    pub fn for_outcome(outcome: &ScanOutcome) -> Self {
        let channel = FeedbackChannel::select(outcome);
        Self {
            channel,
            tone: channel.tone(),
            vibration: channel.vibration(),
            message: outcome.message.clone(),
            subject_name: outcome.subject.as_ref().and_then(|s| s.name.clone()),
        }
    }
}

/// Audio/visual/haptic output device
pub trait FeedbackSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn present(&self, cue: &FeedbackCue) -> std::io::Result<()>;
    fn dismiss(&self) -> std::io::Result<()>;
}

/// Rings the terminal bell and logs the cue
pub struct TerminalSink {
    bell: bool,
}

impl TerminalSink {
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

impl FeedbackSink for TerminalSink {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn present(&self, cue: &FeedbackCue) -> std::io::Result<()> {
        info!(
            channel = cue.channel.as_str(),
            tone_hz = cue.tone.frequency_hz,
            message = %cue.message,
            subject = cue.subject_name.as_deref().unwrap_or(""),
            "feedback_presented"
        );
        if self.bell {
            let mut out = std::io::stdout().lock();
            for _ in 0..cue.tone.repeats {
                out.write_all(b"\x07")?;
            }
            out.flush()?;
        }
        Ok(())
    }

    fn dismiss(&self) -> std::io::Result<()> {
        debug!("feedback_dismissed");
        Ok(())
    }
}

struct Visible {
    generation: u64,
    cue: FeedbackCue,
}

/// Presents outcomes and auto-dismisses them
pub struct FeedbackEmitter {
    sinks: Vec<Arc<dyn FeedbackSink>>,
    dismiss_after: Duration,
    visible: Arc<Mutex<Option<Visible>>>,
    generation: u64,
    dismiss_task: Option<JoinHandle<()>>,
}

impl FeedbackEmitter {
    pub fn new(sinks: Vec<Arc<dyn FeedbackSink>>, dismiss_after: Duration) -> Self {
        Self {
            sinks,
            dismiss_after,
            visible: Arc::new(Mutex::new(None)),
            generation: 0,
            dismiss_task: None,
        }
    }

    /// Present an outcome, replacing whatever is on screen
    pub fn emit(&mut self, outcome: &ScanOutcome) -> FeedbackCue {
        self.cancel_timer();
        let cue = FeedbackCue::for_outcome(outcome);

        for sink in &self.sinks {
            if let Err(e) = sink.present(&cue) {
                debug!(sink = sink.name(), error = %e, "feedback_sink_failed");
            }
        }

        self.generation += 1;
        let generation = self.generation;
        *self.visible.lock() = Some(Visible { generation, cue: cue.clone() });

        let visible = self.visible.clone();
        let sinks = self.sinks.clone();
        let delay = self.dismiss_after;
        self.dismiss_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut guard = visible.lock();
            if guard.as_ref().is_some_and(|v| v.generation == generation) {
                *guard = None;
                drop(guard);
                dismiss_all(&sinks);
            }
        }));

        cue
    }

    /// Dismiss immediately and cancel the pending timer
    pub fn close(&mut self) {
        self.cancel_timer();
        if self.visible.lock().take().is_some() {
            dismiss_all(&self.sinks);
        }
    }

    /// Cue currently presented, if not yet dismissed
    pub fn current(&self) -> Option<FeedbackCue> {
        self.visible.lock().as_ref().map(|v| v.cue.clone())
    }

    fn cancel_timer(&mut self) {
        if let Some(task) = self.dismiss_task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedbackEmitter {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

fn dismiss_all(sinks: &[Arc<dyn FeedbackSink>]) {
    for sink in sinks {
        if let Err(e) = sink.dismiss() {
            debug!(sink = sink.name(), error = %e, "feedback_dismiss_failed");
        }
    }
}
