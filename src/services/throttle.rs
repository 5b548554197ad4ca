//! Duplicate and rapid-fire scan suppression
//!
//! State lives in an owned [`ScanSession`] that is moved into each step and
//! handed back, so the orchestrator is the only place that holds it.

use std::time::Duration;
use tokio::time::Instant;

/// Suppression windows
#[derive(Debug, Clone, Copy)]
pub struct ThrottleWindows {
    /// Identical payloads inside this window after acceptance are ignored
    pub cooldown: Duration,
    /// How long the last payload is remembered after a successful cycle
    pub clear_after_success: Duration,
    /// How long the last payload is remembered after a failed cycle
    pub clear_after_failure: Duration,
}

impl Default for ThrottleWindows {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(1000),
            clear_after_success: Duration::from_millis(1500),
            clear_after_failure: Duration::from_millis(2000),
        }
    }
}

/// Throttle state carried between scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSession {
    busy: bool,
    last_payload: Option<String>,
    last_accepted_at: Option<Instant>,
    payload_clear_at: Option<Instant>,
}

impl ScanSession {
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn last_payload(&self) -> Option<&str> {
        self.last_payload.as_deref()
    }
}

/// Decision for one raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// A verification cycle is already in flight
    Busy,
    /// Same payload inside the cooldown window
    Duplicate,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Accepted => "accepted",
            Admission::Busy => "busy",
            Admission::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateThrottle {
    windows: ThrottleWindows,
}

impl DuplicateThrottle {
    pub fn new(windows: ThrottleWindows) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &ThrottleWindows {
        &self.windows
    }

    /// Gate a raw payload. On acceptance the session becomes busy.
    pub fn admit(&self, mut session: ScanSession, raw: &str, now: Instant) -> (ScanSession, Admission) {
        if session.busy {
            return (session, Admission::Busy);
        }

        Self::expire_payload(&mut session, now);

        if let (Some(last), Some(accepted_at)) = (&session.last_payload, session.last_accepted_at) {
            if last == raw && now.saturating_duration_since(accepted_at) < self.windows.cooldown {
                return (session, Admission::Duplicate);
            }
        }

        session.busy = true;
        session.last_payload = Some(raw.to_string());
        session.last_accepted_at = Some(now);
        session.payload_clear_at = None;
        (session, Admission::Accepted)
    }

    /// Close the in-flight cycle and schedule the payload to be forgotten
    pub fn complete(&self, mut session: ScanSession, success: bool, now: Instant) -> ScanSession {
        session.busy = false;
        let hold = if success {
            self.windows.clear_after_success
        } else {
            self.windows.clear_after_failure
        };
        session.payload_clear_at = Some(now + hold);
        session
    }

    fn expire_payload(session: &mut ScanSession, now: Instant) {
        if session.payload_clear_at.is_some_and(|at| now >= at) {
            session.last_payload = None;
            session.payload_clear_at = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_accept_sets_busy() {
        let throttle = DuplicateThrottle::default();
        let now = Instant::now();

        let (session, admission) = throttle.admit(ScanSession::default(), "A", now);

        assert_eq!(admission, Admission::Accepted);
        assert!(session.is_busy());
        assert_eq!(session.last_payload(), Some("A"));
    }

    #[test]
    fn test_busy_rejects_any_payload() {
        let throttle = DuplicateThrottle::default();
        let now = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", now);
        let (session, admission) = throttle.admit(session, "B", now + ms(5000));

        assert_eq!(admission, Admission::Busy);
        assert_eq!(session.last_payload(), Some("A"));
    }

    #[test]
    fn test_duplicate_inside_cooldown() {
        let throttle = DuplicateThrottle::default();
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, true, t0 + ms(100));
        let (session, admission) = throttle.admit(session, "A", t0 + ms(900));

        assert_eq!(admission, Admission::Duplicate);
        assert!(!session.is_busy());
    }

    #[test]
    fn test_duplicate_after_cooldown_accepted() {
        let throttle = DuplicateThrottle::default();
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, true, t0 + ms(100));
        let (_, admission) = throttle.admit(session, "A", t0 + ms(1000));

        assert_eq!(admission, Admission::Accepted);
    }

    #[test]
    fn test_different_payload_inside_cooldown_accepted() {
        let throttle = DuplicateThrottle::default();
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, false, t0 + ms(50));
        let (session, admission) = throttle.admit(session, "B", t0 + ms(60));

        assert_eq!(admission, Admission::Accepted);
        assert_eq!(session.last_payload(), Some("B"));
    }

    #[test]
    fn test_payload_forgotten_after_success_window() {
        let throttle = DuplicateThrottle::new(ThrottleWindows {
            cooldown: ms(10_000),
            ..ThrottleWindows::default()
        });
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, true, t0);

        // Still remembered just before the clear deadline
        let (session, admission) = throttle.admit(session, "A", t0 + ms(1499));
        assert_eq!(admission, Admission::Duplicate);

        let (_, admission) = throttle.admit(session, "A", t0 + ms(1500));
        assert_eq!(admission, Admission::Accepted);
    }

    #[test]
    fn test_failure_window_is_longer() {
        let throttle = DuplicateThrottle::new(ThrottleWindows {
            cooldown: ms(10_000),
            ..ThrottleWindows::default()
        });
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, false, t0);

        let (session, admission) = throttle.admit(session, "A", t0 + ms(1500));
        assert_eq!(admission, Admission::Duplicate);

        let (session, admission) = throttle.admit(session, "A", t0 + ms(2000));
        assert_eq!(admission, Admission::Accepted);
        assert!(session.is_busy());
    }

    #[test]
    fn test_complete_clears_busy_immediately() {
        let throttle = DuplicateThrottle::default();
        let t0 = Instant::now();

        let (session, _) = throttle.admit(ScanSession::default(), "A", t0);
        let session = throttle.complete(session, true, t0 + ms(10));

        assert!(!session.is_busy());
        assert_eq!(session.last_payload(), Some("A"));
    }
}
