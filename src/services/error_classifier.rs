//! Maps capture-device failures onto the terminal's error taxonomy
//!
//! Matching order:
//! 1. Structured identifier (`DeviceError::name`) against a fixed table
//! 2. Substring heuristics on the lowercased message, in priority order
//! 3. Anything else is `Unknown`

use crate::domain::error::{ClassifiedError, DeviceError, ErrorKind, Severity};

/// Structured identifiers, checked before any text heuristic
const NAME_TABLE: &[(&str, ErrorKind)] = &[
    ("NotAllowedError", ErrorKind::PermissionDenied),
    ("PermissionDeniedError", ErrorKind::PermissionDenied),
    ("SecurityError", ErrorKind::PermissionDenied),
    ("EACCES", ErrorKind::PermissionDenied),
    ("EPERM", ErrorKind::PermissionDenied),
    ("NotFoundError", ErrorKind::DeviceNotFound),
    ("DevicesNotFoundError", ErrorKind::DeviceNotFound),
    ("ENOENT", ErrorKind::DeviceNotFound),
    ("ENODEV", ErrorKind::DeviceNotFound),
    ("ENXIO", ErrorKind::DeviceNotFound),
    ("NotReadableError", ErrorKind::DeviceBusy),
    ("TrackStartError", ErrorKind::DeviceBusy),
    ("AbortError", ErrorKind::DeviceBusy),
    ("EBUSY", ErrorKind::DeviceBusy),
    ("OverconstrainedError", ErrorKind::UnsupportedConstraints),
    ("ConstraintNotSatisfiedError", ErrorKind::UnsupportedConstraints),
    ("EINVAL", ErrorKind::UnsupportedConstraints),
    ("TypeError", ErrorKind::BrowserUnsupported),
    ("NotSupportedError", ErrorKind::BrowserUnsupported),
];

/// Message fragments in priority order. The first group that matches wins.
const TEXT_HEURISTICS: &[(&[&str], ErrorKind)] = &[
    (&["permission", "denied", "not allowed"], ErrorKind::PermissionDenied),
    (&["not found", "no device", "no camera", "requested device"], ErrorKind::DeviceNotFound),
    (&["in use", "busy", "could not start", "not readable"], ErrorKind::DeviceBusy),
    (&["constraint", "resolution", "overconstrained"], ErrorKind::UnsupportedConstraints),
    (&["not supported", "unsupported", "getusermedia"], ErrorKind::BrowserUnsupported),
];

/// Classify a raw device failure
pub fn classify(raw: &DeviceError) -> ClassifiedError {
    let kind = kind_for(raw);
    describe(kind, raw.to_string())
}

/// Determine the taxonomy kind without building guidance text
pub fn kind_for(raw: &DeviceError) -> ErrorKind {
    if let Some(name) = raw.name.as_deref() {
        if let Some((_, kind)) = NAME_TABLE.iter().find(|(n, _)| *n == name) {
            return *kind;
        }
    }

    let text = raw.message.to_lowercase();
    TEXT_HEURISTICS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| text.contains(n)))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Build the operator-facing description for a kind
pub fn describe(kind: ErrorKind, detail: String) -> ClassifiedError {
    let (message, steps, severity): (&str, &[&str], Severity) = match kind {
        ErrorKind::PermissionDenied => (
            "Camera access was denied.",
            &[
                "Allow camera access for the terminal in the system settings.",
                "Check that the terminal user belongs to the video group.",
                "Retry camera activation.",
            ],
            Severity::Error,
        ),
        ErrorKind::DeviceNotFound => (
            "No camera was found.",
            &[
                "Check that the camera is connected.",
                "Reconnect the camera and retry activation.",
            ],
            Severity::Error,
        ),
        ErrorKind::DeviceBusy => (
            "The camera is in use by another application.",
            &[
                "Close other applications using the camera.",
                "Unplug and reconnect the camera.",
                "Retry camera activation.",
            ],
            Severity::Warning,
        ),
        ErrorKind::UnsupportedConstraints => (
            "The camera does not support the requested settings.",
            &["Retry activation; another device or mode will be tried."],
            Severity::Warning,
        ),
        ErrorKind::BrowserUnsupported => (
            "Camera capture is not supported on this terminal.",
            &["Reload the terminal on a supported platform."],
            Severity::Critical,
        ),
        // Pipeline kinds surface through outcome codes, not guidance
        ErrorKind::Unknown | ErrorKind::MalformedPayload | ErrorKind::NetworkError | ErrorKind::ApplicationDenied => (
            "An unexpected camera error occurred.",
            &["Retry camera activation.", "Restart the terminal if the problem persists."],
            Severity::Error,
        ),
    };

    ClassifiedError {
        kind,
        user_message: message.to_string(),
        recovery_steps: steps.iter().map(|s| s.to_string()).collect(),
        severity,
        recoverable: kind != ErrorKind::BrowserUnsupported,
        detail,
    }
}
