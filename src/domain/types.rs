//! Shared types for the access terminal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::domain::error::{ClassifiedError, ErrorKind};

/// Well-known outcome error codes
///
/// The first three are emitted by the verification collaborator; the rest are
/// produced locally by the terminal.
pub mod codes {
    use crate::domain::error::ErrorKind;

    pub const QR_REQUIRES_REGENERATION: &str = "QR_REQUIRES_REGENERATION";
    pub const PERSON_NOT_FOUND: &str = "PERSON_NOT_FOUND";
    pub const QR_EXPIRED: &str = "QR_EXPIRED";
    /// Denial that arrived without a code of its own
    pub const APPLICATION_DENIED: &str = ErrorKind::ApplicationDenied.code();
    pub const NETWORK_ERROR: &str = ErrorKind::NetworkError.code();
    pub const INVALID_RESPONSE: &str = "INVALID_RESPONSE";
    pub const MALFORMED_PAYLOAD: &str = ErrorKind::MalformedPayload.code();
}

/// Kind of bearer presenting a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Person,
    Visitor,
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectType::Person => write!(f, "person"),
            SubjectType::Visitor => write!(f, "visitor"),
        }
    }
}

/// Role keyword a bearer declares on a printed card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredRole {
    Aprendiz,
    Instructor,
    Administrativo,
    Admin,
}

impl DeclaredRole {
    /// Keywords in detection order. `administrativo` precedes `admin`
    /// because the latter is a prefix of the former.
    pub const KEYWORDS: [(&'static str, DeclaredRole); 4] = [
        ("aprendiz", DeclaredRole::Aprendiz),
        ("instructor", DeclaredRole::Instructor),
        ("administrativo", DeclaredRole::Administrativo),
        ("admin", DeclaredRole::Admin),
    ];

    /// Exact (case-insensitive) keyword match
    pub fn from_keyword(word: &str) -> Option<Self> {
        let word = word.trim().to_lowercase();
        Self::KEYWORDS.iter().find(|(kw, _)| *kw == word).map(|(_, role)| *role)
    }

    /// First keyword found anywhere in `text` (case-insensitive)
    pub fn detect_in(text: &str) -> Option<Self> {
        let lower = text.to_lowercase();
        Self::KEYWORDS.iter().find(|(kw, _)| lower.contains(kw)).map(|(_, role)| *role)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredRole::Aprendiz => "aprendiz",
            DeclaredRole::Instructor => "instructor",
            DeclaredRole::Administrativo => "administrativo",
            DeclaredRole::Admin => "admin",
        }
    }
}

/// Canonical identity request sent to the verification collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedIdentityRequest {
    pub subject_type: SubjectType,
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_role: Option<DeclaredRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<String>,
}

/// Direction of the recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanAction {
    #[default]
    Entry,
    Exit,
}

impl std::fmt::Display for ScanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanAction::Entry => write!(f, "entry"),
            ScanAction::Exit => write!(f, "exit"),
        }
    }
}

/// Identity resolved by the verification collaborator
///
/// Only the fields the terminal displays are typed; everything else the
/// collaborator returns is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(
        default,
        alias = "document_id",
        alias = "documento",
        deserialize_with = "deserialize_identifier"
    )]
    pub document_id: Option<String>,
    #[serde(default, alias = "nombre", alias = "fullName")]
    pub name: Option<String>,
    #[serde(default, alias = "rol")]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Identifiers arrive either as strings or as bare JSON numbers
fn deserialize_identifier<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct IdentifierVisitor;

    impl<'de> Visitor<'de> for IdentifierVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer identifier")
        }

        fn visit_str<E>(self, value: &str) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(IdentifierVisitor)
}

/// Wire response from the verification collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub success: bool,
    #[serde(default)]
    pub subject: Option<Subject>,
    #[serde(default)]
    pub action: ScanAction,
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "error_code")]
    pub error_code: Option<String>,
}

/// Result of one completed verification cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub scan_id: Uuid,
    pub success: bool,
    pub subject: Option<Subject>,
    pub action: ScanAction,
    pub message: String,
    pub error_code: Option<String>,
    pub processing_time_ms: u64,
    pub cached: bool,
    pub completed_at: DateTime<Utc>,
}

impl ScanOutcome {
    /// Build an outcome from a collaborator response
    pub fn from_response(response: VerificationResponse, processing_time_ms: u64) -> Self {
        Self {
            scan_id: Uuid::now_v7(),
            success: response.success,
            subject: response.subject,
            action: response.action,
            message: response.message,
            error_code: if response.success {
                None
            } else {
                Some(
                    response
                        .error_code
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| codes::APPLICATION_DENIED.to_string()),
                )
            },
            processing_time_ms,
            cached: false,
            completed_at: Utc::now(),
        }
    }

    /// Build a locally produced failure
    pub fn failure(code: &str, message: impl Into<String>, processing_time_ms: u64) -> Self {
        Self {
            scan_id: Uuid::now_v7(),
            success: false,
            subject: None,
            action: ScanAction::Entry,
            message: message.into(),
            error_code: Some(code.to_string()),
            processing_time_ms,
            cached: false,
            completed_at: Utc::now(),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.error_code.as_deref() == Some(code)
    }

    /// Taxonomy kind of a failed outcome; `None` when access was granted
    ///
    /// Any code the collaborator sends is an application denial.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        if self.success {
            return None;
        }
        Some(match self.error_code.as_deref() {
            Some(codes::NETWORK_ERROR) => ErrorKind::NetworkError,
            Some(codes::MALFORMED_PAYLOAD) => ErrorKind::MalformedPayload,
            Some(codes::INVALID_RESPONSE) | None => ErrorKind::Unknown,
            Some(_) => ErrorKind::ApplicationDenied,
        })
    }

    /// Whether the collaborator actually answered
    pub fn is_answered(&self) -> bool {
        !matches!(self.error_kind(), Some(ErrorKind::NetworkError | ErrorKind::Unknown))
    }
}

/// Camera acquisition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CameraState {
    #[default]
    Idle,
    Checking,
    Ready,
    Error,
}

impl CameraState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraState::Idle => "idle",
            CameraState::Checking => "checking",
            CameraState::Ready => "ready",
            CameraState::Error => "error",
        }
    }
}

/// Immutable view of the camera session for observers
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSnapshot {
    pub state: CameraState,
    pub device_id: Option<String>,
    pub device_label: Option<String>,
    pub error: Option<ClassifiedError>,
}

/// A capture device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into() }
    }
}

/// Platform permission status for the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Prompt,
    Denied,
}

/// One completed cycle for rolling statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceSample {
    pub duration_ms: u64,
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let req = NormalizedIdentityRequest {
            subject_type: SubjectType::Visitor,
            document_id: "55".to_string(),
            claimed_name: Some("Ana".to_string()),
            declared_role: None,
            source_timestamp: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["subjectType"], "visitor");
        assert_eq!(json["documentId"], "55");
        assert_eq!(json["claimedName"], "Ana");
        assert!(json.get("declaredRole").is_none());
    }

    #[test]
    fn test_subject_numeric_document_id() {
        let subject: Subject =
            serde_json::from_str(r#"{"documento": 1029384756, "nombre": "Juan", "ficha": "2559"}"#)
                .unwrap();
        assert_eq!(subject.document_id.as_deref(), Some("1029384756"));
        assert_eq!(subject.name.as_deref(), Some("Juan"));
        assert_eq!(subject.extra.get("ficha").and_then(|v| v.as_str()), Some("2559"));
    }

    #[test]
    fn test_response_defaults() {
        let resp: VerificationResponse =
            serde_json::from_str(r#"{"success": false, "errorCode": "QR_EXPIRED"}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.action, ScanAction::Entry);
        assert_eq!(resp.error_code.as_deref(), Some(codes::QR_EXPIRED));
    }

    #[test]
    fn test_outcome_drops_error_code_on_success() {
        let resp = VerificationResponse {
            success: true,
            subject: None,
            action: ScanAction::Exit,
            message: "ok".to_string(),
            error_code: Some("IGNORED".to_string()),
        };
        let outcome = ScanOutcome::from_response(resp, 12);
        assert!(outcome.success);
        assert_eq!(outcome.error_code, None);
        assert_eq!(outcome.action, ScanAction::Exit);
    }

    #[test]
    fn test_denial_without_code_is_application_denied() {
        let resp: VerificationResponse =
            serde_json::from_str(r#"{"success":false,"message":"Acceso denegado"}"#).unwrap();
        let outcome = ScanOutcome::from_response(resp, 40);

        assert_eq!(outcome.error_code.as_deref(), Some(codes::APPLICATION_DENIED));
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ApplicationDenied));
        assert!(outcome.is_answered());
    }

    #[test]
    fn test_error_kind_by_code() {
        let kind = |code: &str| ScanOutcome::failure(code, "", 0).error_kind();
        assert_eq!(kind(codes::QR_EXPIRED), Some(ErrorKind::ApplicationDenied));
        assert_eq!(kind(codes::NETWORK_ERROR), Some(ErrorKind::NetworkError));
        assert_eq!(kind(codes::MALFORMED_PAYLOAD), Some(ErrorKind::MalformedPayload));
        assert_eq!(kind(codes::INVALID_RESPONSE), Some(ErrorKind::Unknown));
        assert!(!ScanOutcome::failure(codes::NETWORK_ERROR, "", 0).is_answered());
        assert!(!ScanOutcome::failure(codes::INVALID_RESPONSE, "", 0).is_answered());
    }

    #[test]
    fn test_role_detection_order() {
        assert_eq!(DeclaredRole::detect_in("PEDRO ADMINISTRATIVO"), Some(DeclaredRole::Administrativo));
        assert_eq!(DeclaredRole::detect_in("pedro admin"), Some(DeclaredRole::Admin));
        assert_eq!(DeclaredRole::detect_in("pedro"), None);
        assert_eq!(DeclaredRole::from_keyword(" Instructor "), Some(DeclaredRole::Instructor));
    }
}
