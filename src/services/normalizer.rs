//! Raw scan text -> identity request
//!
//! Decision chain, first match wins:
//! 1. Structured - the text is a JSON object with recognised identity fields
//! 2. TextHeuristic - free text holding a 6-12 digit run preceded by a name
//! 3. Salvaged - the alphanumeric residue is 6-20 characters long
//! 4. Invalid - nothing usable; an excerpt is kept for diagnostics
//!
//! A JSON object that decodes but fails the structured rules is Invalid; it
//! does not fall through to the text heuristics.

use crate::domain::error::NormalizeError;
use crate::domain::types::{DeclaredRole, NormalizedIdentityRequest, SubjectType};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

const TYPE_FIELDS: &[&str] = &["type", "tipo"];
const ID_FIELDS: &[&str] = &[
    "documentId",
    "document_id",
    "id",
    "cedula",
    "dni",
    "documento",
    "numeroDocumento",
    "codigo",
];
const NAME_FIELDS: &[&str] = &["nombre", "name", "nombres", "fullName", "claimedName"];
const ROLE_FIELDS: &[&str] = &["rol", "role", "declaredRole"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "ts", "fecha", "sourceTimestamp"];
const VISITOR_TYPES: &[&str] = &["visitor", "visitante"];

const MIN_STRUCTURED_DIGITS: usize = 6;
const DIGIT_RUN: std::ops::RangeInclusive<usize> = 6..=12;
const MIN_TEXT_NAME_CHARS: usize = 3;
const MIN_VISITOR_NAME_CHARS: usize = 2;
const SALVAGE_LEN: std::ops::RangeInclusive<usize> = 6..=20;
const EXCERPT_CHARS: usize = 80;

/// Result of the decision chain; each variant carries only its own fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Structured {
        subject_type: SubjectType,
        document_id: String,
        claimed_name: Option<String>,
        declared_role: Option<DeclaredRole>,
        source_timestamp: Option<String>,
    },
    TextHeuristic {
        document_id: String,
        claimed_name: String,
        declared_role: DeclaredRole,
    },
    Salvaged {
        document_id: String,
    },
    Invalid {
        excerpt: String,
    },
}

impl Normalized {
    pub fn stage(&self) -> &'static str {
        match self {
            Normalized::Structured { .. } => "structured",
            Normalized::TextHeuristic { .. } => "text_heuristic",
            Normalized::Salvaged { .. } => "salvaged",
            Normalized::Invalid { .. } => "invalid",
        }
    }

    pub fn into_request(self) -> Result<NormalizedIdentityRequest, NormalizeError> {
        match self {
            Normalized::Structured {
                subject_type,
                document_id,
                claimed_name,
                declared_role,
                source_timestamp,
            } => Ok(NormalizedIdentityRequest {
                subject_type,
                document_id,
                claimed_name,
                declared_role,
                source_timestamp,
            }),
            Normalized::TextHeuristic { document_id, claimed_name, declared_role } => {
                Ok(NormalizedIdentityRequest {
                    subject_type: SubjectType::Person,
                    document_id,
                    claimed_name: Some(claimed_name),
                    declared_role: Some(declared_role),
                    source_timestamp: None,
                })
            }
            Normalized::Salvaged { document_id } => Ok(NormalizedIdentityRequest {
                subject_type: SubjectType::Person,
                document_id,
                claimed_name: None,
                declared_role: None,
                source_timestamp: None,
            }),
            Normalized::Invalid { excerpt } => Err(NormalizeError::Malformed { excerpt }),
        }
    }
}

/// Outcome of the structured stage
enum StructuredStage {
    /// Not a JSON object; continue the chain
    NotRecord,
    Accepted(Normalized),
    /// A record that decoded but carries no usable identity
    Rejected,
}

pub struct PayloadNormalizer {
    digit_run: Regex,
}

impl PayloadNormalizer {
    pub fn new() -> Self {
        Self { digit_run: Regex::new(r"[0-9]+").expect("digit run pattern is valid") }
    }

    /// Run the decision chain
    pub fn classify(&self, raw: &str) -> Normalized {
        let text = raw.trim();

        let result = match Self::structured(text) {
            StructuredStage::Accepted(n) => n,
            StructuredStage::Rejected => Self::invalid(text),
            StructuredStage::NotRecord => self
                .text_heuristic(text)
                .or_else(|| Self::salvage(text))
                .unwrap_or_else(|| Self::invalid(text)),
        };

        debug!(stage = result.stage(), len = text.len(), "payload_normalized");
        result
    }

    /// Run the chain and convert to a request
    pub fn normalize(&self, raw: &str) -> Result<NormalizedIdentityRequest, NormalizeError> {
        self.classify(raw).into_request()
    }

    fn structured(text: &str) -> StructuredStage {
        if !text.starts_with('{') {
            return StructuredStage::NotRecord;
        }
        let Ok(Value::Object(record)) = serde_json::from_str::<Value>(text) else {
            return StructuredStage::NotRecord;
        };

        let record_type = field_text(&record, TYPE_FIELDS).map(|t| t.to_lowercase());
        let name = field_text(&record, NAME_FIELDS);
        let source_timestamp = field_text(&record, TIMESTAMP_FIELDS);
        let declared_role = field_text(&record, ROLE_FIELDS)
            .and_then(|r| DeclaredRole::from_keyword(&r))
            .or_else(|| record_type.as_deref().and_then(DeclaredRole::from_keyword));

        if let Some(t) = record_type.as_deref() {
            if VISITOR_TYPES.contains(&t) {
                // Visitor passes carry surrogate codes, so no shape check on the id
                let id = field_text(&record, ID_FIELDS);
                let name = name.filter(|n| n.chars().count() >= MIN_VISITOR_NAME_CHARS);
                return match (id, name) {
                    (Some(document_id), Some(name)) => StructuredStage::Accepted(Normalized::Structured {
                        subject_type: SubjectType::Visitor,
                        document_id,
                        claimed_name: Some(name),
                        declared_role: None,
                        source_timestamp,
                    }),
                    _ => StructuredStage::Rejected,
                };
            }
        } else if let Some(id) = field_text(&record, &["id"]) {
            return StructuredStage::Accepted(Normalized::Structured {
                subject_type: SubjectType::Person,
                document_id: id,
                claimed_name: name,
                declared_role,
                source_timestamp,
            });
        }

        let document_id = ID_FIELDS
            .iter()
            .filter_map(|key| field_text(&record, &[key]))
            .find(|id| id.len() >= MIN_STRUCTURED_DIGITS && id.bytes().all(|b| b.is_ascii_digit()));

        match document_id {
            Some(document_id) => StructuredStage::Accepted(Normalized::Structured {
                subject_type: SubjectType::Person,
                document_id,
                claimed_name: name,
                declared_role,
                source_timestamp,
            }),
            None => StructuredStage::Rejected,
        }
    }

    fn text_heuristic(&self, text: &str) -> Option<Normalized> {
        // Runs are maximal: a 13+ digit run (card serial, barcode) is never cut
        // down to a 12-digit prefix, so it cannot become a document number here
        let run = self.digit_run.find_iter(text).find(|m| DIGIT_RUN.contains(&m.len()))?;

        let claimed_name = text[..run.start()].split_whitespace().collect::<Vec<_>>().join(" ");
        if claimed_name.chars().count() < MIN_TEXT_NAME_CHARS {
            return None;
        }

        Some(Normalized::TextHeuristic {
            document_id: run.as_str().to_string(),
            claimed_name,
            declared_role: DeclaredRole::detect_in(text).unwrap_or(DeclaredRole::Aprendiz),
        })
    }

    fn salvage(text: &str) -> Option<Normalized> {
        let residue: String = text.chars().filter(|c| c.is_alphanumeric()).collect();
        SALVAGE_LEN
            .contains(&residue.chars().count())
            .then_some(Normalized::Salvaged { document_id: residue })
    }

    fn invalid(text: &str) -> Normalized {
        Normalized::Invalid { excerpt: text.chars().take(EXCERPT_CHARS).collect() }
    }
}

impl Default for PayloadNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// First non-empty string or integer value among `keys`, trimmed
fn field_text(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> Result<NormalizedIdentityRequest, NormalizeError> {
        PayloadNormalizer::new().normalize(raw)
    }

    #[test]
    fn test_visitor_record() {
        let req = normalize(r#"{"type":"visitor","id":"55","nombre":"Ana"}"#).unwrap();
        assert_eq!(req.subject_type, SubjectType::Visitor);
        assert_eq!(req.document_id, "55");
        assert_eq!(req.claimed_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_visitor_any_identifier_shape() {
        let req = normalize(r#"{"tipo":"Visitante","codigo":"V-2024/abc","name":"  Lu  "}"#).unwrap();
        assert_eq!(req.subject_type, SubjectType::Visitor);
        assert_eq!(req.document_id, "V-2024/abc");
        assert_eq!(req.claimed_name.as_deref(), Some("Lu"));
    }

    #[test]
    fn test_visitor_numeric_id() {
        let req = normalize(r#"{"type":"visitor","id":9,"nombre":"Ana"}"#).unwrap();
        assert_eq!(req.document_id, "9");
    }

    #[test]
    fn test_visitor_name_too_short() {
        let err = normalize(r#"{"type":"visitor","id":"55","nombre":" A "}"#).unwrap_err();
        assert!(matches!(err, NormalizeError::Malformed { .. }));
    }

    #[test]
    fn test_visitor_without_identifier() {
        assert!(normalize(r#"{"type":"visitor","nombre":"Ana"}"#).is_err());
    }

    #[test]
    fn test_untyped_id_substitution() {
        for id in ["55", "ABC", "1029384756"] {
            let raw = format!(r#"{{"id":"{id}","nombre":"Juan"}}"#);
            let req = normalize(&raw).unwrap();
            assert_eq!(req.subject_type, SubjectType::Person);
            assert_eq!(req.document_id, id);
            assert_eq!(req.claimed_name.as_deref(), Some("Juan"));
        }
    }

    #[test]
    fn test_typed_person_requires_digit_run() {
        let req = normalize(r#"{"type":"aprendiz","documentId":" 1029384756 "}"#).unwrap();
        assert_eq!(req.document_id, "1029384756");
        assert_eq!(req.declared_role, Some(DeclaredRole::Aprendiz));

        assert!(normalize(r#"{"type":"aprendiz","documentId":"12345"}"#).is_err());
        assert!(normalize(r#"{"type":"person","documentId":"12A4567"}"#).is_err());
    }

    #[test]
    fn test_rejected_record_does_not_fall_through() {
        // Contains a salvageable token, but it decoded as a record
        let err = normalize(r#"{"type":"person","documentId":"abc","note":"1029384756"}"#).unwrap_err();
        let NormalizeError::Malformed { excerpt } = err;
        assert!(excerpt.starts_with('{'));
    }

    #[test]
    fn test_structured_carries_role_and_timestamp() {
        let req = normalize(r#"{"cedula":"1029384756","rol":"Instructor","timestamp":"2024-05-01T10:00:00Z"}"#)
            .unwrap();
        assert_eq!(req.declared_role, Some(DeclaredRole::Instructor));
        assert_eq!(req.source_timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_free_text_scenario() {
        let req = normalize("JUAN PEREZ 1029384756 APRENDIZ").unwrap();
        assert_eq!(req.document_id, "1029384756");
        assert_eq!(req.claimed_name.as_deref(), Some("JUAN PEREZ"));
        assert_eq!(req.declared_role, Some(DeclaredRole::Aprendiz));
    }

    #[test]
    fn test_free_text_collapses_whitespace() {
        let req = normalize("  maria \t  del   carmen   52345678 instructor ").unwrap();
        assert_eq!(req.claimed_name.as_deref(), Some("maria del carmen"));
        assert_eq!(req.document_id, "52345678");
        assert_eq!(req.declared_role, Some(DeclaredRole::Instructor));
    }

    #[test]
    fn test_free_text_first_run_in_range() {
        // 13-digit run is skipped, first 6-12 run wins
        let req = normalize("Ana Ruiz 1234567890123 then 987654 and 111111").unwrap();
        assert_eq!(req.document_id, "987654");
        assert_eq!(req.claimed_name.as_deref(), Some("Ana Ruiz 1234567890123 then"));
    }

    #[test]
    fn test_overlong_digit_run_is_not_a_document() {
        let normalizer = PayloadNormalizer::new();
        let result = normalizer.classify("ANA 1234567890123");
        assert_eq!(result.stage(), "salvaged");

        let req = result.into_request().unwrap();
        assert_eq!(req.document_id, "ANA1234567890123");
        assert_eq!(req.claimed_name, None);
    }

    #[test]
    fn test_free_text_default_role() {
        let req = normalize("Pedro Gomez 12345678").unwrap();
        assert_eq!(req.declared_role, Some(DeclaredRole::Aprendiz));
    }

    #[test]
    fn test_short_name_falls_to_salvage() {
        let req = normalize("AB 1029384756").unwrap();
        assert_eq!(req.document_id, "AB1029384756");
        assert_eq!(req.claimed_name, None);
    }

    #[test]
    fn test_salvage_strips_punctuation() {
        let req = normalize("10.293.847-56").unwrap();
        assert_eq!(req.subject_type, SubjectType::Person);
        assert_eq!(req.document_id, "1029384756");
        assert_eq!(req.claimed_name, None);
    }

    #[test]
    fn test_bare_json_number_is_not_a_record() {
        let req = normalize("1029384756").unwrap();
        assert_eq!(req.document_id, "1029384756");
    }

    #[test]
    fn test_malformed_excerpt_truncated() {
        let raw = "!".repeat(200);
        let NormalizeError::Malformed { excerpt } = normalize(&raw).unwrap_err();
        assert_eq!(excerpt.chars().count(), 80);
    }

    #[test]
    fn test_malformed_multibyte_excerpt() {
        let raw = "ñ-".repeat(100);
        // residue is 100 chars, above the salvage limit
        let NormalizeError::Malformed { excerpt } = normalize(&raw).unwrap_err();
        assert_eq!(excerpt.chars().count(), 80);
    }

    #[test]
    fn test_too_short_is_malformed() {
        assert!(normalize("ab-12").is_err());
        assert!(normalize("   ").is_err());
    }

    #[test]
    fn test_stage_names() {
        let n = PayloadNormalizer::new();
        assert_eq!(n.classify(r#"{"id":"1"}"#).stage(), "structured");
        assert_eq!(n.classify("JUAN PEREZ 1029384756").stage(), "text_heuristic");
        assert_eq!(n.classify("XYZ-123-456").stage(), "salvaged");
        assert_eq!(n.classify("??").stage(), "invalid");
    }
}
