//! Patient event domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Clinical event category. Closed set; producers cannot invent new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Admission,
    LabResult,
    Vitals,
    Discharge,
}

impl EventType {
    /// Wire names, in declaration order. Used for validation error messages.
    pub const NAMES: &'static [&'static str] = &["admission", "lab_result", "vitals", "discharge"];

    /// Parse a wire name into the enum, if it is a member of the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admission" => Some(Self::Admission),
            "lab_result" => Some(Self::LabResult),
            "vitals" => Some(Self::Vitals),
            "discharge" => Some(Self::Discharge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::LabResult => "lab_result",
            Self::Vitals => "vitals",
            Self::Discharge => "discharge",
        }
    }
}

/// Clinical severity of an event. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub const NAMES: &'static [&'static str] = &["normal", "warning", "critical"];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A validated patient event, the unit of work for the delivery pipeline.
///
/// `patient_id` is the partition key: all events for one patient land on the
/// same partition and are consumed in publish order. There is no ordering
/// guarantee across patients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientEvent {
    pub patient_id: String,
    pub event_type: EventType,
    pub severity: Severity,
    pub department: String,
    /// Free-form clinical payload. Bounded by the producer-side validator.
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PatientEvent {
    /// Serialize to the wire JSON form.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationFailed {
            cause: e.to_string(),
        })
    }

    /// Deserialize from wire JSON. Consumer-side; a failure here is terminal
    /// for the message (the payload will not parse differently on retry).
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::ParseFailed {
            cause: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> PatientEvent {
        PatientEvent {
            patient_id: "P-1042".to_string(),
            event_type: EventType::LabResult,
            severity: Severity::Warning,
            department: "hematology".to_string(),
            data: json!({"test": "hemoglobin", "value": 10.2}),
            timestamp: "2026-03-01T08:30:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(EventType::parse("lab_result"), Some(EventType::LabResult));
        assert_eq!(EventType::parse("surgery"), None);
        assert_eq!(EventType::LabResult.as_str(), "lab_result");
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("CRITICAL"), None);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let bytes = sample_event().to_json_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["patientId"], "P-1042");
        assert_eq!(value["eventType"], "lab_result");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["department"], "hematology");
    }

    #[test]
    fn test_roundtrip() {
        let event = sample_event();
        let bytes = event.to_json_bytes().unwrap();
        let restored = PatientEvent::from_json_bytes(&bytes).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn test_parse_failure_is_parse_error() {
        let err = PatientEvent::from_json_bytes(b"not json").unwrap_err();
        assert!(matches!(err, EventError::ParseFailed { .. }));
    }
}
