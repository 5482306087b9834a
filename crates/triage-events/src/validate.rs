//! Producer-side validation of candidate patient events.
//!
//! Validation is a pure function over untyped JSON: no broker access, no
//! retries. A failure enumerates every offending field, not just the first,
//! so callers can report the full list back to the producing client.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::event::{EventType, PatientEvent, Severity};

pub const MAX_PATIENT_ID_LENGTH: usize = 50;
pub const MAX_DEPARTMENT_LENGTH: usize = 100;
pub const MAX_TIMESTAMP_LENGTH: usize = 40;
/// Per-leaf string bound inside `data`.
pub const MAX_DATA_STRING_LENGTH: usize = 500;
/// Per-key name bound inside `data`.
pub const MAX_DATA_KEY_LENGTH: usize = 100;
/// Total serialized size bound for `data`.
pub const MAX_DATA_BYTES: usize = 50 * 1024;
/// Tolerated clock skew for timestamps in the future.
pub const MAX_FUTURE_SKEW_SECS: i64 = 60;

const ALLOWED_FIELDS: &[&str] = &[
    "patientId",
    "eventType",
    "severity",
    "department",
    "data",
    "timestamp",
];

/// A single validation failure, anchored to the field (or `data` path) it
/// applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validation failure carrying every violation found in the candidate event.
#[derive(Debug, Clone, Error)]
#[error("event validation failed: {}", format_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validate an untyped JSON body against the patient event schema.
///
/// Returns the normalized event (trimmed strings, UTC timestamp) or a
/// [`ValidationError`] listing every offending field.
pub fn validate_event(body: &Value) -> Result<PatientEvent, ValidationError> {
    let Some(object) = body.as_object() else {
        return Err(ValidationError {
            violations: vec![FieldViolation::new("body", "must be a JSON object")],
        });
    };

    let mut violations = Vec::new();

    let unexpected: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|key| !ALLOWED_FIELDS.contains(key))
        .collect();
    if !unexpected.is_empty() {
        violations.push(FieldViolation::new(
            "body",
            format!("unexpected fields: {}", unexpected.join(", ")),
        ));
    }

    let patient_id = check_string(
        object.get("patientId"),
        "patientId",
        MAX_PATIENT_ID_LENGTH,
        &mut violations,
    );
    let department = check_string(
        object.get("department"),
        "department",
        MAX_DEPARTMENT_LENGTH,
        &mut violations,
    );

    let event_type = check_enum(
        object.get("eventType"),
        "eventType",
        EventType::NAMES,
        EventType::parse,
        &mut violations,
    );
    let severity = check_enum(
        object.get("severity"),
        "severity",
        Severity::NAMES,
        Severity::parse,
        &mut violations,
    );

    let data = check_data(object.get("data"), &mut violations);
    let timestamp = check_timestamp(object.get("timestamp"), &mut violations);

    if !violations.is_empty() {
        return Err(ValidationError { violations });
    }

    // All checks passed, so every component is present.
    Ok(PatientEvent {
        patient_id: patient_id.unwrap_or_default(),
        event_type: event_type.unwrap_or(EventType::Admission),
        severity: severity.unwrap_or(Severity::Normal),
        department: department.unwrap_or_default(),
        data: data.cloned().unwrap_or(Value::Null),
        timestamp: timestamp.unwrap_or_else(Utc::now),
    })
}

fn check_string(
    value: Option<&Value>,
    field: &str,
    max_length: usize,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    let Some(value) = value else {
        violations.push(FieldViolation::new(field, "is required"));
        return None;
    };
    let Some(s) = value.as_str() else {
        violations.push(FieldViolation::new(field, "must be a string"));
        return None;
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        violations.push(FieldViolation::new(field, "must be a non-empty string"));
        return None;
    }
    if s.chars().count() > max_length {
        violations.push(FieldViolation::new(
            field,
            format!("must be at most {max_length} characters"),
        ));
        return None;
    }
    Some(trimmed.to_string())
}

fn check_enum<T>(
    value: Option<&Value>,
    field: &str,
    names: &[&str],
    parse: impl Fn(&str) -> Option<T>,
    violations: &mut Vec<FieldViolation>,
) -> Option<T> {
    let Some(value) = value else {
        violations.push(FieldViolation::new(field, "is required"));
        return None;
    };
    let parsed = value.as_str().and_then(&parse);
    if parsed.is_none() {
        violations.push(FieldViolation::new(
            field,
            format!("must be one of: {}", names.join(", ")),
        ));
    }
    parsed
}

fn check_data<'a>(
    value: Option<&'a Value>,
    violations: &mut Vec<FieldViolation>,
) -> Option<&'a Value> {
    let Some(value) = value else {
        violations.push(FieldViolation::new("data", "is required"));
        return None;
    };
    if !value.is_object() {
        violations.push(FieldViolation::new("data", "must be an object"));
        return None;
    }

    // Total serialized size first, then per-leaf bounds.
    let serialized_len = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(0);
    if serialized_len > MAX_DATA_BYTES {
        violations.push(FieldViolation::new(
            "data",
            format!("must not exceed {MAX_DATA_BYTES} bytes"),
        ));
    }
    check_data_value(value, "data", violations);
    Some(value)
}

fn check_data_value(value: &Value, path: &str, violations: &mut Vec<FieldViolation>) {
    match value {
        Value::String(s) => {
            if s.chars().count() > MAX_DATA_STRING_LENGTH {
                violations.push(FieldViolation::new(
                    path,
                    format!("string exceeds max length of {MAX_DATA_STRING_LENGTH}"),
                ));
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                check_data_value(item, &format!("{path}[{index}]"), violations);
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                let nested_path = format!("{path}.{key}");
                if key.chars().count() > MAX_DATA_KEY_LENGTH {
                    violations.push(FieldViolation::new(
                        nested_path.clone(),
                        format!("object key exceeds max length of {MAX_DATA_KEY_LENGTH}"),
                    ));
                }
                check_data_value(nested, &nested_path, violations);
            }
        }
        _ => {}
    }
}

fn check_timestamp(
    value: Option<&Value>,
    violations: &mut Vec<FieldViolation>,
) -> Option<DateTime<Utc>> {
    let raw = check_string(value, "timestamp", MAX_TIMESTAMP_LENGTH, violations)?;

    let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) else {
        violations.push(FieldViolation::new(
            "timestamp",
            "must be a valid ISO-8601 string",
        ));
        return None;
    };
    let timestamp = parsed.with_timezone(&Utc);

    if timestamp > Utc::now() + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
        violations.push(FieldViolation::new(
            "timestamp",
            format!("cannot be more than {MAX_FUTURE_SKEW_SECS} seconds in the future"),
        ));
        return None;
    }
    Some(timestamp)
}
