//! Payload sanitization for persisted events.
//!
//! On-disk bytes must be reproducible: non-finite numbers serialize as
//! JSON null, so the sanitizer coerces them (array slots become `0`,
//! object entries are dropped), and every string runs through the
//! secret redactor.

use serde_json::Value;

use crate::redact::redact_secrets;

/// Normalize a payload tree for persistence.
///
/// - object entries with a null value are dropped (absent field);
/// - array slots holding null are coerced to `0` (a non-finite number
///   serialized there);
/// - strings are redacted.
pub fn sanitize_payload(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, sanitize_payload(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| {
                    if v.is_null() {
                        Value::from(0)
                    } else {
                        sanitize_payload(v)
                    }
                })
                .collect(),
        ),
        Value::String(s) => Value::String(redact_secrets(&s)),
        other => other,
    }
}
