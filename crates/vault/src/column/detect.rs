//! Ordered format detectors for values read back from encrypted columns.
//!
//! Each detector gives a definite verdict on a physical value. They are tried
//! in order until one matches; if none does the value is undecodable.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{Envelope, VaultError};
use serde_json::Value;

use super::{Inspection, StoredValue};
use crate::crypto::{Detected, Token};

/// Verdict of a single detector.
pub(crate) enum Verdict<T> {
    /// The value has this detector's shape.
    Match(Inspection<T>),
    /// The value has a different shape; try the next detector.
    NoMatch,
    /// The value has this detector's shape but its content is broken.
    Invalid(String),
}

pub(crate) type Detector<T> = fn(&StoredValue) -> Verdict<T>;

/// Run `detectors` in order over `value`.
///
/// # Errors
///
/// Returns [`VaultError::Decode`] when a detector finds a broken value or
/// when no detector matches.
pub(crate) fn classify<T>(
    detectors: &[Detector<T>],
    value: &StoredValue,
) -> Result<Inspection<T>, VaultError> {
    for detect in detectors {
        match detect(value) {
            Verdict::Match(found) => return Ok(found),
            Verdict::NoMatch => continue,
            Verdict::Invalid(reason) => return Err(VaultError::Decode(reason)),
        }
    }
    Err(VaultError::Decode(format!(
        "{} is neither a token nor readable plaintext",
        value.shape()
    )))
}

// ---------------------------------------------------------------------------
// Text columns
// ---------------------------------------------------------------------------

/// Detectors for scalar and blob columns, in priority order.
pub(crate) const TEXT_DETECTORS: &[Detector<String>] = &[null::<String>, text_token, legacy_text];

fn null<T>(value: &StoredValue) -> Verdict<T> {
    match value {
        StoredValue::Null => Verdict::Match(Inspection::Null),
        _ => Verdict::NoMatch,
    }
}

fn text_token(value: &StoredValue) -> Verdict<String> {
    let candidate = match value {
        StoredValue::Text(s) => s.as_str(),
        StoredValue::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => s,
            Err(_) => return Verdict::NoMatch,
        },
        StoredValue::Json(Value::String(s)) => s.as_str(),
        _ => return Verdict::NoMatch,
    };
    sealed(Token::detect(candidate))
}

/// Legacy text, read the same way as with encryption disabled.
fn legacy_text(value: &StoredValue) -> Verdict<String> {
    match value {
        StoredValue::Text(s) => Verdict::Match(Inspection::Legacy(s.clone())),
        StoredValue::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => Verdict::Match(Inspection::Legacy(s)),
            Err(_) => Verdict::NoMatch,
        },
        StoredValue::Json(Value::String(s)) => Verdict::Match(Inspection::Legacy(s.clone())),
        StoredValue::Json(other) => Verdict::Match(Inspection::Legacy(other.to_string())),
        StoredValue::Null => Verdict::NoMatch,
    }
}

fn sealed<T>(found: Detected) -> Verdict<T> {
    match found {
        Detected::Token(token) => Verdict::Match(Inspection::Sealed(token)),
        Detected::Damaged => Verdict::Invalid("value carries a damaged token".into()),
        Detected::Absent => Verdict::NoMatch,
    }
}

// ---------------------------------------------------------------------------
// Document columns
// ---------------------------------------------------------------------------

/// Detectors for document columns, in priority order: envelope, legacy
/// map/list, bare token (intermediate migration shape), legacy JSON scalar,
/// legacy non-JSON text.
pub(crate) const DOCUMENT_DETECTORS: &[Detector<Value>] = &[
    null::<Value>,
    envelope,
    legacy_structured,
    bare_token,
    legacy_scalar,
    legacy_document_text,
];

/// View a physical value as JSON. SQLite and MySQL hand JSON columns back as
/// text, so text and UTF-8 bytes are parsed.
fn as_json(value: &StoredValue) -> Option<Value> {
    match value {
        StoredValue::Json(v) => Some(v.clone()),
        StoredValue::Text(s) => serde_json::from_str(s).ok(),
        StoredValue::Bytes(b) => serde_json::from_slice(b).ok(),
        StoredValue::Null => None,
    }
}

fn envelope(value: &StoredValue) -> Verdict<Value> {
    let Some(env) = as_json(value).as_ref().and_then(Envelope::from_value) else {
        return Verdict::NoMatch;
    };
    let Ok(raw) = STANDARD.decode(env.data.as_bytes()) else {
        return Verdict::Invalid("envelope payload is not base64".into());
    };
    let Ok(text) = String::from_utf8(raw) else {
        return Verdict::Invalid("envelope payload is not a token".into());
    };
    match Token::parse(&text) {
        Ok(token) => Verdict::Match(Inspection::Sealed(token)),
        Err(_) => Verdict::Invalid("envelope payload is not a token".into()),
    }
}

fn legacy_structured(value: &StoredValue) -> Verdict<Value> {
    match as_json(value) {
        Some(v @ (Value::Object(_) | Value::Array(_))) => Verdict::Match(Inspection::Legacy(v)),
        _ => Verdict::NoMatch,
    }
}

fn bare_token(value: &StoredValue) -> Verdict<Value> {
    let candidate = match (value, as_json(value)) {
        (_, Some(Value::String(s))) => s,
        (StoredValue::Text(s), None) => s.clone(),
        (StoredValue::Bytes(b), None) => match String::from_utf8(b.clone()) {
            Ok(s) => s,
            Err(_) => return Verdict::NoMatch,
        },
        _ => return Verdict::NoMatch,
    };
    match Token::detect(&candidate) {
        Detected::Absent => {}
        found => return sealed(found),
    }
    let wrapped = STANDARD
        .decode(candidate.as_bytes())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .map_or(Detected::Absent, |text| Token::detect(&text));
    sealed(wrapped)
}

fn legacy_scalar(value: &StoredValue) -> Verdict<Value> {
    match as_json(value) {
        Some(v) => Verdict::Match(Inspection::Legacy(v)),
        None => Verdict::NoMatch,
    }
}

/// Text that is not JSON reads back as a JSON string.
fn legacy_document_text(value: &StoredValue) -> Verdict<Value> {
    match value {
        StoredValue::Text(s) => Verdict::Match(Inspection::Legacy(Value::String(s.clone()))),
        StoredValue::Bytes(b) => match String::from_utf8(b.clone()) {
            Ok(s) => Verdict::Match(Inspection::Legacy(Value::String(s))),
            Err(_) => Verdict::NoMatch,
        },
        _ => Verdict::NoMatch,
    }
}
