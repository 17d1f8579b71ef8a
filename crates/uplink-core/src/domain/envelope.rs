//! Response envelope normalization.
//!
//! The backend answers with several envelope shapes and two key casings
//! (`Result` / `result`). Everything downstream works with the single
//! [`ResponseEnvelope`] produced here, and with camelCase keys only.
//!
//! Normalization is pure and total: every input maps to exactly one envelope
//! and nothing in this module panics or returns an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::ClientError;

/// Candidate payload locations, most specific first.
///
/// Order matters: paginated endpoints double-wrap (`Result.Result`,
/// `Result.Items`) and must win over the outer `Result`. The raw body is the
/// last resort and is handled separately.
const RESULT_PATHS: &[&[&str]] = &[
    &["Result", "Result"],
    &["Result", "Items"],
    &["Result"],
    &["Data"],
    &["Items"],
];

const SUCCESS_FLAGS: &[&str] = &["Success", "IsSuccess"];

/// Normalized `{ success, result, message }` view of a backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    /// Extracted payload with camelCase keys, or `Null` when none was found.
    pub result: Value,
    pub message: String,
    /// HTTP status the envelope was parsed from.
    pub status: u16,
}

impl ResponseEnvelope {
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Decode the normalized result into `T`.
    pub fn result_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(T::deserialize(&self.result)?)
    }

    /// List payload of the envelope; empty when the result is not a list.
    pub fn items(&self) -> Vec<Value> {
        match &self.result {
            Value::Array(items) => items.clone(),
            Value::Object(obj) => obj
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Turn an unsuccessful envelope into `ClientError::Status`.
    pub fn into_result(self) -> Result<Value, ClientError> {
        if self.success {
            Ok(self.result)
        } else {
            Err(ClientError::Status {
                status: self.status,
                message: self.message,
            })
        }
    }
}

/// Parse a raw HTTP body into a [`ResponseEnvelope`].
pub fn parse_envelope(status: u16, raw_body: &str) -> ResponseEnvelope {
    let trimmed = raw_body.trim();
    let body: Value = match serde_json::from_str(trimmed) {
        Ok(body) => body,
        Err(_) => {
            let message = if trimmed.is_empty() {
                format!("empty response (status {status})")
            } else {
                trimmed.to_string()
            };
            return ResponseEnvelope {
                success: false,
                result: Value::Null,
                message,
                status,
            };
        }
    };

    let payload = RESULT_PATHS
        .iter()
        .find_map(|path| lookup(&body, path).filter(|v| is_payload(v)))
        .or_else(|| Some(&body).filter(|v| is_payload(v)));

    let success = match explicit_flag(&body) {
        Some(flag) => flag,
        None => (200..300).contains(&status) && !has_error(&body) && payload.is_some(),
    };

    let message = find_message(&body).unwrap_or_else(|| {
        if success {
            String::new()
        } else {
            format!("request failed with status {status}")
        }
    });

    ResponseEnvelope {
        success,
        result: payload.map(canonicalize_keys).unwrap_or(Value::Null),
        message,
        status,
    }
}

/// Most specific human-readable message in a JSON error body.
///
/// Priority: `details.error` > `error` (string or `error.message`) >
/// `message` > `title`.
pub fn find_message(body: &Value) -> Option<String> {
    let obj = body.as_object()?;

    let structured = field(obj, "Details")
        .and_then(Value::as_object)
        .and_then(|details| field(details, "Error"))
        .and_then(Value::as_str);
    let error = field(obj, "Error").and_then(|e| match e {
        Value::String(s) => Some(s.as_str()),
        Value::Object(inner) => field(inner, "Message").and_then(Value::as_str),
        _ => None,
    });
    let message = field(obj, "Message").and_then(Value::as_str);
    let title = field(obj, "Title").and_then(Value::as_str);

    [structured, error, message, title]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Rewrite every object key to camelCase, recursively.
pub fn canonicalize_keys(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| (camel_case(k), canonicalize_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize_keys).collect()),
        other => other.clone(),
    }
}

/// `UploadUrl` -> `uploadUrl`, `ID` -> `id`, `URLPath` -> `urlPath`.
pub fn camel_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let upper_run = chars.iter().take_while(|c| c.is_uppercase()).count();
    let lower_until = match upper_run {
        0 => return key.to_string(),
        n if n == chars.len() => n,
        1 => 1,
        n => n - 1,
    };

    let mut out = String::with_capacity(key.len());
    for (i, c) in chars.into_iter().enumerate() {
        if i < lower_until {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Look `name` up in PascalCase first, then camelCase.
fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).or_else(|| obj.get(&camel_case(name)))
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |current, segment| current.as_object().and_then(|obj| field(obj, segment)))
}

fn is_payload(value: &Value) -> bool {
    value.is_array() || value.is_object()
}

fn explicit_flag(body: &Value) -> Option<bool> {
    let obj = body.as_object()?;
    SUCCESS_FLAGS
        .iter()
        .find_map(|name| field(obj, name).and_then(Value::as_bool))
}

fn has_error(body: &Value) -> bool {
    body.as_object()
        .and_then(|obj| field(obj, "Error"))
        .is_some_and(|e| !matches!(e, Value::Null | Value::Bool(false)))
}
