//! Storage change notification payload

use super::failure::FailureRecord;
use fhirstore_routing::DATA_FILE_EXTENSION;
use serde_json::Value;

pub const MALFORMED_PATH: &str = "Path is not available or malformed";

/// The object that triggered an ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEvent {
    pub bucket: String,
    /// Object name inside the bucket (the notification's `name`).
    pub object_path: String,
    pub object_size_bytes: u64,
    /// Full object id (`bucket/name/generation`).
    pub path_id: String,
}

impl IngestEvent {
    /// Validate a notification payload.
    ///
    /// Checks run in a fixed order: required fields, then the file extension,
    /// then the size ceiling. Files of exactly `max_size_bytes` are rejected.
    pub fn from_payload(payload: &Value, max_size_bytes: u64) -> Result<Self, FailureRecord> {
        let id = payload.get("id").and_then(Value::as_str);
        let invalid = |exc: String| FailureRecord::invalid_event(exc, failure_path(id));

        let bucket = required_str(payload, "bucket").map_err(invalid)?;
        let name = required_str(payload, "name").map_err(invalid)?;
        let size = payload
            .get("size")
            .ok_or_else(|| missing_key("size"))
            .and_then(parse_size)
            .map_err(invalid)?;
        let id = id.ok_or_else(|| invalid("KeyError, path not available".to_string()))?;

        if !name.ends_with(DATA_FILE_EXTENSION) {
            return Err(invalid("Non-json file extension".to_string()));
        }
        if size >= max_size_bytes {
            return Err(invalid(format!(
                "File exceeds {}",
                format_size_limit(max_size_bytes)
            )));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            object_path: name.to_string(),
            object_size_bytes: size,
            path_id: id.to_string(),
        })
    }

    /// `gs://bucket/name`
    pub fn gcs_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object_path)
    }

    pub fn failure_path(&self) -> String {
        failure_path(Some(&self.path_id))
    }
}

/// Provenance prefix for failure records: the id without its last segment.
pub fn failure_path(id: Option<&str>) -> String {
    match id {
        Some(id) if id.split('/').count() > 2 => {
            let (prefix, _) = id.rsplit_once('/').unwrap_or((id, ""));
            prefix.to_string()
        }
        _ => MALFORMED_PATH.to_string(),
    }
}

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, String> {
    match payload.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("'{}' must be a string, got {}", key, other)),
        None => Err(missing_key(key)),
    }
}

fn missing_key(key: &str) -> String {
    format!("KeyError: '{}'", key)
}

fn parse_size(value: &Value) -> Result<u64, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("Invalid object size {}", n)),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("Invalid object size '{}'", s)),
        other => Err(format!("Invalid object size {}", other)),
    }
}

/// `5000000` → `5MB`, `1500` → `1500 bytes`.
fn format_size_limit(bytes: u64) -> String {
    if bytes >= 1_000_000 && bytes % 1_000_000 == 0 {
        format!("{}MB", bytes / 1_000_000)
    } else {
        format!("{} bytes", bytes)
    }
}
