//! Terminal failure records published to the failure topic

use crate::clients::ApiError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    /// The event or an upstream call was rejected.
    Failure,
    /// The object itself could not be used.
    Error,
}

/// Wire shape consumed by the failure log writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub status: FailureStatus,
    pub reason: String,
    pub exc: String,
    pub status_code: u16,
    pub path: String,
}

impl FailureRecord {
    pub fn invalid_event(exc: impl Into<String>, path: String) -> Self {
        Self {
            status: FailureStatus::Failure,
            reason: "Assertion or missing key in request".to_string(),
            exc: exc.into(),
            status_code: 500,
            path,
        }
    }

    pub fn undecodable(exc: impl Into<String>, path: String) -> Self {
        Self {
            status: FailureStatus::Error,
            reason: "Error decoding payload JSON".to_string(),
            exc: exc.into(),
            status_code: 400,
            path,
        }
    }

    pub fn not_found(exc: impl Into<String>, path: String) -> Self {
        Self {
            status: FailureStatus::Error,
            reason: "FHIR file not found".to_string(),
            exc: exc.into(),
            status_code: 404,
            path,
        }
    }

    pub fn missing_resource_type(path: String) -> Self {
        Self {
            status: FailureStatus::Error,
            reason: "\"resourceType\" field not found".to_string(),
            exc: String::new(),
            status_code: 400,
            path,
        }
    }

    /// An upstream API call failed. `reason` names the step, e.g. `Failed to post to fhir-nyc-R4`.
    pub fn api_failure(reason: &str, error: Option<&ApiError>, path: String) -> Self {
        match error {
            Some(error) => Self {
                status: FailureStatus::Failure,
                reason: format!("{}. {}", reason, error.status_code()),
                exc: error.to_string(),
                status_code: error.status_code(),
                path,
            },
            None => Self {
                status: FailureStatus::Failure,
                reason: reason.to_string(),
                exc: String::new(),
                status_code: 500,
                path,
            },
        }
    }

    pub fn enqueue_failed(exc: impl Into<String>, path: String) -> Self {
        Self {
            status: FailureStatus::Error,
            reason: "Failed to enqueue identifier enrichment".to_string(),
            exc: exc.into(),
            status_code: 503,
            path,
        }
    }
}
