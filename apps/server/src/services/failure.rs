//! Failure reporting

use crate::clients::MessageBus;
use crate::models::FailureRecord;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Delivery {
    Published { message_id: String },
    Failed { error: String },
}

/// A reported failure and whether it reached the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    #[serde(flatten)]
    pub record: FailureRecord,
    pub delivery: Delivery,
}

pub struct FailureReporter {
    bus: Arc<dyn MessageBus>,
}

impl FailureReporter {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Publish `record` as `{"data": {"message": record}}`. Never fails; a
    /// publish error is logged and returned in the report.
    pub async fn report(&self, record: FailureRecord) -> FailureReport {
        tracing::warn!(
            status_code = record.status_code,
            reason = %record.reason,
            exc = %record.exc,
            path = %record.path,
            "Ingestion failed"
        );

        let envelope = json!({ "data": { "message": &record } });
        let delivery = match serde_json::to_vec(&envelope) {
            Ok(payload) => match self.bus.publish(&payload).await {
                Ok(message_id) => Delivery::Published { message_id },
                Err(e) => {
                    tracing::error!(error = %e, path = %record.path, "Failed to publish failure record");
                    Delivery::Failed {
                        error: e.to_string(),
                    }
                }
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode failure record");
                Delivery::Failed {
                    error: e.to_string(),
                }
            }
        };

        FailureReport { record, delivery }
    }
}
