//! Ingestion pipeline: one storage notification in, imported stores and queued
//! enrichment out.

use crate::clients::{ApiError, ContentStructure, ObjectStore};
use crate::models::{FailureRecord, IngestEvent};
use crate::services::{
    EnrichmentDispatcher, FailureReport, FailureReporter, ImportOrchestrator, ImportOutcome,
};
use crate::{Error, Result};
use fhirstore_routing::{find_str, resolve, FhirVersion, IdentifierTag};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const RESOURCE_TYPE_FIELD: &str = "resourceType";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestOutcome {
    Imported {
        version: FhirVersion,
        store_id: String,
        combined_store_id: String,
        tasks_enqueued: usize,
    },
    /// Terminal failure; already reported.
    Failed(FailureReport),
}

pub struct IngestService {
    storage: Arc<dyn ObjectStore>,
    orchestrator: ImportOrchestrator,
    dispatcher: EnrichmentDispatcher,
    reporter: FailureReporter,
    max_file_size_bytes: u64,
}

impl IngestService {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        orchestrator: ImportOrchestrator,
        dispatcher: EnrichmentDispatcher,
        reporter: FailureReporter,
        max_file_size_bytes: u64,
    ) -> Self {
        Self {
            storage,
            orchestrator,
            dispatcher,
            reporter,
            max_file_size_bytes,
        }
    }

    /// Run the pipeline for one notification payload.
    ///
    /// Terminal failures are reported and returned as [`IngestOutcome::Failed`].
    /// Retryable failures are reported too, then returned as
    /// [`Error::RetryableApi`] so the caller can ask for redelivery.
    pub async fn handle(&self, payload: &Value) -> Result<IngestOutcome> {
        let event = match IngestEvent::from_payload(payload, self.max_file_size_bytes) {
            Ok(event) => event,
            Err(record) => return Ok(self.fail(record).await),
        };
        let path = event.failure_path();
        let gcs_uri = event.gcs_uri();

        tracing::info!(
            uri = %gcs_uri,
            size = event.object_size_bytes,
            "Processing uploaded file"
        );

        let bytes = match self
            .storage
            .read_object(&event.bucket, &event.object_path)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                return Ok(self.fail(FailureRecord::not_found(e.to_string(), path)).await);
            }
            Err(e) => {
                let reason = format!("Failed to read {}", gcs_uri);
                let record = FailureRecord::api_failure(&reason, Some(&e), path);
                return self.fail_api(record, e).await;
            }
        };

        let document: Value = match serde_json::from_slice(&bytes) {
            Ok(document) => document,
            Err(e) => {
                return Ok(self.fail(FailureRecord::undecodable(e.to_string(), path)).await);
            }
        };

        let Some(resource_type) = find_str(&document, RESOURCE_TYPE_FIELD) else {
            return Ok(self.fail(FailureRecord::missing_resource_type(path)).await);
        };
        let structure = ContentStructure::for_resource_type(resource_type);
        let tags = IdentifierTag::build(&event.path_id);
        let target = resolve(&event.object_path, &document);

        tracing::debug!(
            resource_type,
            version = %target.version,
            site = %target.site,
            explicit = target.version_was_explicit(),
            "Resolved store target"
        );

        let stores = match self.orchestrator.run(structure, &gcs_uri, &target).await {
            ImportOutcome::Success(stores) => stores,
            ImportOutcome::Retryable(failure) => {
                let error = failure
                    .error
                    .clone()
                    .unwrap_or_else(|| ApiError::transport(failure.reason.clone()));
                return self.fail_api(failure.to_record(path), error).await;
            }
            ImportOutcome::Fatal(failure) => {
                return Ok(self.fail(failure.to_record(path)).await);
            }
        };

        match self.dispatcher.dispatch(&document, &stores, &tags).await {
            Ok(tasks_enqueued) => Ok(IngestOutcome::Imported {
                version: stores.version,
                store_id: stores.store_id,
                combined_store_id: stores.combined_store_id,
                tasks_enqueued,
            }),
            Err(e) => Ok(self
                .fail(FailureRecord::enqueue_failed(e.to_string(), path))
                .await),
        }
    }

    /// Report a notification that never reached the pipeline.
    pub async fn reject(&self, record: FailureRecord) -> IngestOutcome {
        self.fail(record).await
    }

    async fn fail(&self, record: FailureRecord) -> IngestOutcome {
        IngestOutcome::Failed(self.reporter.report(record).await)
    }

    /// Report, then surface retryable API errors to the caller.
    async fn fail_api(&self, record: FailureRecord, error: ApiError) -> Result<IngestOutcome> {
        let outcome = self.fail(record).await;
        match Error::from_api(error) {
            retryable @ Error::RetryableApi(_) => Err(retryable),
            _ => Ok(outcome),
        }
    }
}
