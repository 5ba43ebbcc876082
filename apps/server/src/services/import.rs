//! Dataset/store provisioning and file import
//!
//! Every create call treats "already exists" as success, so concurrent runs
//! against the same stores are safe. Failures are split into:
//! - retryable (429/500/503, transport): returned at once so the trigger redelivers,
//! - anything else: fatal when the version was explicit, otherwise the next
//!   candidate version is tried.

use crate::clients::{ApiError, ContentStructure, FhirStoreApi};
use crate::models::FailureRecord;
use fhirstore_routing::{FhirVersion, StoreCandidate, StoreTarget};
use std::sync::Arc;

pub const NO_CANDIDATE_ACCEPTED: &str = "no candidate FHIR version accepted the import";

/// A failed provisioning or import step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    /// Which step failed, e.g. `Failed to post to fhir-nyc-R4`.
    pub reason: String,
    pub error: Option<ApiError>,
}

impl ImportFailure {
    fn new(reason: String, error: ApiError) -> Self {
        Self {
            reason,
            error: Some(error),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(ApiError::is_retryable)
    }

    pub fn to_record(&self, path: String) -> FailureRecord {
        FailureRecord::api_failure(&self.reason, self.error.as_ref(), path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Both the per-site and combined imports succeeded for this candidate.
    Success(StoreCandidate),
    Retryable(ImportFailure),
    Fatal(ImportFailure),
}

pub struct ImportOrchestrator {
    api: Arc<dyn FhirStoreApi>,
}

impl ImportOrchestrator {
    pub fn new(api: Arc<dyn FhirStoreApi>) -> Self {
        Self { api }
    }

    /// Import `gcs_uri` into the stores of `target`.
    pub async fn run(
        &self,
        structure: ContentStructure,
        gcs_uri: &str,
        target: &StoreTarget,
    ) -> ImportOutcome {
        self.run_candidates(
            structure,
            gcs_uri,
            &target.candidates(),
            target.version_was_explicit(),
        )
        .await
    }

    /// Try `candidates` in order and stop at the first that imports into both stores.
    ///
    /// With `version_was_explicit`, a non-retryable failure ends the run as fatal
    /// instead of moving on to the next candidate.
    pub async fn run_candidates(
        &self,
        structure: ContentStructure,
        gcs_uri: &str,
        candidates: &[StoreCandidate],
        version_was_explicit: bool,
    ) -> ImportOutcome {
        if let Err(failure) = self.ensure_dataset().await {
            return if failure.is_retryable() {
                ImportOutcome::Retryable(failure)
            } else {
                ImportOutcome::Fatal(failure)
            };
        }

        let mut last_failure: Option<ImportFailure> = None;
        for candidate in candidates {
            match self.import_candidate(candidate, structure, gcs_uri).await {
                Ok(()) => {
                    tracing::info!(
                        version = %candidate.version,
                        store_id = %candidate.store_id,
                        combined_store_id = %candidate.combined_store_id,
                        uri = gcs_uri,
                        "Imported file"
                    );
                    return ImportOutcome::Success(candidate.clone());
                }
                Err(failure) if failure.is_retryable() => {
                    return ImportOutcome::Retryable(failure);
                }
                Err(failure) if version_was_explicit => {
                    return ImportOutcome::Fatal(failure);
                }
                Err(failure) => {
                    tracing::warn!(
                        version = %candidate.version,
                        reason = %failure.reason,
                        "Candidate version rejected, trying next"
                    );
                    last_failure = Some(failure);
                }
            }
        }

        ImportOutcome::Fatal(ImportFailure {
            reason: NO_CANDIDATE_ACCEPTED.to_string(),
            error: last_failure.and_then(|f| f.error),
        })
    }

    async fn ensure_dataset(&self) -> Result<(), ImportFailure> {
        let dataset_id = &self.api.dataset().dataset_id;
        match self.api.create_dataset().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(dataset = %dataset_id, "FHIR dataset exists already");
                Ok(())
            }
            Err(e) => Err(ImportFailure::new(
                format!("Failed to create dataset {}", dataset_id),
                e,
            )),
        }
    }

    async fn ensure_store(&self, store_id: &str, version: FhirVersion) -> Result<(), ImportFailure> {
        match self.api.create_fhir_store(store_id, version).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(store_id, "FHIR store exists already");
                Ok(())
            }
            Err(e) => Err(ImportFailure::new(
                format!("Failed to create {}", store_id),
                e,
            )),
        }
    }

    async fn import_into(
        &self,
        store_id: &str,
        version: FhirVersion,
        structure: ContentStructure,
        gcs_uri: &str,
    ) -> Result<(), ImportFailure> {
        self.ensure_store(store_id, version).await?;
        self.api
            .import_resources(store_id, structure, gcs_uri)
            .await
            .map_err(|e| ImportFailure::new(format!("Failed to post to {}", store_id), e))
    }

    async fn import_candidate(
        &self,
        candidate: &StoreCandidate,
        structure: ContentStructure,
        gcs_uri: &str,
    ) -> Result<(), ImportFailure> {
        self.import_into(&candidate.store_id, candidate.version, structure, gcs_uri)
            .await?;
        self.import_into(
            &candidate.combined_store_id,
            candidate.version,
            structure,
            gcs_uri,
        )
        .await
    }
}
