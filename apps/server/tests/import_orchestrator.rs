#![allow(unused)]

mod support;

use fhirstore_ingest::clients::{ApiError, ContentStructure};
use fhirstore_ingest::services::{ImportOrchestrator, ImportOutcome, NO_CANDIDATE_ACCEPTED};
use fhirstore_routing::{FhirVersion, StoreCandidate, StoreTarget, VersionSource, VersionTag};
use std::sync::Arc;
use support::*;

const URI: &str = "gs://site-uploads/nyc/patient.json";

fn explicit(version: FhirVersion) -> StoreTarget {
    StoreTarget {
        version: VersionTag::Known(version),
        source: VersionSource::Document,
        site: "nyc".to_string(),
    }
}

fn guessed() -> StoreTarget {
    StoreTarget {
        version: VersionTag::Unknown,
        source: VersionSource::None,
        site: "nyc".to_string(),
    }
}

async fn run(store: &Arc<FakeFhirStore>, target: &StoreTarget) -> ImportOutcome {
    ImportOrchestrator::new(store.clone())
        .run(ContentStructure::ResourcePretty, URI, target)
        .await
}

#[tokio::test]
async fn explicit_version_provisions_and_imports_both_stores() -> anyhow::Result<()> {
    let store = Arc::new(FakeFhirStore::new());

    let outcome = run(&store, &explicit(FhirVersion::R4)).await;

    assert_eq!(
        outcome,
        ImportOutcome::Success(StoreCandidate::new("nyc", FhirVersion::R4))
    );
    assert_eq!(
        store.calls(),
        vec![
            StoreCall::CreateDataset,
            StoreCall::CreateStore {
                store_id: "fhir-nyc-R4".to_string(),
                version: FhirVersion::R4,
            },
            StoreCall::Import {
                store_id: "fhir-nyc-R4".to_string(),
                structure: ContentStructure::ResourcePretty,
                uri: URI.to_string(),
            },
            StoreCall::CreateStore {
                store_id: "fhir-combined-R4".to_string(),
                version: FhirVersion::R4,
            },
            StoreCall::Import {
                store_id: "fhir-combined-R4".to_string(),
                structure: ContentStructure::ResourcePretty,
                uri: URI.to_string(),
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn existing_dataset_and_stores_are_not_errors() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new()
            .with_existing_dataset()
            .with_existing_store("fhir-nyc-STU3")
            .with_existing_store("fhir-combined-STU3"),
    );

    let outcome = run(&store, &explicit(FhirVersion::Stu3)).await;

    assert!(matches!(outcome, ImportOutcome::Success(_)));
    assert_eq!(
        store.imported_stores(),
        vec!["fhir-nyc-STU3", "fhir-combined-STU3"]
    );
    Ok(())
}

#[tokio::test]
async fn rate_limited_import_is_retryable_and_stops() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new().fail_import("fhir-nyc-R4", ApiError::status(429, "quota exceeded")),
    );

    let outcome = run(&store, &explicit(FhirVersion::R4)).await;

    let ImportOutcome::Retryable(failure) = outcome else {
        panic!("expected a retryable outcome, got {outcome:?}");
    };
    assert_eq!(failure.reason, "Failed to post to fhir-nyc-R4");
    assert_eq!(failure.error.as_ref().and_then(|e| e.status), Some(429));
    assert_eq!(store.imported_stores(), vec!["fhir-nyc-R4"]);
    Ok(())
}

#[tokio::test]
async fn guessed_version_does_not_move_on_after_retryable_failure() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new().fail_import("fhir-nyc-R4", ApiError::transport("connection reset")),
    );

    let outcome = run(&store, &guessed()).await;

    assert!(matches!(outcome, ImportOutcome::Retryable(_)));
    assert_eq!(store.imported_stores(), vec!["fhir-nyc-R4"]);
    Ok(())
}

#[tokio::test]
async fn explicit_version_rejection_is_fatal() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new().fail_import("fhir-nyc-R4", ApiError::status(400, "invalid resource")),
    );

    let outcome = run(&store, &explicit(FhirVersion::R4)).await;

    let ImportOutcome::Fatal(failure) = outcome else {
        panic!("expected a fatal outcome, got {outcome:?}");
    };
    assert_eq!(failure.reason, "Failed to post to fhir-nyc-R4");
    let record = failure.to_record("site-uploads/nyc".to_string());
    assert_eq!(record.reason, "Failed to post to fhir-nyc-R4. 400");
    assert_eq!(record.status_code, 400);
    assert_eq!(store.imported_stores(), vec!["fhir-nyc-R4"]);
    Ok(())
}

#[tokio::test]
async fn guessed_version_falls_through_to_next_candidate() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new().fail_import("fhir-nyc-R4", ApiError::status(400, "wrong version")),
    );

    let outcome = run(&store, &guessed()).await;

    assert_eq!(
        outcome,
        ImportOutcome::Success(StoreCandidate::new("nyc", FhirVersion::Stu3))
    );
    assert_eq!(
        store.imported_stores(),
        vec!["fhir-nyc-R4", "fhir-nyc-STU3", "fhir-combined-STU3"]
    );
    Ok(())
}

#[tokio::test]
async fn combined_store_rejection_also_moves_to_next_candidate() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new()
            .fail_import("fhir-combined-R4", ApiError::status(422, "unprocessable")),
    );

    let outcome = run(&store, &guessed()).await;

    assert_eq!(
        outcome,
        ImportOutcome::Success(StoreCandidate::new("nyc", FhirVersion::Stu3))
    );
    // The site import of the rejected candidate is not rolled back.
    assert_eq!(
        store.imported_stores(),
        vec![
            "fhir-nyc-R4",
            "fhir-combined-R4",
            "fhir-nyc-STU3",
            "fhir-combined-STU3"
        ]
    );
    Ok(())
}

#[tokio::test]
async fn store_creation_failure_counts_as_candidate_rejection() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new()
            .fail_create_store("fhir-nyc-R4", ApiError::status(400, "bad config"))
            .fail_create_store("fhir-nyc-STU3", ApiError::status(400, "bad config")),
    );

    let outcome = run(&store, &guessed()).await;

    assert_eq!(
        outcome,
        ImportOutcome::Success(StoreCandidate::new("nyc", FhirVersion::Dstu2))
    );
    assert_eq!(
        store.imported_stores(),
        vec!["fhir-nyc-DSTU2", "fhir-combined-DSTU2"]
    );
    Ok(())
}

#[tokio::test]
async fn every_candidate_rejected_is_fatal_with_last_error() -> anyhow::Result<()> {
    let store = Arc::new(
        FakeFhirStore::new()
            .fail_import("fhir-nyc-R4", ApiError::status(400, "r4 says no"))
            .fail_import("fhir-nyc-STU3", ApiError::status(400, "stu3 says no"))
            .fail_import("fhir-nyc-DSTU2", ApiError::status(404, "dstu2 says no")),
    );

    let outcome = run(&store, &guessed()).await;

    let ImportOutcome::Fatal(failure) = outcome else {
        panic!("expected a fatal outcome, got {outcome:?}");
    };
    assert_eq!(failure.reason, NO_CANDIDATE_ACCEPTED);
    assert_eq!(
        failure.error,
        Some(ApiError::status(404, "dstu2 says no"))
    );
    assert_eq!(
        store.imported_stores(),
        vec!["fhir-nyc-R4", "fhir-nyc-STU3", "fhir-nyc-DSTU2"]
    );
    Ok(())
}

#[tokio::test]
async fn dataset_failures_are_classified_regardless_of_version() -> anyhow::Result<()> {
    let denied = Arc::new(FakeFhirStore::new().fail_dataset(ApiError::status(403, "denied")));
    let outcome = run(&denied, &guessed()).await;
    let ImportOutcome::Fatal(failure) = outcome else {
        panic!("expected a fatal outcome, got {outcome:?}");
    };
    assert_eq!(failure.reason, format!("Failed to create dataset {DATASET}"));
    assert!(denied.imported_stores().is_empty());

    let unavailable =
        Arc::new(FakeFhirStore::new().fail_dataset(ApiError::status(503, "unavailable")));
    let outcome = run(&unavailable, &explicit(FhirVersion::R4)).await;
    assert!(matches!(outcome, ImportOutcome::Retryable(_)));
    assert!(unavailable.imported_stores().is_empty());
    Ok(())
}

#[tokio::test]
async fn bundles_are_imported_as_bundles() -> anyhow::Result<()> {
    let store = Arc::new(FakeFhirStore::new());

    let outcome = ImportOrchestrator::new(store.clone())
        .run(ContentStructure::BundlePretty, URI, &explicit(FhirVersion::R4))
        .await;

    assert!(matches!(outcome, ImportOutcome::Success(_)));
    let structures: Vec<ContentStructure> = store
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            StoreCall::Import { structure, .. } => Some(structure),
            _ => None,
        })
        .collect();
    assert_eq!(
        structures,
        vec![ContentStructure::BundlePretty, ContentStructure::BundlePretty]
    );
    Ok(())
}
