//! Business logic layer
//!
//! Services sit between the trigger surface and the external clients and own
//! the ingestion rules: import ordering, retry classification, enrichment
//! fan-out and failure reporting.

pub mod enrichment;
pub mod failure;
pub mod import;
pub mod ingest;

pub use enrichment::{tagged_resources, EnrichmentDispatcher, TaggedResource};
pub use failure::{Delivery, FailureReport, FailureReporter};
pub use import::{ImportFailure, ImportOrchestrator, ImportOutcome, NO_CANDIDATE_ACCEPTED};
pub use ingest::{IngestOutcome, IngestService};
