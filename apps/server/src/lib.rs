//! FHIR file ingestion service
//!
//! Routes FHIR files dropped into object storage into per-site and combined
//! FHIR stores, then queues identifier enrichment for every imported resource
//! so the high-fanout resource writes are rate limited by the queue instead of
//! the import path.

pub mod api;
pub mod clients;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod queue;
pub mod services;
pub mod state;
pub mod workers;

pub use error::{Error, Result};
