//! Data models

pub mod event;
pub mod failure;

pub use event::{failure_path, IngestEvent, MALFORMED_PATH};
pub use failure::{FailureRecord, FailureStatus};
