//! Routing heuristics for FHIR files landing in object storage.
//!
//! Everything in this crate is pure and synchronous: given an object path and
//! the parsed file content it decides
//!
//! - which FHIR schema version the file most likely uses ([`resolve`]),
//! - which per-site and combined FHIR stores it belongs in ([`StoreTarget`]),
//! - which provenance identifiers to stamp onto every resource ([`IdentifierTag`]).
//!
//! Field lookups go through [`find_key`], a first-match-wins search over the
//! document tree whose ordering the version and resource-type detection rely on.

mod document;
mod identifiers;
mod resolver;
mod version;

pub use document::{find_key, find_str, DocumentNode};
pub use identifiers::{IdentifierTag, SYNTHETIC_SOURCE};
pub use resolver::{
    resolve, StoreCandidate, StoreTarget, VersionSource, DATA_FILE_EXTENSION, FALLBACK_SITE,
};
pub use version::{FhirVersion, UnknownVersion, VersionTag};
