//! Store resolution for uploaded files.

use crate::document::find_str;
use crate::identifiers::first_token;
use crate::version::{FhirVersion, VersionTag};
use serde_json::Value;

/// Extension every ingestible object name carries.
pub const DATA_FILE_EXTENSION: &str = ".json";

/// Site used in store ids when the object name has no site segment.
pub const FALLBACK_SITE: &str = "synthea";

/// Index of the site segment in an object name.
const SITE_SEGMENT: usize = 6;

/// Field a document may use to declare its version.
const VERSION_FIELD: &str = "FHIRVersion";

/// Directory names that pin the version of everything beneath them.
/// Checked in this order.
const PATH_MARKERS: [(&str, FhirVersion); 3] = [
    ("fhir", FhirVersion::R4),
    ("fhir_dstu2", FhirVersion::Dstu2),
    ("fhir_stu3", FhirVersion::Stu3),
];

/// Which signal produced the resolved version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    Document,
    FileName,
    PathMarker,
    None,
}

/// Destination of an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTarget {
    pub version: VersionTag,
    pub source: VersionSource,
    pub site: String,
}

/// One concrete version to import into, with its store ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCandidate {
    pub version: FhirVersion,
    pub store_id: String,
    pub combined_store_id: String,
}

impl StoreCandidate {
    pub fn new(site: &str, version: FhirVersion) -> Self {
        Self {
            version,
            store_id: format!("fhir-{}-{}", site, version),
            combined_store_id: format!("fhir-combined-{}", version),
        }
    }
}

impl StoreTarget {
    /// True when the version came from the file itself rather than being guessed.
    pub fn version_was_explicit(&self) -> bool {
        self.version.is_known()
    }

    pub fn store_id(&self) -> Option<String> {
        match self.version {
            VersionTag::Known(version) => Some(StoreCandidate::new(&self.site, version).store_id),
            VersionTag::Unknown => None,
        }
    }

    pub fn combined_store_id(&self) -> Option<String> {
        match self.version {
            VersionTag::Known(version) => {
                Some(StoreCandidate::new(&self.site, version).combined_store_id)
            }
            VersionTag::Unknown => None,
        }
    }

    /// Stores to try, in order. A single entry when the version is known.
    pub fn candidates(&self) -> Vec<StoreCandidate> {
        self.version
            .candidates()
            .into_iter()
            .map(|version| StoreCandidate::new(&self.site, version))
            .collect()
    }
}

/// Decide which FHIR version and stores an object belongs to.
///
/// Resolution order, first match wins:
/// 1. a `FHIRVersion` field in the document,
/// 2. a version tag before the extension (`patient.STU3.json`),
/// 3. a `fhir`, `fhir_dstu2` or `fhir_stu3` directory in the object name,
/// 4. otherwise [`VersionTag::Unknown`].
///
/// A `FHIRVersion` value that does not name a supported release is ignored.
pub fn resolve(object_name: &str, document: &Value) -> StoreTarget {
    let site = site_from_name(object_name);

    if let Some(version) = find_str(document, VERSION_FIELD).and_then(|v| v.parse().ok()) {
        return StoreTarget {
            version: VersionTag::Known(version),
            source: VersionSource::Document,
            site,
        };
    }

    let Some(stem) = object_name.strip_suffix(DATA_FILE_EXTENSION) else {
        return StoreTarget {
            version: VersionTag::Unknown,
            source: VersionSource::None,
            site,
        };
    };

    let name_tag = stem.rsplit('.').next().unwrap_or(stem);
    if let Some(version) = FhirVersion::from_tag(name_tag) {
        return StoreTarget {
            version: VersionTag::Known(version),
            source: VersionSource::FileName,
            site,
        };
    }

    let segments: Vec<&str> = stem.split('/').collect();
    for (marker, version) in PATH_MARKERS {
        if segments.contains(&marker) {
            return StoreTarget {
                version: VersionTag::Known(version),
                source: VersionSource::PathMarker,
                site,
            };
        }
    }

    StoreTarget {
        version: VersionTag::Unknown,
        source: VersionSource::None,
        site,
    }
}

fn site_from_name(object_name: &str) -> String {
    object_name
        .split('/')
        .nth(SITE_SEGMENT)
        .map(first_token)
        .unwrap_or(FALLBACK_SITE)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SITE_NAME: &str = "collection/2023/batch/upload/x/Epic/nyc health/P1/Patient_1.json";

    #[test]
    fn document_version_wins_over_name_and_path() {
        let doc = json!({"resourceType": "Patient", "FHIRVersion": "DSTU2"});
        let target = resolve("synthea/fhir/patient.STU3.json", &doc);
        assert_eq!(target.version, VersionTag::Known(FhirVersion::Dstu2));
        assert_eq!(target.source, VersionSource::Document);
    }

    #[test]
    fn file_name_tag_is_used_without_version_field() {
        for (name, expected) in [
            ("a/b/patient.R4.json", FhirVersion::R4),
            ("a/b/patient.STU3.json", FhirVersion::Stu3),
            ("a/b/patient.DSTU2.json", FhirVersion::Dstu2),
        ] {
            let target = resolve(name, &json!({"resourceType": "Patient"}));
            assert_eq!(target.version, VersionTag::Known(expected), "{name}");
            assert_eq!(target.source, VersionSource::FileName);
        }
    }

    #[test]
    fn path_markers_map_to_versions() {
        let doc = json!({"resourceType": "Bundle"});
        assert_eq!(
            resolve("synthea_mg/fhir_dstu2/blah.json", &doc).version,
            VersionTag::Known(FhirVersion::Dstu2)
        );
        assert_eq!(
            resolve("synthea_mg/fhir_stu3/blah.json", &doc).version,
            VersionTag::Known(FhirVersion::Stu3)
        );
        assert_eq!(
            resolve("synthea_mg/fhir/blah.json", &doc).version,
            VersionTag::Known(FhirVersion::R4)
        );
    }

    #[test]
    fn plain_fhir_marker_takes_priority_over_versioned_markers() {
        let target = resolve("fhir_stu3/fhir/blah.json", &json!({}));
        assert_eq!(target.version, VersionTag::Known(FhirVersion::R4));
        assert_eq!(target.source, VersionSource::PathMarker);
    }

    #[test]
    fn markers_must_be_whole_segments() {
        let target = resolve("myfhir_dstu2x/blah.json", &json!({}));
        assert_eq!(target.version, VersionTag::Unknown);
    }

    #[test]
    fn no_signal_is_unknown_with_all_candidates() {
        let target = resolve("uploads/patient.json", &json!({"resourceType": "Patient"}));
        assert_eq!(target.version, VersionTag::Unknown);
        assert!(!target.version_was_explicit());
        assert_eq!(target.store_id(), None);
        let versions: Vec<_> = target.candidates().iter().map(|c| c.version).collect();
        assert_eq!(versions, FhirVersion::CANDIDATES.to_vec());
    }

    #[test]
    fn unsupported_document_version_falls_through() {
        let doc = json!({"FHIRVersion": "R5"});
        let target = resolve("a/patient.STU3.json", &doc);
        assert_eq!(target.version, VersionTag::Known(FhirVersion::Stu3));
        assert_eq!(target.source, VersionSource::FileName);
    }

    #[test]
    fn non_json_names_skip_name_and_path_rules() {
        let target = resolve("fhir/patient.R4.ndjson", &json!({}));
        assert_eq!(target.version, VersionTag::Unknown);
    }

    #[test]
    fn site_comes_from_seventh_segment_first_token() {
        let target = resolve(SITE_NAME, &json!({"FHIRVersion": "R4"}));
        assert_eq!(target.site, "nyc");
        assert_eq!(target.store_id().as_deref(), Some("fhir-nyc-R4"));
        let target = resolve("a/b/c/d/e/f/nyc health/file.R4.json", &json!({}));
        assert_eq!(target.site, "nyc");
        assert_eq!(target.store_id().as_deref(), Some("fhir-nyc-R4"));
        assert_eq!(target.combined_store_id().as_deref(), Some("fhir-combined-R4"));
    }

    #[test]
    fn short_names_use_fallback_site() {
        let target = resolve("synthea/fhir/p.json", &json!({}));
        assert_eq!(target.site, FALLBACK_SITE);
        assert_eq!(target.store_id().as_deref(), Some("fhir-synthea-R4"));
    }

    #[test]
    fn candidate_ids_follow_naming_scheme() {
        let candidate = StoreCandidate::new("bos", FhirVersion::Stu3);
        assert_eq!(candidate.store_id, "fhir-bos-STU3");
        assert_eq!(candidate.combined_store_id, "fhir-combined-STU3");
    }
}
