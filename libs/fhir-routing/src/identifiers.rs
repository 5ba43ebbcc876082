use serde::Serialize;
use serde_json::{json, Value};

/// Platform and site recorded for uploads that do not follow the multi-site layout.
pub const SYNTHETIC_SOURCE: &str = "Synthea";

/// Minimum number of `/`-separated segments in a production upload id.
const SITE_LAYOUT_SEGMENTS: usize = 8;

/// Provenance attached to every resource of an uploaded file.
///
/// Production uploads land under
/// `bucket/collection/.../.../.../platform/site name/participant/...`;
/// anything shorter is treated as synthetic test data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifierTag {
    pub collection: String,
    pub ehr_platform: String,
    pub hpo_site: String,
    pub participant_id: String,
}

impl IdentifierTag {
    /// Derive the tag from an object id such as `bucket/collection/.../file.json/1712345678`.
    pub fn build(path_id: &str) -> Self {
        let segments: Vec<&str> = path_id.split('/').collect();
        let collection = segments.get(1).copied().unwrap_or_default().to_string();

        if segments.len() >= SITE_LAYOUT_SEGMENTS {
            return Self {
                collection,
                ehr_platform: segments[5].to_string(),
                hpo_site: first_token(segments[6]).to_string(),
                participant_id: segments[7].to_string(),
            };
        }

        let last = segments.last().copied().unwrap_or_default();
        let stem = last.strip_suffix(".json").unwrap_or(last);
        let participant_id = stem.rsplit('_').next().unwrap_or(stem);

        Self {
            collection,
            ehr_platform: SYNTHETIC_SOURCE.to_string(),
            hpo_site: SYNTHETIC_SOURCE.to_string(),
            participant_id: participant_id.to_string(),
        }
    }

    /// Identifier values in their fixed order: collection, platform, site, participant.
    pub fn values(&self) -> [String; 4] {
        [
            format!("Collection: {}", self.collection),
            format!("EHR Platform: {}", self.ehr_platform),
            format!("HPO Site: {}", self.hpo_site),
            format!("Participant ID: {}", self.participant_id),
        ]
    }

    /// FHIR `Identifier` elements (`{"value": ...}`) for each tag value.
    pub fn to_identifiers(&self) -> Vec<Value> {
        self.values()
            .into_iter()
            .map(|value| json!({ "value": value }))
            .collect()
    }
}

pub(crate) fn first_token(segment: &str) -> &str {
    segment.split(' ').next().unwrap_or(segment)
}
