use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// FHIR schema versions a store can be provisioned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FhirVersion {
    #[serde(rename = "R4")]
    R4,
    #[serde(rename = "STU3")]
    Stu3,
    #[serde(rename = "DSTU2")]
    Dstu2,
}

impl FhirVersion {
    /// Order in which versions are tried when a file carries no version signal.
    pub const CANDIDATES: [FhirVersion; 3] = [FhirVersion::R4, FhirVersion::Stu3, FhirVersion::Dstu2];

    pub fn as_str(&self) -> &'static str {
        match self {
            FhirVersion::R4 => "R4",
            FhirVersion::Stu3 => "STU3",
            FhirVersion::Dstu2 => "DSTU2",
        }
    }

    /// Parse the exact tag used in file names (`patient.R4.json`). Case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "R4" => Some(FhirVersion::R4),
            "STU3" => Some(FhirVersion::Stu3),
            "DSTU2" => Some(FhirVersion::Dstu2),
            _ => None,
        }
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised FHIR version: {0}")]
pub struct UnknownVersion(pub String);

impl FromStr for FhirVersion {
    type Err = UnknownVersion;

    /// Accepts the release tags (case-insensitive) as well as numeric
    /// `fhirVersion` strings such as `4.0.1`, `3.0.2` or `1.0.2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "R4" => return Ok(FhirVersion::R4),
            "STU3" => return Ok(FhirVersion::Stu3),
            "DSTU2" => return Ok(FhirVersion::Dstu2),
            _ => {}
        }

        let major_minor: Vec<&str> = trimmed.splitn(3, '.').take(2).collect();
        match major_minor.as_slice() {
            ["4", "0"] => Ok(FhirVersion::R4),
            ["3", "0"] => Ok(FhirVersion::Stu3),
            ["1", "0"] => Ok(FhirVersion::Dstu2),
            _ => Err(UnknownVersion(trimmed.to_string())),
        }
    }
}

/// Version resolved for a file, or `Unknown` when no signal was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionTag {
    Known(FhirVersion),
    Unknown,
}

impl VersionTag {
    pub fn is_known(&self) -> bool {
        matches!(self, VersionTag::Known(_))
    }

    /// Versions an import should be attempted against, in order.
    pub fn candidates(&self) -> Vec<FhirVersion> {
        match self {
            VersionTag::Known(version) => vec![*version],
            VersionTag::Unknown => FhirVersion::CANDIDATES.to_vec(),
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionTag::Known(version) => version.fmt(f),
            VersionTag::Unknown => f.write_str("UNKNOWN"),
        }
    }
}
