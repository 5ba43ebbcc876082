//! Cloud Healthcare API client for FHIR datasets and stores

use super::{ApiError, GcpHttp};
use crate::config::Config;
use async_trait::async_trait;
use fhirstore_routing::FhirVersion;
use reqwest::Method;
use serde::Serialize;
use serde_json::json;

/// How the import call should interpret the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentStructure {
    #[serde(rename = "BUNDLE_PRETTY")]
    BundlePretty,
    #[serde(rename = "RESOURCE_PRETTY")]
    ResourcePretty,
}

impl ContentStructure {
    /// Bundles (any casing of `Bundle`) import as bundles, everything else as a single resource.
    pub fn for_resource_type(resource_type: &str) -> Self {
        if resource_type.eq_ignore_ascii_case("bundle") {
            ContentStructure::BundlePretty
        } else {
            ContentStructure::ResourcePretty
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentStructure::BundlePretty => "BUNDLE_PRETTY",
            ContentStructure::ResourcePretty => "RESOURCE_PRETTY",
        }
    }
}

/// Fully-qualified location of the FHIR dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRef {
    pub project_id: String,
    pub location: String,
    pub dataset_id: String,
}

impl DatasetRef {
    pub fn from_config(config: &Config) -> Self {
        Self {
            project_id: config.gcp.project_id.clone(),
            location: config.healthcare.dataset_location.clone(),
            dataset_id: config.healthcare.dataset_id.clone(),
        }
    }

    /// `projects/{p}/locations/{l}`
    pub fn parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project_id, self.location)
    }

    /// `projects/{p}/locations/{l}/datasets/{d}`
    pub fn path(&self) -> String {
        format!("{}/datasets/{}", self.parent(), self.dataset_id)
    }

    /// `projects/{p}/locations/{l}/datasets/{d}/fhirStores/{s}`
    pub fn store_path(&self, store_id: &str) -> String {
        format!("{}/fhirStores/{}", self.path(), store_id)
    }
}

/// Provisioning and import operations against FHIR stores.
///
/// Create calls return an [`ApiError`] with status 409 when the target already
/// exists; callers decide whether that is a success.
#[async_trait]
pub trait FhirStoreApi: Send + Sync {
    fn dataset(&self) -> &DatasetRef;

    async fn create_dataset(&self) -> Result<(), ApiError>;

    async fn create_fhir_store(&self, store_id: &str, version: FhirVersion)
        -> Result<(), ApiError>;

    async fn import_resources(
        &self,
        store_id: &str,
        structure: ContentStructure,
        gcs_uri: &str,
    ) -> Result<(), ApiError>;

    /// REST URL of one resource inside a store.
    fn resource_url(&self, store_id: &str, resource_type: &str, resource_id: &str) -> String;
}

pub struct HealthcareClient {
    http: GcpHttp,
    api_root: String,
    dataset: DatasetRef,
}

impl HealthcareClient {
    pub fn new(http: GcpHttp, base_url: &str, api_version: &str, dataset: DatasetRef) -> Self {
        Self {
            http,
            api_root: format!("{}/{}", base_url.trim_end_matches('/'), api_version),
            dataset,
        }
    }

    pub fn from_config(http: GcpHttp, config: &Config) -> Self {
        Self::new(
            http,
            &config.healthcare.base_url,
            &config.healthcare.api_version,
            DatasetRef::from_config(config),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_root, path)
    }
}

#[async_trait]
impl FhirStoreApi for HealthcareClient {
    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    async fn create_dataset(&self) -> Result<(), ApiError> {
        let url = self.url(&format!("{}/datasets", self.dataset.parent()));
        let request = self
            .http
            .request(Method::POST, &url)
            .query(&[("datasetId", self.dataset.dataset_id.as_str())])
            .json(&json!({}));
        self.http.send(request).await?;
        tracing::info!(dataset = %self.dataset.dataset_id, "Created FHIR dataset");
        Ok(())
    }

    async fn create_fhir_store(
        &self,
        store_id: &str,
        version: FhirVersion,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("{}/fhirStores", self.dataset.path()));
        let request = self
            .http
            .request(Method::POST, &url)
            .query(&[("fhirStoreId", store_id)])
            .json(&json!({
                "version": version.as_str(),
                "enableUpdateCreate": true,
                "disableReferentialIntegrity": true,
            }));
        self.http.send(request).await?;
        tracing::info!(store_id, %version, "Created FHIR store");
        Ok(())
    }

    async fn import_resources(
        &self,
        store_id: &str,
        structure: ContentStructure,
        gcs_uri: &str,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("{}:import", self.dataset.store_path(store_id)));
        let request = self.http.request(Method::POST, &url).json(&json!({
            "contentStructure": structure,
            "gcsSource": { "uri": gcs_uri },
        }));
        self.http.send(request).await?;
        Ok(())
    }

    fn resource_url(&self, store_id: &str, resource_type: &str, resource_id: &str) -> String {
        self.url(&format!(
            "{}/fhir/{}/{}",
            self.dataset.store_path(store_id),
            resource_type,
            resource_id
        ))
    }
}
