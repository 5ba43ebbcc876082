//! Object storage reads

use super::{ApiError, GcpHttp};
use async_trait::async_trait;
use reqwest::Method;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the full contents of `bucket/name`.
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ApiError>;
}

/// Cloud Storage JSON API client (media download).
pub struct GcsClient {
    http: GcpHttp,
    base_url: String,
}

impl GcsClient {
    pub fn new(http: GcpHttp, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(name)
        )
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.object_url(bucket, name);
        let request = self
            .http
            .request(Method::GET, &url)
            .query(&[("alt", "media")]);
        let response = self.http.send(request).await?;
        let bytes = response.bytes().await?;
        tracing::debug!(bucket, name, bytes = bytes.len(), "Downloaded object");
        Ok(bytes.to_vec())
    }
}
