//! Pub/Sub publishing for failure records

use super::{ApiError, GcpHttp};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message and return its server-assigned id.
    async fn publish(&self, payload: &[u8]) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

pub struct PubSubClient {
    http: GcpHttp,
    publish_url: String,
}

impl PubSubClient {
    pub fn new(http: GcpHttp, base_url: &str, project_id: &str, topic: &str) -> Self {
        Self {
            http,
            publish_url: format!(
                "{}/v1/projects/{}/topics/{}:publish",
                base_url.trim_end_matches('/'),
                project_id,
                topic
            ),
        }
    }
}

#[async_trait]
impl MessageBus for PubSubClient {
    async fn publish(&self, payload: &[u8]) -> Result<String, ApiError> {
        let request = self
            .http
            .request(Method::POST, &self.publish_url)
            .json(&json!({
                "messages": [{ "data": BASE64.encode(payload) }]
            }));
        let response = self.http.send(request).await?;
        let body: PublishResponse = response.json().await?;
        body.message_ids
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::transport("publish response carried no message id"))
    }
}

/// Bus used when no failure topic is configured. Messages only reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyBus;

#[async_trait]
impl MessageBus for LogOnlyBus {
    async fn publish(&self, payload: &[u8]) -> Result<String, ApiError> {
        tracing::warn!(
            message = %String::from_utf8_lossy(payload),
            "No failure topic configured; failure record logged only"
        );
        Ok("log-only".to_string())
    }
}
