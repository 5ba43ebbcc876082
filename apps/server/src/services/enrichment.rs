//! Identifier enrichment fan-out
//!
//! Each imported resource gets the file's identifier tags and is written back
//! through the task queue, once per store.

use crate::clients::FhirStoreApi;
use crate::queue::{EnrichmentTask, QueueSettings, TaskQueue};
use crate::{Error, Result};
use fhirstore_routing::{IdentifierTag, StoreCandidate};
use serde_json::{Map, Value};
use std::sync::Arc;

const IDENTIFIER_FIELD: &str = "identifier";

pub struct EnrichmentDispatcher {
    api: Arc<dyn FhirStoreApi>,
    queue: Arc<dyn TaskQueue>,
    settings: QueueSettings,
}

impl EnrichmentDispatcher {
    pub fn new(api: Arc<dyn FhirStoreApi>, queue: Arc<dyn TaskQueue>, settings: QueueSettings) -> Self {
        Self {
            api,
            queue,
            settings,
        }
    }

    /// Enqueue one write per resource per store and return the number of tasks.
    ///
    /// Any queue failure is reported as [`Error::Enqueue`]; tasks enqueued
    /// before the failure stay queued.
    pub async fn dispatch(
        &self,
        document: &Value,
        stores: &StoreCandidate,
        tags: &IdentifierTag,
    ) -> Result<usize> {
        let resources = tagged_resources(document, tags);
        if resources.is_empty() {
            tracing::warn!(store_id = %stores.store_id, "No identifiable resources in file");
            return Ok(0);
        }

        self.queue
            .ensure_queue(&self.settings)
            .await
            .map_err(into_enqueue_error)?;

        let mut enqueued = 0;
        for resource in &resources {
            for store_id in [&stores.store_id, &stores.combined_store_id] {
                let url = self
                    .api
                    .resource_url(store_id, &resource.resource_type, &resource.id);
                let task = EnrichmentTask::put_resource(url, resource.body.clone());
                self.queue.enqueue(task).await.map_err(into_enqueue_error)?;
                enqueued += 1;
            }
        }

        tracing::info!(
            resources = resources.len(),
            tasks = enqueued,
            queue = %self.settings.name,
            "Queued identifier enrichment"
        );
        Ok(enqueued)
    }
}

fn into_enqueue_error(error: Error) -> Error {
    match error {
        Error::Enqueue(message) => Error::Enqueue(message),
        other => Error::Enqueue(other.to_string()),
    }
}

/// A resource with the identifier tags applied, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResource {
    pub resource_type: String,
    pub id: String,
    pub body: Value,
}

/// Tag every resource in `document`: each bundle entry's `resource`, or the
/// document itself when it is not a bundle.
///
/// An existing `identifier` array is appended to without deduplication; a
/// missing or non-array `identifier` is replaced by the tags. Resources without
/// a `resourceType` or `id` are skipped.
pub fn tagged_resources(document: &Value, tags: &IdentifierTag) -> Vec<TaggedResource> {
    let is_bundle = document
        .get("resourceType")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("bundle"));

    let resources: Vec<&Map<String, Value>> = if is_bundle {
        document
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource").and_then(Value::as_object))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        document.as_object().into_iter().collect()
    };

    resources
        .into_iter()
        .filter_map(|resource| tag_resource(resource, tags))
        .collect()
}

fn tag_resource(resource: &Map<String, Value>, tags: &IdentifierTag) -> Option<TaggedResource> {
    let resource_type = resource.get("resourceType").and_then(Value::as_str);
    let id = resource.get("id").and_then(Value::as_str);
    let (Some(resource_type), Some(id)) = (resource_type, id) else {
        tracing::warn!(
            resource_type = resource_type.unwrap_or("<missing>"),
            id = id.unwrap_or("<missing>"),
            "Skipping resource without type or id"
        );
        return None;
    };

    let mut body = resource.clone();
    match body.get_mut(IDENTIFIER_FIELD) {
        Some(Value::Array(existing)) => existing.extend(tags.to_identifiers()),
        _ => {
            body.insert(
                IDENTIFIER_FIELD.to_string(),
                Value::Array(tags.to_identifiers()),
            );
        }
    }

    Some(TaggedResource {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        body: Value::Object(body),
    })
}
