//! Shared fakes and helpers for integration tests.

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use fhirstore_ingest::api::create_router;
use fhirstore_ingest::clients::{
    ApiError, ContentStructure, DatasetRef, FhirStoreApi, MessageBus, ObjectStore,
};
use fhirstore_ingest::config::Config;
use fhirstore_ingest::queue::{
    EnrichmentTask, MemoryTaskQueue, QueueSettings, QueuedTask, TaskQueue,
};
use fhirstore_ingest::state::{AppState, Collaborators};
use fhirstore_routing::FhirVersion;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

pub const PROJECT: &str = "aou-curation";
pub const LOCATION: &str = "us-central1";
pub const DATASET: &str = "site-fhir";
pub const QUEUE: &str = "fhir-identify";

pub fn test_config() -> Config {
    Config::for_project(PROJECT, LOCATION, DATASET)
}

// ============================================================================
// FHIR store fake
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateDataset,
    CreateStore {
        store_id: String,
        version: FhirVersion,
    },
    Import {
        store_id: String,
        structure: ContentStructure,
        uri: String,
    },
}

#[derive(Default)]
struct FakeStoreState {
    dataset_exists: bool,
    stores: HashSet<String>,
    dataset_failure: Option<ApiError>,
    create_failures: HashMap<String, ApiError>,
    import_failures: HashMap<String, ApiError>,
    calls: Vec<StoreCall>,
}

/// In-memory FHIR store API. Creating something twice answers 409.
pub struct FakeFhirStore {
    dataset: DatasetRef,
    state: Mutex<FakeStoreState>,
}

impl Default for FakeFhirStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFhirStore {
    pub fn new() -> Self {
        Self {
            dataset: DatasetRef {
                project_id: PROJECT.to_string(),
                location: LOCATION.to_string(),
                dataset_id: DATASET.to_string(),
            },
            state: Mutex::new(FakeStoreState::default()),
        }
    }

    pub fn with_existing_dataset(self) -> Self {
        self.state.lock().unwrap().dataset_exists = true;
        self
    }

    pub fn with_existing_store(self, store_id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .stores
            .insert(store_id.to_string());
        self
    }

    pub fn fail_dataset(self, error: ApiError) -> Self {
        self.state.lock().unwrap().dataset_failure = Some(error);
        self
    }

    pub fn fail_create_store(self, store_id: &str, error: ApiError) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(store_id.to_string(), error);
        self
    }

    pub fn fail_import(self, store_id: &str, error: ApiError) -> Self {
        self.state
            .lock()
            .unwrap()
            .import_failures
            .insert(store_id.to_string(), error);
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Store ids that received an import call, in call order.
    pub fn imported_stores(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Import { store_id, .. } => Some(store_id),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl FhirStoreApi for FakeFhirStore {
    fn dataset(&self) -> &DatasetRef {
        &self.dataset
    }

    async fn create_dataset(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::CreateDataset);
        if let Some(error) = &state.dataset_failure {
            return Err(error.clone());
        }
        if state.dataset_exists {
            return Err(ApiError::status(409, "Dataset already exists"));
        }
        state.dataset_exists = true;
        Ok(())
    }

    async fn create_fhir_store(
        &self,
        store_id: &str,
        version: FhirVersion,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::CreateStore {
            store_id: store_id.to_string(),
            version,
        });
        if let Some(error) = state.create_failures.get(store_id) {
            return Err(error.clone());
        }
        if !state.stores.insert(store_id.to_string()) {
            return Err(ApiError::status(409, "FHIR store already exists"));
        }
        Ok(())
    }

    async fn import_resources(
        &self,
        store_id: &str,
        structure: ContentStructure,
        gcs_uri: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Import {
            store_id: store_id.to_string(),
            structure,
            uri: gcs_uri.to_string(),
        });
        match state.import_failures.get(store_id) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn resource_url(&self, store_id: &str, resource_type: &str, resource_id: &str) -> String {
        format!(
            "https://healthcare.test/v1/{}/fhir/{}/{}",
            self.dataset.store_path(store_id),
            resource_type,
            resource_id
        )
    }
}

// ============================================================================
// Object store fake
// ============================================================================

#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<(String, String), Result<Vec<u8>, ApiError>>>,
}

impl FakeObjectStore {
    pub fn put(&self, bucket: &str, name: &str, contents: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), name.to_string()), Ok(contents.into()));
    }

    pub fn put_json(&self, bucket: &str, name: &str, document: &Value) {
        self.put(bucket, name, serde_json::to_vec(document).unwrap());
    }

    pub fn fail(&self, bucket: &str, name: &str, error: ApiError) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), name.to_string()), Err(error));
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Vec<u8>, ApiError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| Err(ApiError::status(404, format!("No such object: {bucket}/{name}"))))
    }
}

// ============================================================================
// Message bus fake
// ============================================================================

#[derive(Default)]
pub struct RecordingBus {
    messages: Mutex<Vec<Value>>,
    failure: Mutex<Option<ApiError>>,
}

impl RecordingBus {
    pub fn failing(error: ApiError) -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(error)),
        }
    }

    /// Decoded envelopes, in publish order.
    pub fn messages(&self) -> Vec<Value> {
        self.messages.lock().unwrap().clone()
    }

    /// The failure records inside the envelopes.
    pub fn records(&self) -> Vec<Value> {
        self.messages()
            .into_iter()
            .map(|m| m["data"]["message"].clone())
            .collect()
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, payload: &[u8]) -> Result<String, ApiError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let message: Value = serde_json::from_slice(payload)
            .map_err(|e| ApiError::status(400, e.to_string()))?;
        let mut messages = self.messages.lock().unwrap();
        messages.push(message);
        Ok(format!("msg-{}", messages.len()))
    }
}

// ============================================================================
// Queue that is always down
// ============================================================================

pub struct UnavailableQueue;

#[async_trait]
impl TaskQueue for UnavailableQueue {
    async fn ensure_queue(&self, _settings: &QueueSettings) -> fhirstore_ingest::Result<()> {
        Err(fhirstore_ingest::Error::Internal(
            "connection refused".to_string(),
        ))
    }

    async fn enqueue(&self, _task: EnrichmentTask) -> fhirstore_ingest::Result<Uuid> {
        Err(fhirstore_ingest::Error::Internal(
            "connection refused".to_string(),
        ))
    }

    async fn dequeue(&self, _worker_id: &str) -> fhirstore_ingest::Result<Option<QueuedTask>> {
        Ok(None)
    }

    async fn get_task(&self, _task_id: Uuid) -> fhirstore_ingest::Result<Option<QueuedTask>> {
        Ok(None)
    }

    async fn complete_task(&self, _task_id: Uuid) -> fhirstore_ingest::Result<()> {
        Ok(())
    }

    async fn fail_task(
        &self,
        _task_id: Uuid,
        _error_message: String,
        _retry: bool,
        _retry_after: Option<Duration>,
    ) -> fhirstore_ingest::Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> fhirstore_ingest::Result<Value> {
        Err(fhirstore_ingest::Error::Internal(
            "connection refused".to_string(),
        ))
    }

    async fn cleanup_completed(&self, _days: i32) -> fhirstore_ingest::Result<i64> {
        Ok(0)
    }
}

// ============================================================================
// Test application
// ============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<FakeFhirStore>,
    pub objects: Arc<FakeObjectStore>,
    pub bus: Arc<RecordingBus>,
    pub queue: Arc<MemoryTaskQueue>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(FakeFhirStore::new())
    }

    pub fn with_store(store: FakeFhirStore) -> Self {
        Self::build(store, RecordingBus::default())
    }

    pub fn build(store: FakeFhirStore, bus: RecordingBus) -> Self {
        let store = Arc::new(store);
        let objects = Arc::new(FakeObjectStore::default());
        let bus = Arc::new(bus);
        let queue = Arc::new(MemoryTaskQueue::new(QUEUE));

        let state = AppState::from_parts(
            test_config(),
            Collaborators {
                storage: objects.clone(),
                fhir_store: store.clone(),
                bus: bus.clone(),
                task_queue: queue.clone(),
            },
        );

        Self {
            router: create_router(state.clone()),
            state,
            store,
            objects,
            bus,
            queue,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Bytes>,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder.body(body.map(Body::from).unwrap_or_else(Body::empty))?;

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, headers, bytes))
    }

    /// POST a storage notification and decode the JSON answer.
    pub async fn trigger(&self, payload: &Value) -> anyhow::Result<(StatusCode, Value)> {
        let (status, _headers, body) = self
            .request(Method::POST, "/", Some(to_json_body(payload)?))
            .await?;
        Ok((status, serde_json::from_slice(&body)?))
    }
}

/// Router over the given queue, with an empty object store and a fresh FHIR store fake.
pub fn router_with_queue(
    queue: Arc<dyn TaskQueue>,
) -> (Router, Arc<FakeObjectStore>, Arc<RecordingBus>) {
    let objects = Arc::new(FakeObjectStore::default());
    let bus = Arc::new(RecordingBus::default());
    let state = AppState::from_parts(
        test_config(),
        Collaborators {
            storage: objects.clone(),
            fhir_store: Arc::new(FakeFhirStore::new()),
            bus: bus.clone(),
            task_queue: queue,
        },
    );
    (create_router(state), objects, bus)
}

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(StatusCode, Value)> {
    let body = body.map(|b| to_json_body(&b)).transpose()?;
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))?;
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}

// ============================================================================
// Payload builders
// ============================================================================

pub const BUCKET: &str = "site-uploads";

/// A production-style object name: 8+ segments with the site at index 6.
pub fn site_object_name(file: &str) -> String {
    format!("collection-a/2023/batch-1/upload/x/epic/nyc health/P100/{file}")
}

pub fn notification(name: &str, size: u64) -> Value {
    json!({
        "bucket": BUCKET,
        "name": name,
        "size": size.to_string(),
        "id": format!("{BUCKET}/{name}/1700000000000000"),
    })
}

pub fn bundle(entries: &[(&str, &str)]) -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": entries
            .iter()
            .map(|(resource_type, id)| json!({
                "fullUrl": format!("urn:uuid:{id}"),
                "resource": { "resourceType": resource_type, "id": id }
            }))
            .collect::<Vec<_>>()
    })
}

pub fn to_json_body(value: &Value) -> anyhow::Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

pub fn assert_status(actual: StatusCode, expected: StatusCode, context: &str) {
    assert_eq!(
        actual, expected,
        "{context}: expected status {expected}, got {actual}"
    );
}
