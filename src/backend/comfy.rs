//! Asynchronous node-graph backend client
//!
//! Staging, submission, and resolution against a ComfyUI-shaped server:
//! the source image is uploaded under a unique temporary name, the workflow
//! graph is queued (with the submit call under the retry policy), and the
//! resulting job is polled through the resolver until the saved image can
//! be downloaded.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::traits::{ConnectionHealth, GenerationBackend, HealthState};
use crate::config::ComfyUiConfig;
use crate::error::{Error, Result};
use crate::request::workflow::{self, ModelSelection, SAVE_IMAGE_NODE};
use crate::request::RenderSpec;
use crate::resolver::{JobHandle, JobStatus, PollOutcome, Resolver};
use crate::retry::RetryPolicy;

/// Descriptor of a finished image in the server's output store
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(default = "default_folder_type", rename = "type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueResponse {
    prompt_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    outputs: HashMap<String, NodeOutput>,
    #[serde(default)]
    status: Option<HistoryStatus>,
}

#[derive(Debug, Deserialize)]
struct NodeOutput {
    #[serde(default)]
    images: Vec<ArtifactRef>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    messages: Vec<Value>,
}

/// Node-graph backend client. One instance carries one client identity
/// token for the life of the process, reused across submissions so the
/// server can correlate them.
pub struct ComfyBackend {
    client: Client,
    base_url: String,
    client_id: String,
    models: ModelSelection,
    retry: RetryPolicy,
    resolver: Resolver,
    upload_timeout: Duration,
    health_timeout: Duration,
    in_flight: DashMap<String, ()>,
}

impl ComfyBackend {
    pub fn new(
        config: &ComfyUiConfig,
        retry: RetryPolicy,
        health_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4().to_string(),
            models: ModelSelection {
                checkpoint: config.checkpoint.clone(),
                vae: config.vae.clone(),
            },
            retry,
            resolver: Resolver::new(
                Duration::from_secs(config.poll_interval_secs),
                config.max_polls,
            ),
            upload_timeout: Duration::from_secs(config.upload_timeout_secs),
            health_timeout,
            in_flight: DashMap::new(),
        })
    }

    /// Stage the source image on the server under a unique temporary name.
    /// Failure here aborts the request before any job is submitted.
    async fn upload_image(&self, image: &[u8]) -> Result<String> {
        let temp_filename = format!("upload_{}.png", Uuid::new_v4().simple());

        let part = Part::bytes(image.to_vec())
            .file_name(temp_filename.clone())
            .mime_str("image/png")?;
        let form = Form::new().part("image", part).text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.base_url))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BackendContract(format!(
                "Image upload failed: {} - {}",
                status, body
            )));
        }

        let upload: UploadResponse = response.json().await?;
        let name = upload.name.unwrap_or(temp_filename);
        debug!(backend = "comfy", filename = %name, "Source image staged");
        Ok(name)
    }

    /// Queue the workflow graph. An accepted response without a job
    /// identifier is a contract violation.
    async fn queue_prompt(&self, graph: &Value) -> Result<JobHandle> {
        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&json!({
                "prompt": graph,
                "client_id": self.client_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BackendContract(format!(
                "Prompt queue failed: {} - {}",
                status, body
            )));
        }

        let queued: QueueResponse = response.json().await?;
        match queued.prompt_id {
            Some(id) => {
                info!(backend = "comfy", job = %id, "Workflow queued");
                Ok(JobHandle(id))
            }
            None => Err(Error::BackendContract(
                "No prompt_id returned from queue response".to_string(),
            )),
        }
    }

    /// Resolve a queued job to its artifact bytes. Single-flight per
    /// handle: a second resolution for a handle still being polled is
    /// rejected. The slot is released when the resolution finishes or is
    /// abandoned mid-poll.
    pub async fn resolve_job(&self, handle: &JobHandle) -> Result<Vec<u8>> {
        let _guard = InFlightGuard::acquire(&self.in_flight, handle)?;
        self.resolver.resolve(self, handle).await
    }
}

/// Marks a handle as being resolved for the guard's lifetime. Removal
/// happens in `Drop`, so a caller abandoning the resolution frees the
/// slot along with the future.
struct InFlightGuard<'a> {
    jobs: &'a DashMap<String, ()>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(jobs: &'a DashMap<String, ()>, handle: &JobHandle) -> Result<Self> {
        match jobs.entry(handle.0.clone()) {
            Entry::Occupied(_) => Err(Error::InvalidRequest(format!(
                "A resolution is already in flight for job {}",
                handle
            ))),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    jobs,
                    key: handle.0.clone(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.jobs.remove(&self.key);
    }
}

#[async_trait]
impl JobStatus for ComfyBackend {
    type Artifact = ArtifactRef;

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome<ArtifactRef>> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, handle))
            .send()
            .await?;

        // The history endpoint occasionally hiccups mid-run; absence of a
        // readable record counts as "not yet".
        if !response.status().is_success() {
            return Ok(PollOutcome::Pending);
        }

        let history: HashMap<String, HistoryEntry> = response.json().await?;
        let entry = match history.get(handle.as_str()) {
            Some(entry) => entry,
            None => return Ok(PollOutcome::Pending),
        };

        if let Some(status) = &entry.status {
            if status.status_str.as_deref() == Some("error") {
                let detail = serde_json::to_string(&status.messages).unwrap_or_default();
                return Ok(PollOutcome::Rejected(format!(
                    "Workflow execution failed: {}",
                    detail
                )));
            }
        }

        if let Some(output) = entry.outputs.get(SAVE_IMAGE_NODE) {
            if let Some(image) = output.images.first() {
                return Ok(PollOutcome::Completed(image.clone()));
            }
        }

        Ok(PollOutcome::Pending)
    }

    async fn download(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let mut params = vec![
            ("filename", artifact.filename.as_str()),
            ("type", artifact.folder_type.as_str()),
        ];
        if !artifact.subfolder.is_empty() {
            params.push(("subfolder", artifact.subfolder.as_str()));
        }

        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::BackendContract(format!(
                "Image download failed: {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl GenerationBackend for ComfyBackend {
    fn name(&self) -> &str {
        "comfy"
    }

    async fn generate(&self, spec: &RenderSpec) -> Result<Vec<u8>> {
        let uploaded = self.upload_image(&spec.image).await?;
        let graph = workflow::build(spec, &uploaded, &self.models);

        let handle = self.retry.call(|| self.queue_prompt(&graph)).await?;
        self.resolve_job(&handle).await
    }

    async fn check_health(&self) -> ConnectionHealth {
        let result = self
            .client
            .get(format!("{}/system_stats", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => ConnectionHealth {
                status: HealthState::Connected,
                message: None,
                models_available: None,
                base_url: self.base_url.clone(),
            },
            Ok(response) => ConnectionHealth {
                status: HealthState::Error,
                message: Some(format!("Server returned {}", response.status())),
                models_available: None,
                base_url: self.base_url.clone(),
            },
            Err(e) => ConnectionHealth {
                status: HealthState::Disconnected,
                message: Some(e.to_string()),
                models_available: None,
                base_url: self.base_url.clone(),
            },
        }
    }
}
