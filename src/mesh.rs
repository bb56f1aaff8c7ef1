//! Image-to-3D conversion client
//!
//! Submits a generated character image to the external conversion service
//! and polls the returned task until a model is ready for download. This
//! path is independent of the image generation backends but reuses the
//! same resolver loop.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use crate::backend::traits::auth_header;
use crate::config::MeshConfig;
use crate::error::{Error, Result};
use crate::resolver::{JobHandle, JobStatus, PollOutcome, Resolver};

/// Conversion options sent with a task submission
#[derive(Debug, Clone, Serialize)]
pub struct MeshOptions {
    pub enable_pbr: bool,
    pub ai_model: String,
    pub topology: String,
    pub target_polycount: u32,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            enable_pbr: true,
            ai_model: "meshy-4".to_string(),
            topology: "quad".to_string(),
            target_polycount: 30_000,
        }
    }
}

/// Status snapshot of a conversion task
#[derive(Debug, Clone, Deserialize)]
pub struct MeshTaskStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub model_urls: HashMap<String, String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub task_error: Option<MeshTaskError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeshTaskError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    result: Option<String>,
}

/// Client for the image-to-3D conversion service
pub struct MeshClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    resolver: Resolver,
}

impl MeshClient {
    pub fn new(config: &MeshConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            resolver: Resolver::new(
                Duration::from_secs(config.poll_interval_secs),
                config.max_polls,
            ),
        })
    }

    fn credentials(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            Error::InvalidRequest("Mesh API key is not configured".to_string())
        })
    }

    /// Submit a conversion task. The service acknowledges with 202 and a
    /// task identifier; an accepted response without one is a contract
    /// violation.
    pub async fn create_task(&self, image_url: &str, options: &MeshOptions) -> Result<JobHandle> {
        let key = self.credentials()?;

        let response = self
            .client
            .post(format!("{}/image-to-3d", self.base_url))
            .header("Authorization", auth_header(key))
            .json(&json!({
                "image_url": image_url,
                "enable_pbr": options.enable_pbr,
                "ai_model": options.ai_model,
                "topology": options.topology,
                "target_polycount": options.target_polycount,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BackendContract(format!(
                "Failed to start 3D conversion: {} - {}",
                status, body
            )));
        }

        let created: CreateTaskResponse = response.json().await?;
        match created.result {
            Some(id) => {
                info!(task = %id, "3D conversion task started");
                Ok(JobHandle(id))
            }
            None => Err(Error::BackendContract(
                "No task id returned from conversion service".to_string(),
            )),
        }
    }

    /// Fetch the current status of a conversion task.
    pub async fn task_status(&self, handle: &JobHandle) -> Result<MeshTaskStatus> {
        let key = self.credentials()?;

        let response = self
            .client
            .get(format!("{}/image-to-3d/{}", self.base_url, handle))
            .header("Authorization", auth_header(key))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::BackendContract(format!(
                "Failed to get task status: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }

    /// Poll a task to completion and download the resulting model bytes.
    pub async fn wait_for_model(&self, handle: &JobHandle) -> Result<Vec<u8>> {
        self.resolver.resolve(self, handle).await
    }

    /// Download a finished model by URL.
    pub async fn download_model(&self, model_url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(model_url).send().await?;

        if !response.status().is_success() {
            return Err(Error::BackendContract(format!(
                "Model download failed: {}",
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl JobStatus for MeshClient {
    type Artifact = String;

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome<String>> {
        let status = self.task_status(handle).await?;

        match status.status.as_str() {
            "SUCCEEDED" => {
                // Prefer the glb asset, otherwise take whichever URL the
                // service produced first.
                let url = status
                    .model_urls
                    .get("glb")
                    .cloned()
                    .or_else(|| status.model_urls.values().next().cloned());
                match url {
                    Some(url) => Ok(PollOutcome::Completed(url)),
                    None => Ok(PollOutcome::Rejected(
                        "Task succeeded but produced no model URLs".to_string(),
                    )),
                }
            }
            "FAILED" | "EXPIRED" | "CANCELED" => {
                let detail = status
                    .task_error
                    .map(|e| e.message)
                    .unwrap_or_else(|| status.status.clone());
                Ok(PollOutcome::Rejected(format!(
                    "3D conversion did not complete: {}",
                    detail
                )))
            }
            _ => Ok(PollOutcome::Pending),
        }
    }

    async fn download(&self, model_url: &String) -> Result<Vec<u8>> {
        self.download_model(model_url).await
    }
}
