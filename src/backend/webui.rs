//! Synchronous img2img backend client
//!
//! One request, one response: the flat payload goes to the img2img
//! endpoint and the generated image comes back inline as base64. Any
//! non-success status or an empty image list is a hard failure.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::traits::{auth_header, ConnectionHealth, GenerationBackend, HealthState};
use crate::config::WebUiConfig;
use crate::error::{Error, Result};
use crate::request::{Img2ImgPayload, RenderSpec};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct Img2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Flat synchronous backend client
pub struct WebUiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    config: WebUiConfig,
    retry: RetryPolicy,
    health_timeout: Duration,
}

impl WebUiBackend {
    pub fn new(
        config: &WebUiConfig,
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
            api_key: config.api_key.clone(),
            config: config.clone(),
            retry,
            health_timeout,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", auth_header(key)),
            None => builder,
        }
    }

    /// One img2img round-trip. 200 with at least one image is the only
    /// acceptable outcome.
    async fn submit(&self, payload: &Img2ImgPayload) -> Result<Vec<u8>> {
        let response = self
            .authorized(self.client.post(format!("{}/sdapi/v1/img2img", self.base_url)))
            .json(payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::BackendContract(format!(
                "img2img returned {}: {}",
                status, body
            )));
        }

        let result: Img2ImgResponse = response.json().await?;
        let first = result.images.first().ok_or_else(|| {
            Error::BackendContract("No image returned from img2img response".to_string())
        })?;

        STANDARD
            .decode(first)
            .map_err(|e| Error::BackendContract(format!("Invalid base64 image data: {}", e)))
    }
}

#[async_trait]
impl GenerationBackend for WebUiBackend {
    fn name(&self) -> &str {
        "webui"
    }

    async fn generate(&self, spec: &RenderSpec) -> Result<Vec<u8>> {
        let payload = Img2ImgPayload::from_spec(spec, &self.config);
        debug!(
            backend = "webui",
            denoise = payload.denoising_strength,
            steps = payload.steps,
            "Submitting img2img request"
        );

        let bytes = self.retry.call(|| self.submit(&payload)).await?;
        info!(backend = "webui", bytes = bytes.len(), "Generation completed");
        Ok(bytes)
    }

    async fn check_health(&self) -> ConnectionHealth {
        let result = self
            .authorized(self.client.get(format!("{}/sdapi/v1/sd-models", self.base_url)))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let models_available = response
                    .json::<Vec<Value>>()
                    .await
                    .ok()
                    .map(|models| models.len());
                ConnectionHealth {
                    status: HealthState::Connected,
                    message: None,
                    models_available,
                    base_url: self.base_url.clone(),
                }
            }
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
