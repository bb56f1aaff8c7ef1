//! Common traits and types for generation backends

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

use crate::error::Result;
use crate::request::RenderSpec;

/// Liveness snapshot produced by a health probe. Transient; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models_available: Option<usize>,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Probe succeeded
    Connected,
    /// Server responded with a non-success status
    Error,
    /// Server unreachable
    Disconnected,
}

/// Capability contract shared by both backend shapes. The synchronous shape
/// returns the image inline; the asynchronous shape submits, polls, and
/// downloads internally before returning.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short backend name for logging
    fn name(&self) -> &str;

    /// Run one generation to completion and return the raw artifact bytes.
    async fn generate(&self, spec: &RenderSpec) -> Result<Vec<u8>>;

    /// Probe the backend for liveness.
    async fn check_health(&self) -> ConnectionHealth;
}

/// Build an `Authorization` header value from a credential string.
/// Credentials containing a `:` separator are encoded as basic auth;
/// anything else is treated as a bearer token.
pub fn auth_header(credentials: &str) -> String {
    if credentials.contains(':') {
        format!("Basic {}", STANDARD.encode(credentials))
    } else {
        format!("Bearer {}", credentials)
    }
}
