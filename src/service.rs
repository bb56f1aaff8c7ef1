//! Inbound facade wiring the registry, request builder, and backend

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::backend::{ComfyBackend, ConnectionHealth, GenerationBackend, WebUiBackend};
use crate::config::{BackendKind, SamplerConfig, Settings};
use crate::error::Result;
use crate::request::{GenerationRequest, RenderSpec};
use crate::styles::{StyleInfo, StyleRegistry};

/// Character generation service: the entry point the surrounding CRUD
/// layer calls into. Holds read-only shared state only; concurrent
/// generations are independent.
pub struct CharacterService {
    styles: Arc<StyleRegistry>,
    backend: Arc<dyn GenerationBackend>,
    sampler: SamplerConfig,
}

impl CharacterService {
    /// Build a service from settings, choosing the configured backend shape.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let retry = crate::retry::RetryPolicy::from_config(&settings.retry);
        let health_timeout = Duration::from_secs(settings.health_timeout_secs);

        let backend: Arc<dyn GenerationBackend> = match settings.backend {
            BackendKind::Comfy => {
                Arc::new(ComfyBackend::new(&settings.comfyui, retry, health_timeout)?)
            }
            BackendKind::Webui => {
                Arc::new(WebUiBackend::new(&settings.webui, retry, health_timeout)?)
            }
        };

        Ok(Self::new(
            Arc::new(StyleRegistry::default()),
            backend,
            settings.sampler.clone(),
        ))
    }

    /// Build a service from explicit parts.
    pub fn new(
        styles: Arc<StyleRegistry>,
        backend: Arc<dyn GenerationBackend>,
        sampler: SamplerConfig,
    ) -> Self {
        Self {
            styles,
            backend,
            sampler,
        }
    }

    /// Generate a character image from a source portrait. Unknown style
    /// keys fall back to the default style; an out-of-range strength
    /// override falls back to the style default.
    pub async fn generate(
        &self,
        image: Vec<u8>,
        style_key: &str,
        strength: Option<f64>,
    ) -> Result<Vec<u8>> {
        let style = self.styles.get(style_key);
        debug!(
            backend = self.backend.name(),
            style = %style.key,
            "Generation requested"
        );

        let mut request = GenerationRequest::new(image, style.key.clone());
        request.strength_override = strength;

        let spec = RenderSpec::resolve(request, style, &self.styles, &self.sampler);
        self.backend.generate(&spec).await
    }

    /// Ordered style listing with display metadata only.
    pub fn list_styles(&self) -> Vec<StyleInfo> {
        self.styles.list()
    }

    /// Registry-wide fallback denoise strength.
    pub fn recommended_strength(&self) -> f64 {
        self.styles.recommended_strength()
    }

    /// Probe the active backend for liveness.
    pub async fn check_health(&self) -> ConnectionHealth {
        self.backend.check_health().await
    }
}
