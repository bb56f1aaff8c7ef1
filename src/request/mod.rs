//! Request building - resolving styles into backend-ready parameters

pub mod workflow;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;

use crate::config::{SamplerConfig, WebUiConfig};
use crate::styles::{StyleConfig, StyleRegistry};

/// A caller's generation request. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Source portrait image bytes
    pub image: Vec<u8>,
    /// Style key, resolved against the registry (unknown keys fall back)
    pub style_key: String,
    /// Optional denoise-strength override; values outside [0,1] are ignored
    pub strength_override: Option<f64>,
    /// Optional random seed; unset means the builder draws one (node-graph)
    /// or lets the backend choose (flat backend)
    pub seed: Option<u32>,
}

impl GenerationRequest {
    pub fn new(image: Vec<u8>, style_key: impl Into<String>) -> Self {
        Self {
            image,
            style_key: style_key.into(),
            strength_override: None,
            seed: None,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength_override = Some(strength);
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// A generation request with every parameter resolved: prompt texts,
/// effective denoise strength, and sampler settings. This is the only
/// shape backends consume.
#[derive(Debug, Clone)]
pub struct RenderSpec {
    pub image: Vec<u8>,
    pub prompt: String,
    pub negative_prompt: String,
    pub denoise: f64,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler_name: String,
    pub scheduler: String,
    pub seed: Option<u32>,
}

impl RenderSpec {
    /// Resolve a request against a style and the registry's fallbacks.
    pub fn resolve(
        request: GenerationRequest,
        style: &StyleConfig,
        registry: &StyleRegistry,
        sampler: &SamplerConfig,
    ) -> Self {
        let denoise = effective_denoise(
            request.strength_override,
            style,
            registry.recommended_strength(),
        );
        let negative_prompt = style
            .negative_prompt
            .clone()
            .unwrap_or_else(|| registry.negative_base().to_string());

        Self {
            image: request.image,
            prompt: style.prompt.clone(),
            negative_prompt,
            denoise,
            steps: sampler.steps,
            cfg_scale: sampler.cfg_scale,
            sampler_name: sampler.sampler_name.clone(),
            scheduler: sampler.scheduler.clone(),
            seed: request.seed,
        }
    }
}

/// Effective denoise strength: explicit override if within [0,1], else the
/// style's default, else the registry-wide fallback.
pub fn effective_denoise(
    override_strength: Option<f64>,
    style: &StyleConfig,
    fallback: f64,
) -> f64 {
    match override_strength {
        Some(s) if (0.0..=1.0).contains(&s) => s,
        _ => style.denoise.unwrap_or(fallback),
    }
}

/// Flat img2img payload for the synchronous backend
#[derive(Debug, Clone, Serialize)]
pub struct Img2ImgPayload {
    pub init_images: Vec<String>,
    pub prompt: String,
    pub negative_prompt: String,
    pub sampler_name: String,
    pub steps: u32,
    pub cfg_scale: f64,
    pub denoising_strength: f64,
    pub width: u32,
    pub height: u32,
    /// `-1` means the backend chooses a seed
    pub seed: i64,
    pub resize_mode: u32,
    pub batch_size: u32,
}

impl Img2ImgPayload {
    /// Assemble the synchronous backend payload from a resolved spec.
    pub fn from_spec(spec: &RenderSpec, webui: &WebUiConfig) -> Self {
        Self {
            init_images: vec![STANDARD.encode(&spec.image)],
            prompt: spec.prompt.clone(),
            negative_prompt: spec.negative_prompt.clone(),
            sampler_name: spec.sampler_name.clone(),
            steps: spec.steps,
            cfg_scale: spec.cfg_scale,
            denoising_strength: spec.denoise,
            width: webui.width,
            height: webui.height,
            seed: spec.seed.map(i64::from).unwrap_or(-1),
            resize_mode: 0,
            batch_size: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;

    fn registry() -> StyleRegistry {
        StyleRegistry::default()
    }

    #[test]
    fn test_override_wins_when_in_range() {
        let registry = registry();
        let style = registry.get("semi_realistic");
        assert_eq!(effective_denoise(Some(0.55), style, 0.22), 0.55);
        assert_eq!(effective_denoise(Some(0.0), style, 0.22), 0.0);
        assert_eq!(effective_denoise(Some(1.0), style, 0.22), 1.0);
    }

    #[test]
    fn test_out_of_range_override_falls_back_to_style() {
        let registry = registry();
        let style = registry.get("semi_realistic");
        assert_eq!(effective_denoise(Some(1.5), style, 0.22), 0.20);
        assert_eq!(effective_denoise(Some(-0.1), style, 0.22), 0.20);
    }

    #[test]
    fn test_missing_style_default_uses_registry_fallback() {
        let style = StyleConfig {
            key: "bare".to_string(),
            name: "bare".to_string(),
            name_en: "bare".to_string(),
            description: String::new(),
            prompt: "p".to_string(),
            negative_prompt: None,
            denoise: None,
        };
        assert_eq!(effective_denoise(None, &style, 0.22), 0.22);
    }

    #[test]
    fn test_resolve_uses_shared_negative_base() {
        let registry = registry();
        let style = registry.get("real_bubblehead").clone();
        let request = GenerationRequest::new(vec![1, 2, 3], "real_bubblehead");
        let spec = RenderSpec::resolve(request, &style, &registry, &SamplerConfig::default());

        assert_eq!(spec.prompt, style.prompt);
        assert_eq!(spec.negative_prompt, registry.negative_base());
        assert_eq!(spec.denoise, 0.10);
        assert_eq!(spec.steps, 20);
    }

    #[test]
    fn test_img2img_payload_fields() {
        let registry = registry();
        let style = registry.get("character").clone();
        let request = GenerationRequest::new(b"\x89PNG".to_vec(), "character");
        let spec = RenderSpec::resolve(request, &style, &registry, &SamplerConfig::default());
        let payload = Img2ImgPayload::from_spec(&spec, &WebUiConfig::default());

        assert_eq!(payload.init_images.len(), 1);
        assert_eq!(payload.init_images[0], STANDARD.encode(b"\x89PNG"));
        assert_eq!(payload.seed, -1);
        assert_eq!(payload.denoising_strength, 0.30);
        assert_eq!(payload.width, 512);
        assert_eq!(payload.batch_size, 1);
    }

    #[test]
    fn test_img2img_payload_explicit_seed() {
        let registry = registry();
        let style = registry.get("character").clone();
        let request = GenerationRequest::new(vec![], "character").with_seed(42);
        let spec = RenderSpec::resolve(request, &style, &registry, &SamplerConfig::default());
        let payload = Img2ImgPayload::from_spec(&spec, &WebUiConfig::default());
        assert_eq!(payload.seed, 42);
    }
}
