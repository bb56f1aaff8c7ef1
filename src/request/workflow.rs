//! Node-graph builder for the asynchronous backend
//!
//! Produces the declarative DAG the node-graph server executes: load the
//! staged source image, encode it into latent space at its native
//! resolution, sample with the style's prompts, decode and save. The
//! sampler's latent input is wired straight to the VAE encode of the
//! source image; no resize node is inserted.

use rand::Rng;
use serde_json::{json, Value};

use super::RenderSpec;

/// Node identifiers within the generated graph
pub const LOAD_IMAGE_NODE: &str = "1";
pub const CHECKPOINT_NODE: &str = "2";
pub const NEGATIVE_ENCODE_NODE: &str = "3";
pub const POSITIVE_ENCODE_NODE: &str = "4";
pub const VAE_DECODE_NODE: &str = "7";
pub const SAVE_IMAGE_NODE: &str = "8";
pub const VAE_LOADER_NODE: &str = "9";
pub const VAE_ENCODE_NODE: &str = "10";
pub const SAMPLER_NODE: &str = "12";

/// Model files referenced by the graph
#[derive(Debug, Clone)]
pub struct ModelSelection {
    pub checkpoint: String,
    pub vae: String,
}

/// Build the workflow graph for one generation.
///
/// `image_filename` is the name the source image was staged under on the
/// server. A missing or zero seed is replaced by a uniform draw over the
/// full u32 range; everything else is a pure function of its inputs.
pub fn build(spec: &RenderSpec, image_filename: &str, models: &ModelSelection) -> Value {
    let seed = match spec.seed {
        Some(s) if s != 0 => s,
        _ => rand::thread_rng().gen::<u32>(),
    };

    json!({
        LOAD_IMAGE_NODE: {
            "class_type": "LoadImage",
            "inputs": {
                "image": image_filename,
                "upload": "image"
            }
        },
        CHECKPOINT_NODE: {
            "class_type": "CheckpointLoaderSimple",
            "inputs": {
                "ckpt_name": models.checkpoint
            }
        },
        NEGATIVE_ENCODE_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": {
                "clip": [CHECKPOINT_NODE, 1],
                "text": spec.negative_prompt
            }
        },
        POSITIVE_ENCODE_NODE: {
            "class_type": "CLIPTextEncode",
            "inputs": {
                "clip": [CHECKPOINT_NODE, 1],
                "text": spec.prompt
            }
        },
        VAE_DECODE_NODE: {
            "class_type": "VAEDecode",
            "inputs": {
                "samples": [SAMPLER_NODE, 0],
                "vae": [VAE_LOADER_NODE, 0]
            }
        },
        SAVE_IMAGE_NODE: {
            "class_type": "SaveImage",
            "inputs": {
                "images": [VAE_DECODE_NODE, 0],
                "filename_prefix": "sd1.5_"
            }
        },
        VAE_LOADER_NODE: {
            "class_type": "VAELoader",
            "inputs": {
                "vae_name": models.vae
            }
        },
        VAE_ENCODE_NODE: {
            "class_type": "VAEEncode",
            "inputs": {
                // Source pixels come from LoadImage directly, keeping the
                // original resolution.
                "pixels": [LOAD_IMAGE_NODE, 0],
                "vae": [VAE_LOADER_NODE, 0]
            }
        },
        SAMPLER_NODE: {
            "class_type": "KSampler",
            "inputs": {
                "model": [CHECKPOINT_NODE, 0],
                "positive": [POSITIVE_ENCODE_NODE, 0],
                "negative": [NEGATIVE_ENCODE_NODE, 0],
                "latent_image": [VAE_ENCODE_NODE, 0],
                "seed": seed,
                "steps": spec.steps,
                "cfg": spec.cfg_scale,
                "sampler_name": spec.sampler_name,
                "scheduler": spec.scheduler,
                "denoise": spec.denoise
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SamplerConfig;
    use crate::request::{GenerationRequest, RenderSpec};
    use crate::styles::StyleRegistry;

    fn spec(seed: Option<u32>) -> RenderSpec {
        let registry = StyleRegistry::default();
        let style = registry.get("semi_realistic").clone();
        let mut request = GenerationRequest::new(b"\x89PNG".to_vec(), "semi_realistic");
        request.seed = seed;
        RenderSpec::resolve(request, &style, &registry, &SamplerConfig::default())
    }

    fn models() -> ModelSelection {
        ModelSelection {
            checkpoint: "dreamshaper_8.safetensors".to_string(),
            vae: "vaeFtMse840000EmaPruned_vaeFtMse840k.safetensors".to_string(),
        }
    }

    #[test]
    fn test_sampler_consumes_encoded_source_latent() {
        let graph = build(&spec(Some(7)), "input.png", &models());

        // KSampler.latent_image must reference the VAE encode node,
        // which in turn must read pixels straight from LoadImage.
        assert_eq!(
            graph[SAMPLER_NODE]["inputs"]["latent_image"],
            json!([VAE_ENCODE_NODE, 0])
        );
        assert_eq!(
            graph[VAE_ENCODE_NODE]["inputs"]["pixels"],
            json!([LOAD_IMAGE_NODE, 0])
        );
        assert_eq!(graph[LOAD_IMAGE_NODE]["class_type"], "LoadImage");
    }

    #[test]
    fn test_prompt_wiring_and_parameters() {
        let graph = build(&spec(Some(7)), "input.png", &models());

        assert_eq!(
            graph[POSITIVE_ENCODE_NODE]["inputs"]["text"],
            spec(Some(7)).prompt
        );
        assert_eq!(graph[SAMPLER_NODE]["inputs"]["denoise"], 0.2);
        assert_eq!(graph[SAMPLER_NODE]["inputs"]["steps"], 20);
        assert_eq!(graph[SAMPLER_NODE]["inputs"]["sampler_name"], "euler");
        assert_eq!(graph[SAVE_IMAGE_NODE]["inputs"]["images"], json!([VAE_DECODE_NODE, 0]));
    }

    #[test]
    fn test_denoise_serializes_without_float_widening_noise() {
        let graph = build(&spec(Some(7)), "input.png", &models());
        assert_eq!(
            graph[SAMPLER_NODE]["inputs"]["denoise"].as_f64(),
            Some(0.2)
        );
        // A single-precision 0.2 widened to double would leak trailing
        // digits onto the wire.
        assert!(!graph.to_string().contains("0.20000000298023224"));
    }

    #[test]
    fn test_explicit_seed_is_deterministic() {
        let a = build(&spec(Some(1234)), "input.png", &models());
        let b = build(&spec(Some(1234)), "input.png", &models());
        assert_eq!(a, b);
        assert_eq!(a[SAMPLER_NODE]["inputs"]["seed"], 1234);
    }

    #[test]
    fn test_unset_seed_is_drawn_from_wide_range() {
        let seeds: Vec<u64> = (0..16)
            .map(|_| {
                build(&spec(None), "input.png", &models())[SAMPLER_NODE]["inputs"]["seed"]
                    .as_u64()
                    .unwrap()
            })
            .collect();
        // 16 independent uniform u32 draws colliding to one value would be
        // astronomically unlikely.
        assert!(seeds.iter().any(|&s| s != seeds[0]));
    }

    #[test]
    fn test_zero_seed_is_replaced() {
        let graph = build(&spec(Some(0)), "input.png", &models());
        assert_ne!(graph[SAMPLER_NODE]["inputs"]["seed"], 0);
    }
}
