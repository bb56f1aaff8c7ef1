//! Application settings and configuration management

use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_backend_kind")]
    pub backend: BackendKind,
    #[serde(default)]
    pub comfyui: ComfyUiConfig,
    #[serde(default)]
    pub webui: WebUiConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

/// Which backend shape to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Asynchronous node-graph backend (submit, poll, download)
    Comfy,
    /// Synchronous img2img backend (inline base64 result)
    Webui,
}

fn default_backend_kind() -> BackendKind {
    BackendKind::Comfy
}

fn default_health_timeout() -> u64 {
    10
}

/// Node-graph backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComfyUiConfig {
    #[serde(default = "default_comfy_url")]
    pub base_url: String,
    #[serde(default = "default_comfy_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: String,
    #[serde(default = "default_vae")]
    pub vae: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

fn default_comfy_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_comfy_timeout() -> u64 {
    180
}

fn default_upload_timeout() -> u64 {
    30
}

fn default_checkpoint() -> String {
    "dreamshaper_8.safetensors".to_string()
}

fn default_vae() -> String {
    "vaeFtMse840000EmaPruned_vaeFtMse840k.safetensors".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_max_polls() -> u32 {
    180
}

impl Default for ComfyUiConfig {
    fn default() -> Self {
        Self {
            base_url: default_comfy_url(),
            timeout_secs: default_comfy_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            checkpoint: default_checkpoint(),
            vae: default_vae(),
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

/// Synchronous img2img backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebUiConfig {
    #[serde(default = "default_webui_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_webui_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
}

fn default_webui_url() -> String {
    "http://127.0.0.1:7860".to_string()
}

fn default_webui_timeout() -> u64 {
    120
}

fn default_dimension() -> u32 {
    512
}

impl Default for WebUiConfig {
    fn default() -> Self {
        Self {
            base_url: default_webui_url(),
            api_key: None,
            timeout_secs: default_webui_timeout(),
            width: default_dimension(),
            height: default_dimension(),
        }
    }
}

/// Sampler defaults applied to every generation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    #[serde(default = "default_sampler_name")]
    pub sampler_name: String,
    #[serde(default = "default_scheduler")]
    pub scheduler: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
}

fn default_sampler_name() -> String {
    "euler".to_string()
}

fn default_scheduler() -> String {
    "normal".to_string()
}

fn default_steps() -> u32 {
    20
}

fn default_cfg_scale() -> f64 {
    7.0
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            sampler_name: default_sampler_name(),
            scheduler: default_scheduler(),
            steps: default_steps(),
            cfg_scale: default_cfg_scale(),
        }
    }
}

/// Retry schedule for the submit call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2
}

fn default_max_delay() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

/// Image-to-3D conversion service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    #[serde(default = "default_mesh_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mesh_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_mesh_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_mesh_max_polls")]
    pub max_polls: u32,
}

fn default_mesh_url() -> String {
    "https://api.meshy.ai/v1".to_string()
}

fn default_mesh_timeout() -> u64 {
    60
}

fn default_mesh_poll_interval() -> u64 {
    5
}

fn default_mesh_max_polls() -> u32 {
    120
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            base_url: default_mesh_url(),
            api_key: None,
            timeout_secs: default_mesh_timeout(),
            poll_interval_secs: default_mesh_poll_interval(),
            max_polls: default_mesh_max_polls(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(
                File::with_name(path.as_ref().to_str().unwrap_or("config/default"))
                    .required(false),
            )
            // Override with environment variables (prefixed with CHARAGEN_)
            .add_source(
                Environment::with_prefix("CHARAGEN")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.comfyui.base_url.is_empty() {
            return Err(Error::Config(config::ConfigError::Message(
                "comfyui.base_url cannot be empty".to_string(),
            )));
        }
        if self.webui.base_url.is_empty() {
            return Err(Error::Config(config::ConfigError::Message(
                "webui.base_url cannot be empty".to_string(),
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(config::ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            )));
        }
        if self.comfyui.max_polls == 0 {
            return Err(Error::Config(config::ConfigError::Message(
                "comfyui.max_polls must be at least 1".to_string(),
            )));
        }
        if !(0.0..=30.0).contains(&self.sampler.cfg_scale) {
            return Err(Error::Config(config::ConfigError::Message(
                format!("sampler.cfg_scale {} is out of range", self.sampler.cfg_scale),
            )));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: default_backend_kind(),
            comfyui: ComfyUiConfig::default(),
            webui: WebUiConfig::default(),
            sampler: SamplerConfig::default(),
            retry: RetryConfig::default(),
            mesh: MeshConfig::default(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}
