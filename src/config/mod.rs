//! Configuration module - settings loading and validation

pub mod settings;

pub use settings::{
    BackendKind, ComfyUiConfig, MeshConfig, RetryConfig, SamplerConfig, Settings, WebUiConfig,
};
