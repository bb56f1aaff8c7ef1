//! Character Generation Orchestrator
//!
//! Turns a portrait image into a styled character image by driving an
//! external image-generation backend: a style registry resolves prompts
//! and denoise strength, a request builder assembles the backend payload
//! (node-graph or flat img2img), and the backend client submits, retries
//! transient failures, polls asynchronous jobs to a terminal state, and
//! returns the raw artifact bytes. A separate client submits generated
//! images to an image-to-3D conversion service.

pub mod backend;
pub mod config;
pub mod error;
pub mod mesh;
pub mod request;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod styles;

pub use error::{Error, Result};
pub use service::CharacterService;
