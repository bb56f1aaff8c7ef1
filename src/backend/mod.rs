//! Backend module - capability trait and the two backend shapes

pub mod comfy;
pub mod traits;
pub mod webui;

pub use comfy::ComfyBackend;
pub use traits::{auth_header, ConnectionHealth, GenerationBackend, HealthState};
pub use webui::WebUiBackend;
