pub mod config;
pub mod event;
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use event::{ChangedFields, DepthEvent, DepthSnapshot, Notification};
pub use types::{DepthRange, QualityTier, ViewportGeometry};
