use std::io;

use depthsync_protocol::ConfigError;
use thiserror::Error;

use crate::source::SourceError;

/// Why a tile build produced no payload.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build cancelled")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("render failed: {0}")]
    Render(String),
    #[error("renderer panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("render workers have shut down")]
    PoolClosed,
}
