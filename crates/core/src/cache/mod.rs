//! Predictive render cache: tile keys, build bookkeeping and the worker pool
//! that renders ahead of the viewport.

pub mod build;
pub mod cancel;
pub mod entry;
pub mod error;
pub mod key;
pub(crate) mod pool;
pub mod predictive;

pub use build::{BuildContext, TileRenderer};
pub use cancel::{CancellationSource, CancellationToken};
pub use entry::{BuildOrigin, BuildState, CacheEntry, Payload};
pub use error::{BuildError, CacheError};
pub use key::{CacheKey, TileGrid};
pub use predictive::{
    CacheLookup, CacheStats, PollReport, PredictiveRenderCache, prediction_window,
};
