pub mod adapter;
pub mod cache;
pub mod input;
pub mod mapper;
pub mod render;
pub mod source;
pub mod state;

pub use adapter::{Attachment, PlacedTile, TileOrigin, ViewAdapter, attach, resolve_tiles};
pub use cache::{
    BuildError, CacheError, CacheKey, CacheLookup, CacheStats, PollReport, PredictiveRenderCache,
    TileGrid, TileRenderer,
};
pub use input::{InputEvent, KeyCommand, ScrollInputController, ScrollSession, VelocityProbe};
pub use mapper::CoordinateMapper;
pub use render::DecimatingRenderer;
pub use source::{InMemorySource, Sample, SampleSource, SourceError, SubjectBounds};
pub use state::{DepthState, ListenerId, StateError};
