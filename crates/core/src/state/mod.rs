pub mod depth_state;
pub mod listeners;

pub use depth_state::{DepthState, MAX_ZOOM, MIN_ZOOM, StateError};
pub use listeners::{Listener, ListenerId};
