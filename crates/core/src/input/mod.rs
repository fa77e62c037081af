//! Scroll input: raw events in, at most one depth-state mutation per frame out.

pub mod controller;
pub mod event;
pub mod session;
pub mod throttle;

pub use controller::{FrameOutcome, ScrollInputController};
pub use event::{InputEvent, KeyCommand};
pub use session::{ScrollSession, SessionPhase, VelocityProbe};
pub use throttle::{Coalesced, FrameThrottle};
