use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::DepthRange;

bitflags! {
    /// Which fields of the depth state a notification touched.
    ///
    /// Listeners subscribe with an interest mask and are skipped for
    /// notifications that do not intersect it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChangedFields: u8 {
        const RANGE = 0b0001;
        const CURSOR = 0b0010;
        const SELECTION = 0b0100;
        const ZOOM = 0b1000;
    }
}

/// Complete, copyable view of the depth state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub bounds: DepthRange,
    pub viewport: DepthRange,
    pub cursor: Option<f64>,
    pub selection: Option<DepthRange>,
    pub zoom: f64,
}

impl DepthSnapshot {
    /// Viewport span at zoom 1.0: half the subject.
    pub fn default_span(&self) -> f64 {
        self.bounds.span() / 2.0
    }
}

/// One logical mutation of the depth state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DepthEvent {
    ViewportChanged { range: DepthRange },
    CursorChanged { depth: f64 },
    SelectionChanged { range: Option<DepthRange> },
    ZoomChanged { zoom: f64 },
    /// Zoom and viewport changed together by one zoom gesture.
    Zoomed { zoom: f64, range: DepthRange },
    /// `reset_to_defaults`; carries every field it actually changed.
    Reset { fields: ChangedFields },
}

impl DepthEvent {
    pub fn fields(&self) -> ChangedFields {
        match self {
            Self::ViewportChanged { .. } => ChangedFields::RANGE,
            Self::CursorChanged { .. } => ChangedFields::CURSOR,
            Self::SelectionChanged { .. } => ChangedFields::SELECTION,
            Self::ZoomChanged { .. } => ChangedFields::ZOOM,
            Self::Zoomed { .. } => ChangedFields::ZOOM | ChangedFields::RANGE,
            Self::Reset { fields } => *fields,
        }
    }
}

/// What every listener receives: the event, its position in the emission
/// order, and the state as it stands after the event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub seq: u64,
    pub event: DepthEvent,
    pub snapshot: DepthSnapshot,
}

impl Notification {
    #[inline]
    pub fn fields(&self) -> ChangedFields {
        self.event.fields()
    }

    pub fn touches(&self, interest: ChangedFields) -> bool {
        self.fields().intersects(interest)
    }
}
