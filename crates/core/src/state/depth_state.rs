use depthsync_protocol::{ChangedFields, DepthEvent, DepthRange, DepthSnapshot, Notification};
use thiserror::Error;
use tracing::{debug, trace};

use super::listeners::{Listener, ListenerId, Listeners};
use crate::source::SubjectBounds;

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;
pub const DEFAULT_ZOOM: f64 = 1.0;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("subject bounds [{min}, {max}] must be finite with min < max")]
    InvalidBounds { min: f64, max: f64 },
}

/// The single authoritative record of what every panel shows.
///
/// One instance exists per loaded subject; it is owned by the interactive
/// loop and lent by `&mut` to whatever needs to mutate it. Fields change
/// only through the setters below. Each setter validates its input,
/// silently ignores invalid or no-op requests, and otherwise applies the
/// change and delivers exactly one [`Notification`] to every interested
/// listener before returning. Setters return whether a notification was
/// emitted.
#[derive(Debug)]
pub struct DepthState {
    bounds: DepthRange,
    viewport: DepthRange,
    cursor: Option<f64>,
    selection: Option<DepthRange>,
    zoom: f64,
    seq: u64,
    listeners: Listeners,
}

impl DepthState {
    pub fn new(bounds: DepthRange) -> Self {
        Self {
            bounds,
            viewport: default_viewport(&bounds),
            cursor: None,
            selection: None,
            zoom: DEFAULT_ZOOM,
            seq: 0,
            listeners: Listeners::default(),
        }
    }

    /// Build the state for a loaded subject, fixing `bounds` from its extent.
    pub fn from_subject(subject: &dyn SubjectBounds) -> Result<Self, StateError> {
        let (min, max) = (subject.min_depth(), subject.max_depth());
        let bounds = DepthRange::new(min, max).ok_or(StateError::InvalidBounds { min, max })?;
        debug!(%bounds, "depth state created");
        Ok(Self::new(bounds))
    }

    pub fn bounds(&self) -> DepthRange {
        self.bounds
    }

    pub fn viewport_range(&self) -> DepthRange {
        self.viewport
    }

    pub fn cursor_depth(&self) -> Option<f64> {
        self.cursor
    }

    pub fn selection_range(&self) -> Option<DepthRange> {
        self.selection
    }

    pub fn zoom_level(&self) -> f64 {
        self.zoom
    }

    /// Viewport span at zoom 1.0: half the subject.
    pub fn default_span(&self) -> f64 {
        default_viewport(&self.bounds).span()
    }

    /// Sequence number of the last emitted notification (0 before any).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn snapshot(&self) -> DepthSnapshot {
        DepthSnapshot {
            bounds: self.bounds,
            viewport: self.viewport,
            cursor: self.cursor,
            selection: self.selection,
            zoom: self.zoom,
        }
    }

    /// Register a listener for every notification.
    pub fn subscribe(&mut self, listener: impl FnMut(&Notification) + 'static) -> ListenerId {
        self.subscribe_to(ChangedFields::all(), listener)
    }

    /// Register a listener only for notifications touching `interest`.
    pub fn subscribe_to(
        &mut self,
        interest: ChangedFields,
        listener: impl FnMut(&Notification) + 'static,
    ) -> ListenerId {
        let boxed: Listener = Box::new(listener);
        self.listeners.add(interest, boxed)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn set_viewport_range(&mut self, from: f64, to: f64) -> bool {
        let Some(requested) = DepthRange::new(from, to) else {
            trace!(from, to, "viewport rejected: invalid range");
            return false;
        };
        let Some(clamped) = requested.clamp_to(&self.bounds) else {
            trace!(%requested, "viewport rejected: outside bounds");
            return false;
        };
        self.apply_viewport(clamped)
    }

    /// Translate the viewport by `delta`, preserving its width and pinning it
    /// against whichever bound it reaches.
    pub fn scroll_viewport(&mut self, delta: f64) -> bool {
        if !delta.is_finite() {
            trace!(delta, "scroll rejected: non-finite delta");
            return false;
        }
        let Some(moved) = self.viewport.translate(delta) else {
            return false;
        };
        self.apply_viewport(moved.shift_within(&self.bounds))
    }

    /// Recenter the viewport on `depth`, keeping its span.
    pub fn center_on_depth(&mut self, depth: f64) -> bool {
        if !depth.is_finite() {
            trace!(depth, "center rejected: non-finite depth");
            return false;
        }
        let Some(centered) = self.viewport.centered_on(depth) else {
            return false;
        };
        self.apply_viewport(centered.shift_within(&self.bounds))
    }

    pub fn set_cursor_depth(&mut self, depth: f64) -> bool {
        if !depth.is_finite() {
            trace!(depth, "cursor rejected: non-finite depth");
            return false;
        }
        let depth = self.bounds.clamp_depth(depth);
        if self.cursor == Some(depth) {
            return false;
        }
        self.cursor = Some(depth);
        self.emit(DepthEvent::CursorChanged { depth })
    }

    pub fn set_selection_range(&mut self, from: f64, to: f64) -> bool {
        let Some(clamped) = DepthRange::new(from, to).and_then(|r| r.clamp_to(&self.bounds))
        else {
            trace!(from, to, "selection rejected");
            return false;
        };
        if self.selection == Some(clamped) {
            return false;
        }
        self.selection = Some(clamped);
        self.emit(DepthEvent::SelectionChanged {
            range: Some(clamped),
        })
    }

    pub fn clear_selection(&mut self) -> bool {
        if self.selection.take().is_none() {
            return false;
        }
        self.emit(DepthEvent::SelectionChanged { range: None })
    }

    /// Set the zoom factor, clamped to `[MIN_ZOOM, MAX_ZOOM]`. Non-finite and
    /// non-positive values are rejected.
    pub fn set_zoom_level(&mut self, zoom: f64) -> bool {
        if !(zoom.is_finite() && zoom > 0.0) {
            trace!(zoom, "zoom rejected");
            return false;
        }
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        if self.zoom == zoom {
            return false;
        }
        self.zoom = zoom;
        self.emit(DepthEvent::ZoomChanged { zoom })
    }

    /// Set zoom and viewport as one change, as a zoom gesture does. The zoom
    /// is clamped like [`set_zoom_level`](Self::set_zoom_level) and the range
    /// is moved inside the bounds keeping its span. Listeners see a single
    /// notification carrying whichever of the two actually changed.
    pub fn zoom_to(&mut self, zoom: f64, from: f64, to: f64) -> bool {
        if !(zoom.is_finite() && zoom > 0.0) {
            trace!(zoom, "zoom rejected");
            return false;
        }
        let Some(requested) = DepthRange::new(from, to) else {
            trace!(from, to, "zoom rejected: invalid range");
            return false;
        };
        let zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        let range = requested.shift_within(&self.bounds);
        let zoom_changed = self.zoom != zoom;
        let range_changed = self.viewport != range;
        self.zoom = zoom;
        self.viewport = range;
        match (zoom_changed, range_changed) {
            (true, true) => self.emit(DepthEvent::Zoomed { zoom, range }),
            (true, false) => self.emit(DepthEvent::ZoomChanged { zoom }),
            (false, true) => self.emit(DepthEvent::ViewportChanged { range }),
            (false, false) => false,
        }
    }

    /// Back to the first half of the subject, no cursor, no selection,
    /// zoom 1.0. Emits one notification listing whatever actually changed.
    pub fn reset_to_defaults(&mut self) -> bool {
        let viewport = default_viewport(&self.bounds);
        let mut fields = ChangedFields::empty();
        if self.viewport != viewport {
            self.viewport = viewport;
            fields |= ChangedFields::RANGE;
        }
        if self.cursor.take().is_some() {
            fields |= ChangedFields::CURSOR;
        }
        if self.selection.take().is_some() {
            fields |= ChangedFields::SELECTION;
        }
        if self.zoom != DEFAULT_ZOOM {
            self.zoom = DEFAULT_ZOOM;
            fields |= ChangedFields::ZOOM;
        }
        if fields.is_empty() {
            return false;
        }
        self.emit(DepthEvent::Reset { fields })
    }

    fn apply_viewport(&mut self, range: DepthRange) -> bool {
        if range == self.viewport {
            return false;
        }
        self.viewport = range;
        self.emit(DepthEvent::ViewportChanged { range })
    }

    fn emit(&mut self, event: DepthEvent) -> bool {
        self.seq += 1;
        let notification = Notification {
            seq: self.seq,
            event,
            snapshot: self.snapshot(),
        };
        debug!(seq = self.seq, ?event, "depth state changed");
        self.listeners.dispatch(&notification);
        true
    }
}

fn default_viewport(bounds: &DepthRange) -> DepthRange {
    DepthRange::new(bounds.from(), bounds.from() + bounds.span() / 2.0).unwrap_or(*bounds)
}
