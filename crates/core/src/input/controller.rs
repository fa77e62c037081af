use std::time::{Duration, Instant};

use depthsync_protocol::{EngineConfig, ViewportGeometry};
use tracing::{debug, trace};

use super::event::{InputEvent, KeyCommand};
use super::session::{ScrollSession, VelocityProbe};
use super::throttle::FrameThrottle;
use crate::mapper::CoordinateMapper;
use crate::state::{DepthState, MAX_ZOOM, MIN_ZOOM};

/// Frames without wheel input after which a wheel gesture counts as released.
const WHEEL_RELEASE_FRAMES: u32 = 3;
const KEY_ZOOM_STEP: f64 = 2.0;

/// What one call to [`ScrollInputController::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameOutcome {
    /// Depth delta pushed into the state this frame, if any.
    pub applied_delta: Option<f64>,
    /// Raw events folded into `applied_delta`.
    pub coalesced_events: u32,
    /// The delta came from inertia rather than live input.
    pub inertial: bool,
    /// The scroll session ended during this frame.
    pub session_ended: bool,
}

/// Turns raw input into depth-state mutations.
///
/// Relative input (wheel, drag) is converted to depth deltas with a fresh
/// [`CoordinateMapper`] for the receiving panel, summed by a
/// [`FrameThrottle`], and applied at most once per frame from
/// [`tick`](Self::tick). Releasing a gesture hands the last observed
/// velocity to an inertial [`ScrollSession`] that decays every frame.
/// Absolute input (click, key, zoom) cancels all of that and issues a single
/// state call immediately.
#[derive(Debug)]
pub struct ScrollInputController {
    geometry: ViewportGeometry,
    frame: Duration,
    decay: f64,
    epsilon: f64,
    pixel_tolerance: f64,
    throttle: FrameThrottle,
    session: Option<ScrollSession>,
    drag_anchor: Option<f64>,
    probe: VelocityProbe,
}

impl ScrollInputController {
    pub fn new(config: &EngineConfig, geometry: ViewportGeometry) -> Self {
        let frame = config.frame_interval();
        Self {
            geometry,
            frame,
            decay: config.inertial_deceleration,
            epsilon: config.inertia_epsilon,
            pixel_tolerance: config.pixel_tolerance,
            throttle: FrameThrottle::new(frame),
            session: None,
            drag_anchor: None,
            probe: VelocityProbe::new(),
        }
    }

    /// Geometry of the panel input arrives on; update on resize.
    pub fn set_geometry(&mut self, geometry: ViewportGeometry) {
        self.geometry = geometry;
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame
    }

    pub fn velocity_probe(&self) -> VelocityProbe {
        self.probe.clone()
    }

    pub fn session(&self) -> Option<&ScrollSession> {
        self.session.as_ref()
    }

    pub fn is_scrolling(&self) -> bool {
        self.session.is_some() || self.throttle.has_pending()
    }

    pub fn is_inertial(&self) -> bool {
        self.session.as_ref().is_some_and(ScrollSession::is_inertial)
    }

    /// Feed one input event. Returns whether the depth state changed right
    /// away; relative input is deferred to the next [`tick`](Self::tick).
    pub fn handle(&mut self, state: &mut DepthState, event: InputEvent) -> bool {
        if event.is_absolute() {
            self.cancel_inertia();
            self.throttle.clear();
            self.drag_anchor = None;
        }
        match event {
            InputEvent::Wheel { delta_px, at } => {
                let delta = self.mapper(state).pixels_to_thickness(delta_px);
                self.track(delta, at);
                false
            }
            InputEvent::DragStart { pixel_y, at } => {
                self.cancel_inertia();
                self.throttle.clear();
                self.drag_anchor = pixel_y.is_finite().then_some(pixel_y);
                self.session = Some(ScrollSession::begin(at));
                false
            }
            InputEvent::DragMove { pixel_y, at } => {
                let Some(anchor) = self.drag_anchor else {
                    return false;
                };
                if !pixel_y.is_finite() {
                    trace!("dropping non-finite drag position");
                    return false;
                }
                // Pointer jitter below the tolerance is not a move.
                if (pixel_y - anchor).abs() < self.pixel_tolerance {
                    return false;
                }
                // Content follows the pointer: dragging down reveals shallower depths.
                let delta = -self.mapper(state).pixels_to_thickness(pixel_y - anchor);
                if self.track(delta, at) {
                    self.drag_anchor = Some(pixel_y);
                }
                false
            }
            InputEvent::DragEnd { .. } => {
                self.drag_anchor = None;
                self.release();
                false
            }
            InputEvent::Zoom {
                factor, pixel_y, ..
            } => self.zoom_about(state, factor, Some(pixel_y)),
            InputEvent::Click { pixel_y, .. } => {
                let depth = self.mapper(state).pixel_to_depth(pixel_y);
                state.set_cursor_depth(depth)
            }
            InputEvent::Key { command, .. } => self.apply_key(state, command),
        }
    }

    /// Advance one frame: flush coalesced input, or step inertia.
    pub fn tick(&mut self, state: &mut DepthState, now: Instant) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        if let Some(batch) = self.throttle.take_due(now) {
            trace!(delta = batch.delta, events = batch.events, "flushing coalesced scroll");
            state.scroll_viewport(batch.delta);
            outcome.applied_delta = Some(batch.delta);
            outcome.coalesced_events = batch.events;
            return outcome;
        }

        let Some(session) = self.session.as_mut() else {
            return outcome;
        };

        if !session.is_inertial() {
            let idle = now.saturating_duration_since(session.last_event_time());
            if self.drag_anchor.is_none() && idle >= self.frame * WHEEL_RELEASE_FRAMES {
                self.release();
            }
            return outcome;
        }

        if let Some(delta) = session.step(now, self.frame) {
            let moved = state.scroll_viewport(delta);
            outcome.applied_delta = Some(delta);
            outcome.inertial = true;
            if moved {
                session.decay(self.decay, self.epsilon);
            } else {
                session.end();
            }
            if session.is_active() {
                self.probe.publish(session.velocity());
            } else {
                outcome.session_ended = true;
                self.finish_session();
            }
        }
        outcome
    }

    /// Start coasting at `velocity` depth units per frame, as if a gesture
    /// had just been released.
    pub fn start_inertia(&mut self, velocity: f64, at: Instant) {
        self.throttle.clear();
        self.drag_anchor = None;
        if !velocity.is_finite() || velocity.abs() < self.epsilon {
            self.finish_session();
            return;
        }
        debug!(velocity, "inertial scroll started");
        self.session = Some(ScrollSession::inertial(velocity, at));
        self.probe.publish(velocity);
    }

    /// Stop any session, inertial or not.
    pub fn cancel_inertia(&mut self) {
        if self.session.is_some() {
            debug!("scroll session cancelled");
        }
        self.finish_session();
    }

    /// Programmatic recentering; supersedes any running session.
    pub fn center_on_depth(&mut self, state: &mut DepthState, depth: f64) -> bool {
        self.cancel_inertia();
        self.throttle.clear();
        state.center_on_depth(depth)
    }

    fn mapper(&self, state: &DepthState) -> CoordinateMapper {
        CoordinateMapper::new(state.viewport_range(), self.geometry)
    }

    fn track(&mut self, delta: f64, at: Instant) -> bool {
        if self.session.as_ref().is_none_or(ScrollSession::is_inertial) {
            self.session = Some(ScrollSession::begin(at));
        }
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.record(delta, at, self.frame) {
            return false;
        }
        self.throttle.push(delta);
        self.probe.publish(session.velocity());
        true
    }

    fn release(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.velocity().abs() < self.epsilon {
            self.finish_session();
            return;
        }
        debug!(velocity = session.velocity(), "gesture released, coasting");
        session.release();
    }

    fn finish_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.end();
        }
        self.probe.publish(0.0);
    }

    fn apply_key(&mut self, state: &mut DepthState, command: KeyCommand) -> bool {
        let span = state.viewport_range().span();
        let bounds = state.bounds();
        match command {
            KeyCommand::PageUp => state.scroll_viewport(-span),
            KeyCommand::PageDown => state.scroll_viewport(span),
            KeyCommand::Home => state.center_on_depth(bounds.from()),
            KeyCommand::End => state.center_on_depth(bounds.to()),
            KeyCommand::JumpTo(depth) => state.center_on_depth(depth),
            KeyCommand::ZoomIn => self.zoom_about(state, KEY_ZOOM_STEP, None),
            KeyCommand::ZoomOut => self.zoom_about(state, 1.0 / KEY_ZOOM_STEP, None),
            KeyCommand::Reset => state.reset_to_defaults(),
        }
    }

    /// Multiply the zoom level by `factor` and resize the viewport to
    /// `default_span / zoom`, keeping the depth under `anchor_px` (or the
    /// viewport center) at the same relative position.
    fn zoom_about(&mut self, state: &mut DepthState, factor: f64, anchor_px: Option<f64>) -> bool {
        if !(factor.is_finite() && factor > 0.0) {
            trace!(factor, "zoom rejected");
            return false;
        }
        let target = (state.zoom_level() * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let viewport = state.viewport_range();
        let (anchor, frac) = match anchor_px.filter(|px| px.is_finite()) {
            Some(px) => {
                let depth = self.mapper(state).pixel_to_depth(px);
                (depth, (depth - viewport.from()) / viewport.span())
            }
            None => (viewport.center(), 0.5),
        };
        let frac = frac.clamp(0.0, 1.0);
        let span = (state.default_span() / target).min(state.bounds().span());
        let from = anchor - frac * span;
        state.zoom_to(target, from, from + span)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use depthsync_protocol::{ChangedFields, DepthRange};

    use super::*;

    fn setup(max: f64) -> (DepthState, ScrollInputController, Instant) {
        let state = DepthState::new(DepthRange::new(0.0, max).unwrap());
        let controller = ScrollInputController::new(
            &EngineConfig::default(),
            ViewportGeometry::new(300.0, 500.0),
        );
        (state, controller, Instant::now())
    }

    fn count_notifications(state: &mut DepthState) -> Rc<RefCell<u32>> {
        let count = Rc::new(RefCell::new(0));
        let sink = Rc::clone(&count);
        state.subscribe(move |_| *sink.borrow_mut() += 1);
        count
    }

    #[test]
    fn burst_of_wheel_events_becomes_one_mutation() {
        let (mut state, mut controller, t0) = setup(1000.0);
        let count = count_notifications(&mut state);
        let frame = controller.frame_interval();

        for i in 0..10u32 {
            controller.handle(
                &mut state,
                InputEvent::Wheel {
                    delta_px: 10.0,
                    at: t0 + Duration::from_millis(u64::from(i)),
                },
            );
        }
        let outcome = controller.tick(&mut state, t0 + frame);

        // 500px usable over a 500-unit viewport: 1px = 1 depth unit.
        assert_eq!(outcome.coalesced_events, 10);
        assert_eq!(outcome.applied_delta, Some(100.0));
        assert_eq!(*count.borrow(), 1);
        assert_eq!(state.viewport_range(), DepthRange::new(100.0, 600.0).unwrap());
    }

    #[test]
    fn drag_moves_content_with_pointer() {
        let (mut state, mut controller, t0) = setup(1000.0);
        state.set_viewport_range(200.0, 700.0);
        controller.handle(&mut state, InputEvent::DragStart { pixel_y: 300.0, at: t0 });
        controller.handle(
            &mut state,
            InputEvent::DragMove {
                pixel_y: 250.0,
                at: t0 + Duration::from_millis(8),
            },
        );
        controller.tick(&mut state, t0 + Duration::from_millis(16));
        assert_eq!(state.viewport_range(), DepthRange::new(250.0, 750.0).unwrap());
    }

    #[test]
    fn drag_jitter_below_tolerance_is_ignored() {
        let (mut state, mut controller, t0) = setup(1000.0);
        controller.handle(&mut state, InputEvent::DragStart { pixel_y: 300.0, at: t0 });
        controller.handle(
            &mut state,
            InputEvent::DragMove {
                pixel_y: 300.4,
                at: t0 + Duration::from_millis(8),
            },
        );
        let outcome = controller.tick(&mut state, t0 + Duration::from_millis(16));
        assert_eq!(outcome.applied_delta, None);
        assert_eq!(state.viewport_range(), DepthRange::new(0.0, 500.0).unwrap());
    }

    #[test]
    fn inertia_decays_to_rest() {
        let (mut state, mut controller, t0) = setup(10_000.0);
        let frame = controller.frame_interval();
        controller.start_inertia(2.0, t0);
        let mut now = t0;
        let mut frames = 0;
        while controller.session().is_some() {
            now += frame;
            controller.tick(&mut state, now);
            frames += 1;
            assert!(frames < 1_000, "inertia never settled");
        }
        assert!(state.viewport_range().from() > 0.0);
        assert_eq!(controller.velocity_probe().get(), 0.0);
    }

    #[test]
    fn inertia_stops_at_bound() {
        let (mut state, mut controller, t0) = setup(1000.0);
        state.set_viewport_range(495.0, 995.0);
        controller.start_inertia(50.0, t0);
        let first = controller.tick(&mut state, t0);
        assert!(first.inertial);
        assert_eq!(state.viewport_range().to(), 1000.0);
        let second = controller.tick(&mut state, t0 + controller.frame_interval());
        assert!(second.session_ended);
        assert!(controller.session().is_none());
    }

    #[test]
    fn click_cancels_inertia_and_sets_cursor() {
        let (mut state, mut controller, t0) = setup(1000.0);
        controller.start_inertia(5.0, t0);
        let changed = controller.handle(
            &mut state,
            InputEvent::Click {
                pixel_y: 100.0,
                at: t0,
            },
        );
        assert!(changed);
        assert!(controller.session().is_none());
        assert_eq!(state.cursor_depth(), Some(100.0));
        assert_eq!(state.viewport_range(), DepthRange::new(0.0, 500.0).unwrap());
    }

    #[test]
    fn key_navigation() {
        let (mut state, mut controller, t0) = setup(1000.0);
        let key = |command| InputEvent::Key { command, at: t0 };
        controller.handle(&mut state, key(KeyCommand::PageDown));
        assert_eq!(state.viewport_range(), DepthRange::new(500.0, 1000.0).unwrap());
        controller.handle(&mut state, key(KeyCommand::Home));
        assert_eq!(state.viewport_range(), DepthRange::new(0.0, 500.0).unwrap());
        controller.handle(&mut state, key(KeyCommand::JumpTo(600.0)));
        assert_eq!(state.viewport_range(), DepthRange::new(350.0, 850.0).unwrap());
        controller.handle(&mut state, key(KeyCommand::End));
        assert_eq!(state.viewport_range(), DepthRange::new(500.0, 1000.0).unwrap());
    }

    #[test]
    fn zoom_keeps_anchor_depth_under_pointer() {
        let (mut state, mut controller, t0) = setup(1000.0);
        let geometry = ViewportGeometry::new(300.0, 500.0);
        let before = CoordinateMapper::new(state.viewport_range(), geometry).pixel_to_depth(100.0);
        controller.handle(
            &mut state,
            InputEvent::Zoom {
                factor: 2.0,
                pixel_y: 100.0,
                at: t0,
            },
        );
        assert_eq!(state.zoom_level(), 2.0);
        assert_eq!(state.viewport_range().span(), 250.0);
        let after = CoordinateMapper::new(state.viewport_range(), geometry).pixel_to_depth(100.0);
        assert!((before - after).abs() < 1e-9);
    }

    #[test]
    fn zoom_gesture_notifies_once_with_final_state() {
        let (mut state, mut controller, t0) = setup(1000.0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        state.subscribe(move |n| sink.borrow_mut().push(*n));

        controller.handle(
            &mut state,
            InputEvent::Zoom {
                factor: 2.0,
                pixel_y: 250.0,
                at: t0,
            },
        );
        controller.handle(&mut state, InputEvent::Key { command: KeyCommand::ZoomIn, at: t0 });

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].fields(), ChangedFields::ZOOM | ChangedFields::RANGE);
        assert_eq!(seen[0].snapshot.zoom, 2.0);
        assert_eq!(seen[0].snapshot.viewport, DepthRange::new(125.0, 375.0).unwrap());
        assert_eq!(seen[1].snapshot.zoom, 4.0);
        assert_eq!(seen[1].snapshot.viewport.span(), 125.0);
    }

    #[test]
    fn wheel_gesture_releases_into_inertia() {
        let (mut state, mut controller, t0) = setup(10_000.0);
        let frame = controller.frame_interval();
        let mut now = t0;
        for _ in 0..5 {
            controller.handle(&mut state, InputEvent::Wheel { delta_px: 20.0, at: now });
            controller.tick(&mut state, now);
            now += frame;
        }
        assert!(!controller.is_inertial());
        for _ in 0..WHEEL_RELEASE_FRAMES {
            now += frame;
            controller.tick(&mut state, now);
        }
        assert!(controller.is_inertial());
        assert!(controller.velocity_probe().get() > 0.0);
    }
}
