//! Integration test: two panels sharing the depth axis stay pixel-identical
//! through arbitrary scroll, drag, zoom and navigation sequences, and the
//! depth state never leaves its bounds.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use depthsync_core::{
    CoordinateMapper, DepthState, InputEvent, KeyCommand, ScrollInputController, ViewAdapter,
    attach,
};
use depthsync_protocol::{DepthRange, EngineConfig, Notification, ViewportGeometry};
use proptest::prelude::*;

struct Panel {
    geometry: ViewportGeometry,
    mapper: Option<CoordinateMapper>,
    notifications: usize,
}

impl ViewAdapter for Panel {
    fn geometry(&self) -> ViewportGeometry {
        self.geometry
    }

    fn on_depth_change(&mut self, _: &Notification, mapper: &CoordinateMapper) {
        self.mapper = Some(*mapper);
        self.notifications += 1;
    }
}

fn panel(width: f64, pad_left: f64) -> Rc<RefCell<Panel>> {
    Rc::new(RefCell::new(Panel {
        geometry: ViewportGeometry::new(width, 640.0).with_padding(24.0, 16.0, pad_left, 8.0),
        mapper: None,
        notifications: 0,
    }))
}

#[derive(Debug, Clone)]
enum Op {
    Wheel(f64),
    Drag(f64, f64),
    Zoom(f64, f64),
    Click(f64),
    Scroll(f64),
    SetRange(f64, f64),
    Center(f64),
    Jump(f64),
    Page(bool),
    Reset,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-400.0..400.0f64).prop_map(Op::Wheel),
        (0.0..640.0f64, 0.0..640.0f64).prop_map(|(from, to)| Op::Drag(from, to)),
        (0.2..5.0f64, 0.0..640.0f64).prop_map(|(factor, y)| Op::Zoom(factor, y)),
        (0.0..640.0f64).prop_map(Op::Click),
        prop::num::f64::ANY.prop_map(Op::Scroll),
        (prop::num::f64::ANY, prop::num::f64::ANY).prop_map(|(from, to)| Op::SetRange(from, to)),
        (-500.0..2500.0f64).prop_map(Op::Center),
        (-500.0..2500.0f64).prop_map(Op::Jump),
        any::<bool>().prop_map(Op::Page),
        Just(Op::Reset),
    ]
}

struct Rig {
    state: DepthState,
    controller: ScrollInputController,
    now: Instant,
}

impl Rig {
    fn new() -> Self {
        let bounds = DepthRange::new(0.0, 2000.0).expect("valid bounds");
        let geometry = ViewportGeometry::new(300.0, 640.0).with_padding(24.0, 16.0, 0.0, 0.0);
        Self {
            state: DepthState::new(bounds),
            controller: ScrollInputController::new(&EngineConfig::default(), geometry),
            now: Instant::now(),
        }
    }

    fn apply(&mut self, op: &Op) {
        let at = self.now;
        let Self {
            state, controller, ..
        } = self;
        match *op {
            Op::Wheel(delta_px) => {
                controller.handle(state, InputEvent::Wheel { delta_px, at });
            }
            Op::Drag(from, to) => {
                controller.handle(state, InputEvent::DragStart { pixel_y: from, at });
                let later = at + Duration::from_millis(5);
                controller.handle(state, InputEvent::DragMove { pixel_y: to, at: later });
                controller.handle(state, InputEvent::DragEnd { at: later });
            }
            Op::Zoom(factor, pixel_y) => {
                controller.handle(state, InputEvent::Zoom { factor, pixel_y, at });
            }
            Op::Click(pixel_y) => {
                controller.handle(state, InputEvent::Click { pixel_y, at });
            }
            Op::Scroll(delta) => {
                state.scroll_viewport(delta);
            }
            Op::SetRange(from, to) => {
                state.set_viewport_range(from, to);
            }
            Op::Center(depth) => {
                controller.center_on_depth(state, depth);
            }
            Op::Jump(depth) => {
                let command = KeyCommand::JumpTo(depth);
                controller.handle(state, InputEvent::Key { command, at });
            }
            Op::Page(down) => {
                let command = if down { KeyCommand::PageDown } else { KeyCommand::PageUp };
                controller.handle(state, InputEvent::Key { command, at });
            }
            Op::Reset => {
                controller.handle(state, InputEvent::Key { command: KeyCommand::Reset, at });
            }
        }
        self.now += self.controller.frame_interval();
        self.controller.tick(&mut self.state, self.now);
    }
}

fn assert_within_bounds(state: &DepthState) {
    let bounds = state.bounds();
    let viewport = state.viewport_range();
    assert!(viewport.from() < viewport.to(), "empty viewport {viewport}");
    assert!(viewport.from() >= bounds.from(), "{viewport} above {bounds}");
    assert!(viewport.to() <= bounds.to(), "{viewport} below {bounds}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn two_panels_never_drift(
        ops in prop::collection::vec(op(), 100),
        depths in prop::collection::vec(0.0..2000.0f64, 1000),
    ) {
        let mut rig = Rig::new();
        let narrow = panel(180.0, 4.0);
        let wide = panel(720.0, 40.0);
        attach(&mut rig.state, Rc::clone(&narrow));
        attach(&mut rig.state, Rc::clone(&wide));

        for op in &ops {
            rig.apply(op);
            assert_within_bounds(&rig.state);
        }

        let narrow = narrow.borrow();
        let wide = wide.borrow();
        prop_assert_eq!(narrow.notifications, wide.notifications);

        let current = rig.state.viewport_range();
        let (a, b) = match (narrow.mapper, wide.mapper) {
            (Some(a), Some(b)) => (a, b),
            _ => (
                CoordinateMapper::new(current, narrow.geometry),
                CoordinateMapper::new(current, wide.geometry),
            ),
        };
        prop_assert_eq!(a.range(), current);
        prop_assert_eq!(b.range(), current);

        for depth in depths {
            let pa = a.depth_to_pixel(depth);
            let pb = b.depth_to_pixel(depth);
            prop_assert_eq!(pa.to_bits(), pb.to_bits(), "depth {} drifted: {} vs {}", depth, pa, pb);
        }
    }

    #[test]
    fn invalid_input_leaves_state_unchanged(
        from in prop::num::f64::ANY,
        to in prop::num::f64::ANY,
    ) {
        let mut state = DepthState::new(DepthRange::new(0.0, 100.0).expect("valid bounds"));
        state.set_viewport_range(20.0, 40.0);
        let before = state.snapshot();
        let seq = state.seq();

        let changed = state.set_viewport_range(from, to);
        assert_within_bounds(&state);
        if !(from.is_finite() && to.is_finite() && from < to) {
            prop_assert!(!changed);
            prop_assert_eq!(state.snapshot(), before);
            prop_assert_eq!(state.seq(), seq);
        }
    }
}

#[test]
fn alignment_survives_resize_of_one_panel() {
    let mut state = DepthState::new(DepthRange::new(0.0, 500.0).expect("valid bounds"));
    let left = panel(200.0, 0.0);
    let right = panel(400.0, 0.0);
    attach(&mut state, Rc::clone(&left));
    attach(&mut state, Rc::clone(&right));

    // Only the width changes: the vertical mapping must not.
    right.borrow_mut().geometry.pixel_width = 950.0;
    state.scroll_viewport(12.5);

    let left = left.borrow().mapper.expect("left notified");
    let right = right.borrow().mapper.expect("right notified");
    for depth in [12.5, 100.0, 262.5, 499.0] {
        assert_eq!(left.depth_to_pixel(depth), right.depth_to_pixel(depth));
    }
}
