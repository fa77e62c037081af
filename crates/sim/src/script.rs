use depthsync_core::KeyCommand;

/// One scripted user action, timed in frames.
#[derive(Debug, Clone, Copy)]
pub enum Gesture {
    /// Pinch around a pixel.
    Zoom { factor: f64, pixel_y: f64 },
    /// Press at `from_y`, move evenly to `to_y` over `frames`, release.
    Drag { from_y: f64, to_y: f64, frames: u32 },
    /// `events` wheel ticks, one per frame.
    Wheel { delta_px: f64, events: u32 },
    Key(KeyCommand),
    Click { pixel_y: f64 },
    /// Let inertia and the cache run.
    Idle { frames: u32 },
}

/// A short review session: zoom in, drag downhole, coast, flick back up,
/// page and pick a depth.
pub fn review_session() -> Vec<Gesture> {
    vec![
        Gesture::Zoom {
            factor: 2.0,
            pixel_y: 300.0,
        },
        Gesture::Zoom {
            factor: 2.0,
            pixel_y: 120.0,
        },
        Gesture::Drag {
            from_y: 500.0,
            to_y: 140.0,
            frames: 12,
        },
        Gesture::Idle { frames: 240 },
        Gesture::Wheel {
            delta_px: -60.0,
            events: 6,
        },
        Gesture::Idle { frames: 240 },
        Gesture::Key(KeyCommand::PageDown),
        Gesture::Click { pixel_y: 310.0 },
        Gesture::Key(KeyCommand::JumpTo(2200.0)),
        Gesture::Idle { frames: 30 },
    ]
}
