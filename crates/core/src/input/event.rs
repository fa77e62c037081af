use std::time::Instant;

/// Keyboard navigation, already decoded from key codes by the UI shell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyCommand {
    /// One viewport span up.
    PageUp,
    /// One viewport span down.
    PageDown,
    /// Top of the subject.
    Home,
    /// Bottom of the subject.
    End,
    /// Center the viewport on a depth.
    JumpTo(f64),
    ZoomIn,
    ZoomOut,
    Reset,
}

/// Raw pointer / wheel / keyboard input in the coordinates of the panel that
/// received it. `pixel_y` values are surface pixels, padding included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Wheel or trackpad scroll; positive moves toward greater depth.
    Wheel { delta_px: f64, at: Instant },
    DragStart { pixel_y: f64, at: Instant },
    DragMove { pixel_y: f64, at: Instant },
    /// Pointer released; the session turns inertial.
    DragEnd { at: Instant },
    /// Pinch or modified wheel; `factor > 1` zooms in around `pixel_y`.
    Zoom {
        factor: f64,
        pixel_y: f64,
        at: Instant,
    },
    Click { pixel_y: f64, at: Instant },
    Key { command: KeyCommand, at: Instant },
}

impl InputEvent {
    pub fn at(&self) -> Instant {
        match self {
            Self::Wheel { at, .. }
            | Self::DragStart { at, .. }
            | Self::DragMove { at, .. }
            | Self::DragEnd { at }
            | Self::Zoom { at, .. }
            | Self::Click { at, .. }
            | Self::Key { at, .. } => *at,
        }
    }

    /// Absolute inputs bypass velocity and cancel any inertial motion.
    pub fn is_absolute(&self) -> bool {
        matches!(
            self,
            Self::Click { .. } | Self::Key { .. } | Self::Zoom { .. }
        )
    }
}
