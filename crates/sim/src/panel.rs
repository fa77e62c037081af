use depthsync_core::{CoordinateMapper, ViewAdapter};
use depthsync_protocol::{ChangedFields, DepthRange, Notification, ViewportGeometry};
use tracing::trace;

/// Stand-in for a drawing panel: remembers the mapper from the latest
/// notification and nothing else.
pub struct SimPanel {
    name: &'static str,
    geometry: ViewportGeometry,
    interest: ChangedFields,
    mapper: Option<CoordinateMapper>,
    notifications: u64,
}

impl SimPanel {
    pub fn new(name: &'static str, geometry: ViewportGeometry, interest: ChangedFields) -> Self {
        Self {
            name,
            geometry,
            interest,
            mapper: None,
            notifications: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mapper(&self) -> Option<CoordinateMapper> {
        self.mapper
    }

    pub fn notifications(&self) -> u64 {
        self.notifications
    }
}

impl ViewAdapter for SimPanel {
    fn geometry(&self) -> ViewportGeometry {
        self.geometry
    }

    fn interest(&self) -> ChangedFields {
        self.interest
    }

    fn on_depth_change(&mut self, notification: &Notification, mapper: &CoordinateMapper) {
        trace!(panel = self.name, seq = notification.seq, range = %mapper.range(), "panel repositioned");
        self.mapper = Some(*mapper);
        self.notifications += 1;
    }
}

/// Evenly spaced depths across `range`, both ends included.
fn probe_depths(range: DepthRange, probes: usize) -> impl Iterator<Item = f64> {
    let steps = probes.max(2) - 1;
    (0..=steps).map(move |i| range.from() + range.span() * i as f64 / steps as f64)
}

/// Depths (within `a`'s range) at which two panels disagree on pixel-Y.
pub fn misaligned_depths(a: &CoordinateMapper, b: &CoordinateMapper, probes: usize) -> Vec<f64> {
    probe_depths(a.range(), probes)
        .filter(|&depth| a.depth_to_pixel(depth).to_bits() != b.depth_to_pixel(depth).to_bits())
        .collect()
}

/// Depths that do not survive a pixel round trip within `epsilon`.
pub fn lossy_depths(mapper: &CoordinateMapper, probes: usize, epsilon: f64) -> Vec<f64> {
    probe_depths(mapper.range(), probes)
        .filter(|&depth| !mapper.round_trips(depth, epsilon))
        .collect()
}
