use depthsync_protocol::{DepthRange, ViewportGeometry};

/// Depth ↔ pixel-Y conversion for one panel at one instant.
///
/// Holds nothing but the `DepthRange` handed out by the depth state and the
/// panel's own geometry. Build a fresh mapper for every notification;
/// keeping one across notifications is how panels drift apart.
///
/// Every method is a pure function of `(range, geometry)`: two mappers
/// built from the same range and vertically-equivalent geometry return
/// bit-identical results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    range: DepthRange,
    geometry: ViewportGeometry,
}

impl CoordinateMapper {
    pub fn new(range: DepthRange, geometry: ViewportGeometry) -> Self {
        Self { range, geometry }
    }

    pub fn range(&self) -> DepthRange {
        self.range
    }

    pub fn geometry(&self) -> ViewportGeometry {
        self.geometry
    }

    /// Pixels per depth unit, or `None` for a zero-height layout.
    fn scale(&self) -> Option<f64> {
        let usable = self.geometry.usable_height();
        (usable > 0.0).then(|| usable / self.range.span())
    }

    /// `pad_top + (depth - from) / span * usable_height`.
    ///
    /// Zero usable height yields `pad_top` rather than a division by zero.
    /// Depths outside the range extrapolate linearly.
    pub fn depth_to_pixel(&self, depth: f64) -> f64 {
        let usable = self.geometry.usable_height();
        if usable <= 0.0 {
            return self.geometry.pad_top;
        }
        self.geometry.pad_top + (depth - self.range.from()) / self.range.span() * usable
    }

    /// Exact inverse of [`depth_to_pixel`](Self::depth_to_pixel).
    ///
    /// Zero usable height yields the top of the range.
    pub fn pixel_to_depth(&self, pixel_y: f64) -> f64 {
        let usable = self.geometry.usable_height();
        if usable <= 0.0 {
            return self.range.from();
        }
        self.range.from() + (pixel_y - self.geometry.pad_top) / usable * self.range.span()
    }

    /// Scale a depth thickness into pixels with the same factor used for
    /// positions. Lithology blocks and curve segments size themselves with it.
    pub fn thickness_to_pixels(&self, depth_span: f64) -> f64 {
        match self.scale() {
            Some(scale) => depth_span * scale,
            None => 0.0,
        }
    }

    /// Inverse of [`thickness_to_pixels`](Self::thickness_to_pixels); turns a
    /// pointer travel distance into a depth delta.
    pub fn pixels_to_thickness(&self, pixel_span: f64) -> f64 {
        match self.scale() {
            Some(scale) => pixel_span / scale,
            None => 0.0,
        }
    }

    /// Pixel-Y of the top and bottom edge of the drawable depth axis.
    pub fn visible_range_px(&self) -> (f64, f64) {
        let top = self.geometry.pad_top;
        (top, top + self.geometry.usable_height())
    }

    /// Whether `pixel_to_depth(depth_to_pixel(depth))` returns `depth`
    /// within `epsilon`.
    pub fn round_trips(&self, depth: f64, epsilon: f64) -> bool {
        (self.pixel_to_depth(self.depth_to_pixel(depth)) - depth).abs() <= epsilon
    }

    /// The depth tolerance equivalent to `pixel_tolerance` pixels on this
    /// panel.
    pub fn depth_tolerance(&self, pixel_tolerance: f64) -> f64 {
        self.pixels_to_thickness(pixel_tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mapper(from: f64, to: f64, height: f64, top: f64, bottom: f64) -> CoordinateMapper {
        CoordinateMapper::new(
            DepthRange::new(from, to).unwrap(),
            ViewportGeometry::new(200.0, height).with_padding(top, bottom, 0.0, 0.0),
        )
    }

    #[test]
    fn maps_range_ends_to_usable_edges() {
        let m = mapper(100.0, 200.0, 520.0, 10.0, 10.0);
        assert_eq!(m.depth_to_pixel(100.0), 10.0);
        assert_eq!(m.depth_to_pixel(200.0), 510.0);
        assert_eq!(m.depth_to_pixel(150.0), 260.0);
        assert_eq!(m.visible_range_px(), (10.0, 510.0));
    }

    #[test]
    fn zero_usable_height_returns_padding() {
        let m = mapper(0.0, 50.0, 20.0, 12.0, 8.0);
        assert_eq!(m.depth_to_pixel(25.0), 12.0);
        assert_eq!(m.pixel_to_depth(99.0), 0.0);
        assert_eq!(m.thickness_to_pixels(10.0), 0.0);
        assert_eq!(m.pixels_to_thickness(10.0), 0.0);
    }

    #[test]
    fn thickness_uses_position_scale() {
        let m = mapper(0.0, 100.0, 400.0, 0.0, 0.0);
        assert_eq!(m.thickness_to_pixels(25.0), 100.0);
        assert_eq!(m.pixels_to_thickness(100.0), 25.0);
        let block_top = m.depth_to_pixel(30.0);
        let block_bottom = m.depth_to_pixel(55.0);
        assert!((block_bottom - block_top - m.thickness_to_pixels(25.0)).abs() < 1e-9);
    }

    #[test]
    fn depth_tolerance_matches_pixel_tolerance() {
        let m = mapper(0.0, 1000.0, 500.0, 0.0, 0.0);
        assert_eq!(m.depth_tolerance(1.0), 2.0);
    }

    proptest! {
        #[test]
        fn round_trip_within_epsilon(
            from in -5_000.0f64..5_000.0,
            span in 0.01f64..10_000.0,
            height in 1.0f64..4_000.0,
            top in 0.0f64..200.0,
            bottom in 0.0f64..200.0,
            frac in 0.0f64..=1.0,
        ) {
            let m = mapper(from, from + span, height + top + bottom, top, bottom);
            let depth = from + frac * span;
            prop_assert!(m.round_trips(depth, 1e-3));
        }

        #[test]
        fn vertically_equivalent_panels_agree_bitwise(
            from in 0.0f64..3_000.0,
            span in 1.0f64..500.0,
            depth in 0.0f64..3_500.0,
            left in 0.0f64..100.0,
            width in 10.0f64..1_000.0,
        ) {
            let range = DepthRange::new(from, from + span).unwrap();
            let column = CoordinateMapper::new(
                range,
                ViewportGeometry::new(120.0, 700.0).with_padding(24.0, 6.0, 0.0, 0.0),
            );
            let plot = CoordinateMapper::new(
                range,
                ViewportGeometry::new(width, 700.0).with_padding(24.0, 6.0, left, 2.0),
            );
            prop_assert_eq!(
                column.depth_to_pixel(depth).to_bits(),
                plot.depth_to_pixel(depth).to_bits()
            );
        }
    }
}
