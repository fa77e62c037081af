use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open interval of the shared depth axis, `from < to`.
///
/// Immutable: every operation returns a new value. Construction rejects
/// NaN, infinities, inverted and zero-span intervals, so a `DepthRange`
/// in hand is always usable as a divisor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDepthRange", into = "RawDepthRange")]
pub struct DepthRange {
    from: f64,
    to: f64,
}

#[derive(Serialize, Deserialize)]
struct RawDepthRange {
    from: f64,
    to: f64,
}

impl TryFrom<RawDepthRange> for DepthRange {
    type Error = String;

    fn try_from(raw: RawDepthRange) -> Result<Self, Self::Error> {
        Self::new(raw.from, raw.to)
            .ok_or_else(|| format!("invalid depth range [{}, {}]", raw.from, raw.to))
    }
}

impl From<DepthRange> for RawDepthRange {
    fn from(range: DepthRange) -> Self {
        Self {
            from: range.from,
            to: range.to,
        }
    }
}

impl DepthRange {
    /// Returns `None` unless both ends are finite and `from < to`.
    pub fn new(from: f64, to: f64) -> Option<Self> {
        (from.is_finite() && to.is_finite() && from < to).then_some(Self { from, to })
    }

    #[inline]
    pub fn from(&self) -> f64 {
        self.from
    }

    #[inline]
    pub fn to(&self) -> f64 {
        self.to
    }

    #[inline]
    pub fn span(&self) -> f64 {
        self.to - self.from
    }

    #[inline]
    pub fn center(&self) -> f64 {
        self.from + self.span() / 2.0
    }

    /// Inclusive on both ends.
    pub fn contains(&self, depth: f64) -> bool {
        depth >= self.from && depth <= self.to
    }

    pub fn overlaps(&self, other: &DepthRange) -> bool {
        self.from < other.to && other.from < self.to
    }

    pub fn intersection(&self, other: &DepthRange) -> Option<DepthRange> {
        Self::new(self.from.max(other.from), self.to.min(other.to))
    }

    /// Translate both ends by `delta`. `None` if the result is not finite.
    pub fn translate(&self, delta: f64) -> Option<DepthRange> {
        Self::new(self.from + delta, self.to + delta)
    }

    /// Clamp both ends independently into `bounds`. `None` when nothing of
    /// the range survives.
    pub fn clamp_to(&self, bounds: &DepthRange) -> Option<DepthRange> {
        self.intersection(bounds)
    }

    /// Move the range into `bounds` while preserving its span, pinning it
    /// against whichever bound it crossed. A range wider than `bounds`
    /// degrades to `bounds`.
    pub fn shift_within(&self, bounds: &DepthRange) -> DepthRange {
        let span = self.span();
        if span >= bounds.span() {
            return *bounds;
        }
        let (from, to) = if self.to > bounds.to {
            (bounds.to - span, bounds.to)
        } else if self.from < bounds.from {
            (bounds.from, bounds.from + span)
        } else {
            (self.from, self.to)
        };
        Self::new(from.max(bounds.from), to.min(bounds.to)).unwrap_or(*bounds)
    }

    /// A range of the same span centered on `depth`, not yet bounded.
    pub fn centered_on(&self, depth: f64) -> Option<DepthRange> {
        let half = self.span() / 2.0;
        Self::new(depth - half, depth + half)
    }

    /// Clamp a single depth into the range.
    pub fn clamp_depth(&self, depth: f64) -> f64 {
        depth.clamp(self.from, self.to)
    }
}

impl fmt::Display for DepthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}]", self.from, self.to)
    }
}

/// Pixel box of a drawing surface, supplied by the panel that owns it.
///
/// Panels that share the vertical axis may differ in width and horizontal
/// padding; their vertical fields must match (see
/// [`ViewportGeometry::is_vertically_equivalent`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportGeometry {
    pub pixel_height: f64,
    pub pixel_width: f64,
    pub pad_top: f64,
    pub pad_bottom: f64,
    pub pad_left: f64,
    pub pad_right: f64,
}

impl ViewportGeometry {
    pub fn new(pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            pixel_height,
            pixel_width,
            pad_top: 0.0,
            pad_bottom: 0.0,
            pad_left: 0.0,
            pad_right: 0.0,
        }
    }

    pub fn with_padding(mut self, top: f64, bottom: f64, left: f64, right: f64) -> Self {
        self.pad_top = top;
        self.pad_bottom = bottom;
        self.pad_left = left;
        self.pad_right = right;
        self
    }

    /// Height left for the depth axis once vertical padding is removed.
    /// Never negative; zero during transient zero-size layouts.
    pub fn usable_height(&self) -> f64 {
        let h = self.pixel_height - self.pad_top - self.pad_bottom;
        if h.is_finite() { h.max(0.0) } else { 0.0 }
    }

    pub fn usable_width(&self) -> f64 {
        let w = self.pixel_width - self.pad_left - self.pad_right;
        if w.is_finite() { w.max(0.0) } else { 0.0 }
    }

    /// Whether two surfaces map depth to pixel-Y identically.
    pub fn is_vertically_equivalent(&self, other: &ViewportGeometry) -> bool {
        self.pad_top == other.pad_top && self.usable_height() == other.usable_height()
    }
}

/// Rendering fidelity for a cached window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    /// Decimated build scheduled first, cheap enough to prefetch widely.
    Coarse,
    /// Full-resolution build, scheduled once the view settles.
    Fine,
}

impl QualityTier {
    pub const ALL: [QualityTier; 2] = [QualityTier::Coarse, QualityTier::Fine];
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coarse => write!(f, "coarse"),
            Self::Fine => write!(f, "fine"),
        }
    }
}
