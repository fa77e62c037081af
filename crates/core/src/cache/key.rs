use std::hash::{Hash, Hasher};

use depthsync_protocol::{DepthRange, QualityTier};

/// Identifies one render payload: a depth window at a zoom level and
/// fidelity. Equality and hashing are on the exact bit patterns, with `-0.0`
/// folded into `0.0`.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey {
    pub range: DepthRange,
    pub zoom: f64,
    pub tier: QualityTier,
}

impl CacheKey {
    pub fn new(range: DepthRange, zoom: f64, tier: QualityTier) -> Self {
        Self { range, zoom, tier }
    }

    pub fn with_tier(self, tier: QualityTier) -> Self {
        Self { tier, ..self }
    }

    fn bits(&self) -> (u64, u64, u64) {
        (
            canonical_bits(self.range.from()),
            canonical_bits(self.range.to()),
            canonical_bits(self.zoom),
        )
    }
}

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 { 0.0f64.to_bits() } else { value.to_bits() }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.tier == other.tier && self.bits() == other.bits()
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
        self.tier.hash(state);
    }
}

/// Fixed partition of the subject into equal tiles, anchored at the top
/// bound. Keys built from the grid stay identical while the viewport moves,
/// so a tile prefetched ahead of the viewport is later hit by it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileGrid {
    bounds: DepthRange,
    span: f64,
}

impl TileGrid {
    /// Tiles of `default_span / zoom`, never wider than the subject.
    pub fn new(bounds: DepthRange, default_span: f64, zoom: f64) -> Self {
        let span = default_span / zoom;
        let span = if span.is_finite() && span > 0.0 {
            span.min(bounds.span())
        } else {
            bounds.span()
        };
        Self { bounds, span }
    }

    pub fn bounds(&self) -> DepthRange {
        self.bounds
    }

    pub fn tile_span(&self) -> f64 {
        self.span
    }

    /// Index of the tile containing `depth`.
    pub fn index_of(&self, depth: f64) -> i64 {
        ((depth - self.bounds.from()) / self.span).floor() as i64
    }

    /// The `index`th tile, truncated at the bottom bound.
    pub fn tile(&self, index: i64) -> Option<DepthRange> {
        if index < 0 {
            return None;
        }
        let from = self.bounds.from() + index as f64 * self.span;
        let to = (from + self.span).min(self.bounds.to());
        DepthRange::new(from, to)
    }

    /// Tiles intersecting `range`, top to bottom. A range ending exactly on a
    /// tile edge does not pull in the next tile.
    pub fn tiles_overlapping(&self, range: &DepthRange) -> Vec<DepthRange> {
        let Some(range) = range.clamp_to(&self.bounds) else {
            return Vec::new();
        };
        let first = self.index_of(range.from()).max(0);
        let last = (((range.to() - self.bounds.from()) / self.span).ceil() as i64 - 1).max(first);
        (first..=last).filter_map(|index| self.tile(index)).collect()
    }
}
