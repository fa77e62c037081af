//! Reference tile renderer: reduces a tile's samples to a min/max envelope.

use depthsync_protocol::{DepthRange, QualityTier};
use serde::{Deserialize, Serialize};

use crate::cache::{BuildContext, BuildError, TileRenderer};
use crate::source::SampleSource;

pub const COARSE_BUCKETS: usize = 64;
pub const FINE_BUCKETS: usize = 512;

/// Min/max of the samples falling in one depth slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub from: f64,
    pub to: f64,
    pub min: f64,
    pub max: f64,
    pub count: u32,
}

/// Decoded payload of a [`DecimatingRenderer`] build. Empty slices are
/// omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub range: DepthRange,
    pub tier: QualityTier,
    pub buckets: Vec<Bucket>,
}

impl Envelope {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimatingRenderer {
    coarse_buckets: usize,
    fine_buckets: usize,
}

impl Default for DecimatingRenderer {
    fn default() -> Self {
        Self {
            coarse_buckets: COARSE_BUCKETS,
            fine_buckets: FINE_BUCKETS,
        }
    }
}

impl DecimatingRenderer {
    pub fn new(coarse_buckets: usize, fine_buckets: usize) -> Self {
        Self {
            coarse_buckets: coarse_buckets.max(1),
            fine_buckets: fine_buckets.max(1),
        }
    }

    pub fn buckets_for(&self, tier: QualityTier) -> usize {
        match tier {
            QualityTier::Coarse => self.coarse_buckets,
            QualityTier::Fine => self.fine_buckets,
        }
    }
}

impl TileRenderer for DecimatingRenderer {
    fn render(&self, ctx: &BuildContext, source: &dyn SampleSource) -> Result<Vec<u8>, BuildError> {
        let key = ctx.key();
        let range = key.range;
        let samples = source.samples(&range)?;
        let count = self.buckets_for(key.tier);
        let width = range.span() / count as f64;

        let mut buckets = Vec::new();
        let mut rest = samples.as_slice();
        for index in 0..count {
            ctx.checkpoint()?;
            let from = range.from() + index as f64 * width;
            let to = if index + 1 == count { range.to() } else { from + width };
            // The last slice is closed so a sample at `range.to()` lands in it.
            let split = if index + 1 == count {
                rest.len()
            } else {
                rest.partition_point(|s| s.depth < to)
            };
            let (slice, tail) = rest.split_at(split);
            rest = tail;
            if slice.is_empty() {
                continue;
            }
            let (min, max) = slice
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                    (lo.min(s.value), hi.max(s.value))
                });
            buckets.push(Bucket {
                from,
                to,
                min,
                max,
                count: u32::try_from(slice.len()).unwrap_or(u32::MAX),
            });
        }

        let envelope = Envelope {
            range,
            tier: key.tier,
            buckets,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, CancellationSource};
    use crate::source::InMemorySource;

    fn key(from: f64, to: f64, tier: QualityTier) -> CacheKey {
        CacheKey::new(DepthRange::new(from, to).unwrap(), 1.0, tier)
    }

    #[test]
    fn envelope_covers_every_sample() {
        let source = InMemorySource::from_fn(0.0, 100.0, 0.5, |d| (d / 10.0).sin());
        let renderer = DecimatingRenderer::new(8, 32);
        let ctx = BuildContext::uncancellable(key(0.0, 100.0, QualityTier::Coarse));
        let bytes = renderer.render(&ctx, &source).unwrap();
        let envelope = Envelope::decode(&bytes).unwrap();

        assert_eq!(envelope.buckets.len(), 8);
        let total: u32 = envelope.buckets.iter().map(|b| b.count).sum();
        assert_eq!(total as usize, source.len());
        assert!(envelope.buckets.iter().all(|b| b.min <= b.max));
        assert_eq!(envelope.buckets.last().unwrap().to, 100.0);
    }

    #[test]
    fn fine_tier_uses_more_buckets() {
        let source = InMemorySource::from_fn(0.0, 100.0, 0.1, |d| d);
        let renderer = DecimatingRenderer::default();
        let coarse = renderer
            .render(&BuildContext::uncancellable(key(0.0, 100.0, QualityTier::Coarse)), &source)
            .unwrap();
        let fine = renderer
            .render(&BuildContext::uncancellable(key(0.0, 100.0, QualityTier::Fine)), &source)
            .unwrap();
        assert_eq!(Envelope::decode(&coarse).unwrap().buckets.len(), COARSE_BUCKETS);
        assert_eq!(Envelope::decode(&fine).unwrap().buckets.len(), FINE_BUCKETS);
    }

    #[test]
    fn cancelled_build_stops() {
        let source = InMemorySource::from_fn(0.0, 10.0, 1.0, |d| d);
        let cancel = CancellationSource::new();
        cancel.cancel();
        let ctx = BuildContext::new(key(0.0, 10.0, QualityTier::Fine), cancel.token());
        let err = DecimatingRenderer::default().render(&ctx, &source).unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }

    #[test]
    fn empty_window_renders_no_buckets() {
        let source = InMemorySource::from_fn(0.0, 10.0, 1.0, |d| d);
        let ctx = BuildContext::uncancellable(key(20.0, 30.0, QualityTier::Coarse));
        let bytes = DecimatingRenderer::default().render(&ctx, &source).unwrap();
        assert!(Envelope::decode(&bytes).unwrap().buckets.is_empty());
    }
}
