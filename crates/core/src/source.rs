//! Boundary to the data layer.
//!
//! The engine reads exactly two things from loaded borehole data: the
//! subject's depth extent, and raw depth-indexed values for a window when a
//! render build needs them. Parsing, units and curve semantics stay on the
//! other side of these traits.

use depthsync_protocol::DepthRange;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("window {0} is outside the loaded subject")]
    OutOfRange(DepthRange),
    #[error("sample source unavailable: {0}")]
    Unavailable(String),
}

/// Depth extent of the loaded subject.
pub trait SubjectBounds {
    fn min_depth(&self) -> f64;
    fn max_depth(&self) -> f64;
}

/// One depth-indexed reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub depth: f64,
    pub value: f64,
}

/// Read-only access to raw samples, called from render workers.
pub trait SampleSource: Send + Sync {
    /// Samples with `window.from() <= depth <= window.to()`, ordered by depth.
    fn samples(&self, window: &DepthRange) -> Result<Vec<Sample>, SourceError>;
}

/// A [`SampleSource`] over samples held in memory, sorted by depth.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    samples: Vec<Sample>,
}

impl InMemorySource {
    /// Non-finite samples are dropped; the rest are sorted by depth.
    pub fn new(mut samples: Vec<Sample>) -> Self {
        samples.retain(|s| s.depth.is_finite() && s.value.is_finite());
        samples.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        Self { samples }
    }

    /// Evenly spaced samples of `f(depth)` from `min` to `max` inclusive.
    pub fn from_fn(min: f64, max: f64, step: f64, f: impl Fn(f64) -> f64) -> Self {
        let mut samples = Vec::new();
        if step > 0.0 && min <= max {
            let count = ((max - min) / step).floor() as usize;
            for i in 0..=count {
                let depth = min + i as f64 * step;
                samples.push(Sample {
                    depth,
                    value: f(depth),
                });
            }
        }
        Self::new(samples)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SubjectBounds for InMemorySource {
    fn min_depth(&self) -> f64 {
        self.samples.first().map_or(0.0, |s| s.depth)
    }

    fn max_depth(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.depth)
    }
}

impl SampleSource for InMemorySource {
    fn samples(&self, window: &DepthRange) -> Result<Vec<Sample>, SourceError> {
        let start = self.samples.partition_point(|s| s.depth < window.from());
        let end = self.samples.partition_point(|s| s.depth <= window.to());
        Ok(self.samples[start..end].to_vec())
    }
}
