use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CACHE_BUDGET_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
}

/// Tuning knobs recognized by the engine. Every field has a default and
/// can be overridden independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frame rate the input controller throttles to.
    pub target_fps: f64,
    /// Upper bound on resident payload bytes in the render cache.
    pub max_cache_budget_bytes: u64,
    /// How far the prediction window extends, as a multiple of the viewport.
    pub predictive_range_multiplier: f64,
    /// Per-frame velocity decay once a gesture is released.
    pub inertial_deceleration: f64,
    /// Quiet time after the last range change before fine builds start.
    pub settle_delay_ms: u64,
    /// Alignment tolerance between panels, in pixels.
    pub pixel_tolerance: f64,
    /// Velocity (depth units per frame) below which inertia stops.
    pub inertia_epsilon: f64,
    /// Depth round-trip tolerance for `pixel_to_depth(depth_to_pixel(d))`.
    pub round_trip_epsilon: f64,
    /// Background render workers.
    pub worker_threads: usize,
    /// Cap on tiles scheduled for a single prediction.
    pub max_prefetch_tiles: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            max_cache_budget_bytes: DEFAULT_CACHE_BUDGET_BYTES,
            predictive_range_multiplier: 1.5,
            inertial_deceleration: 0.95,
            settle_delay_ms: 150,
            pixel_tolerance: 1.0,
            inertia_epsilon: 0.01,
            round_trip_epsilon: 1e-3,
            worker_threads: 2,
            max_prefetch_tiles: 16,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON document; missing fields keep their
    /// defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("target_fps", self.target_fps)?;
        positive("max_cache_budget_bytes", self.max_cache_budget_bytes as f64)?;
        if !(self.predictive_range_multiplier.is_finite() && self.predictive_range_multiplier >= 1.0)
        {
            return Err(ConfigError::OutOfRange {
                field: "predictive_range_multiplier",
                expected: "finite and >= 1",
                value: self.predictive_range_multiplier,
            });
        }
        if !(self.inertial_deceleration > 0.0 && self.inertial_deceleration < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "inertial_deceleration",
                expected: "in (0, 1)",
                value: self.inertial_deceleration,
            });
        }
        positive("pixel_tolerance", self.pixel_tolerance)?;
        positive("inertia_epsilon", self.inertia_epsilon)?;
        positive("round_trip_epsilon", self.round_trip_epsilon)?;
        if !(2..=4).contains(&self.worker_threads) {
            return Err(ConfigError::OutOfRange {
                field: "worker_threads",
                expected: "between 2 and 4",
                value: self.worker_threads as f64,
            });
        }
        if self.max_prefetch_tiles == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_prefetch_tiles",
                expected: "at least 1",
                value: 0.0,
            });
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn with_cache_budget(mut self, bytes: u64) -> Self {
        self.max_cache_budget_bytes = bytes;
        self
    }

    pub fn with_predictive_range_multiplier(mut self, multiplier: f64) -> Self {
        self.predictive_range_multiplier = multiplier;
        self
    }

    pub fn with_inertial_deceleration(mut self, decay: f64) -> Self {
        self.inertial_deceleration = decay;
        self
    }

    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    pub fn with_pixel_tolerance(mut self, px: f64) -> Self {
        self.pixel_tolerance = px;
        self
    }

    pub fn with_inertia_epsilon(mut self, epsilon: f64) -> Self {
        self.inertia_epsilon = epsilon;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn with_max_prefetch_tiles(mut self, tiles: usize) -> Self {
        self.max_prefetch_tiles = tiles;
        self
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            expected: "finite and > 0",
            value,
        })
    }
}
