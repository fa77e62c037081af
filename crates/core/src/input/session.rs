use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

/// Shared read-out of the current scroll velocity (depth units per frame,
/// positive toward greater depth). The controller writes it; the render
/// cache's prediction listener reads it.
#[derive(Debug, Clone, Default)]
pub struct VelocityProbe(Arc<AtomicU64>);

impl VelocityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, velocity: f64) {
        self.0.store(velocity.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackSample {
    at: Instant,
    position: f64,
}

/// Velocity from the two most recent valid samples.
///
/// A sample older than the last accepted one is dropped. A sample with the
/// same timestamp replaces the last one's position.
#[derive(Debug, Clone, Default)]
struct VelocityTracker {
    prev: Option<TrackSample>,
    last: Option<TrackSample>,
}

impl VelocityTracker {
    fn push(&mut self, at: Instant, position: f64) -> bool {
        if !position.is_finite() {
            return false;
        }
        if let Some(last) = self.last.as_mut() {
            if at < last.at {
                return false;
            }
            if at == last.at {
                last.position = position;
                return true;
            }
        }
        self.prev = self.last.take();
        self.last = Some(TrackSample { at, position });
        true
    }

    /// Depth units per second, once two distinct samples exist.
    fn velocity_per_sec(&self) -> Option<f64> {
        let (prev, last) = (self.prev?, self.last?);
        let dt = last.at.duration_since(prev.at).as_secs_f64();
        (dt > 0.0).then(|| (last.position - prev.position) / dt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Input is still arriving.
    Tracking,
    /// Gesture released; coasting on decaying velocity.
    Inertial,
}

/// Per-gesture scroll state. Lives from the first event of a gesture until
/// the velocity decays below epsilon or an absolute input supersedes it.
#[derive(Debug, Clone)]
pub struct ScrollSession {
    velocity: f64,
    last_event_time: Instant,
    active: bool,
    phase: SessionPhase,
    position: f64,
    tracker: VelocityTracker,
    next_step_at: Option<Instant>,
}

impl ScrollSession {
    pub(crate) fn begin(at: Instant) -> Self {
        let mut tracker = VelocityTracker::default();
        tracker.push(at, 0.0);
        Self {
            velocity: 0.0,
            last_event_time: at,
            active: true,
            phase: SessionPhase::Tracking,
            position: 0.0,
            tracker,
            next_step_at: None,
        }
    }

    /// A released session coasting at `velocity` from the next frame on.
    pub(crate) fn inertial(velocity: f64, at: Instant) -> Self {
        let mut session = Self::begin(at);
        session.phase = SessionPhase::Inertial;
        session.velocity = velocity;
        session
    }

    /// Depth units per frame.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn last_event_time(&self) -> Instant {
        self.last_event_time
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_inertial(&self) -> bool {
        self.phase == SessionPhase::Inertial
    }

    /// Record one relative movement. Returns `false` (and changes nothing)
    /// for a malformed sample.
    pub(crate) fn record(&mut self, delta: f64, at: Instant, frame: Duration) -> bool {
        if !delta.is_finite() {
            trace!(delta, "dropping non-finite scroll sample");
            return false;
        }
        let position = self.position + delta;
        if !self.tracker.push(at, position) {
            trace!("dropping out-of-order scroll sample");
            return false;
        }
        self.position = position;
        self.last_event_time = at;
        if let Some(per_sec) = self.tracker.velocity_per_sec() {
            self.velocity = per_sec * frame.as_secs_f64();
        }
        true
    }

    pub(crate) fn release(&mut self) {
        self.phase = SessionPhase::Inertial;
        self.next_step_at = None;
    }

    /// Advance one inertial frame if one is due. Returns the delta to apply.
    pub(crate) fn step(&mut self, now: Instant, frame: Duration) -> Option<f64> {
        if self.phase != SessionPhase::Inertial {
            return None;
        }
        if self.next_step_at.is_some_and(|due| now < due) {
            return None;
        }
        self.next_step_at = Some(now + frame);
        Some(self.velocity)
    }

    /// Apply per-frame decay; ends the session once `|velocity| < epsilon`.
    pub(crate) fn decay(&mut self, factor: f64, epsilon: f64) {
        self.velocity *= factor;
        if self.velocity.abs() < epsilon {
            self.end();
        }
    }

    pub(crate) fn end(&mut self) {
        self.active = false;
        self.velocity = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(10);

    #[test]
    fn velocity_from_last_two_samples() {
        let t0 = Instant::now();
        let mut session = ScrollSession::begin(t0);
        assert!(session.record(5.0, t0 + FRAME, FRAME));
        assert!(session.record(10.0, t0 + FRAME * 2, FRAME));
        assert!((session.velocity() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_sample_is_dropped() {
        let t0 = Instant::now();
        let mut session = ScrollSession::begin(t0);
        assert!(session.record(4.0, t0 + FRAME * 2, FRAME));
        let before = session.velocity();
        assert!(!session.record(100.0, t0 + FRAME, FRAME));
        assert!(!session.record(f64::NAN, t0 + FRAME * 3, FRAME));
        assert_eq!(session.velocity(), before);
        assert!(session.record(4.0, t0 + FRAME * 3, FRAME));
        assert!((session.velocity() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn decay_ends_below_epsilon() {
        let mut session = ScrollSession::inertial(0.02, Instant::now());
        session.decay(0.5, 0.01);
        assert!(session.is_active());
        session.decay(0.5, 0.01);
        assert!(!session.is_active());
        assert_eq!(session.velocity(), 0.0);
    }

    #[test]
    fn steps_at_most_once_per_frame() {
        let t0 = Instant::now();
        let mut session = ScrollSession::inertial(3.0, t0);
        assert_eq!(session.step(t0, FRAME), Some(3.0));
        assert_eq!(session.step(t0 + FRAME / 2, FRAME), None);
        assert_eq!(session.step(t0 + FRAME, FRAME), Some(3.0));
    }

    #[test]
    fn probe_round_trips_velocity() {
        let probe = VelocityProbe::new();
        let reader = probe.clone();
        probe.publish(-2.5);
        assert_eq!(reader.get(), -2.5);
    }
}
