use std::time::{Duration, Instant};

/// Deltas accumulated since the previous flush.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coalesced {
    pub delta: f64,
    pub events: u32,
}

/// Sums relative scroll deltas so that at most one reaches the depth state
/// per frame interval, however many input events arrive in between.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    interval: Duration,
    pending: f64,
    events: u32,
    last_flush: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: 0.0,
            events: 0,
            last_flush: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn push(&mut self, delta: f64) {
        self.pending += delta;
        self.events += 1;
    }

    pub fn has_pending(&self) -> bool {
        self.events > 0
    }

    /// Drain the accumulated delta if a frame interval has passed since the
    /// last flush.
    pub fn take_due(&mut self, now: Instant) -> Option<Coalesced> {
        if self.events == 0 {
            return None;
        }
        if let Some(last) = self.last_flush
            && now.saturating_duration_since(last) < self.interval
        {
            return None;
        }
        self.last_flush = Some(now);
        let drained = Coalesced {
            delta: self.pending,
            events: self.events,
        };
        self.pending = 0.0;
        self.events = 0;
        Some(drained)
    }

    /// Discard pending input.
    pub fn clear(&mut self) {
        self.pending = 0.0;
        self.events = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_within_one_interval() {
        let t0 = Instant::now();
        let interval = Duration::from_millis(16);
        let mut throttle = FrameThrottle::new(interval);

        throttle.push(1.0);
        assert_eq!(
            throttle.take_due(t0),
            Some(Coalesced {
                delta: 1.0,
                events: 1
            })
        );

        throttle.push(2.0);
        throttle.push(3.0);
        throttle.push(-0.5);
        assert_eq!(throttle.take_due(t0 + Duration::from_millis(5)), None);
        assert_eq!(
            throttle.take_due(t0 + interval),
            Some(Coalesced {
                delta: 4.5,
                events: 3
            })
        );
        assert!(!throttle.has_pending());
    }

    #[test]
    fn nothing_pending_means_nothing_due() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(16));
        assert_eq!(throttle.take_due(Instant::now()), None);
    }

    #[test]
    fn clear_discards_pending() {
        let mut throttle = FrameThrottle::new(Duration::from_millis(16));
        throttle.push(4.0);
        throttle.clear();
        assert_eq!(throttle.take_due(Instant::now()), None);
    }
}
