//! Frame pacing
//!
//! Decides whether the render loop produces a frame on this iteration. The
//! loop keeps pumping window events between frames and sleeps for at most
//! [`FrameClock::remaining`] instead of spinning.

use std::time::{Duration, Instant};

pub struct FrameClock {
    interval: Duration,
    last_frame: Option<Instant>,
}

impl FrameClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_frame: None,
        }
    }

    /// True (and the reference time moves to `now`) when a frame is due.
    /// The first call always renders.
    pub fn should_render(&mut self, now: Instant) -> bool {
        match self.last_frame {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_frame = Some(now);
                true
            }
        }
    }

    /// Time until the next frame is due
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_frame {
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(16);

    #[test]
    fn test_first_frame_renders_immediately() {
        let mut clock = FrameClock::new(INTERVAL);
        let t0 = Instant::now();
        assert_eq!(clock.remaining(t0), Duration::ZERO);
        assert!(clock.should_render(t0));
        assert!(!clock.should_render(t0));
    }

    #[test]
    fn test_exact_interval_advances() {
        let mut clock = FrameClock::new(INTERVAL);
        let t0 = Instant::now();
        assert!(clock.should_render(t0));

        let n = 50;
        let mut renders = Vec::new();
        for i in 1..=n {
            let now = t0 + INTERVAL * i;
            if clock.should_render(now) {
                renders.push(now);
            }
        }
        assert_eq!(renders.len(), n as usize);
        for pair in renders.windows(2) {
            assert!(pair[1] - pair[0] >= INTERVAL);
        }
    }

    #[test]
    fn test_at_most_once_per_interval() {
        let mut clock = FrameClock::new(INTERVAL);
        let t0 = Instant::now();
        let mut count = 0;
        // 1ms steps over 10 intervals
        for ms in 0..160 {
            if clock.should_render(t0 + Duration::from_millis(ms)) {
                count += 1;
            }
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_remaining() {
        let mut clock = FrameClock::new(INTERVAL);
        let t0 = Instant::now();
        clock.should_render(t0);
        assert_eq!(clock.remaining(t0 + Duration::from_millis(6)), Duration::from_millis(10));
        assert_eq!(clock.remaining(t0 + Duration::from_millis(40)), Duration::ZERO);
    }
}
