use std::time::{Duration, Instant};

/// A Timer with a given duration after which it will enter into a "Ringing"
/// state. The Timer can be reset at an given time, or manually set to start
/// "Ringing" again.
#[derive(Debug, Clone)]
pub struct Timer {
    duration: Duration,
    last: Instant,
}

impl Timer {
    /// Create a new Timer with a given Duration
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last: Instant::now(),
        }
    }

    /// Reset the Timer to stop ringing and wait till 'Duration' has elapsed
    /// again
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Gets whether or not the Timer is "Ringing" (i.e. the given Duration has
    /// elapsed since the last "reset")
    pub fn ringing(&self) -> bool {
        Instant::now().saturating_duration_since(self.last) > self.duration
    }

    /// Manually causes the Timer to begin "Ringing"
    pub fn ring_manual(&mut self) {
        self.last = Instant::now() - self.duration - Duration::from_millis(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timer_is_not_ringing() {
        let timer = Timer::new(Duration::from_secs(60));
        assert!(!timer.ringing());
    }

    #[test]
    fn ring_manual_rings_immediately() {
        let mut timer = Timer::new(Duration::from_secs(60));
        timer.ring_manual();
        assert!(timer.ringing());
    }

    #[test]
    fn reset_stops_ringing() {
        let mut timer = Timer::new(Duration::from_secs(60));
        timer.ring_manual();
        timer.reset();
        assert!(!timer.ringing());
    }
}
