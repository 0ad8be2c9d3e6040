use std::{
    cell::Cell,
    rc::Rc,
    time::{Duration, Instant},
};

/// Monotonic time source driving the tick scheduler.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Hand-driven clock. Clones share the same time, and sleeping advances it.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Fires at most once per `period`. The first poll always fires.
#[derive(Clone, Debug)]
pub struct Interval {
    period: Duration,
    last: Option<Duration>,
}

impl Interval {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true and re-arms when the period has elapsed at `now`.
    pub fn due(&mut self, now: Duration) -> bool {
        let ready = self
            .last
            .map_or(true, |last| now.saturating_sub(last) >= self.period);
        if ready {
            self.last = Some(now);
        }
        ready
    }

    pub fn until_due(&self, now: Duration) -> Duration {
        match self.last {
            None => Duration::ZERO,
            Some(last) => (last + self.period).saturating_sub(now),
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// The two independent timers of the streaming loop: backlog refill and
/// visual frames.
#[derive(Clone, Debug)]
pub struct TickScheduler {
    pub refill: Interval,
    pub frame: Interval,
}

impl TickScheduler {
    pub fn new(refill_period: Duration, frame_period: Duration) -> Self {
        Self {
            refill: Interval::new(refill_period),
            frame: Interval::new(frame_period),
        }
    }

    /// Time until the earlier of the two timers fires.
    pub fn until_next(&self, now: Duration) -> Duration {
        self.refill.until_due(now).min(self.frame.until_due(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn interval_fires_first_then_per_period() {
        let mut interval = Interval::new(10 * MS);
        assert!(interval.due(Duration::ZERO));
        assert!(!interval.due(5 * MS));
        assert!(!interval.due(9 * MS));
        assert!(interval.due(10 * MS));
        assert!(!interval.due(19 * MS));
        assert!(interval.due(25 * MS));
        assert_eq!(interval.until_due(30 * MS), 5 * MS);
    }

    #[test]
    fn reset_makes_interval_fire_immediately() {
        let mut interval = Interval::new(10 * MS);
        assert!(interval.due(Duration::ZERO));
        interval.reset();
        assert!(interval.due(MS));
    }

    #[test]
    fn scheduler_reports_earliest_deadline() {
        let mut scheduler = TickScheduler::new(10 * MS, 16 * MS);
        assert_eq!(scheduler.until_next(Duration::ZERO), Duration::ZERO);
        assert!(scheduler.refill.due(Duration::ZERO));
        assert!(scheduler.frame.due(Duration::ZERO));
        assert_eq!(scheduler.until_next(4 * MS), 6 * MS);
        assert!(scheduler.refill.due(12 * MS));
        assert_eq!(scheduler.until_next(12 * MS), 4 * MS);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(3 * MS);
        other.sleep(2 * MS);
        assert_eq!(clock.now(), 5 * MS);
    }
}
