//! Clocks and the cancellable polling schedule

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of time for the orchestrator.
///
/// Production code uses `SystemClock`; tests drive a `ManualClock` so that
/// polling cadence can be checked without real waiting.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block until `deadline` has passed
    fn sleep_until(&self, deadline: Instant);
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Rc<Cell<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Rc::new(Cell::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed.set(self.elapsed.get() + by);
    }

    /// Time since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = self.now();
        if deadline > now {
            self.advance(deadline - now);
        }
    }
}

/// Identifies one armed schedule; never reused within an orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(pub(crate) u64);

/// A repeating poll schedule owned by exactly one request.
///
/// Fires once immediately after arming, then on a fixed cadence measured
/// from the arming instant. Dropping the schedule cancels it.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    id: ScheduleId,
    interval: Duration,
    armed_at: Instant,
    next_due: Instant,
    immediate_pending: bool,
    fired: u32,
}

impl PollSchedule {
    pub(crate) fn arm(id: ScheduleId, interval: Duration, now: Instant) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        Self {
            id,
            interval,
            armed_at: now,
            next_due: now + interval,
            immediate_pending: true,
            fired: 0,
        }
    }

    pub fn id(&self) -> ScheduleId {
        self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How many times this schedule has fired
    pub fn fired(&self) -> u32 {
        self.fired
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.immediate_pending || now >= self.next_due
    }

    /// The instant at which the schedule next wants to fire
    pub fn next_deadline(&self) -> Instant {
        if self.immediate_pending {
            self.armed_at
        } else {
            self.next_due
        }
    }

    /// Record a firing. The out-of-band immediate poll does not shift the
    /// fixed cadence; a late tick skips missed slots rather than bursting.
    pub(crate) fn fire(&mut self, now: Instant) {
        self.fired += 1;
        self.immediate_pending = false;
        while self.next_due <= now {
            self.next_due += self.interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(3);

    #[test]
    fn test_immediate_fire_then_fixed_cadence() {
        let clock = ManualClock::new();
        let mut schedule = PollSchedule::arm(ScheduleId(1), INTERVAL, clock.now());

        assert!(schedule.is_due(clock.now()));
        schedule.fire(clock.now());
        assert!(!schedule.is_due(clock.now()));

        clock.advance(Duration::from_secs(2));
        assert!(!schedule.is_due(clock.now()));

        clock.advance(Duration::from_secs(1));
        assert!(schedule.is_due(clock.now()));
        schedule.fire(clock.now());
        assert_eq!(schedule.next_deadline(), clock.now() + INTERVAL);
        assert_eq!(schedule.fired(), 2);
    }

    #[test]
    fn test_late_immediate_fire_does_not_leave_slot_due() {
        let clock = ManualClock::new();
        let mut schedule = PollSchedule::arm(ScheduleId(1), INTERVAL, clock.now());

        clock.advance(Duration::from_secs(4));
        schedule.fire(clock.now());
        assert!(!schedule.is_due(clock.now()));
        assert_eq!(schedule.next_deadline(), schedule.armed_at + INTERVAL * 2);

        clock.advance(Duration::from_secs(2));
        assert!(schedule.is_due(clock.now()));
    }

    #[test]
    fn test_late_tick_skips_missed_slots() {
        let clock = ManualClock::new();
        let mut schedule = PollSchedule::arm(ScheduleId(1), INTERVAL, clock.now());
        schedule.fire(clock.now());

        clock.advance(Duration::from_secs(10));
        assert!(schedule.is_due(clock.now()));
        schedule.fire(clock.now());
        assert!(!schedule.is_due(clock.now()));
        // next slot is 12s after arming
        assert_eq!(schedule.next_deadline() - clock.now(), Duration::from_secs(2));
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        let deadline = clock.now() + Duration::from_millis(1500);
        clock.sleep_until(deadline);
        assert_eq!(shared.elapsed(), Duration::from_millis(1500));

        // Sleeping until the past is a no-op
        clock.sleep_until(deadline - Duration::from_secs(1));
        assert_eq!(shared.elapsed(), Duration::from_millis(1500));
    }
}
