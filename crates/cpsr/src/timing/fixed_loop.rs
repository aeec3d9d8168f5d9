use std::thread;
use std::time::{Duration, Instant};

/// Default number of catch-up ticks allowed per loop iteration before the
/// backlog is dropped.
pub const DEFAULT_MAX_CATCH_UP_TICKS: u32 = 8;

/// Time source for [`FixedFrequencyLoop`].
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to. Sleeping advances it instantly.
#[derive(Debug, Clone, Copy)]
pub struct ManualClock {
    now: Instant,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self { now: start }
    }

    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub ticks: u64,
    pub dropped_ticks: u64,
}

/// Runs a tick callback at a fixed rate until a termination predicate holds.
///
/// Each iteration measures the wall-clock time since the previous one, adds
/// it to an accumulator and invokes the callback once per whole period in the
/// accumulator, always with the same `dt`. At most `max_catch_up_ticks`
/// callbacks run per iteration; any backlog beyond that is dropped.
pub struct FixedFrequencyLoop<C: Clock = SystemClock> {
    clock: C,
    max_catch_up_ticks: u32,
    stats: LoopStats,
}

impl Default for FixedFrequencyLoop<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedFrequencyLoop<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock> FixedFrequencyLoop<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            max_catch_up_ticks: DEFAULT_MAX_CATCH_UP_TICKS,
            stats: LoopStats::default(),
        }
    }

    pub fn with_max_catch_up_ticks(mut self, max_catch_up_ticks: u32) -> Self {
        self.max_catch_up_ticks = max_catch_up_ticks.max(1);
        self
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// Runs until `should_terminate` returns true or `tick` fails.
    ///
    /// The predicate is checked once per iteration. The first error returned
    /// by `tick` stops the loop and is handed back to the caller.
    pub fn start<F, T, E>(
        &mut self,
        target_hz: u32,
        mut tick: F,
        mut should_terminate: T,
    ) -> Result<LoopStats, E>
    where
        F: FnMut(f64) -> Result<(), E>,
        T: FnMut() -> bool,
    {
        let target_hz = target_hz.max(1);
        let period = Duration::from_nanos(1_000_000_000 / target_hz as u64);
        let dt = 1.0 / target_hz as f64;

        let mut previous = self.clock.now();
        let mut accumulator = Duration::ZERO;

        while !should_terminate() {
            let now = self.clock.now();
            accumulator += now.saturating_duration_since(previous);
            previous = now;

            let mut ran = 0;
            while accumulator >= period {
                if ran == self.max_catch_up_ticks {
                    let backlog = (accumulator.as_nanos() / period.as_nanos()) as u64;
                    self.stats.dropped_ticks += backlog;
                    log::warn!(
                        "Loop fell behind by {} ticks at {} Hz, dropping backlog",
                        backlog,
                        target_hz
                    );
                    accumulator = Duration::from_nanos(
                        (accumulator.as_nanos() % period.as_nanos()) as u64,
                    );
                    break;
                }

                tick(dt)?;
                accumulator -= period;
                ran += 1;
                self.stats.ticks += 1;
            }

            self.stats.iterations += 1;

            if accumulator < period {
                self.clock.sleep(period - accumulator);
            }
        }

        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn every_tick_gets_the_same_dt() {
        let mut fixed_loop = FixedFrequencyLoop::with_clock(ManualClock::default());
        let ticks = Cell::new(0u32);
        let mut seen_dt = Vec::new();

        let stats = fixed_loop
            .start(
                60,
                |dt| {
                    seen_dt.push(dt);
                    ticks.set(ticks.get() + 1);
                    Ok::<(), ()>(())
                },
                || ticks.get() >= 120,
            )
            .unwrap();

        assert_eq!(stats.ticks, 120);
        assert!(seen_dt.iter().all(|dt| *dt == 1.0 / 60.0));
    }

    #[test]
    fn terminates_on_first_error() {
        let mut fixed_loop = FixedFrequencyLoop::with_clock(ManualClock::default());
        let mut count = 0;

        let result = fixed_loop.start(
            60,
            |_| {
                count += 1;
                if count == 3 { Err("boom") } else { Ok(()) }
            },
            || false,
        );

        assert_eq!(result, Err("boom"));
        assert_eq!(count, 3);
    }

    #[test]
    fn termination_is_checked_before_ticking() {
        let mut fixed_loop = FixedFrequencyLoop::with_clock(ManualClock::default());
        let stats = fixed_loop
            .start(60, |_| Err("should not run"), || true)
            .unwrap();
        assert_eq!(stats.iterations, 0);
    }

    /// Clock whose first reading after start jumps a whole second ahead.
    struct StallingClock {
        inner: ManualClock,
        stalled: bool,
    }

    impl Clock for StallingClock {
        fn now(&self) -> Instant {
            self.inner.now()
        }

        fn sleep(&mut self, duration: Duration) {
            if !self.stalled {
                self.stalled = true;
                self.inner.advance(Duration::from_secs(1));
            }
            self.inner.sleep(duration);
        }
    }

    #[test]
    fn catch_up_is_capped_after_a_stall() {
        let clock = StallingClock {
            inner: ManualClock::default(),
            stalled: false,
        };
        let mut fixed_loop = FixedFrequencyLoop::with_clock(clock).with_max_catch_up_ticks(4);
        let iterations = Cell::new(0u32);

        let stats = fixed_loop
            .start(
                60,
                |_| Ok::<(), ()>(()),
                || {
                    iterations.set(iterations.get() + 1);
                    iterations.get() > 3
                },
            )
            .unwrap();

        assert!(stats.dropped_ticks > 50);
        assert!(stats.ticks <= 3 * 4);
    }
}
