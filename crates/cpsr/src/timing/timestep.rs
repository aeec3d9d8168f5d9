use std::time::{Duration, Instant};

const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Accumulates wall-clock time and hands it out in identical fixed steps.
///
/// The accumulator is kept as a `Duration` so repeated accumulation never
/// drifts; the simulation itself sees `dt()` as `1 / tick_rate` seconds.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    dt: f64,
    period: Duration,
    accumulator: Duration,
    last_update: Option<Instant>,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            dt: 1.0 / tick_rate as f64,
            period: Duration::from_nanos(1_000_000_000 / tick_rate as u64),
            accumulator: Duration::ZERO,
            last_update: None,
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    /// Accumulates the time elapsed since the previous call. The first call
    /// only primes the clock.
    pub fn accumulate_until(&mut self, now: Instant) {
        if let Some(last) = self.last_update {
            self.accumulate(now.saturating_duration_since(last));
        }
        self.last_update = Some(now);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.period
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.period {
            self.accumulator -= self.period;
            true
        } else {
            false
        }
    }

}
