/// Rate gate driven by a fixed-cadence outer loop.
///
/// Every call to [`PeriodicSignal::process_and_get_signal`] counts as one
/// outer tick. The signal fires whenever the counted ticks reach
/// `outer_rate / frequency`, carrying the remainder over so fire instants stay
/// evenly spaced (8 or 9 outer ticks apart for 60 Hz on a 512 Hz loop).
#[derive(Debug, Clone)]
pub struct PeriodicSignal {
    threshold: f64,
    accumulated: f64,
}

impl PeriodicSignal {
    pub fn new(frequency_hz: u32, outer_rate_hz: u32) -> Self {
        let frequency_hz = frequency_hz.max(1);
        let threshold = (outer_rate_hz.max(1) as f64 / frequency_hz as f64).max(1.0);
        Self {
            threshold,
            accumulated: 0.0,
        }
    }

    /// Outer ticks between two fire instants, on average.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn process_and_get_signal(&mut self) -> bool {
        self.accumulated += 1.0;
        if self.accumulated >= self.threshold {
            self.accumulated -= self.threshold;
            true
        } else {
            false
        }
    }
}
