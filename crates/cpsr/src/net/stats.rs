use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::Rng;

pub const BANDWIDTH_WINDOW: Duration = Duration::from_secs(1);

/// Drops a share of outgoing unreliable records to exercise reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        let loss_percent = loss_percent.clamp(0.0, 100.0);
        Self {
            enabled: loss_percent > 0.0,
            loss_percent,
        }
    }

    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.r#gen::<f32>() * 100.0 < self.loss_percent
    }
}

/// Bits sent over a sliding window.
#[derive(Debug, Clone)]
pub struct BandwidthMeter {
    window: Duration,
    samples: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new(BANDWIDTH_WINDOW)
    }
}

impl BandwidthMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            bytes_in_window: 0,
        }
    }

    pub fn record(&mut self, bytes: usize) {
        self.record_at(Instant::now(), bytes);
    }

    pub fn record_at(&mut self, now: Instant, bytes: usize) {
        self.samples.push_back((now, bytes));
        self.bytes_in_window += bytes;
        self.expire(now);
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, bytes)) = self.samples.front() {
            if now.saturating_duration_since(at) <= self.window {
                break;
            }
            self.samples.pop_front();
            self.bytes_in_window -= bytes;
        }
    }

    pub fn bits_per_second(&mut self) -> f64 {
        self.bits_per_second_at(Instant::now())
    }

    pub fn bits_per_second_at(&mut self, now: Instant) -> f64 {
        self.expire(now);
        (self.bytes_in_window * 8) as f64 / self.window.as_secs_f64()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub records_sent: u64,
    pub records_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub malformed_dropped: u64,
    pub simulated_losses: u64,
}

impl NetworkStats {
    pub fn on_sent(&mut self, bytes: usize) {
        self.records_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn on_received(&mut self, bytes: usize) {
        self.records_received += 1;
        self.bytes_received += bytes as u64;
    }
}
