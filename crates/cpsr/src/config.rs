use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::net::{DEFAULT_LOOP_RATE, DEFAULT_SEND_RATE, DEFAULT_TICK_RATE};
use crate::simulation::{DEFAULT_ACCELERATION, DEFAULT_FRICTION, DEFAULT_HISTORY_CAPACITY, MotionModel};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("loop_rate {loop_rate} must be at least tick_rate {tick_rate}")]
    LoopSlowerThanTick { loop_rate: u32, tick_rate: u32 },
    #[error("friction must be in (0, 1], got {0}")]
    Friction(f64),
    #[error("acceleration must be finite, got {0}")]
    Acceleration(f64),
}

/// Parameters both sides must agree on.
///
/// Client and server load the same file; any difference in rates or motion
/// constants shows up as a correction on every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed simulation rate in Hz.
    pub tick_rate: u32,
    /// Outer loop rate in Hz.
    pub loop_rate: u32,
    /// Rate at which commands and snapshots are flushed.
    pub send_rate: u32,
    pub acceleration: f64,
    pub friction: f64,
    /// Client ticks of input kept for replay.
    pub history_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            loop_rate: DEFAULT_LOOP_RATE,
            send_rate: DEFAULT_SEND_RATE,
            acceleration: DEFAULT_ACCELERATION,
            friction: DEFAULT_FRICTION,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("tick_rate", self.tick_rate as usize),
            ("loop_rate", self.loop_rate as usize),
            ("send_rate", self.send_rate as usize),
            ("history_capacity", self.history_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        // One tick per outer iteration: a slower loop never drains the accumulator.
        if self.loop_rate < self.tick_rate {
            return Err(ConfigError::LoopSlowerThanTick {
                loop_rate: self.loop_rate,
                tick_rate: self.tick_rate,
            });
        }

        if !(self.friction > 0.0 && self.friction <= 1.0) {
            return Err(ConfigError::Friction(self.friction));
        }
        if !self.acceleration.is_finite() {
            return Err(ConfigError::Acceleration(self.acceleration));
        }

        Ok(())
    }

    pub fn motion(&self) -> MotionModel {
        MotionModel::new(self.acceleration, self.friction)
    }
}
